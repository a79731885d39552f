//! Temporal link matrix
//!
//! Records the order in which slots were written. `link[b, i, j]` is the
//! degree to which slot `i` was written directly after slot `j`; a precedence
//! vector holds the decayed record of the most recent write distribution.
//! Reads can then traverse memory in write order (forward) or against it
//! (backward).

use candle_core::{DType, Tensor};

use crate::error::MemoryError;
use crate::MemoryResult;

/// Link matrix and precedence weights for one episode.
#[derive(Debug, Clone)]
pub struct LinkageState {
    /// `[batch, num_slots, num_slots]`, zero diagonal
    pub link: Tensor,
    /// `[batch, num_slots]`
    pub precedence: Tensor,
}

/// Updates the temporal linkage from aggregate write weights.
#[derive(Debug, Clone)]
pub struct TemporalLinkage {
    num_slots: usize,
}

impl TemporalLinkage {
    pub fn new(num_slots: usize) -> Self {
        Self { num_slots }
    }

    pub fn init_state(
        &self,
        batch_size: usize,
        device: &candle_core::Device,
    ) -> MemoryResult<LinkageState> {
        Ok(LinkageState {
            link: Tensor::zeros(
                (batch_size, self.num_slots, self.num_slots),
                DType::F32,
                device,
            )?,
            precedence: Tensor::zeros((batch_size, self.num_slots), DType::F32, device)?,
        })
    }

    /// One linkage transition from aggregate write weights `[batch, num_slots]`.
    ///
    /// `link'[i,j] = (1 - w[i] - w[j]) * link[i,j] + w[i] * p[j]` off the
    /// diagonal, which stays exactly zero (a slot cannot precede itself);
    /// `p' = (1 - sum(w)) * p + w`.
    pub fn update(&self, prev: &LinkageState, write_weights: &Tensor) -> MemoryResult<LinkageState> {
        let (batch, num_slots) = write_weights.dims2()?;
        MemoryError::check_shape("linkage update", &[self.num_slots], &[num_slots])?;
        MemoryError::check_shape(
            "linkage update precedence",
            &[batch, num_slots],
            prev.precedence.dims(),
        )?;

        let w_i = write_weights.unsqueeze(2)?; // [B, N, 1]
        let w_j = write_weights.unsqueeze(1)?; // [B, 1, N]
        let p_j = prev.precedence.unsqueeze(1)?; // [B, 1, N]

        let scale = w_i.broadcast_add(&w_j)?.affine(-1.0, 1.0)?;
        let link = (prev.link.mul(&scale)? + w_i.broadcast_mul(&p_j)?)?;
        let link = link.broadcast_mul(&self.off_diagonal_mask(write_weights)?)?;

        let write_sum = write_weights.sum_keepdim(1)?; // [B, 1]
        let precedence = (prev
            .precedence
            .broadcast_mul(&write_sum.affine(-1.0, 1.0)?)?
            + write_weights)?;

        Ok(LinkageState { link, precedence })
    }

    /// Follow links from the previous read distributions:
    /// forward = `read_weights . link^T` and backward = `read_weights . link`,
    /// both `[batch, num_reads, num_slots]` with row mass <= 1.
    pub fn directional_read_weights(
        &self,
        link: &Tensor,
        prev_read_weights: &Tensor,
    ) -> MemoryResult<(Tensor, Tensor)> {
        let (batch, _num_reads, num_slots) = prev_read_weights.dims3()?;
        MemoryError::check_shape(
            "directional_read_weights link",
            &[batch, self.num_slots, self.num_slots],
            link.dims(),
        )?;
        MemoryError::check_shape("directional_read_weights", &[self.num_slots], &[num_slots])?;

        let forward = prev_read_weights.matmul(&link.transpose(1, 2)?)?;
        let backward = prev_read_weights.matmul(link)?;
        Ok((forward, backward))
    }

    fn off_diagonal_mask(&self, reference: &Tensor) -> MemoryResult<Tensor> {
        let n = self.num_slots;
        let mut data = vec![1.0f32; n * n];
        for i in 0..n {
            data[i * n + i] = 0.0;
        }
        Ok(Tensor::from_vec(data, (1, n, n), reference.device())?)
    }
}

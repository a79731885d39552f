//! Usage tracking and freeness-based allocation
//!
//! Each slot carries a usage scalar in [0, 1]: increased toward 1 by writes,
//! decayed by reads whose free gate is open. The allocator ranks slots by
//! freeness and produces write-eligibility weights that favour the least-used
//! slot, decaying for later slots proportional to the usage mass ahead of
//! them in the ranking.
//!
//! Usage is bookkeeping, not a differentiable target: [`MemoryUsage::update`]
//! detaches its inputs so the whole subgraph is excluded from gradient flow.

use candle_core::{DType, Tensor};

use crate::error::MemoryError;
use crate::MemoryResult;

/// Tracks per-slot usage and derives allocation weights for write heads.
#[derive(Debug, Clone)]
pub struct MemoryUsage {
    num_slots: usize,
    epsilon: f64,
}

impl MemoryUsage {
    pub fn new(num_slots: usize, epsilon: f64) -> Self {
        Self { num_slots, epsilon }
    }

    /// Zero usage for a fresh episode: `[batch, num_slots]`.
    pub fn init_state(
        &self,
        batch_size: usize,
        device: &candle_core::Device,
    ) -> MemoryResult<Tensor> {
        Ok(Tensor::zeros(
            (batch_size, self.num_slots),
            DType::F32,
            device,
        )?)
    }

    /// One usage transition: the write effect is applied before read-freeing.
    ///
    /// * `prev_usage`: `[batch, num_slots]`
    /// * `write_weights`: `[batch, num_writes, num_slots]` from the previous step
    /// * `free_gate`: `[batch, num_reads]` in [0, 1]
    /// * `read_weights`: `[batch, num_reads, num_slots]` from the previous step
    ///
    /// All write heads fold into one aggregate effect,
    /// `1 - prod_h (1 - w_h)`, the probability that at least one head wrote
    /// to the slot. Reads retain usage by `phi = prod_h (1 - f_h * r_h)`.
    /// The computation runs on detached tensors; no gradients propagate.
    pub fn update(
        &self,
        prev_usage: &Tensor,
        write_weights: &Tensor,
        free_gate: &Tensor,
        read_weights: &Tensor,
    ) -> MemoryResult<Tensor> {
        let (batch, num_slots) = prev_usage.dims2()?;
        MemoryError::check_shape("usage update", &[self.num_slots], &[num_slots])?;
        let (_, num_writes, _) = write_weights.dims3()?;
        let (_, num_reads, _) = read_weights.dims3()?;
        MemoryError::check_shape(
            "usage update write_weights",
            &[batch, num_writes, num_slots],
            write_weights.dims(),
        )?;
        MemoryError::check_shape(
            "usage update read_weights",
            &[batch, num_reads, num_slots],
            read_weights.dims(),
        )?;
        MemoryError::check_shape("usage update free_gate", &[batch, num_reads], free_gate.dims())?;

        // Detached boundary: usage never feeds gradients back into the heads.
        let prev_usage = prev_usage.detach();
        let write_weights = write_weights.detach();
        let free_gate = free_gate.detach();
        let read_weights = read_weights.detach();

        let mut not_written = Tensor::ones((batch, num_slots), DType::F32, prev_usage.device())?;
        for head in 0..num_writes {
            let w = write_weights.narrow(1, head, 1)?.squeeze(1)?;
            not_written = not_written.mul(&w.affine(-1.0, 1.0)?)?;
        }
        let write_effect = not_written.affine(-1.0, 1.0)?;
        let after_write = (&prev_usage + write_effect.mul(&prev_usage.affine(-1.0, 1.0)?)?)?;

        let mut retention = Tensor::ones((batch, num_slots), DType::F32, prev_usage.device())?;
        for head in 0..num_reads {
            let r = read_weights.narrow(1, head, 1)?.squeeze(1)?;
            let f = free_gate.narrow(1, head, 1)?;
            let free_read = r.broadcast_mul(&f)?;
            retention = retention.mul(&free_read.affine(-1.0, 1.0)?)?;
        }
        Ok(after_write.mul(&retention)?)
    }

    /// Freeness-ranked allocation weights for `num_writes` heads:
    /// `[batch, num_writes, num_slots]`, each row summing to <= 1.
    ///
    /// Heads are processed in index order; after head `i` is assigned, the
    /// simulated usage is inflated by its gated claim so head `i + 1` sees
    /// those slots as occupied. The ordering is an arbitrary-but-fixed
    /// convention. The result is NOT pre-scaled by `write_gates`; that
    /// scaling belongs to the caller.
    pub fn write_allocation_weights(
        &self,
        usage: &Tensor,
        write_gates: &Tensor,
        num_writes: usize,
    ) -> MemoryResult<Tensor> {
        let (batch, num_slots) = usage.dims2()?;
        MemoryError::check_shape("allocation usage", &[self.num_slots], &[num_slots])?;
        MemoryError::check_shape(
            "allocation write_gates",
            &[batch, num_writes],
            write_gates.dims(),
        )?;
        if num_writes == 0 {
            return Ok(Tensor::zeros(
                (batch, 0, num_slots),
                DType::F32,
                usage.device(),
            )?);
        }

        let mut simulated = usage.clone();
        let mut per_head = Vec::with_capacity(num_writes);
        for head in 0..num_writes {
            let allocation = self.allocation(&simulated)?;
            let gate = write_gates.narrow(1, head, 1)?;
            let claim = allocation.broadcast_mul(&gate)?;
            simulated = (&simulated + claim.mul(&simulated.affine(-1.0, 1.0)?)?)?;
            per_head.push(allocation);
        }
        Ok(Tensor::stack(&per_head, 1)?)
    }

    /// Allocation for one head: sort slots ascending by usage, take the
    /// exclusive cumulative product of sorted usage, weight the free fraction
    /// by it, and unsort back via the sort's index permutation.
    fn allocation(&self, usage: &Tensor) -> MemoryResult<Tensor> {
        // Clamp away from exactly 0 before the cumulative product.
        let usage = usage.affine(1.0 - self.epsilon, self.epsilon)?;
        let (sorted, indices) = usage.sort_last_dim(true)?;
        let free = sorted.affine(-1.0, 1.0)?;

        // Exclusive cumprod in log space; sorted usage is in [epsilon, 1] so
        // the logs are bounded.
        let log_sorted = sorted.log()?;
        let exclusive = log_sorted.cumsum(1)?.sub(&log_sorted)?.exp()?;
        let sorted_allocation = free.mul(&exclusive)?;

        // Inverse-permutation scatter back to original slot order.
        let out = sorted_allocation
            .zeros_like()?
            .scatter_add(&indices, &sorted_allocation, 1)?;
        Ok(out)
    }
}

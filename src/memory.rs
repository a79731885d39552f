//! Memory matrix read/write primitives
//!
//! The memory is a dense `[batch, num_slots, slot_width]` tensor,
//! functionally replaced by each write. Writes follow the erase/add rule
//! `M' = M * prod_h (1 - w_h^T e_h) + sum_h w_h^T a_h`; reads are attention
//! averages over rows and never mutate the matrix.

use candle_core::{DType, Device, Tensor};

use crate::error::MemoryError;
use crate::MemoryResult;

/// Fresh zero memory for a new episode.
pub fn init_memory(
    batch_size: usize,
    num_slots: usize,
    slot_width: usize,
    device: &Device,
) -> MemoryResult<Tensor> {
    Ok(Tensor::zeros(
        (batch_size, num_slots, slot_width),
        DType::F32,
        device,
    )?)
}

/// Apply all write heads' erase/add updates.
///
/// * `memory`: `[batch, num_slots, slot_width]`
/// * `write_weights`: `[batch, num_writes, num_slots]`
/// * `erase_vectors`: `[batch, num_writes, slot_width]`, entries in [0, 1]
/// * `add_vectors`: `[batch, num_writes, slot_width]`
pub fn erase_and_write(
    memory: &Tensor,
    write_weights: &Tensor,
    erase_vectors: &Tensor,
    add_vectors: &Tensor,
) -> MemoryResult<Tensor> {
    let (batch, num_slots, slot_width) = memory.dims3()?;
    let (_, num_writes, _) = write_weights.dims3()?;
    MemoryError::check_shape(
        "erase_and_write weights",
        &[batch, num_writes, num_slots],
        write_weights.dims(),
    )?;
    MemoryError::check_shape(
        "erase_and_write erase",
        &[batch, num_writes, slot_width],
        erase_vectors.dims(),
    )?;
    MemoryError::check_shape(
        "erase_and_write add",
        &[batch, num_writes, slot_width],
        add_vectors.dims(),
    )?;

    let mut keep = Tensor::ones((batch, num_slots, slot_width), DType::F32, memory.device())?;
    let mut additions = Tensor::zeros((batch, num_slots, slot_width), DType::F32, memory.device())?;
    for head in 0..num_writes {
        let w = write_weights.narrow(1, head, 1)?.transpose(1, 2)?; // [B, N, 1]
        let e = erase_vectors.narrow(1, head, 1)?; // [B, 1, W]
        let a = add_vectors.narrow(1, head, 1)?;

        let erase_outer = w.broadcast_mul(&e)?; // [B, N, W]
        keep = keep.mul(&erase_outer.affine(-1.0, 1.0)?)?;
        additions = (additions + w.broadcast_mul(&a)?)?;
    }
    Ok((memory.mul(&keep)? + additions)?)
}

/// Extract read vectors `[batch, num_reads, slot_width]` from attention
/// weights `[batch, num_reads, num_slots]`.
pub fn read(memory: &Tensor, read_weights: &Tensor) -> MemoryResult<Tensor> {
    let (batch, num_slots, _slot_width) = memory.dims3()?;
    let (read_batch, _num_reads, weight_slots) = read_weights.dims3()?;
    MemoryError::check_shape("read weights", &[batch, num_slots], &[read_batch, weight_slots])?;
    Ok(read_weights.matmul(memory)?)
}

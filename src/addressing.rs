//! Content-based addressing
//!
//! Cosine-similarity attention over memory rows: each head's key is compared
//! against every slot, scaled by a non-negative strength and softmaxed into a
//! probability distribution over slots. Pure functions of their inputs.

use candle_core::Tensor;

use crate::error::MemoryError;
use crate::MemoryResult;

/// Numerically stable softplus: `relu(x) + ln(1 + exp(-|x|))`.
pub fn softplus(xs: &Tensor) -> MemoryResult<Tensor> {
    let linear = xs.relu()?;
    let log_term = (xs.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok((linear + log_term)?)
}

/// The DNC strength transform `1 + softplus(x)`, guaranteeing strengths >= 1.
pub fn oneplus(xs: &Tensor) -> MemoryResult<Tensor> {
    Ok((softplus(xs)? + 1.0)?)
}

/// Cosine-similarity content weights.
///
/// * `keys`: `[batch, heads, slot_width]`
/// * `strengths`: `[batch, heads]`, must already be non-negative (callers pass
///   the output of [`softplus`] or [`oneplus`])
/// * `memory`: `[batch, num_slots, slot_width]`
///
/// Returns `[batch, heads, num_slots]`, a probability simplex per head.
/// `epsilon` guards the norm product against zero-norm keys or rows.
pub fn content_weights(
    keys: &Tensor,
    strengths: &Tensor,
    memory: &Tensor,
    epsilon: f64,
) -> MemoryResult<Tensor> {
    let (batch, heads, width) = keys.dims3()?;
    let (mem_batch, _slots, mem_width) = memory.dims3()?;
    MemoryError::check_shape(
        "content_weights strengths",
        &[batch, heads],
        strengths.dims(),
    )?;
    if mem_batch != batch || mem_width != width {
        return Err(MemoryError::ShapeMismatch {
            context: "content_weights memory",
            expected: vec![batch, width],
            got: vec![mem_batch, mem_width],
        });
    }

    // dot[b,h,s] = k_h . M_s
    let dot = keys.matmul(&memory.transpose(1, 2)?)?;
    let key_norm = keys.sqr()?.sum_keepdim(2)?.sqrt()?; // [B, H, 1]
    let mem_norm = memory.sqr()?.sum_keepdim(2)?.sqrt()?.transpose(1, 2)?; // [B, 1, N]
    let denom = (key_norm.broadcast_mul(&mem_norm)? + epsilon)?;
    let cosine = dot.broadcast_div(&denom)?;

    let scaled = cosine.broadcast_mul(&strengths.unsqueeze(2)?)?;
    Ok(candle_nn::ops::softmax(&scaled, 2)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn assert_simplex(weights: &[f32], tol: f32) {
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < tol, "weights sum to {sum}");
        for &w in weights {
            assert!(w >= 0.0, "negative weight {w}");
        }
    }

    #[test]
    fn test_content_weights_are_simplex() {
        let device = Device::Cpu;
        let keys = Tensor::randn(0f32, 1.0, (2, 3, 4), &device).unwrap();
        let strengths = Tensor::ones((2, 3), candle_core::DType::F32, &device).unwrap();
        let memory = Tensor::randn(0f32, 1.0, (2, 5, 4), &device).unwrap();

        let weights = content_weights(&keys, &strengths, &memory, 1e-6).unwrap();
        assert_eq!(weights.dims(), &[2, 3, 5]);

        let flat = weights.to_vec3::<f32>().unwrap();
        for batch in &flat {
            for head in batch {
                assert_simplex(head, 1e-5);
            }
        }
    }

    #[test]
    fn test_matching_row_wins() {
        let device = Device::Cpu;
        let memory = Tensor::new(
            &[[[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]],
            &device,
        )
        .unwrap();
        let keys = Tensor::new(&[[[0.0f32, 1.0, 0.0]]], &device).unwrap();
        let strengths = Tensor::new(&[[10.0f32]], &device).unwrap();

        let weights = content_weights(&keys, &strengths, &memory, 1e-6).unwrap();
        let row = weights.to_vec3::<f32>().unwrap()[0][0].clone();
        assert!(row[1] > row[0] && row[1] > row[2]);
        assert!(row[1] > 0.9);
    }

    #[test]
    fn test_zero_memory_is_safe() {
        let device = Device::Cpu;
        let keys = Tensor::randn(0f32, 1.0, (1, 1, 4), &device).unwrap();
        let strengths = Tensor::ones((1, 1), candle_core::DType::F32, &device).unwrap();
        let memory = Tensor::zeros((1, 6, 4), candle_core::DType::F32, &device).unwrap();

        let weights = content_weights(&keys, &strengths, &memory, 1e-6).unwrap();
        let row = weights.to_vec3::<f32>().unwrap()[0][0].clone();
        // Zero-norm rows produce zero similarity everywhere, softmax is uniform.
        for &w in &row {
            assert!(w.is_finite());
            assert!((w - 1.0 / 6.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_softplus_positive_and_stable() {
        let device = Device::Cpu;
        let xs = Tensor::new(&[-100.0f32, -1.0, 0.0, 1.0, 100.0], &device).unwrap();
        let ys = softplus(&xs).unwrap().to_vec1::<f32>().unwrap();
        for &y in &ys {
            assert!(y >= 0.0 && y.is_finite());
        }
        // softplus(0) = ln 2, softplus(100) ~= 100
        assert!((ys[2] - std::f32::consts::LN_2).abs() < 1e-5);
        assert!((ys[4] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_mismatched_width_fails_fast() {
        let device = Device::Cpu;
        let keys = Tensor::zeros((1, 1, 4), candle_core::DType::F32, &device).unwrap();
        let strengths = Tensor::ones((1, 1), candle_core::DType::F32, &device).unwrap();
        let memory = Tensor::zeros((1, 6, 5), candle_core::DType::F32, &device).unwrap();
        assert!(content_weights(&keys, &strengths, &memory, 1e-6).is_err());
    }
}

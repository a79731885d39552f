//! Location-based addressing via circular convolutional shift
//!
//! An attention vector is convolved with a learned shift distribution whose
//! kernel is odd-width and centered at zero displacement. Circular
//! convolution is a weighted average of cyclic permutations, so the simplex
//! property of the input weights is preserved.

use candle_core::Tensor;

use crate::error::MemoryError;
use crate::MemoryResult;

/// Circularly convolve attention `weights` (`[batch, num_slots]`) with a
/// `shift` distribution (`[batch, num_shifts]`, simplex-valid, odd width).
///
/// `out[i] = sum_j weights[(i - j + offset) mod num_slots] * shift[j]` with
/// `offset = num_shifts / 2`, so the center kernel entry leaves the input
/// unchanged and entries past the center move attention toward higher slots.
pub fn circular_convolution(weights: &Tensor, shift: &Tensor) -> MemoryResult<Tensor> {
    let (batch, num_slots) = weights.dims2()?;
    let (shift_batch, num_shifts) = shift.dims2()?;
    MemoryError::check_shape("circular_convolution shift", &[batch], &[shift_batch])?;
    if num_shifts % 2 == 0 || num_shifts > num_slots {
        return Err(MemoryError::InvalidParameter(format!(
            "shift kernel width {num_shifts} must be odd and <= {num_slots} slots"
        )));
    }

    let offset = (num_shifts / 2) as i64;
    let mut out = weights.zeros_like()?;
    for j in 0..num_shifts {
        let displacement = j as i64 - offset;
        let rotation = displacement.rem_euclid(num_slots as i64) as usize;
        // rolled[i] = weights[(i - displacement) mod num_slots]
        let rolled = if rotation == 0 {
            weights.clone()
        } else {
            Tensor::cat(
                &[
                    &weights.narrow(1, num_slots - rotation, rotation)?,
                    &weights.narrow(1, 0, num_slots - rotation)?,
                ],
                1,
            )?
        };
        let term = rolled.broadcast_mul(&shift.narrow(1, j, 1)?)?;
        out = (out + term)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_point_mass_at_center_is_identity() {
        let device = Device::Cpu;
        let weights = Tensor::new(&[[0.1f32, 0.2, 0.3, 0.4]], &device).unwrap();
        let shift = Tensor::new(&[[0.0f32, 1.0, 0.0]], &device).unwrap();

        let out = circular_convolution(&weights, &shift).unwrap();
        let got = out.to_vec2::<f32>().unwrap()[0].clone();
        let expected = [0.1f32, 0.2, 0.3, 0.4];
        for (g, e) in got.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_shift_forward_rotates_one_hot() {
        let device = Device::Cpu;
        let weights = Tensor::new(&[[1.0f32, 0.0, 0.0, 0.0]], &device).unwrap();
        // All mass on the +1 displacement entry.
        let shift = Tensor::new(&[[0.0f32, 0.0, 1.0]], &device).unwrap();

        let out = circular_convolution(&weights, &shift).unwrap();
        let got = out.to_vec2::<f32>().unwrap()[0].clone();
        assert!((got[1] - 1.0).abs() < 1e-6);
        assert!(got[0].abs() < 1e-6 && got[2].abs() < 1e-6 && got[3].abs() < 1e-6);
    }

    #[test]
    fn test_shift_backward_wraps_around() {
        let device = Device::Cpu;
        let weights = Tensor::new(&[[1.0f32, 0.0, 0.0, 0.0]], &device).unwrap();
        let shift = Tensor::new(&[[1.0f32, 0.0, 0.0]], &device).unwrap();

        let out = circular_convolution(&weights, &shift).unwrap();
        let got = out.to_vec2::<f32>().unwrap()[0].clone();
        assert!((got[3] - 1.0).abs() < 1e-6, "expected wrap to last slot, got {got:?}");
    }

    #[test]
    fn test_simplex_preserved() {
        let device = Device::Cpu;
        let weights = Tensor::new(&[[0.5f32, 0.25, 0.125, 0.125]], &device).unwrap();
        let shift = Tensor::new(&[[0.2f32, 0.5, 0.3]], &device).unwrap();

        let out = circular_convolution(&weights, &shift).unwrap();
        let got = out.to_vec2::<f32>().unwrap()[0].clone();
        let sum: f32 = got.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for &w in &got {
            assert!(w >= 0.0);
        }
    }

    #[test]
    fn test_even_kernel_rejected() {
        let device = Device::Cpu;
        let weights = Tensor::zeros((1, 4), candle_core::DType::F32, &device).unwrap();
        let shift = Tensor::zeros((1, 2), candle_core::DType::F32, &device).unwrap();
        assert!(circular_convolution(&weights, &shift).is_err());
    }
}

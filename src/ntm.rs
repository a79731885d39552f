//! Neural Turing Machine
//!
//! LSTM controller over an external memory with content- and location-based
//! addressing. Each head addresses memory in four stages: cosine content
//! weighting, interpolation with the previous step's weights, circular
//! convolutional shift, and sharpening. Read heads extract attention
//! averages; write heads apply erase/add updates.

use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::LSTMState;
use candle_nn::{linear, lstm, Linear, LSTMConfig, Module, LSTM, RNN};
use serde::{Deserialize, Serialize};

use crate::addressing::{content_weights, softplus};
use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::interface::InterfaceSplit;
use crate::memory;
use crate::shift::circular_convolution;
use crate::MemoryResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtmConfig {
    /// Width of the external input vector
    pub input_size: usize,
    /// Width of the output vector
    pub output_size: usize,
    /// LSTM controller hidden size
    pub controller_size: usize,
    /// Optional clamp on the controller hidden state before projection
    pub controller_clip: Option<f64>,
    /// Memory geometry
    pub memory: MemoryConfig,
}

impl Default for NtmConfig {
    fn default() -> Self {
        Self {
            input_size: 11,
            output_size: 8,
            controller_size: 100,
            controller_clip: None,
            memory: MemoryConfig::default(),
        }
    }
}

impl NtmConfig {
    pub fn validate(&self) -> MemoryResult<()> {
        self.memory.validate()?;
        if self.input_size == 0 || self.output_size == 0 || self.controller_size == 0 {
            return Err(MemoryError::InvalidParameter(
                "ntm dimensions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-head interface spans: every head carries key, strength, gate,
    /// shift kernel and sharpening exponent; write heads add erase/add rows.
    pub fn interface_size(&self) -> usize {
        let m = &self.memory;
        let per_read = m.slot_width + m.num_shifts + 3;
        let per_write = 3 * m.slot_width + m.num_shifts + 3;
        m.num_reads * per_read + m.num_writes * per_write
    }
}

/// Full per-episode state, threaded by value between time steps.
#[derive(Debug, Clone)]
pub struct NtmState {
    /// `[batch, num_slots, slot_width]`
    pub memory: Tensor,
    /// `[batch, num_reads, num_slots]`
    pub read_weights: Tensor,
    /// `[batch, num_writes, num_slots]`
    pub write_weights: Tensor,
    /// `[batch, num_reads, slot_width]`
    pub read_vectors: Tensor,
    /// Controller recurrent state
    pub controller: LSTMState,
}

/// The NTM cell and sequence model.
#[derive(Debug)]
pub struct Ntm {
    controller: LSTM,
    interface: Linear,
    output: Linear,
    config: NtmConfig,
}

/// Parameters for one group of heads, sliced from the interface vector.
struct HeadParams {
    keys: Tensor,      // [B, H, W]
    strengths: Tensor, // [B, H], raw
    gates: Tensor,     // [B, H], raw
    shifts: Tensor,    // [B, H, S], raw
    sharpens: Tensor,  // [B, H], raw
}

impl Ntm {
    pub fn new(config: NtmConfig, vb: candle_nn::VarBuilder) -> MemoryResult<Self> {
        config.validate()?;
        let m = &config.memory;
        let controller_in = config.input_size + m.num_reads * m.slot_width;
        let controller = lstm(
            controller_in,
            config.controller_size,
            LSTMConfig::default(),
            vb.pp("controller"),
        )?;
        let interface = linear(
            config.controller_size,
            config.interface_size(),
            vb.pp("interface"),
        )?;
        let output = linear(
            config.controller_size + m.num_reads * m.slot_width,
            config.output_size,
            vb.pp("output"),
        )?;
        Ok(Self {
            controller,
            interface,
            output,
            config,
        })
    }

    pub fn config(&self) -> &NtmConfig {
        &self.config
    }

    /// Initial state: zero memory and read vectors, head weights focused on
    /// slot 0, zero controller state.
    pub fn init_state(&self, batch_size: usize, device: &Device) -> MemoryResult<NtmState> {
        let m = &self.config.memory;
        Ok(NtmState {
            memory: memory::init_memory(batch_size, m.num_slots, m.slot_width, device)?,
            read_weights: first_slot_weights(batch_size, m.num_reads, m.num_slots, device)?,
            write_weights: first_slot_weights(batch_size, m.num_writes, m.num_slots, device)?,
            read_vectors: Tensor::zeros(
                (batch_size, m.num_reads, m.slot_width),
                DType::F32,
                device,
            )?,
            controller: self.controller.zero_state(batch_size)?,
        })
    }

    /// One state transition. Writes are applied before reads, so reads at
    /// step `t` observe the memory as updated at step `t`.
    pub fn step(&self, input: &Tensor, state: &NtmState) -> MemoryResult<(Tensor, NtmState)> {
        let m = &self.config.memory;
        let (batch, input_size) = input.dims2()?;
        MemoryError::check_shape("ntm step input", &[self.config.input_size], &[input_size])?;

        let reads_flat = state
            .read_vectors
            .reshape((batch, m.num_reads * m.slot_width))?;
        let controller_in = Tensor::cat(&[input, &reads_flat], 1)?;
        let controller_state = self.controller.step(&controller_in, &state.controller)?;
        let mut hidden = controller_state.h().clone();
        if let Some(clip) = self.config.controller_clip {
            hidden = hidden.clamp(-clip, clip)?;
        }

        let interface = self.interface.forward(&hidden)?;
        let mut split = InterfaceSplit::new(&interface)?;
        let read_params = HeadParams {
            keys: split.take_per_head(m.num_reads, m.slot_width)?,
            strengths: split.take(m.num_reads)?,
            gates: split.take(m.num_reads)?,
            shifts: split.take_per_head(m.num_reads, m.num_shifts)?,
            sharpens: split.take(m.num_reads)?,
        };
        let write_params = HeadParams {
            keys: split.take_per_head(m.num_writes, m.slot_width)?,
            strengths: split.take(m.num_writes)?,
            gates: split.take(m.num_writes)?,
            shifts: split.take_per_head(m.num_writes, m.num_shifts)?,
            sharpens: split.take(m.num_writes)?,
        };
        let erase = candle_nn::ops::sigmoid(&split.take_per_head(m.num_writes, m.slot_width)?)?;
        let add = split.take_per_head(m.num_writes, m.slot_width)?.tanh()?;
        split.finish()?;

        let write_weights = self.address(&write_params, &state.write_weights, &state.memory)?;
        let new_memory = memory::erase_and_write(&state.memory, &write_weights, &erase, &add)?;

        let read_weights = self.address(&read_params, &state.read_weights, &new_memory)?;
        let read_vectors = memory::read(&new_memory, &read_weights)?;

        let output_in = Tensor::cat(
            &[
                &hidden,
                &read_vectors.reshape((batch, m.num_reads * m.slot_width))?,
            ],
            1,
        )?;
        let output = self.output.forward(&output_in)?;

        Ok((
            output,
            NtmState {
                memory: new_memory,
                read_weights,
                write_weights,
                read_vectors,
                controller: controller_state,
            },
        ))
    }

    /// Process a `[batch, time, input]` sequence, returning
    /// `[batch, time, output]` and the final state. A zero-length sequence
    /// returns the initial state unchanged.
    pub fn forward(
        &self,
        inputs: &Tensor,
        initial_state: &NtmState,
    ) -> MemoryResult<(Tensor, NtmState)> {
        let (batch, steps, input_size) = inputs.dims3()?;
        MemoryError::check_shape("ntm forward input", &[self.config.input_size], &[input_size])?;
        if steps == 0 {
            let empty = Tensor::zeros(
                (batch, 0, self.config.output_size),
                DType::F32,
                inputs.device(),
            )?;
            return Ok((empty, initial_state.clone()));
        }

        let mut state = initial_state.clone();
        let mut outputs = Vec::with_capacity(steps);
        for t in 0..steps {
            let x = inputs.narrow(1, t, 1)?.squeeze(1)?;
            let (out, next) = self.step(&x, &state)?;
            outputs.push(out);
            state = next;
        }
        Ok((Tensor::stack(&outputs, 1)?, state))
    }

    /// Content -> interpolate -> shift -> sharpen, per head.
    fn address(
        &self,
        params: &HeadParams,
        prev_weights: &Tensor,
        mem: &Tensor,
    ) -> MemoryResult<Tensor> {
        let m = &self.config.memory;
        let (_batch, heads, _n) = prev_weights.dims3()?;

        let strengths = softplus(&params.strengths)?;
        let content = content_weights(&params.keys, &strengths, mem, m.epsilon)?;
        let gates = candle_nn::ops::sigmoid(&params.gates)?;
        let shifts = candle_nn::ops::softmax(&params.shifts, 2)?;
        let gammas = (softplus(&params.sharpens)? + 1.0)?;

        let mut per_head = Vec::with_capacity(heads);
        for head in 0..heads {
            let g = gates.narrow(1, head, 1)?; // [B, 1]
            let w_content = content.narrow(1, head, 1)?.squeeze(1)?;
            let w_prev = prev_weights.narrow(1, head, 1)?.squeeze(1)?;
            let gated = (w_content.broadcast_mul(&g)?
                + w_prev.broadcast_mul(&g.affine(-1.0, 1.0)?)?)?;

            let shift = shifts.narrow(1, head, 1)?.squeeze(1)?;
            let shifted = circular_convolution(&gated, &shift)?;

            // w^gamma in log space keeps the gradient finite at w = 0; the
            // epsilon matches the addressing stability floor.
            let gamma = gammas.narrow(1, head, 1)?;
            let powered = (shifted + m.epsilon)?.log()?.broadcast_mul(&gamma)?.exp()?;
            let normalizer = powered.sum_keepdim(1)?;
            per_head.push(powered.broadcast_div(&normalizer)?);
        }
        Ok(Tensor::stack(&per_head, 1)?)
    }
}

/// Head weights initialized as a point mass on slot 0, so shifts have a
/// deterministic anchor at the start of an episode.
fn first_slot_weights(
    batch_size: usize,
    heads: usize,
    num_slots: usize,
    device: &Device,
) -> MemoryResult<Tensor> {
    let mut data = vec![0.0f32; batch_size * heads * num_slots];
    for b in 0..batch_size {
        for h in 0..heads {
            data[(b * heads + h) * num_slots] = 1.0;
        }
    }
    Ok(Tensor::from_vec(
        data,
        (batch_size, heads, num_slots),
        device,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{VarBuilder, VarMap};

    fn tiny_ntm(device: &Device) -> (Ntm, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let config = NtmConfig {
            input_size: 6,
            output_size: 4,
            controller_size: 16,
            controller_clip: None,
            memory: MemoryConfig {
                num_slots: 8,
                slot_width: 5,
                num_reads: 2,
                num_writes: 1,
                num_shifts: 3,
                ..MemoryConfig::default()
            },
        };
        (Ntm::new(config, vb).unwrap(), varmap)
    }

    #[test]
    fn test_step_shapes_and_simplex_weights() {
        let device = Device::Cpu;
        let (ntm, _varmap) = tiny_ntm(&device);
        let state = ntm.init_state(3, &device).unwrap();
        let input = Tensor::randn(0f32, 1.0, (3, 6), &device).unwrap();

        let (output, next) = ntm.step(&input, &state).unwrap();
        assert_eq!(output.dims(), &[3, 4]);
        assert_eq!(next.memory.dims(), &[3, 8, 5]);
        assert_eq!(next.read_weights.dims(), &[3, 2, 8]);

        let weights = next.read_weights.to_vec3::<f32>().unwrap();
        for batch in &weights {
            for head in batch {
                let sum: f32 = head.iter().sum();
                assert!((sum - 1.0).abs() < 1e-4, "read weights sum to {sum}");
                for &w in head {
                    assert!(w >= 0.0);
                }
            }
        }
    }

    #[test]
    fn test_forward_sequence_shapes() {
        let device = Device::Cpu;
        let (ntm, _varmap) = tiny_ntm(&device);
        let state = ntm.init_state(2, &device).unwrap();
        let inputs = Tensor::randn(0f32, 1.0, (2, 7, 6), &device).unwrap();

        let (outputs, final_state) = ntm.forward(&inputs, &state).unwrap();
        assert_eq!(outputs.dims(), &[2, 7, 4]);
        assert_eq!(final_state.memory.dims(), &[2, 8, 5]);
    }

    #[test]
    fn test_zero_length_sequence_is_identity() {
        let device = Device::Cpu;
        let (ntm, _varmap) = tiny_ntm(&device);
        let state = ntm.init_state(1, &device).unwrap();
        let inputs = Tensor::zeros((1, 0, 6), DType::F32, &device).unwrap();

        let (outputs, final_state) = ntm.forward(&inputs, &state).unwrap();
        assert_eq!(outputs.dims(), &[1, 0, 4]);
        assert_eq!(
            final_state.memory.to_vec3::<f32>().unwrap(),
            state.memory.to_vec3::<f32>().unwrap()
        );
        assert_eq!(
            final_state.read_weights.to_vec3::<f32>().unwrap(),
            state.read_weights.to_vec3::<f32>().unwrap()
        );
    }

    #[test]
    fn test_interface_size_matches_parser() {
        let device = Device::Cpu;
        let (ntm, _varmap) = tiny_ntm(&device);
        // A step would fail in InterfaceSplit::finish if the projection and
        // the parser disagreed on the layout.
        let state = ntm.init_state(1, &device).unwrap();
        let input = Tensor::zeros((1, 6), DType::F32, &device).unwrap();
        ntm.step(&input, &state).unwrap();
    }
}

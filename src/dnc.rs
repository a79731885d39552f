//! Differentiable Neural Computer
//!
//! Extends content addressing with dynamic allocation and temporal linkage.
//! Write heads blend a freeness-ranked allocation target with content lookup
//! under an allocation gate; read heads blend backward-traversal, content and
//! forward-traversal distributions under softmaxed read modes. Usage and
//! linkage state are carried across the episode.

use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::LSTMState;
use candle_nn::{linear, lstm, Linear, LSTMConfig, Module, LSTM, RNN};
use serde::{Deserialize, Serialize};

use crate::addressing::{content_weights, oneplus};
use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::interface::InterfaceSplit;
use crate::linkage::{LinkageState, TemporalLinkage};
use crate::memory;
use crate::usage::MemoryUsage;
use crate::MemoryResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DncConfig {
    /// Width of the external input vector
    pub input_size: usize,
    /// Width of the output vector
    pub output_size: usize,
    /// LSTM controller hidden size
    pub controller_size: usize,
    /// Clamp on the controller hidden state before projection
    pub controller_clip: Option<f64>,
    /// Memory geometry
    pub memory: MemoryConfig,
}

impl Default for DncConfig {
    fn default() -> Self {
        Self {
            input_size: 11,
            output_size: 8,
            controller_size: 128,
            controller_clip: Some(20.0),
            memory: MemoryConfig::default(),
        }
    }
}

impl DncConfig {
    pub fn validate(&self) -> MemoryResult<()> {
        self.memory.validate()?;
        if self.memory.num_writes == 0 {
            return Err(MemoryError::InvalidParameter(
                "dnc requires at least one write head".to_string(),
            ));
        }
        if self.input_size == 0 || self.output_size == 0 || self.controller_size == 0 {
            return Err(MemoryError::InvalidParameter(
                "dnc dimensions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Interface layout: read keys/strengths, write keys/strengths,
    /// erase/write vectors, free gates, allocation gates, write gates and
    /// three read modes (backward | content | forward) per read head.
    pub fn interface_size(&self) -> usize {
        let m = &self.memory;
        let (r, w, width) = (m.num_reads, m.num_writes, m.slot_width);
        r * width + r            // read keys + strengths
            + w * width + w      // write keys + strengths
            + 2 * w * width      // erase + write vectors
            + r                  // free gates
            + 2 * w              // allocation + write gates
            + 3 * r              // read modes
    }
}

/// Full per-episode state, threaded by value between time steps.
#[derive(Debug, Clone)]
pub struct DncState {
    /// `[batch, num_slots, slot_width]`
    pub memory: Tensor,
    /// `[batch, num_slots]`, detached bookkeeping
    pub usage: Tensor,
    /// Temporal link matrix and precedence weights
    pub linkage: LinkageState,
    /// `[batch, num_reads, num_slots]`
    pub read_weights: Tensor,
    /// `[batch, num_writes, num_slots]`
    pub write_weights: Tensor,
    /// `[batch, num_reads, slot_width]`
    pub read_vectors: Tensor,
    /// Controller recurrent state
    pub controller: LSTMState,
}

/// The DNC cell and sequence model.
#[derive(Debug)]
pub struct Dnc {
    controller: LSTM,
    interface: Linear,
    output: Linear,
    usage: MemoryUsage,
    linkage: TemporalLinkage,
    config: DncConfig,
}

impl Dnc {
    pub fn new(config: DncConfig, vb: candle_nn::VarBuilder) -> MemoryResult<Self> {
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
            usage: MemoryUsage::new(m.num_slots, m.epsilon),
            linkage: TemporalLinkage::new(m.num_slots),
            config,
        })
    }

    pub fn config(&self) -> &DncConfig {
        &self.config
    }

    /// Initial state: everything zeroed (memory, usage, linkage, weights,
    /// read vectors, controller).
    pub fn init_state(&self, batch_size: usize, device: &Device) -> MemoryResult<DncState> {
        let m = &self.config.memory;
        Ok(DncState {
            memory: memory::init_memory(batch_size, m.num_slots, m.slot_width, device)?,
            usage: self.usage.init_state(batch_size, device)?,
            linkage: self.linkage.init_state(batch_size, device)?,
            read_weights: Tensor::zeros(
                (batch_size, m.num_reads, m.num_slots),
                DType::F32,
                device,
            )?,
            write_weights: Tensor::zeros(
                (batch_size, m.num_writes, m.num_slots),
                DType::F32,
                device,
            )?,
            read_vectors: Tensor::zeros(
                (batch_size, m.num_reads, m.slot_width),
                DType::F32,
                device,
            )?,
            controller: self.controller.zero_state(batch_size)?,
        })
    }

    /// One state transition. Usage is updated from the previous step's head
    /// weights, then writes are resolved and applied, linkage follows the
    /// aggregate write, and reads observe the updated memory.
    pub fn step(&self, input: &Tensor, state: &DncState) -> MemoryResult<(Tensor, DncState)> {
        let m = &self.config.memory;
        let (batch, input_size) = input.dims2()?;
        MemoryError::check_shape("dnc step input", &[self.config.input_size], &[input_size])?;

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
        let read_keys = split.take_per_head(m.num_reads, m.slot_width)?;
        let read_strengths = oneplus(&split.take(m.num_reads)?)?;
        let write_keys = split.take_per_head(m.num_writes, m.slot_width)?;
        let write_strengths = oneplus(&split.take(m.num_writes)?)?;
        let erase_vectors =
            candle_nn::ops::sigmoid(&split.take_per_head(m.num_writes, m.slot_width)?)?;
        let write_vectors = split.take_per_head(m.num_writes, m.slot_width)?;
        let free_gates = candle_nn::ops::sigmoid(&split.take(m.num_reads)?)?;
        let allocation_gates = candle_nn::ops::sigmoid(&split.take(m.num_writes)?)?;
        let write_gates = candle_nn::ops::sigmoid(&split.take(m.num_writes)?)?;
        let read_modes = candle_nn::ops::softmax(&split.take_per_head(m.num_reads, 3)?, 2)?;
        split.finish()?;

        // Usage reflects the previous step's writes and this step's freeing.
        let usage = self.usage.update(
            &state.usage,
            &state.write_weights,
            &free_gates,
            &state.read_weights,
        )?;

        let write_content =
            content_weights(&write_keys, &write_strengths, &state.memory, m.epsilon)?;
        let allocation = self.usage.write_allocation_weights(
            &usage,
            &write_gates.mul(&allocation_gates)?,
            m.num_writes,
        )?;
        let ag = allocation_gates.unsqueeze(2)?;
        let blended = (allocation.broadcast_mul(&ag)?
            + write_content.broadcast_mul(&ag.affine(-1.0, 1.0)?)?)?;
        let write_weights = blended.broadcast_mul(&write_gates.unsqueeze(2)?)?;

        let new_memory =
            memory::erase_and_write(&state.memory, &write_weights, &erase_vectors, &write_vectors)?;

        let linkage = self
            .linkage
            .update(&state.linkage, &aggregate_write(&write_weights)?)?;
        let (forward, backward) = self
            .linkage
            .directional_read_weights(&linkage.link, &state.read_weights)?;

        let read_content = content_weights(&read_keys, &read_strengths, &new_memory, m.epsilon)?;
        let backward_mode = read_modes.narrow(2, 0, 1)?;
        let content_mode = read_modes.narrow(2, 1, 1)?;
        let forward_mode = read_modes.narrow(2, 2, 1)?;
        let read_weights = ((backward.broadcast_mul(&backward_mode)?
            + read_content.broadcast_mul(&content_mode)?)?
            + forward.broadcast_mul(&forward_mode)?)?;

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
            DncState {
                memory: new_memory,
                usage,
                linkage,
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
        initial_state: &DncState,
    ) -> MemoryResult<(Tensor, DncState)> {
        let (batch, steps, input_size) = inputs.dims3()?;
        MemoryError::check_shape("dnc forward input", &[self.config.input_size], &[input_size])?;
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
}

/// Collapse all write heads into the probability that at least one head
/// wrote to each slot, the same aggregate the usage tracker uses.
fn aggregate_write(write_weights: &Tensor) -> MemoryResult<Tensor> {
    let (batch, num_writes, num_slots) = write_weights.dims3()?;
    let mut not_written = Tensor::ones(
        (batch, num_slots),
        DType::F32,
        write_weights.device(),
    )?;
    for head in 0..num_writes {
        let w = write_weights.narrow(1, head, 1)?.squeeze(1)?;
        not_written = not_written.mul(&w.affine(-1.0, 1.0)?)?;
    }
    Ok(not_written.affine(-1.0, 1.0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{VarBuilder, VarMap};

    fn tiny_dnc(device: &Device) -> (Dnc, VarMap) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let config = DncConfig {
            input_size: 6,
            output_size: 4,
            controller_size: 16,
            controller_clip: Some(20.0),
            memory: MemoryConfig {
                num_slots: 8,
                slot_width: 5,
                num_reads: 2,
                num_writes: 2,
                ..MemoryConfig::default()
            },
        };
        (Dnc::new(config, vb).unwrap(), varmap)
    }

    #[test]
    fn test_step_shapes() {
        let device = Device::Cpu;
        let (dnc, _varmap) = tiny_dnc(&device);
        let state = dnc.init_state(3, &device).unwrap();
        let input = Tensor::randn(0f32, 1.0, (3, 6), &device).unwrap();

        let (output, next) = dnc.step(&input, &state).unwrap();
        assert_eq!(output.dims(), &[3, 4]);
        assert_eq!(next.memory.dims(), &[3, 8, 5]);
        assert_eq!(next.usage.dims(), &[3, 8]);
        assert_eq!(next.linkage.link.dims(), &[3, 8, 8]);
        assert_eq!(next.read_weights.dims(), &[3, 2, 8]);
        assert_eq!(next.write_weights.dims(), &[3, 2, 8]);
    }

    #[test]
    fn test_usage_bounded_over_episode() {
        let device = Device::Cpu;
        let (dnc, _varmap) = tiny_dnc(&device);
        let mut state = dnc.init_state(2, &device).unwrap();

        for _ in 0..6 {
            let input = Tensor::randn(0f32, 1.0, (2, 6), &device).unwrap();
            let (_, next) = dnc.step(&input, &state).unwrap();
            state = next;
            let usage = state.usage.to_vec2::<f32>().unwrap();
            for row in &usage {
                for &u in row {
                    assert!((0.0..=1.0 + 1e-5).contains(&u), "usage {u} out of bounds");
                }
            }
        }
    }

    #[test]
    fn test_link_diagonal_zero_over_episode() {
        let device = Device::Cpu;
        let (dnc, _varmap) = tiny_dnc(&device);
        let mut state = dnc.init_state(1, &device).unwrap();

        for _ in 0..5 {
            let input = Tensor::randn(0f32, 1.0, (1, 6), &device).unwrap();
            let (_, next) = dnc.step(&input, &state).unwrap();
            state = next;
            let link = state.linkage.link.to_vec3::<f32>().unwrap();
            for i in 0..8 {
                assert_eq!(link[0][i][i], 0.0);
            }
        }
    }

    #[test]
    fn test_forward_and_zero_length() {
        let device = Device::Cpu;
        let (dnc, _varmap) = tiny_dnc(&device);
        let state = dnc.init_state(2, &device).unwrap();

        let inputs = Tensor::randn(0f32, 1.0, (2, 5, 6), &device).unwrap();
        let (outputs, _final_state) = dnc.forward(&inputs, &state).unwrap();
        assert_eq!(outputs.dims(), &[2, 5, 4]);

        let empty = Tensor::zeros((2, 0, 6), DType::F32, &device).unwrap();
        let (outputs, final_state) = dnc.forward(&empty, &state).unwrap();
        assert_eq!(outputs.dims(), &[2, 0, 4]);
        assert_eq!(
            final_state.usage.to_vec2::<f32>().unwrap(),
            state.usage.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_gradients_flow_to_parameters() {
        let device = Device::Cpu;
        let (dnc, varmap) = tiny_dnc(&device);
        let state = dnc.init_state(1, &device).unwrap();
        let inputs = Tensor::randn(0f32, 1.0, (1, 3, 6), &device).unwrap();

        let (outputs, _) = dnc.forward(&inputs, &state).unwrap();
        let loss = outputs.sqr().unwrap().mean_all().unwrap();
        let grads = loss.backward().unwrap();

        let mut with_grad = 0;
        for var in varmap.all_vars() {
            if grads.get(var.as_tensor()).is_some() {
                with_grad += 1;
            }
        }
        assert!(with_grad > 0, "no parameter received a gradient");
    }
}

//! Synthetic algorithmic tasks
//!
//! Batched generators for the store-then-recall family: copy, reverse
//! recall, and recall with distractor sub-sequences. Episodes are random bit
//! matrices framed by control-marker rows; the model must learn when to
//! store and when to reproduce, the generator only supplies the markers and
//! the target mask.
//!
//! Input layout per time step: `element_size` data channels followed by
//! three control channels (store, distractor, recall).

use candle_core::{Device, Tensor};
use rand::Rng;

use crate::error::MemoryError;
use crate::MemoryResult;

/// Number of control channels appended to the data channels.
pub const CONTROL_CHANNELS: usize = 3;

const STORE: usize = 0;
const DISTRACTOR: usize = 1;
const RECALL: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Reproduce the stored sequence in order.
    Copy,
    /// Reproduce the stored sequence in reverse order.
    ReverseRecall,
    /// Reproduce the first sequence after ignoring distractor sequences.
    DistractionRecall,
}

impl std::str::FromStr for TaskKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copy" => Ok(TaskKind::Copy),
            "reverse" => Ok(TaskKind::ReverseRecall),
            "distraction" => Ok(TaskKind::DistractionRecall),
            other => Err(MemoryError::InvalidParameter(format!(
                "unknown task '{other}' (expected copy | reverse | distraction)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub batch_size: usize,
    /// Number of data bits per element
    pub element_size: usize,
    /// Stored-sequence length range (inclusive)
    pub min_len: usize,
    pub max_len: usize,
    /// Probability of a data bit being 1
    pub bias: f64,
    /// Distractor-count range for [`TaskKind::DistractionRecall`]
    pub min_distractors: usize,
    pub max_distractors: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            element_size: 8,
            min_len: 1,
            max_len: 10,
            bias: 0.5,
            min_distractors: 1,
            max_distractors: 4,
        }
    }
}

impl TaskConfig {
    pub fn validate(&self) -> MemoryResult<()> {
        if self.batch_size == 0 || self.element_size == 0 {
            return Err(MemoryError::InvalidParameter(
                "batch size and element size must be non-zero".to_string(),
            ));
        }
        if self.min_len == 0 || self.min_len > self.max_len {
            return Err(MemoryError::InvalidParameter(format!(
                "invalid length range {}..={}",
                self.min_len, self.max_len
            )));
        }
        if self.min_distractors > self.max_distractors {
            return Err(MemoryError::InvalidParameter(format!(
                "invalid distractor range {}..={}",
                self.min_distractors, self.max_distractors
            )));
        }
        if !(0.0 < self.bias && self.bias < 1.0) {
            return Err(MemoryError::InvalidParameter(format!(
                "bias must lie in (0, 1), got {}",
                self.bias
            )));
        }
        Ok(())
    }
}

/// One sampled training episode.
#[derive(Debug)]
pub struct TaskBatch {
    /// `[batch, time, element_size + CONTROL_CHANNELS]`
    pub inputs: Tensor,
    /// `[batch, time, element_size]`, zero outside the recall phase
    pub targets: Tensor,
    /// `[batch, time]`, 1.0 on recall steps
    pub mask: Tensor,
}

#[derive(Debug, Clone)]
pub struct TaskGenerator {
    kind: TaskKind,
    config: TaskConfig,
}

impl TaskGenerator {
    pub fn new(kind: TaskKind, config: TaskConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self { kind, config })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn input_width(&self) -> usize {
        self.config.element_size + CONTROL_CHANNELS
    }

    pub fn output_width(&self) -> usize {
        self.config.element_size
    }

    /// Sample one episode. Sequence lengths are drawn once per batch, so all
    /// batch elements share the same time layout; bits are independent.
    pub fn sample<R: Rng>(&self, rng: &mut R, device: &Device) -> MemoryResult<TaskBatch> {
        let cfg = &self.config;
        let len = rng.gen_range(cfg.min_len..=cfg.max_len);
        let distractor_lens: Vec<usize> = match self.kind {
            TaskKind::DistractionRecall => {
                let count = rng.gen_range(cfg.min_distractors..=cfg.max_distractors);
                (0..count)
                    .map(|_| rng.gen_range(cfg.min_len..=cfg.max_len))
                    .collect()
            }
            _ => Vec::new(),
        };
        self.sample_with_layout(rng, len, &distractor_lens, device)
    }

    /// Sample with a fixed stored-sequence length; used for validation on
    /// lengths longer than the training range.
    pub fn sample_with_len<R: Rng>(
        &self,
        rng: &mut R,
        len: usize,
        device: &Device,
    ) -> MemoryResult<TaskBatch> {
        let distractor_lens: Vec<usize> = match self.kind {
            TaskKind::DistractionRecall => vec![len],
            _ => Vec::new(),
        };
        self.sample_with_layout(rng, len, &distractor_lens, device)
    }

    fn sample_with_layout<R: Rng>(
        &self,
        rng: &mut R,
        len: usize,
        distractor_lens: &[usize],
        device: &Device,
    ) -> MemoryResult<TaskBatch> {
        let cfg = &self.config;
        let (batch, elem) = (cfg.batch_size, cfg.element_size);
        let input_width = self.input_width();

        // store marker + data + (marker + data per distractor) + recall
        // marker + blank recall steps
        let steps = 1 + len + distractor_lens.iter().map(|l| 1 + l).sum::<usize>() + 1 + len;
        let recall_start = steps - len;

        let mut inputs = vec![0.0f32; batch * steps * input_width];
        let mut targets = vec![0.0f32; batch * steps * elem];
        let mut mask = vec![0.0f32; batch * steps];

        for b in 0..batch {
            let stored: Vec<Vec<f32>> = (0..len)
                .map(|_| {
                    (0..elem)
                        .map(|_| if rng.gen_bool(cfg.bias) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect();

            let row = |t: usize| (b * steps + t) * input_width;
            let mut t = 0;
            inputs[row(t) + elem + STORE] = 1.0;
            t += 1;
            for item in &stored {
                inputs[row(t)..row(t) + elem].copy_from_slice(item);
                t += 1;
            }
            for &dlen in distractor_lens {
                inputs[row(t) + elem + DISTRACTOR] = 1.0;
                t += 1;
                for _ in 0..dlen {
                    for e in 0..elem {
                        inputs[row(t) + e] = if rng.gen_bool(cfg.bias) { 1.0 } else { 0.0 };
                    }
                    t += 1;
                }
            }
            inputs[row(t) + elem + RECALL] = 1.0;

            for i in 0..len {
                let t = recall_start + i;
                let source = match self.kind {
                    TaskKind::ReverseRecall => &stored[len - 1 - i],
                    _ => &stored[i],
                };
                let offset = (b * steps + t) * elem;
                targets[offset..offset + elem].copy_from_slice(source);
                mask[b * steps + t] = 1.0;
            }
        }

        Ok(TaskBatch {
            inputs: Tensor::from_vec(inputs, (batch, steps, input_width), device)?,
            targets: Tensor::from_vec(targets, (batch, steps, elem), device)?,
            mask: Tensor::from_vec(mask, (batch, steps), device)?,
        })
    }
}

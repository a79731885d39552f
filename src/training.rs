//! Training infrastructure
//!
//! Episode-based training for the memory-augmented models: masked binary
//! cross-entropy on the recall steps, AdamW with warmup/cosine learning-rate
//! scheduling, global-norm gradient clipping, and metrics tracking.

use std::time::Instant;

use candle_core::backprop::GradStore;
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use serde::{Deserialize, Serialize};

use crate::addressing::softplus;
use crate::dnc::Dnc;
use crate::ntm::Ntm;
use crate::tasks::TaskBatch;
use crate::MemoryResult;

// ═══════════════════════════════════════════════════════════════════════════
// TRAINING CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// Global gradient-norm clip threshold
    pub grad_clip_norm: f64,
    /// Linear warmup steps before cosine annealing
    pub warmup_steps: usize,
    /// Total steps for the scheduler horizon
    pub total_steps: usize,
    pub checkpoint_every: usize,
    pub eval_every: usize,
    pub log_every: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            grad_clip_norm: 10.0,
            warmup_steps: 200,
            total_steps: 50_000,
            checkpoint_every: 2000,
            eval_every: 500,
            log_every: 50,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Configuration for quick experiments
    pub fn quick() -> Self {
        Self {
            warmup_steps: 20,
            total_steps: 1000,
            checkpoint_every: 500,
            eval_every: 100,
            log_every: 10,
            ..Self::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LEARNING RATE SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

/// Linear warmup followed by cosine annealing down to 10% of the base rate.
#[derive(Debug)]
pub struct LrScheduler {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    min_lr: f64,
    current_step: usize,
}

impl LrScheduler {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            base_lr: config.learning_rate,
            warmup_steps: config.warmup_steps,
            total_steps: config.total_steps.max(config.warmup_steps + 1),
            min_lr: config.learning_rate * 0.1,
            current_step: 0,
        }
    }

    pub fn get_lr(&self) -> f64 {
        if self.current_step < self.warmup_steps {
            let progress = (self.current_step + 1) as f64 / self.warmup_steps.max(1) as f64;
            self.base_lr * progress
        } else {
            let progress = (self.current_step - self.warmup_steps) as f64
                / (self.total_steps - self.warmup_steps) as f64;
            let progress = progress.min(1.0);
            let cosine = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
            self.min_lr + (self.base_lr - self.min_lr) * cosine
        }
    }

    pub fn step(&mut self) {
        self.current_step += 1;
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOSS AND ACCURACY
// ═══════════════════════════════════════════════════════════════════════════

/// Binary cross-entropy from raw logits, averaged over masked steps only.
///
/// Uses the stable form `bce(x, y) = softplus(x) - x * y`, so no sigmoid is
/// applied to the model outputs before the loss.
///
/// * `logits`, `targets`: `[batch, time, width]`
/// * `mask`: `[batch, time]`, 1.0 on steps that count
pub fn masked_bce_with_logits(
    logits: &Tensor,
    targets: &Tensor,
    mask: &Tensor,
) -> MemoryResult<Tensor> {
    let (_batch, _steps, width) = logits.dims3()?;
    let per_bit = (softplus(logits)? - logits.mul(targets)?)?;
    let masked = per_bit.broadcast_mul(&mask.unsqueeze(2)?)?;
    let total = masked.sum_all()?;
    let denom = (mask.sum_all()?.affine(width as f64, 0.0)? + 1e-8)?;
    Ok(total.div(&denom)?)
}

/// Fraction of correctly predicted bits on masked steps. A prediction is the
/// thresholded sigmoid, which is just the sign of the logit.
pub fn bit_accuracy(logits: &Tensor, targets: &Tensor, mask: &Tensor) -> MemoryResult<f64> {
    let (_batch, _steps, width) = logits.dims3()?;
    let zeros = logits.zeros_like()?;
    let predictions = logits.ge(&zeros)?.to_dtype(candle_core::DType::F32)?;
    let correct = predictions
        .eq(targets)?
        .to_dtype(candle_core::DType::F32)?
        .broadcast_mul(&mask.unsqueeze(2)?)?;
    let hits = correct.sum_all()?.to_scalar::<f32>()? as f64;
    let total = mask.sum_all()?.to_scalar::<f32>()? as f64 * width as f64;
    if total == 0.0 {
        return Ok(1.0);
    }
    Ok(hits / total)
}

// ═══════════════════════════════════════════════════════════════════════════
// GRADIENT CLIPPING
// ═══════════════════════════════════════════════════════════════════════════

/// Global L2 norm of all parameter gradients.
pub fn grad_norm(varmap: &VarMap, grads: &GradStore) -> MemoryResult<f64> {
    let mut total = 0.0f64;
    for var in varmap.all_vars() {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let norm_sq: f32 = grad.sqr()?.sum_all()?.to_scalar()?;
            total += norm_sq as f64;
        }
    }
    Ok(total.sqrt())
}

/// Clip gradients in place by global norm; returns the pre-clip norm.
pub fn clip_grad_norm(
    varmap: &VarMap,
    grads: &mut GradStore,
    max_norm: f64,
) -> MemoryResult<f64> {
    let total_norm = grad_norm(varmap, grads)?;
    if total_norm > max_norm {
        let clip_coef = max_norm / (total_norm + 1e-6);
        for var in varmap.all_vars() {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let clipped = (grad * clip_coef)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(total_norm)
}

// ═══════════════════════════════════════════════════════════════════════════
// EPISODE MODELS
// ═══════════════════════════════════════════════════════════════════════════

/// A model that maps a full input episode to per-step output logits,
/// starting from a fresh memory state.
pub trait EpisodeModel {
    /// `[batch, time, input_size]` -> `[batch, time, output_size]`
    fn run_episode(&self, inputs: &Tensor) -> MemoryResult<Tensor>;
}

impl EpisodeModel for Ntm {
    fn run_episode(&self, inputs: &Tensor) -> MemoryResult<Tensor> {
        let (batch, _steps, _width) = inputs.dims3()?;
        let state = self.init_state(batch, inputs.device())?;
        let (outputs, _) = self.forward(inputs, &state)?;
        Ok(outputs)
    }
}

impl EpisodeModel for Dnc {
    fn run_episode(&self, inputs: &Tensor) -> MemoryResult<Tensor> {
        let (batch, _steps, _width) = inputs.dims3()?;
        let state = self.init_state(batch, inputs.device())?;
        let (outputs, _) = self.forward(inputs, &state)?;
        Ok(outputs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// METRICS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    pub loss_history: Vec<f64>,
    pub accuracy_history: Vec<f64>,
    pub lr_history: Vec<f64>,
    pub grad_norm_history: Vec<f64>,
    pub eval_loss_history: Vec<f64>,
    pub eval_accuracy_history: Vec<f64>,
    pub step_times: Vec<f64>,
    pub best_eval_loss: f64,
    pub best_step: usize,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self {
            best_eval_loss: f64::INFINITY,
            ..Default::default()
        }
    }

    pub fn log_step(&mut self, loss: f64, accuracy: f64, lr: f64, grad_norm: f64, ms: f64) {
        self.loss_history.push(loss);
        self.accuracy_history.push(accuracy);
        self.lr_history.push(lr);
        self.grad_norm_history.push(grad_norm);
        self.step_times.push(ms);
    }

    pub fn log_eval(&mut self, loss: f64, accuracy: f64, step: usize) {
        self.eval_loss_history.push(loss);
        self.eval_accuracy_history.push(accuracy);
        if loss < self.best_eval_loss {
            self.best_eval_loss = loss;
            self.best_step = step;
        }
    }

    pub fn summary(&self) -> String {
        let last_loss = self.loss_history.last().copied().unwrap_or(f64::NAN);
        let last_acc = self.accuracy_history.last().copied().unwrap_or(f64::NAN);
        let avg_ms = if self.step_times.is_empty() {
            0.0
        } else {
            self.step_times.iter().sum::<f64>() / self.step_times.len() as f64
        };
        format!(
            "steps: {}, loss: {:.4}, bit accuracy: {:.3}, best eval loss: {:.4} (step {}), avg step: {:.1}ms",
            self.loss_history.len(),
            last_loss,
            last_acc,
            self.best_eval_loss,
            self.best_step,
            avg_ms
        )
    }
}

/// Per-step outcome returned by [`Trainer::train_step`] and
/// [`Trainer::evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct StepReport {
    pub loss: f64,
    pub accuracy: f64,
    pub grad_norm: f64,
    pub lr: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// TRAINER
// ═══════════════════════════════════════════════════════════════════════════

pub struct Trainer<M> {
    model: M,
    varmap: VarMap,
    optimizer: AdamW,
    scheduler: LrScheduler,
    config: TrainingConfig,
    metrics: TrainingMetrics,
    global_step: usize,
}

impl<M: EpisodeModel> Trainer<M> {
    /// The model must have been built from `varmap`, otherwise the optimizer
    /// updates parameters the model never reads.
    pub fn new(model: M, varmap: VarMap, config: TrainingConfig) -> MemoryResult<Self> {
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                beta1: config.beta1,
                beta2: config.beta2,
                eps: config.eps,
            },
        )?;
        let scheduler = LrScheduler::new(&config);
        Ok(Self {
            model,
            varmap,
            optimizer,
            scheduler,
            config,
            metrics: TrainingMetrics::new(),
            global_step: 0,
        })
    }

    pub fn train_step(&mut self, batch: &TaskBatch) -> MemoryResult<StepReport> {
        let start = Instant::now();

        let logits = self.model.run_episode(&batch.inputs)?;
        let loss = masked_bce_with_logits(&logits, &batch.targets, &batch.mask)?;
        let loss_value = loss.to_scalar::<f32>()? as f64;
        let accuracy = bit_accuracy(&logits, &batch.targets, &batch.mask)?;

        let mut grads = loss.backward()?;
        let grad_norm = clip_grad_norm(&self.varmap, &mut grads, self.config.grad_clip_norm)?;

        let lr = self.scheduler.get_lr();
        self.optimizer.set_learning_rate(lr);
        self.optimizer.step(&grads)?;
        self.scheduler.step();
        self.global_step += 1;

        let step_time = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .log_step(loss_value, accuracy, lr, grad_norm, step_time);

        Ok(StepReport {
            loss: loss_value,
            accuracy,
            grad_norm,
            lr,
        })
    }

    /// Forward-only pass; logs to the evaluation metric histories.
    pub fn evaluate(&mut self, batch: &TaskBatch) -> MemoryResult<StepReport> {
        let logits = self.model.run_episode(&batch.inputs)?;
        let loss = masked_bce_with_logits(&logits, &batch.targets, &batch.mask)?;
        let loss_value = loss.to_scalar::<f32>()? as f64;
        let accuracy = bit_accuracy(&logits, &batch.targets, &batch.mask)?;

        self.metrics.log_eval(loss_value, accuracy, self.global_step);
        log::debug!("eval step {}: loss {loss_value:.4}, accuracy {accuracy:.3}", self.global_step);

        Ok(StepReport {
            loss: loss_value,
            accuracy,
            grad_norm: 0.0,
            lr: self.scheduler.get_lr(),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::ntm::NtmConfig;
    use crate::tasks::{TaskConfig, TaskGenerator, TaskKind};
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bce_matches_closed_form() {
        let device = Device::Cpu;
        // logit 0 against target 1: softplus(0) - 0 = ln 2
        let logits = Tensor::zeros((1, 1, 2), DType::F32, &device).unwrap();
        let targets = Tensor::ones((1, 1, 2), DType::F32, &device).unwrap();
        let mask = Tensor::ones((1, 1), DType::F32, &device).unwrap();

        let loss = masked_bce_with_logits(&logits, &targets, &mask).unwrap();
        let value = loss.to_scalar::<f32>().unwrap();
        assert!((value - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_bce_ignores_masked_out_steps() {
        let device = Device::Cpu;
        // Second step is wildly wrong but masked out.
        let logits = Tensor::new(&[[[0.0f32], [-50.0]]], &device).unwrap();
        let targets = Tensor::new(&[[[1.0f32], [1.0]]], &device).unwrap();
        let mask = Tensor::new(&[[1.0f32, 0.0]], &device).unwrap();

        let loss = masked_bce_with_logits(&logits, &targets, &mask).unwrap();
        let value = loss.to_scalar::<f32>().unwrap();
        assert!((value - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_bit_accuracy_perfect_and_mixed() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[[5.0f32, -5.0], [5.0, 5.0]]], &device).unwrap();
        let targets = Tensor::new(&[[[1.0f32, 0.0], [1.0, 0.0]]], &device).unwrap();
        let mask = Tensor::new(&[[1.0f32, 1.0]], &device).unwrap();

        let accuracy = bit_accuracy(&logits, &targets, &mask).unwrap();
        assert!((accuracy - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_clip_grad_norm_scales_down() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let w = varmap
            .get((4,), "w", candle_nn::Init::Const(1.0), DType::F32, &device)
            .unwrap();
        // d/dw sum(10 w) = 10 per element, norm = 20
        let loss = w.affine(10.0, 0.0).unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();

        let pre = clip_grad_norm(&varmap, &mut grads, 1.0).unwrap();
        assert!((pre - 20.0).abs() < 1e-3);
        let post = grad_norm(&varmap, &grads).unwrap();
        assert!(post <= 1.0 + 1e-3, "post-clip norm {post}");
    }

    #[test]
    fn test_scheduler_warmup_then_decay() {
        let config = TrainingConfig {
            learning_rate: 1.0,
            warmup_steps: 10,
            total_steps: 100,
            ..TrainingConfig::default()
        };
        let mut scheduler = LrScheduler::new(&config);
        let first = scheduler.get_lr();
        assert!(first < 1.0);
        for _ in 0..10 {
            scheduler.step();
        }
        let peak = scheduler.get_lr();
        assert!(peak > 0.9);
        for _ in 0..89 {
            scheduler.step();
        }
        let end = scheduler.get_lr();
        assert!(end < peak);
        assert!(end >= 0.1 - 1e-6);
    }

    #[test]
    fn test_train_step_runs_and_loss_is_finite() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let generator = TaskGenerator::new(
            TaskKind::Copy,
            TaskConfig {
                batch_size: 2,
                element_size: 4,
                min_len: 2,
                max_len: 3,
                ..TaskConfig::default()
            },
        )
        .unwrap();
        let model = Ntm::new(
            NtmConfig {
                input_size: generator.input_width(),
                output_size: generator.output_width(),
                controller_size: 16,
                memory: MemoryConfig::tiny(),
                ..NtmConfig::default()
            },
            vb,
        )
        .unwrap();

        let mut trainer = Trainer::new(model, varmap, TrainingConfig::quick()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..2 {
            let batch = generator.sample(&mut rng, &device).unwrap();
            let report = trainer.train_step(&batch).unwrap();
            assert!(report.loss.is_finite());
            assert!(report.grad_norm.is_finite());
        }
        assert_eq!(trainer.global_step(), 2);
    }
}

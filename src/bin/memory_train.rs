//! # Memory Model Training CLI
//!
//! Train an NTM or DNC on the synthetic store-then-recall tasks.
//!
//! ## Usage
//!
//! ```bash
//! # Train a DNC on the copy task
//! cargo run --release --bin memory_train -- --model dnc --task copy
//!
//! # Reverse recall with a bigger memory
//! cargo run --release --bin memory_train -- --model ntm --task reverse --slots 256
//!
//! # Short smoke run
//! cargo run --bin memory_train -- --steps 100 --batch-size 4
//! ```

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;

use neural_memory::checkpoint::save_checkpoint;
use neural_memory::config::MemoryConfig;
use neural_memory::dnc::{Dnc, DncConfig};
use neural_memory::ntm::{Ntm, NtmConfig};
use neural_memory::tasks::{TaskConfig, TaskGenerator, TaskKind};
use neural_memory::training::{EpisodeModel, Trainer, TrainingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelKind {
    Ntm,
    Dnc,
}

struct CliConfig {
    model: ModelKind,
    task: TaskKind,
    steps: usize,
    controller_size: usize,
    memory: MemoryConfig,
    task_config: TaskConfig,
    training: TrainingConfig,
    checkpoint_dir: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Dnc,
            task: TaskKind::Copy,
            steps: 10_000,
            controller_size: 128,
            memory: MemoryConfig::default(),
            task_config: TaskConfig::default(),
            training: TrainingConfig::default(),
            checkpoint_dir: "checkpoints/memory".to_string(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args)?;

    let device = if cfg!(feature = "cuda") {
        match Device::cuda_if_available(0) {
            Ok(d) => {
                println!("Using CUDA device");
                d
            }
            Err(_) => {
                println!("CUDA not available, using CPU");
                Device::Cpu
            }
        }
    } else {
        println!("Using CPU device");
        Device::Cpu
    };

    let generator = TaskGenerator::new(config.task, config.task_config.clone())?;
    let mut rng = StdRng::seed_from_u64(config.training.seed);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    match config.model {
        ModelKind::Ntm => {
            let model_config = NtmConfig {
                input_size: generator.input_width(),
                output_size: generator.output_width(),
                controller_size: config.controller_size,
                memory: config.memory.clone(),
                ..NtmConfig::default()
            };
            let model = Ntm::new(model_config.clone(), vb)?;
            let trainer = Trainer::new(model, varmap, config.training.clone())?;
            run_training(trainer, &model_config, &generator, &mut rng, &device, &config)?;
        }
        ModelKind::Dnc => {
            let model_config = DncConfig {
                input_size: generator.input_width(),
                output_size: generator.output_width(),
                controller_size: config.controller_size,
                memory: config.memory.clone(),
                ..DncConfig::default()
            };
            let model = Dnc::new(model_config.clone(), vb)?;
            let trainer = Trainer::new(model, varmap, config.training.clone())?;
            run_training(trainer, &model_config, &generator, &mut rng, &device, &config)?;
        }
    }

    Ok(())
}

fn run_training<M, C>(
    mut trainer: Trainer<M>,
    model_config: &C,
    generator: &TaskGenerator,
    rng: &mut StdRng,
    device: &Device,
    config: &CliConfig,
) -> Result<(), Box<dyn std::error::Error>>
where
    M: EpisodeModel,
    C: serde::Serialize + Clone,
{
    let training = trainer.config().clone();
    println!(
        "Training {:?} on {:?} for {} steps (batch {}, memory {}x{})",
        config.model,
        config.task,
        config.steps,
        generator.config().batch_size,
        config.memory.num_slots,
        config.memory.slot_width,
    );

    for step in 1..=config.steps {
        let batch = generator.sample(rng, device)?;
        let report = trainer.train_step(&batch)?;

        if step % training.log_every == 0 {
            log::info!(
                "step {step}: loss {:.4}, bit accuracy {:.3}, grad norm {:.2}, lr {:.2e}",
                report.loss,
                report.accuracy,
                report.grad_norm,
                report.lr,
            );
        }
        if step % training.eval_every == 0 {
            // Evaluate on longer sequences than the training range.
            let long = generator.sample_with_len(rng, generator.config().max_len * 2, device)?;
            let eval = trainer.evaluate(&long)?;
            log::info!(
                "eval step {step} (len {}): loss {:.4}, bit accuracy {:.3}",
                generator.config().max_len * 2,
                eval.loss,
                eval.accuracy,
            );
        }
        if step % training.checkpoint_every == 0 {
            let last_loss = report.loss;
            save_checkpoint(
                model_config,
                trainer.varmap(),
                &config.checkpoint_dir,
                Some(step),
                Some(last_loss),
            )?;
        }
    }

    save_checkpoint(
        model_config,
        trainer.varmap(),
        &config.checkpoint_dir,
        Some(config.steps),
        trainer.metrics().loss_history.last().copied(),
    )?;
    println!("Done. {}", trainer.metrics().summary());
    Ok(())
}

fn parse_args(args: &[String]) -> Result<CliConfig, Box<dyn std::error::Error>> {
    let mut config = CliConfig::default();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        std::process::exit(0);
    }

    if let Some(pos) = args.iter().position(|a| a == "--model" || a == "-m") {
        if let Some(name) = args.get(pos + 1) {
            config.model = match name.as_str() {
                "ntm" => ModelKind::Ntm,
                "dnc" => ModelKind::Dnc,
                other => {
                    return Err(format!("unknown model '{other}' (expected ntm | dnc)").into());
                }
            };
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--task" || a == "-t") {
        if let Some(name) = args.get(pos + 1) {
            config.task = name.parse()?;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--steps") {
        if let Some(steps) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.steps = steps;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--batch-size" || a == "-b") {
        if let Some(bs) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.task_config.batch_size = bs;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--max-len") {
        if let Some(len) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.task_config.max_len = len;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--slots") {
        if let Some(n) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.memory.num_slots = n;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--width") {
        if let Some(w) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.memory.slot_width = w;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--reads") {
        if let Some(r) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.memory.num_reads = r;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--controller") {
        if let Some(c) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.controller_size = c;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--lr") {
        if let Some(lr) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.training.learning_rate = lr;
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "--seed") {
        if let Some(seed) = args.get(pos + 1).and_then(|s| s.parse().ok()) {
            config.training.seed = seed;
        }
    }

    if let Some(pos) = args
        .iter()
        .position(|a| a == "--checkpoint-dir" || a == "-c")
    {
        if let Some(dir) = args.get(pos + 1) {
            config.checkpoint_dir = dir.clone();
        }
    }

    config.memory.validate()?;
    config.task_config.validate()?;
    config.training.total_steps = config.steps;
    Ok(config)
}

fn print_help() {
    println!(
        "
Memory Model Training

USAGE:
    memory_train [OPTIONS]

OPTIONS:
    --model <NAME>          Model: ntm, dnc (default: dnc)
    --task <NAME>           Task: copy, reverse, distraction (default: copy)
    --steps <N>             Training steps (default: 10000)
    --batch-size <N>        Episodes per step (default: 16)
    --max-len <N>           Longest stored sequence (default: 10)
    --slots <N>             Memory slots (default: 128)
    --width <N>             Memory slot width (default: 20)
    --reads <N>             Read heads (default: 1)
    --controller <N>        Controller hidden size (default: 128)
    --lr <F>                Learning rate (default: 1e-3)
    --seed <N>              Random seed (default: 42)
    --checkpoint-dir <DIR>  Checkpoint directory (default: checkpoints/memory)
    -h, --help              Show this help
"
    );
}

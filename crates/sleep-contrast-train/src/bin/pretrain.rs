//! `pretrain` binary: contrastive pretraining with periodic k-fold linear
//! evaluation.
//!
//! # Usage
//!
//! ```bash
//! cargo run --features tch-backend --bin pretrain -- --config exp.json
//! cargo run --features tch-backend --bin pretrain -- --variant care --cuda
//! cargo run --features tch-backend --bin pretrain -- --dry-run --epochs 2
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use sleep_contrast_train::augment::Augmenter;
use sleep_contrast_train::collate::select_device;
use sleep_contrast_train::config::{ExperimentConfig, Variant};
use sleep_contrast_train::dataset::{load_subjects, synthetic_subjects, PretextDataset, SyntheticPretextDataset};
use sleep_contrast_train::logger::{JsonlLogger, MultiLogger, TracingLogger};
use sleep_contrast_train::pretrain::SleepPretrain;
use sleep_contrast_train::TrainResult;

/// Command-line arguments for the pretraining binary.
#[derive(Parser, Debug)]
#[command(
    name = "pretrain",
    version,
    about = "Contrastive EEG pretraining with k-fold linear evaluation",
    long_about = None
)]
struct Args {
    /// Path to the JSON experiment configuration.
    ///
    /// If not provided, the default `ExperimentConfig` is used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the model variant (care, simclr, simsiam).
    #[arg(long)]
    variant: Option<Variant>,

    /// Override the experiment output directory.
    #[arg(long, value_name = "DIR")]
    exp_path: Option<PathBuf>,

    /// Override the run name used for checkpoint and log files.
    #[arg(long)]
    name: Option<String>,

    /// Override the directory of pretext `.npz` blocks.
    #[arg(long, value_name = "DIR")]
    pretext_dir: Option<PathBuf>,

    /// Override the directory of labelled subject records.
    #[arg(long, value_name = "DIR")]
    test_dir: Option<PathBuf>,

    /// Override the number of pretraining epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// Continue from a `<name>_full.pt` checkpoint.
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Enable CUDA training (overrides config `use_gpu`).
    #[arg(long, default_value_t = false)]
    cuda: bool,

    /// Use deterministic synthetic data instead of real recordings.
    ///
    /// This is intended for pipeline smoke-tests only.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Number of synthetic pretext blocks when `--dry-run` is active.
    #[arg(long, default_value_t = 64)]
    dry_run_samples: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("Sleep-contrast pretraining v{}", sleep_contrast_train::VERSION);

    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match ExperimentConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("No configuration file provided, using defaults");
            ExperimentConfig::default()
        }
    };

    if let Some(variant) = args.variant {
        config.variant = variant;
    }
    if let Some(dir) = args.exp_path.clone() {
        config.exp_path = dir;
    }
    if let Some(name) = args.name.clone() {
        config.name = name;
    }
    if let Some(dir) = args.pretext_dir.clone() {
        config.pretext_dir = dir;
    }
    if let Some(dir) = args.test_dir.clone() {
        config.test_dir = dir;
    }
    if let Some(epochs) = args.epochs {
        config.num_epoch = epochs;
    }
    if args.cuda {
        config.use_gpu = true;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    info!("Configuration validated successfully");
    info!("  variant      : {}", config.variant);
    info!("  epoch_len    : {}", config.epoch_len);
    info!("  batch size   : {}", config.batch_size);
    info!("  learning rate: {}", config.lr);
    info!("  epochs       : {}", config.num_epoch);
    info!("  output       : {}", config.exp_path.display());

    if let Err(e) = run(config, &args) {
        error!("Pretraining failed: {e}");
        std::process::exit(1);
    }
}

fn run(config: ExperimentConfig, args: &Args) -> TrainResult<()> {
    let device = select_device(&config);
    config.to_json(&config.exp_path.join(format!("{}_config.json", config.name)))?;

    let logger = MultiLogger::new()
        .with(TracingLogger)
        .with(JsonlLogger::for_run(&config.exp_path, &config.name)?);
    let augmenter = Augmenter::default();

    let mut trainer = SleepPretrain::new(config.clone(), device, Box::new(logger))?;
    if let Some(path) = args.resume.as_deref() {
        trainer.resume(path)?;
    }

    let summary = if args.dry_run {
        info!("DRY RUN, using synthetic data ({} blocks)", args.dry_run_samples);
        let pretext = SyntheticPretextDataset::new(
            args.dry_run_samples,
            config.epoch_len,
            config.window_samples,
            augmenter,
        );
        let subjects = synthetic_subjects(config.splits * 2, 32, config.window_samples, config.num_classes);
        trainer.fit(&pretext, &subjects)?
    } else {
        let pretext = PretextDataset::discover(
            &config.pretext_dir,
            config.epoch_len,
            config.window_samples,
            augmenter,
        )?;
        let subjects = load_subjects(&config.test_dir, config.window_samples, config.num_classes)?;
        trainer.fit(&pretext, &subjects)?
    };

    info!(
        "Finished at epoch {}: final loss {:.5}, best F1 {:.4} (epoch {})",
        summary.last_epoch,
        summary.final_loss,
        summary.best.f1,
        summary.best_epoch.map_or_else(|| "-".to_string(), |e| e.to_string())
    );
    Ok(())
}

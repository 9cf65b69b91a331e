//! `linear-eval` binary: k-fold linear evaluation of a saved encoder.
//!
//! # Usage
//!
//! ```bash
//! cargo run --features tch-backend --bin linear-eval -- --checkpoint experiments/sleep_best.pt
//! cargo run --features tch-backend --bin linear-eval -- --checkpoint sleep.pt --config exp.json --cuda
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use sleep_contrast_train::collate::select_device;
use sleep_contrast_train::config::ExperimentConfig;
use sleep_contrast_train::dataset::{load_subjects, synthetic_subjects};
use sleep_contrast_train::finetune::do_kfold_from_checkpoint;
use sleep_contrast_train::logger::{JsonlLogger, MetricLogger, MultiLogger, TracingLogger};
use sleep_contrast_train::TrainResult;

/// Command-line arguments for the linear evaluation binary.
#[derive(Parser, Debug)]
#[command(
    name = "linear-eval",
    version,
    about = "k-fold linear evaluation of a pretrained EEG encoder",
    long_about = None
)]
struct Args {
    /// Checkpoint holding `eeg_model_state_dict`.
    #[arg(long, value_name = "FILE")]
    checkpoint: PathBuf,

    /// Path to the JSON experiment configuration.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the directory of labelled subject records.
    #[arg(long, value_name = "DIR")]
    test_dir: Option<PathBuf>,

    /// Override the number of folds.
    #[arg(long)]
    splits: Option<usize>,

    /// Enable CUDA (overrides config `use_gpu`).
    #[arg(long, default_value_t = false)]
    cuda: bool,

    /// Evaluate on deterministic synthetic subjects.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

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

    info!("Sleep-contrast linear evaluation v{}", sleep_contrast_train::VERSION);

    let mut config = match args.config.as_deref() {
        Some(path) => match ExperimentConfig::from_json(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load configuration: {e}");
                std::process::exit(1);
            }
        },
        None => ExperimentConfig::default(),
    };
    if let Some(dir) = args.test_dir.clone() {
        config.test_dir = dir;
    }
    if let Some(splits) = args.splits {
        config.splits = splits;
    }
    if args.cuda {
        config.use_gpu = true;
    }
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(&config, &args) {
        error!("Linear evaluation failed: {e}");
        std::process::exit(1);
    }
}

fn run(config: &ExperimentConfig, args: &Args) -> TrainResult<()> {
    let device = select_device(config);
    tch::manual_seed(config.seed as i64);

    info!("Evaluating encoder from {}", args.checkpoint.display());

    let subjects = if args.dry_run {
        synthetic_subjects(config.splits * 2, 32, config.window_samples, config.num_classes)
    } else {
        load_subjects(&config.test_dir, config.window_samples, config.num_classes)?
    };

    let metrics = do_kfold_from_checkpoint(config, device, &args.checkpoint, &subjects)?;

    let mut logger = MultiLogger::new()
        .with(TracingLogger)
        .with(JsonlLogger::for_run(&config.exp_path, &format!("{}_linear_eval", config.name))?);
    logger.log(&metrics.to_metric_map())?;
    info!("{}", metrics.summary());
    Ok(())
}

//! # Sleep-Contrast Training
//!
//! Self-supervised contrastive pretraining of a single-channel EEG encoder
//! and k-fold linear evaluation of the learned features on sleep staging.
//!
//! ## Architecture
//!
//! ```text
//! ExperimentConfig ──► SleepPretrain ──► PretextModel (care | simclr | simsiam)
//!       │                   │                  │
//!       │               DataLoader        Encoder (ResNet1d → AttentionPool)
//!       │                   │                  │
//!       │      PretextDataset (Augmenter)   losses (InfoNCE / stop-gradient)
//!       │
//!       └──► do_kfold ──► KFold over subjects ──► SleepFineTune (FtModel)
//!                                                     │
//!                                               metrics / EarlyStopping
//! ```
//!
//! Everything that links libtorch is behind the `tch-backend` feature. The
//! data pipeline, augmentation, fold splitting, metrics and schedules are
//! plain Rust and always available.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use sleep_contrast_train::augment::Augmenter;
//! use sleep_contrast_train::config::ExperimentConfig;
//! use sleep_contrast_train::dataset::{SleepDataset, SyntheticPretextDataset};
//!
//! let config = ExperimentConfig::default();
//! config.validate().expect("config is valid");
//!
//! let dataset = SyntheticPretextDataset::new(32, config.epoch_len, config.window_samples, Augmenter::default());
//! let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
//! let sample = dataset.get(0, &mut rng).unwrap();
//! println!("weak view shape: {:?}", sample.weak.shape());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod augment;
pub mod config;
pub mod dataset;
pub mod early_stop;
pub mod error;
pub mod folds;
pub mod logger;
pub mod metrics;
pub mod schedule;

#[cfg(feature = "tch-backend")]
pub mod amp;
#[cfg(feature = "tch-backend")]
pub mod checkpoint;
#[cfg(feature = "tch-backend")]
pub mod collate;
#[cfg(feature = "tch-backend")]
pub mod finetune;
#[cfg(feature = "tch-backend")]
pub mod losses;
#[cfg(feature = "tch-backend")]
pub mod models;
#[cfg(feature = "tch-backend")]
pub mod nn;
#[cfg(feature = "tch-backend")]
pub mod pretrain;

// Convenient re-exports at the crate root.
pub use config::{ExperimentConfig, Variant};
pub use dataset::{DataLoader, PretextDataset, SleepDataset, SyntheticPretextDataset, TuneDataset};
pub use error::{CheckpointError, ConfigError, DatasetError, TrainError, TrainResult};
pub use metrics::{BestMetrics, EvalMetrics};

#[cfg(feature = "tch-backend")]
pub use finetune::{do_kfold, do_kfold_from_checkpoint, FtModel, FtOutcome, SleepFineTune};
#[cfg(feature = "tch-backend")]
pub use pretrain::{PretrainSummary, SleepPretrain};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

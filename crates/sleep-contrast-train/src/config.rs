//! Experiment configuration for contrastive sleep-stage pretraining.
//!
//! [`ExperimentConfig`] is the single source of truth for every
//! hyper-parameter the pretraining and fine-tuning harnesses read by name
//! (`epoch_len`, `tc_hidden_dim`, `temperature`, `lambda1`, `lr`, …). It is
//! serializable via [`serde`] so a run's configuration can be stored next to
//! its checkpoints and restored later.
//!
//! # Example
//!
//! ```rust
//! use sleep_contrast_train::config::{ExperimentConfig, Variant};
//!
//! let cfg = ExperimentConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.variant, Variant::SimClr);
//! assert_eq!(cfg.num_classes, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

/// The three pretraining experiments sharing the fine-tuning harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Dual-branch student/target model with transformer context ("care").
    Care,
    /// Shared encoder + projection head, InfoNCE on two views.
    #[serde(rename = "simclr")]
    SimClr,
    /// Shared encoder with projector and predictor, stop-gradient loss.
    #[serde(rename = "simsiam")]
    SimSiam,
}

impl Variant {
    /// Lower-case name used in file names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Care => "care",
            Variant::SimClr => "simclr",
            Variant::SimSiam => "simsiam",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "care" => Ok(Variant::Care),
            "simclr" => Ok(Variant::SimClr),
            "simsiam" | "simsiam_nobn" => Ok(Variant::SimSiam),
            other => Err(ConfigError::invalid_value(
                "variant",
                format!("unknown variant `{other}` (expected care, simclr or simsiam)"),
            )),
        }
    }
}

/// Nonlinearity between the two layers of projection / predictor heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadActivation {
    /// Rectified linear unit.
    #[default]
    Relu,
    /// Hyperbolic tangent (bounded).
    Tanh,
}

// ---------------------------------------------------------------------------
// ExperimentConfig
// ---------------------------------------------------------------------------

/// Complete configuration for one pretraining + linear-evaluation run.
///
/// Use [`ExperimentConfig::default()`] as a starting point, then override
/// individual fields. Missing fields in a JSON file fall back to the
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    // -----------------------------------------------------------------------
    // Experiment
    // -----------------------------------------------------------------------
    /// Which pretraining variant to run. Default: **simclr**.
    pub variant: Variant,

    /// Run name; prefixes every checkpoint file. Default: **"sleep"**.
    pub name: String,

    /// Directory receiving checkpoints and metric logs.
    pub exp_path: PathBuf,

    /// Directory of pretext `.npz` windows (`pos`).
    pub pretext_dir: PathBuf,

    /// Directory of labelled subject records (`windows`, `y`).
    pub test_dir: PathBuf,

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------
    /// Number of consecutive epochs (windows) per pretext sample. Default: **9**.
    pub epoch_len: usize,

    /// Samples per epoch window (30 s at 100 Hz). Default: **3000**.
    pub window_samples: usize,

    /// Number of sleep stages (W, N1, N2, N3, REM). Default: **5**.
    pub num_classes: usize,

    // -----------------------------------------------------------------------
    // Model
    // -----------------------------------------------------------------------
    /// Encoder output / attention width. Default: **256**.
    pub feature_dim: usize,

    /// Width of projection and predictor heads. Default: **128**.
    pub tc_hidden_dim: usize,

    /// Activation inside projection and predictor heads. Default: **relu**.
    pub head_activation: HeadActivation,

    /// Transformer blocks in the context aggregator. Default: **4**.
    pub tfmr_depth: usize,

    /// Attention heads per transformer block. Default: **4**.
    pub tfmr_heads: usize,

    /// Hidden width of the transformer MLP. Default: **256**.
    pub tfmr_mlp_dim: usize,

    /// Dropout probability inside the transformer. Default: **0.1**.
    pub tfmr_dropout: f64,

    /// EMA momentum of the target branch (`care` only). `1.0` keeps the
    /// target frozen at its initial copy. Default: **0.996**.
    pub ema_momentum: f64,

    // -----------------------------------------------------------------------
    // Loss
    // -----------------------------------------------------------------------
    /// InfoNCE temperature. Default: **0.5**.
    pub temperature: f64,

    /// Weight of the cross current/surrounding terms (`care`). Default: **1.0**.
    pub lambda1: f64,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Adam learning rate. Default: **3e-4**.
    pub lr: f64,

    /// Adam β₁. Default: **0.9**.
    pub beta1: f64,

    /// Adam β₂. Default: **0.99**.
    pub beta2: f64,

    /// Adam L2 weight decay. Default: **3e-5**.
    pub weight_decay: f64,

    /// Pretraining mini-batch size. Default: **128**.
    pub batch_size: usize,

    /// Fine-tuning mini-batch size. Default: **256**.
    pub eval_batch_size: usize,

    /// Pretraining epochs. Default: **120**.
    pub num_epoch: usize,

    /// Maximum fine-tuning epochs per fold. Default: **100**.
    pub num_ft_epoch: usize,

    /// Plateau scheduler patience (epochs). Default: **5**.
    pub scheduler_patience: usize,

    /// Plateau scheduler LR multiplier. Default: **0.2**.
    pub scheduler_factor: f64,

    /// Enable autocast + loss scaling on CUDA devices. Default: **true**.
    pub mixed_precision: bool,

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------
    /// Number of subject folds for linear evaluation. Default: **5**.
    pub splits: usize,

    /// Fine-tuning early-stopping patience. Default: **10**.
    pub eval_early_stopping: usize,

    /// Minimum validation-loss improvement that resets early stopping.
    /// Default: **0.001**.
    pub eval_min_delta: f64,

    /// Run k-fold evaluation on epoch 1 and every N-th epoch. Default: **10**.
    pub eval_every: usize,

    /// Seed of the k-fold subject shuffle. Default: **1234**.
    pub kfold_seed: u64,

    // -----------------------------------------------------------------------
    // Device / reproducibility
    // -----------------------------------------------------------------------
    /// Use a CUDA GPU when available. Default: **false**.
    pub use_gpu: bool,

    /// CUDA device index when `use_gpu` is `true`. Default: **0**.
    pub gpu_device_id: usize,

    /// Seed for parameter init, shuffling and augmentation. Default: **42**.
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            // Experiment
            variant: Variant::SimClr,
            name: "sleep".to_string(),
            exp_path: PathBuf::from("experiments"),
            pretext_dir: PathBuf::from("data/pretext"),
            test_dir: PathBuf::from("data/test"),
            // Data
            epoch_len: 9,
            window_samples: 3000,
            num_classes: 5,
            // Model
            feature_dim: 256,
            tc_hidden_dim: 128,
            head_activation: HeadActivation::Relu,
            tfmr_depth: 4,
            tfmr_heads: 4,
            tfmr_mlp_dim: 256,
            tfmr_dropout: 0.1,
            ema_momentum: 0.996,
            // Loss
            temperature: 0.5,
            lambda1: 1.0,
            // Optimisation
            lr: 3e-4,
            beta1: 0.9,
            beta2: 0.99,
            weight_decay: 3e-5,
            batch_size: 128,
            eval_batch_size: 256,
            num_epoch: 120,
            num_ft_epoch: 100,
            scheduler_patience: 5,
            scheduler_factor: 0.2,
            mixed_precision: true,
            // Evaluation
            splits: 5,
            eval_early_stopping: 10,
            eval_min_delta: 0.001,
            eval_every: 10,
            kfold_seed: 1234,
            // Device
            use_gpu: false,
            gpu_device_id: 0,
            seed: 42,
        }
    }
}

impl ExperimentConfig {
    /// Load an [`ExperimentConfig`] from a JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::ParseError`] if the JSON is malformed and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: ExperimentConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON and write it to
    /// `path`, creating parent directories if necessary.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Index of the centre epoch used by the single-epoch variants.
    pub fn center_epoch(&self) -> usize {
        self.epoch_len / 2
    }

    /// Whether k-fold evaluation runs after pretraining epoch `epoch`
    /// (1-based): on the first epoch and every `eval_every`-th thereafter.
    pub fn is_eval_epoch(&self, epoch: usize) -> bool {
        epoch == 1 || epoch % self.eval_every == 0
    }

    /// Path of a checkpoint file named `<name><suffix>.pt` under `exp_path`.
    pub fn checkpoint_path(&self, suffix: &str) -> PathBuf {
        self.exp_path.join(format!("{}{}.pt", self.name, suffix))
    }

    /// Validate all fields and return an error describing the first problem
    /// found, or `Ok(())` if the configuration is coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid_value("name", "must not be empty"));
        }

        // Data
        if self.epoch_len == 0 {
            return Err(ConfigError::invalid_value("epoch_len", "must be > 0"));
        }
        if self.window_samples < 64 {
            return Err(ConfigError::invalid_value("window_samples", "must be >= 64"));
        }
        if self.num_classes < 2 {
            return Err(ConfigError::invalid_value("num_classes", "must be >= 2"));
        }

        // Model
        if self.feature_dim == 0 {
            return Err(ConfigError::invalid_value("feature_dim", "must be > 0"));
        }
        if self.tc_hidden_dim == 0 {
            return Err(ConfigError::invalid_value("tc_hidden_dim", "must be > 0"));
        }
        if self.tfmr_depth == 0 {
            return Err(ConfigError::invalid_value("tfmr_depth", "must be > 0"));
        }
        if self.tfmr_heads == 0 || self.feature_dim % self.tfmr_heads != 0 {
            return Err(ConfigError::invalid_value(
                "tfmr_heads",
                "must be > 0 and divide feature_dim",
            ));
        }
        if !(0.0..1.0).contains(&self.tfmr_dropout) {
            return Err(ConfigError::invalid_value("tfmr_dropout", "must be in [0.0, 1.0)"));
        }
        if !(0.0..=1.0).contains(&self.ema_momentum) {
            return Err(ConfigError::invalid_value("ema_momentum", "must be in [0.0, 1.0]"));
        }

        // Loss
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(ConfigError::invalid_value("temperature", "must be > 0.0"));
        }
        if self.lambda1 < 0.0 {
            return Err(ConfigError::invalid_value("lambda1", "must be >= 0.0"));
        }

        // Optimisation
        if self.lr <= 0.0 {
            return Err(ConfigError::invalid_value("lr", "must be > 0.0"));
        }
        if !(0.0..1.0).contains(&self.beta1) {
            return Err(ConfigError::invalid_value("beta1", "must be in [0.0, 1.0)"));
        }
        if !(0.0..1.0).contains(&self.beta2) {
            return Err(ConfigError::invalid_value("beta2", "must be in [0.0, 1.0)"));
        }
        if self.weight_decay < 0.0 {
            return Err(ConfigError::invalid_value("weight_decay", "must be >= 0.0"));
        }
        if self.batch_size < 2 {
            // InfoNCE needs at least one negative per row.
            return Err(ConfigError::invalid_value("batch_size", "must be >= 2"));
        }
        if self.eval_batch_size == 0 {
            return Err(ConfigError::invalid_value("eval_batch_size", "must be > 0"));
        }
        if self.num_epoch == 0 {
            return Err(ConfigError::invalid_value("num_epoch", "must be > 0"));
        }
        if self.num_ft_epoch == 0 {
            return Err(ConfigError::invalid_value("num_ft_epoch", "must be > 0"));
        }
        if self.scheduler_factor <= 0.0 || self.scheduler_factor >= 1.0 {
            return Err(ConfigError::invalid_value("scheduler_factor", "must be in (0.0, 1.0)"));
        }

        // Evaluation
        if self.splits < 2 {
            return Err(ConfigError::invalid_value("splits", "must be >= 2"));
        }
        if self.eval_early_stopping == 0 {
            return Err(ConfigError::invalid_value("eval_early_stopping", "must be > 0"));
        }
        if self.eval_min_delta < 0.0 {
            return Err(ConfigError::invalid_value("eval_min_delta", "must be >= 0.0"));
        }
        if self.eval_every == 0 {
            return Err(ConfigError::invalid_value("eval_every", "must be > 0"));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let cfg = ExperimentConfig::default();
        cfg.validate().expect("default config should be valid");
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let mut original = ExperimentConfig::default();
        original.variant = Variant::Care;
        original.to_json(&path).expect("serialization should succeed");

        let loaded = ExperimentConfig::from_json(&path).expect("deserialization should succeed");
        assert_eq!(loaded.variant, Variant::Care);
        assert_eq!(loaded.epoch_len, original.epoch_len);
        assert_eq!(loaded.batch_size, original.batch_size);
        assert_eq!(loaded.kfold_seed, original.kfold_seed);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("partial.json");
        std::fs::write(&path, r#"{ "variant": "simsiam", "temperature": 0.2 }"#).unwrap();

        let cfg = ExperimentConfig::from_json(&path).unwrap();
        assert_eq!(cfg.variant, Variant::SimSiam);
        assert!((cfg.temperature - 0.2).abs() < 1e-12);
        assert_eq!(cfg.splits, 5);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ExperimentConfig::from_json(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn zero_temperature_is_invalid() {
        let mut cfg = ExperimentConfig::default();
        cfg.temperature = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn single_split_is_invalid() {
        let mut cfg = ExperimentConfig::default();
        cfg.splits = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn heads_must_divide_feature_dim() {
        let mut cfg = ExperimentConfig::default();
        cfg.tfmr_heads = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn eval_epochs_are_first_and_every_tenth() {
        let cfg = ExperimentConfig::default();
        let evals: Vec<usize> = (1..=30).filter(|&e| cfg.is_eval_epoch(e)).collect();
        assert_eq!(evals, vec![1, 10, 20, 30]);
    }

    #[test]
    fn variant_parses_from_str() {
        assert_eq!("CARE".parse::<Variant>().unwrap(), Variant::Care);
        assert_eq!("simsiam_noBN".parse::<Variant>().unwrap(), Variant::SimSiam);
        assert!("byol".parse::<Variant>().is_err());
    }

    #[test]
    fn checkpoint_paths_use_run_name() {
        let mut cfg = ExperimentConfig::default();
        cfg.exp_path = PathBuf::from("/tmp/exp");
        cfg.name = "run".into();
        assert_eq!(cfg.checkpoint_path("_best"), PathBuf::from("/tmp/exp/run_best.pt"));
        assert_eq!(cfg.checkpoint_path("__10"), PathBuf::from("/tmp/exp/run__10.pt"));
    }
}

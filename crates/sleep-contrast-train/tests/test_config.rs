//! Integration tests for [`sleep_contrast_train::config`].
//!
//! All tests are deterministic: they use only fixed values and the
//! `ExperimentConfig::default()` constructor.

use sleep_contrast_train::config::{ExperimentConfig, HeadActivation, Variant};
use sleep_contrast_train::ConfigError;
use tempfile::tempdir;

// ---------------------------------------------------------------------------
// Default config invariants
// ---------------------------------------------------------------------------

/// The default configuration must pass its own validation.
#[test]
fn default_config_is_valid() {
    let cfg = ExperimentConfig::default();
    cfg.validate().expect("default ExperimentConfig must be valid");
}

/// Defaults carry the hyper-parameters of the reference experiments.
#[test]
fn default_hyperparameters() {
    let cfg = ExperimentConfig::default();
    assert_eq!(cfg.num_classes, 5);
    assert_eq!(cfg.feature_dim, 256);
    assert_eq!(cfg.splits, 5);
    assert_eq!(cfg.kfold_seed, 1234);
    assert_eq!(cfg.scheduler_patience, 5);
    assert!((cfg.scheduler_factor - 0.2).abs() < 1e-12);
    assert!((cfg.weight_decay - 3e-5).abs() < 1e-12);
    assert!((cfg.eval_min_delta - 0.001).abs() < 1e-12);
    assert_eq!(cfg.head_activation, HeadActivation::Relu);
}

/// The transformer width must split evenly over its heads by default.
#[test]
fn default_heads_divide_feature_dim() {
    let cfg = ExperimentConfig::default();
    assert_eq!(cfg.feature_dim % cfg.tfmr_heads, 0);
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

#[test]
fn center_epoch_is_floor_half() {
    let mut cfg = ExperimentConfig::default();
    for (len, center) in [(1, 0), (2, 1), (7, 3), (9, 4), (10, 5)] {
        cfg.epoch_len = len;
        assert_eq!(cfg.center_epoch(), center, "epoch_len={len}");
    }
}

#[test]
fn eval_epochs_are_first_and_every_tenth() {
    let cfg = ExperimentConfig::default();
    let evals: Vec<usize> = (1..=35).filter(|&e| cfg.is_eval_epoch(e)).collect();
    assert_eq!(evals, vec![1, 10, 20, 30]);
}

#[test]
fn checkpoint_paths_follow_naming_scheme() {
    let cfg = ExperimentConfig { name: "run".into(), exp_path: "out".into(), ..Default::default() };
    assert_eq!(cfg.checkpoint_path(""), std::path::Path::new("out/run.pt"));
    assert_eq!(cfg.checkpoint_path("_full"), std::path::Path::new("out/run_full.pt"));
    assert_eq!(cfg.checkpoint_path("__10"), std::path::Path::new("out/run__10.pt"));
    assert_eq!(cfg.checkpoint_path("_best"), std::path::Path::new("out/run_best.pt"));
}

// ---------------------------------------------------------------------------
// Validation failures
// ---------------------------------------------------------------------------

fn invalid_field(cfg: ExperimentConfig) -> &'static str {
    match cfg.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => field,
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

#[test]
fn rejects_single_sample_batches() {
    let cfg = ExperimentConfig { batch_size: 1, ..Default::default() };
    assert_eq!(invalid_field(cfg), "batch_size");
}

#[test]
fn rejects_fewer_than_two_splits() {
    let cfg = ExperimentConfig { splits: 1, ..Default::default() };
    assert_eq!(invalid_field(cfg), "splits");
}

#[test]
fn rejects_non_positive_temperature() {
    let cfg = ExperimentConfig { temperature: 0.0, ..Default::default() };
    assert_eq!(invalid_field(cfg), "temperature");
}

#[test]
fn rejects_heads_not_dividing_width() {
    let cfg = ExperimentConfig { tfmr_heads: 3, ..Default::default() };
    assert_eq!(invalid_field(cfg), "tfmr_heads");
}

#[test]
fn rejects_out_of_range_betas_and_momentum() {
    assert_eq!(invalid_field(ExperimentConfig { beta1: 1.0, ..Default::default() }), "beta1");
    assert_eq!(invalid_field(ExperimentConfig { beta2: -0.1, ..Default::default() }), "beta2");
    assert_eq!(invalid_field(ExperimentConfig { ema_momentum: 1.5, ..Default::default() }), "ema_momentum");
}

#[test]
fn momentum_of_one_is_allowed() {
    let cfg = ExperimentConfig { ema_momentum: 1.0, ..Default::default() };
    cfg.validate().expect("a permanently frozen target is valid");
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

#[test]
fn json_round_trip_preserves_fields() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("nested").join("cfg.json");
    let cfg = ExperimentConfig {
        variant: Variant::Care,
        name: "care_run".into(),
        lambda1: 0.5,
        head_activation: HeadActivation::Tanh,
        ..Default::default()
    };
    cfg.to_json(&path).expect("write");
    let back = ExperimentConfig::from_json(&path).expect("read");
    assert_eq!(back.variant, Variant::Care);
    assert_eq!(back.name, "care_run");
    assert_eq!(back.head_activation, HeadActivation::Tanh);
    assert!((back.lambda1 - 0.5).abs() < 1e-12);
}

#[test]
fn partial_json_falls_back_to_defaults() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("cfg.json");
    std::fs::write(&path, r#"{ "variant": "simsiam", "epoch_len": 5 }"#).expect("write");
    let cfg = ExperimentConfig::from_json(&path).expect("read");
    assert_eq!(cfg.variant, Variant::SimSiam);
    assert_eq!(cfg.epoch_len, 5);
    assert_eq!(cfg.batch_size, ExperimentConfig::default().batch_size);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("cfg.json");
    std::fs::write(&path, "{ not json").expect("write");
    assert!(matches!(ExperimentConfig::from_json(&path), Err(ConfigError::ParseError { .. })));
}

#[test]
fn missing_file_is_a_read_error() {
    let tmp = tempdir().expect("tempdir");
    let result = ExperimentConfig::from_json(&tmp.path().join("absent.json"));
    assert!(matches!(result, Err(ConfigError::FileRead { .. })));
}

#[test]
fn variant_parses_case_insensitively() {
    assert_eq!("CARE".parse::<Variant>().unwrap(), Variant::Care);
    assert_eq!("SimCLR".parse::<Variant>().unwrap(), Variant::SimClr);
    assert_eq!("simsiam_nobn".parse::<Variant>().unwrap(), Variant::SimSiam);
    assert!("byol".parse::<Variant>().is_err());
    assert_eq!(Variant::SimClr.to_string(), "simclr");
}

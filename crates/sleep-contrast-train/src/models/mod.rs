//! Pretext models (requires `tch-backend`).
//!
//! | Variant   | Input used                  | Objective                          |
//! |-----------|-----------------------------|------------------------------------|
//! | `care`    | every epoch of the sequence | four-way InfoNCE, two branches     |
//! | `simclr`  | centre epoch                | InfoNCE                            |
//! | `simsiam` | centre epoch                | stop-gradient negative cosine      |
//!
//! Each model owns a [`tch::nn::VarStore`] whose trainable variables are
//! handed to the optimiser. The encoder always lives under the
//! `eeg_encoder` prefix so that [`PretextModel::encoder_state`] exports the
//! same parameter names for every variant.

pub mod care;
pub mod simclr;
pub mod simsiam;

pub use care::{CareModel, CareOutput};
pub use simclr::SimClrModel;
pub use simsiam::{SimSiamModel, SimSiamOutput};

use std::path::Path;

use rand_chacha::ChaCha8Rng;
use tch::{nn, Device, Tensor};

use crate::checkpoint::StateDict;
use crate::config::{ExperimentConfig, Variant};
use crate::error::{CheckpointError, TrainResult};
use crate::losses::LossOutput;
use crate::nn::TransformerConfig;

/// Parameter prefix of the encoder inside every model's store.
pub const ENCODER_PREFIX: &str = "eeg_encoder";

/// Common surface of the three pretext models.
pub trait PretextModel {
    /// Which variant this is.
    fn variant(&self) -> Variant;

    /// Store holding the trainable parameters.
    fn var_store(&self) -> &nn::VarStore;

    /// Loss for one batch of weak/strong views `[B, L, 1, S]`.
    ///
    /// `rng` supplies any per-batch randomness the model needs.
    fn forward_loss(&self, weak: &Tensor, strong: &Tensor, rng: &mut ChaCha8Rng, train: bool) -> LossOutput;

    /// Encoder parameters exported for linear evaluation.
    fn encoder_state(&self) -> StateDict;

    /// Every parameter of the model, for resuming.
    fn full_state(&self) -> StateDict;

    /// Restore the parameters produced by [`PretextModel::full_state`].
    fn load_full_state(&mut self, state: &StateDict, path: &Path) -> Result<(), CheckpointError>;

    /// Hook run after each optimiser step.
    fn after_step(&mut self) {}
}

/// Build the model selected by `cfg.variant` on `device`.
pub fn build_model(cfg: &ExperimentConfig, device: Device) -> TrainResult<Box<dyn PretextModel>> {
    Ok(match cfg.variant {
        Variant::Care => Box::new(CareModel::new(cfg, device)?),
        Variant::SimClr => Box::new(SimClrModel::new(cfg, device)),
        Variant::SimSiam => Box::new(SimSiamModel::new(cfg, device)),
    })
}

/// Transformer shape derived from the experiment configuration.
pub(crate) fn transformer_config(cfg: &ExperimentConfig) -> TransformerConfig {
    TransformerConfig {
        dim: cfg.feature_dim as i64,
        depth: cfg.tfmr_depth as i64,
        heads: cfg.tfmr_heads as i64,
        mlp_dim: cfg.tfmr_mlp_dim as i64,
        dropout: cfg.tfmr_dropout,
        max_len: cfg.epoch_len as i64,
    }
}

//! Single-branch InfoNCE model on the centre epoch.

use std::path::Path;

use rand_chacha::ChaCha8Rng;
use tch::{nn, nn::Module, nn::ModuleT, Device, Tensor};

use super::{PretextModel, ENCODER_PREFIX};
use crate::checkpoint::{load_state_dict, state_dict, StateDict};
use crate::config::{ExperimentConfig, Variant};
use crate::error::CheckpointError;
use crate::losses::{info_nce_loss, LossOutput};
use crate::nn::{Encoder, MlpHead};

/// Shared encoder and projection applied to both views.
#[derive(Debug)]
pub struct SimClrModel {
    vs: nn::VarStore,
    encoder: Encoder,
    proj: MlpHead,
    center: i64,
    temperature: f64,
}

impl SimClrModel {
    /// Build the encoder and projection head in a fresh store on `device`.
    pub fn new(cfg: &ExperimentConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let encoder = Encoder::new(&(&root / ENCODER_PREFIX), cfg.feature_dim as i64);
        let proj = MlpHead::projection(
            &(&root / "proj"),
            cfg.feature_dim as i64,
            cfg.tc_hidden_dim as i64,
            cfg.head_activation,
        );
        SimClrModel {
            vs,
            encoder,
            proj,
            center: cfg.center_epoch() as i64,
            temperature: cfg.temperature,
        }
    }

    /// Projections `([B, H], [B, H])` of the centre epoch of both views.
    pub fn forward_t(&self, weak: &Tensor, strong: &Tensor, train: bool) -> (Tensor, Tensor) {
        let w = self.encoder.forward_t(&weak.select(1, self.center), train);
        let s = self.encoder.forward_t(&strong.select(1, self.center), train);
        (self.proj.forward(&w), self.proj.forward(&s))
    }
}

impl PretextModel for SimClrModel {
    fn variant(&self) -> Variant {
        Variant::SimClr
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn forward_loss(&self, weak: &Tensor, strong: &Tensor, _rng: &mut ChaCha8Rng, train: bool) -> LossOutput {
        let (z1, z2) = self.forward_t(weak, strong, train);
        LossOutput::scalar(info_nce_loss(&z1, &z2, self.temperature))
    }

    fn encoder_state(&self) -> StateDict {
        state_dict(&self.vs, Some(ENCODER_PREFIX))
    }

    fn full_state(&self) -> StateDict {
        state_dict(&self.vs, None)
    }

    fn load_full_state(&mut self, state: &StateDict, path: &Path) -> Result<(), CheckpointError> {
        load_state_dict(&self.vs, None, state, path)
    }
}

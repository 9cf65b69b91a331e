//! Single-branch stop-gradient model on the centre epoch.

use std::path::Path;

use rand_chacha::ChaCha8Rng;
use tch::{nn, nn::Module, nn::ModuleT, Device, Tensor};

use super::{PretextModel, ENCODER_PREFIX};
use crate::checkpoint::{load_state_dict, state_dict, StateDict};
use crate::config::{ExperimentConfig, Variant};
use crate::error::CheckpointError;
use crate::losses::{stop_gradient_cosine_loss, LossOutput};
use crate::nn::{Encoder, MlpHead};

/// Predictions and projections of both views.
#[derive(Debug)]
pub struct SimSiamOutput {
    /// Predictor output of the weak view.
    pub pred1: Tensor,
    /// Predictor output of the strong view.
    pub pred2: Tensor,
    /// Projection of the weak view.
    pub proj1: Tensor,
    /// Projection of the strong view.
    pub proj2: Tensor,
}

/// Shared encoder, projection and predictor.
#[derive(Debug)]
pub struct SimSiamModel {
    vs: nn::VarStore,
    encoder: Encoder,
    proj: MlpHead,
    pred: MlpHead,
    center: i64,
}

impl SimSiamModel {
    /// Build the encoder, projector and predictor in a fresh store on `device`.
    pub fn new(cfg: &ExperimentConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let hidden = cfg.tc_hidden_dim as i64;
        let encoder = Encoder::new(&(&root / ENCODER_PREFIX), cfg.feature_dim as i64);
        let proj = MlpHead::projection(&(&root / "proj"), cfg.feature_dim as i64, hidden, cfg.head_activation);
        let pred = MlpHead::predictor(&(&root / "pred"), hidden, cfg.head_activation);
        SimSiamModel { vs, encoder, proj, pred, center: cfg.center_epoch() as i64 }
    }

    /// Encode the centre epoch of both views `[B, L, 1, S]`.
    pub fn forward_t(&self, weak: &Tensor, strong: &Tensor, train: bool) -> SimSiamOutput {
        let proj1 = self.proj.forward(&self.encoder.forward_t(&weak.select(1, self.center), train));
        let proj2 = self.proj.forward(&self.encoder.forward_t(&strong.select(1, self.center), train));
        SimSiamOutput {
            pred1: self.pred.forward(&proj1),
            pred2: self.pred.forward(&proj2),
            proj1,
            proj2,
        }
    }
}

impl PretextModel for SimSiamModel {
    fn variant(&self) -> Variant {
        Variant::SimSiam
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn forward_loss(&self, weak: &Tensor, strong: &Tensor, _rng: &mut ChaCha8Rng, train: bool) -> LossOutput {
        let out = self.forward_t(weak, strong, train);
        LossOutput::scalar(stop_gradient_cosine_loss(&out.pred1, &out.pred2, &out.proj1, &out.proj2))
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tch::Kind;

    #[test]
    fn loss_is_bounded() {
        tch::manual_seed(0);
        let cfg = ExperimentConfig {
            variant: Variant::SimSiam,
            epoch_len: 3,
            window_samples: 128,
            feature_dim: 16,
            tc_hidden_dim: 8,
            ..Default::default()
        };
        let model = SimSiamModel::new(&cfg, Device::Cpu);
        let weak = Tensor::randn([4, 3, 1, 128], (Kind::Float, Device::Cpu));
        let strong = Tensor::randn([4, 3, 1, 128], (Kind::Float, Device::Cpu));

        let out = model.forward_t(&weak, &strong, false);
        assert_eq!(out.pred1.size(), vec![4, 8]);
        assert_eq!(out.proj2.size(), vec![4, 8]);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let loss = model.forward_loss(&weak, &strong, &mut rng, true).total.double_value(&[]);
        assert!((-1.0..=1.0).contains(&loss), "loss={loss}");
    }
}

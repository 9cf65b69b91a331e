//! Dual-branch sequence model.
//!
//! The online ("top") branch sees the weak view, the target ("bottom")
//! branch the strong view. Each branch encodes every epoch of the sequence,
//! takes one uniformly drawn epoch as the *current* embedding and runs the
//! transformer over all of them for the *surrounding* embedding. Both are
//! projected; the online branch adds predictor heads on top.
//!
//! The target branch lives in its own [`nn::VarStore`]. It starts as a copy
//! of the online branch, is frozen, and after every optimiser step is moved
//! towards the online weights by an exponential moving average with
//! momentum `ema_momentum` (`1.0` keeps it fixed at its initial copy).
//! The target encoder is what gets exported for linear evaluation.

use std::path::Path;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tch::{nn, nn::Module, nn::ModuleT, Device, Tensor};
use tracing::debug;

use super::{transformer_config, PretextModel, ENCODER_PREFIX};
use crate::checkpoint::{load_state_dict, prefixed, state_dict, strip_prefix, StateDict};
use crate::config::{ExperimentConfig, Variant};
use crate::error::{CheckpointError, TrainResult};
use crate::losses::{CareLoss, LossOutput};
use crate::nn::{Encoder, MlpHead, Transformer};

const TARGET_PREFIX: &str = "target";

/// The four embeddings entering [`CareLoss`], each `[B, H]`.
#[derive(Debug)]
pub struct CareOutput {
    /// Online current-epoch embedding, after the predictor.
    pub top_curr: Tensor,
    /// Online surrounding embedding, after the predictor.
    pub top_surr: Tensor,
    /// Target current-epoch projection.
    pub bot_curr: Tensor,
    /// Target surrounding projection.
    pub bot_surr: Tensor,
}

/// Layers shared by both branches; registered under identical names.
#[derive(Debug)]
struct Branch {
    encoder: Encoder,
    curr_proj: MlpHead,
    surr_proj: MlpHead,
    tfmr: Transformer,
}

impl Branch {
    fn new(root: &nn::Path, cfg: &ExperimentConfig) -> Self {
        let (d, h) = (cfg.feature_dim as i64, cfg.tc_hidden_dim as i64);
        Branch {
            encoder: Encoder::new(&(root / ENCODER_PREFIX), d),
            curr_proj: MlpHead::projection(&(root / "curr_proj"), d, h, cfg.head_activation),
            surr_proj: MlpHead::projection(&(root / "surr_proj"), d, h, cfg.head_activation),
            tfmr: Transformer::new(&(root / "tfmr"), transformer_config(cfg)),
        }
    }

    /// Projected `(current, surrounding)` embeddings of `[B, L, 1, S]`.
    fn forward_t(&self, xs: &Tensor, current: i64, train: bool) -> (Tensor, Tensor) {
        let epochs = self.encoder.encode_epochs(xs, train);
        let curr = self.curr_proj.forward(&epochs.select(1, current));
        let surr = self.surr_proj.forward(&self.tfmr.forward_t(&epochs, train));
        (curr, surr)
    }
}

/// Online and target branches plus the online predictors.
#[derive(Debug)]
pub struct CareModel {
    vs: nn::VarStore,
    target_vs: nn::VarStore,
    top: Branch,
    curr_pred: MlpHead,
    surr_pred: MlpHead,
    bot: Branch,
    loss: CareLoss,
    epoch_len: usize,
    momentum: f64,
}

impl CareModel {
    /// Build both branches and initialise the target from the online one.
    pub fn new(cfg: &ExperimentConfig, device: Device) -> TrainResult<Self> {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let top = Branch::new(&root, cfg);
        let h = cfg.tc_hidden_dim as i64;
        let curr_pred = MlpHead::predictor(&(&root / "curr_pred"), h, cfg.head_activation);
        let surr_pred = MlpHead::predictor(&(&root / "surr_pred"), h, cfg.head_activation);

        let mut target_vs = nn::VarStore::new(device);
        let bot = Branch::new(&target_vs.root(), cfg);
        target_vs.copy(&vs)?;
        target_vs.freeze();
        debug!(
            "care: {} online, {} target tensors",
            vs.variables().len(),
            target_vs.variables().len()
        );

        Ok(CareModel {
            vs,
            target_vs,
            top,
            curr_pred,
            surr_pred,
            bot,
            loss: CareLoss { temperature: cfg.temperature, lambda1: cfg.lambda1 },
            epoch_len: cfg.epoch_len,
            momentum: cfg.ema_momentum,
        })
    }

    /// Embeddings for weak/strong views, with `current` selecting the
    /// current epoch in both branches.
    pub fn forward_t(&self, weak: &Tensor, strong: &Tensor, current: i64, train: bool) -> CareOutput {
        let (tc, ts) = self.top.forward_t(weak, current, train);
        let (bot_curr, bot_surr) = tch::no_grad(|| self.bot.forward_t(strong, current, train));
        CareOutput {
            top_curr: self.curr_pred.forward(&tc),
            top_surr: self.surr_pred.forward(&ts),
            bot_curr,
            bot_surr,
        }
    }

    /// Store of the target branch.
    pub fn target_var_store(&self) -> &nn::VarStore {
        &self.target_vs
    }
}

impl PretextModel for CareModel {
    fn variant(&self) -> Variant {
        Variant::Care
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn forward_loss(&self, weak: &Tensor, strong: &Tensor, rng: &mut ChaCha8Rng, train: bool) -> LossOutput {
        let current = rng.gen_range(0..self.epoch_len) as i64;
        let out = self.forward_t(weak, strong, current, train);
        self.loss.forward(&out.top_curr, &out.top_surr, &out.bot_curr, &out.bot_surr)
    }

    fn encoder_state(&self) -> StateDict {
        state_dict(&self.target_vs, Some(ENCODER_PREFIX))
    }

    fn full_state(&self) -> StateDict {
        let mut state = state_dict(&self.vs, None);
        state.extend(prefixed(state_dict(&self.target_vs, None), TARGET_PREFIX));
        state
    }

    fn load_full_state(&mut self, state: &StateDict, path: &Path) -> Result<(), CheckpointError> {
        let (target, online): (StateDict, StateDict) = state
            .iter()
            .map(|(n, t)| (n.clone(), t.shallow_clone()))
            .partition(|(n, _)| n.starts_with(&format!("{TARGET_PREFIX}.")));
        load_state_dict(&self.vs, None, &online, path)?;
        load_state_dict(&self.target_vs, None, &strip_prefix(&target, TARGET_PREFIX), path)
    }

    fn after_step(&mut self) {
        if self.momentum >= 1.0 {
            return;
        }
        let m = self.momentum;
        let online = self.vs.variables();
        tch::no_grad(|| {
            for (name, mut dst) in self.target_vs.variables() {
                if let Some(src) = online.get(&name) {
                    let blended = &dst * m + src * (1.0 - m);
                    dst.copy_(&blended);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tch::Kind;

    fn tiny(momentum: f64) -> ExperimentConfig {
        ExperimentConfig {
            variant: Variant::Care,
            epoch_len: 3,
            window_samples: 128,
            feature_dim: 16,
            tc_hidden_dim: 8,
            tfmr_depth: 1,
            tfmr_heads: 2,
            tfmr_mlp_dim: 16,
            ema_momentum: momentum,
            ..Default::default()
        }
    }

    fn views() -> (Tensor, Tensor) {
        let opts = (Kind::Float, Device::Cpu);
        (Tensor::randn([4, 3, 1, 128], opts), Tensor::randn([4, 3, 1, 128], opts))
    }

    #[test]
    fn target_starts_as_frozen_copy() {
        tch::manual_seed(0);
        let model = CareModel::new(&tiny(1.0), Device::Cpu).unwrap();
        let online = model.var_store().variables();
        for (name, t) in model.target_var_store().variables() {
            assert!(!t.requires_grad(), "{name} must be frozen");
            assert!(t.allclose(&online[&name], 0.0, 0.0, false), "{name} differs");
        }
        assert!(online.contains_key("curr_pred.fc1.weight"));
        assert!(!model.target_var_store().variables().contains_key("curr_pred.fc1.weight"));
    }

    #[test]
    fn produces_four_embeddings_and_components() {
        tch::manual_seed(0);
        let model = CareModel::new(&tiny(0.99), Device::Cpu).unwrap();
        let (weak, strong) = views();
        let out = model.forward_t(&weak, &strong, 1, false);
        for t in [&out.top_curr, &out.top_surr, &out.bot_curr, &out.bot_surr] {
            assert_eq!(t.size(), vec![4, 8]);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let loss = model.forward_loss(&weak, &strong, &mut rng, true);
        assert!(loss.total.double_value(&[]) >= 0.0);
        let names: Vec<&str> = loss.components.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["Curr Loss", "Surr Loss"]);
    }

    #[test]
    fn gradient_reaches_only_the_online_branch() {
        tch::manual_seed(0);
        let model = CareModel::new(&tiny(0.99), Device::Cpu).unwrap();
        let (weak, strong) = views();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        model.forward_loss(&weak, &strong, &mut rng, true).total.backward();

        let grad = model.var_store().variables()["curr_pred.fc2.weight"].grad();
        assert!(grad.defined());
        for (name, t) in model.target_var_store().variables() {
            assert!(!t.grad().defined(), "{name} received gradient");
        }
    }

    #[test]
    fn ema_moves_target_towards_online() {
        tch::manual_seed(0);
        let mut model = CareModel::new(&tiny(0.5), Device::Cpu).unwrap();
        let key = "curr_proj.fc1.weight";
        tch::no_grad(|| {
            let _ = model.var_store().variables()[key].shallow_clone().fill_(1.0);
        });
        let before = model.target_var_store().variables()[key].copy();
        model.after_step();
        let after = model.target_var_store().variables()[key].copy();
        let expected = before * 0.5 + 0.5;
        assert!(after.allclose(&expected, 1e-6, 1e-6, false));
    }

    #[test]
    fn encoder_state_comes_from_target() {
        tch::manual_seed(0);
        let model = CareModel::new(&tiny(1.0), Device::Cpu).unwrap();
        let state = model.encoder_state();
        assert!(!state.is_empty());
        assert!(state.iter().all(|(n, _)| n.starts_with("model.") || n.starts_with("attention.")));

        let full = model.full_state();
        assert!(full.iter().any(|(n, _)| n.starts_with("target.tfmr.")));
        assert!(full.iter().any(|(n, _)| n.starts_with("surr_pred.")));
    }
}

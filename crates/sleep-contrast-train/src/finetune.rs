//! Linear evaluation of a frozen encoder (requires `tch-backend`).
//!
//! [`FtModel`] puts a fresh `Linear(feature_dim → num_classes)` on top of an
//! encoder restored from `eeg_model_state_dict`. [`SleepFineTune`] trains
//! that head with early stopping on the validation loss and keeps the
//! metrics of the best-F1 epoch. [`do_kfold`] repeats this over a subject
//! level k-fold split and averages the per-fold bests.

use std::path::Path;

use tch::{nn, nn::Module, nn::ModuleT, nn::OptimizerConfig, Device, Kind, Tensor};
use tracing::{debug, info};

use crate::checkpoint::{load_state_dict, Checkpoint, StateDict, EEG_MODEL_STATE_DICT};
use crate::collate::tune_batch;
use crate::config::ExperimentConfig;
use crate::dataset::{DataLoader, SleepDataset, TuneDataset};
use crate::early_stop::EarlyStopping;
use crate::error::{TrainError, TrainResult};
use crate::folds::KFold;
use crate::losses::loss_value;
use crate::metrics::{mean_metrics, BestMetrics, EvalMetrics, MetricsAccumulator};
use crate::models::ENCODER_PREFIX;
use crate::nn::Encoder;

// ---------------------------------------------------------------------------
// FtModel
// ---------------------------------------------------------------------------

/// Frozen encoder plus trainable linear classifier.
#[derive(Debug)]
pub struct FtModel {
    encoder_vs: nn::VarStore,
    encoder: Encoder,
    head_vs: nn::VarStore,
    head: nn::Linear,
}

impl FtModel {
    /// Restore the encoder from the `eeg_model_state_dict` group of the
    /// checkpoint at `path`.
    pub fn from_checkpoint(path: &Path, cfg: &ExperimentConfig, device: Device) -> TrainResult<Self> {
        let ckpt = Checkpoint::load(path)?;
        Self::from_state(ckpt.group(EEG_MODEL_STATE_DICT)?, path, cfg, device)
    }

    /// Restore the encoder from an in-memory state dict. `origin` names the
    /// source in error messages.
    pub fn from_state(
        state: &StateDict,
        origin: &Path,
        cfg: &ExperimentConfig,
        device: Device,
    ) -> TrainResult<Self> {
        let feature_dim = cfg.feature_dim as i64;
        let mut encoder_vs = nn::VarStore::new(device);
        let encoder = Encoder::new(&(encoder_vs.root() / ENCODER_PREFIX), feature_dim);
        load_state_dict(&encoder_vs, Some(ENCODER_PREFIX), state, origin)?;
        encoder_vs.freeze();

        let head_vs = nn::VarStore::new(device);
        let head = nn::linear(head_vs.root() / "lin", feature_dim, cfg.num_classes as i64, Default::default());
        Ok(FtModel { encoder_vs, encoder, head_vs, head })
    }

    /// Store holding the classifier, the only trainable parameters.
    pub fn head_var_store(&self) -> &nn::VarStore {
        &self.head_vs
    }

    /// Store holding the frozen encoder.
    pub fn encoder_var_store(&self) -> &nn::VarStore {
        &self.encoder_vs
    }

    /// Logits `[B, num_classes]` for windows `[B, 1, S]`.
    ///
    /// The encoder always runs without gradient tracking; `train` only
    /// selects its batch-norm mode.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let features = tch::no_grad(|| self.encoder.forward_t(xs, train));
        self.head.forward(&features)
    }
}

// ---------------------------------------------------------------------------
// SleepFineTune
// ---------------------------------------------------------------------------

/// Result of [`SleepFineTune::fit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FtOutcome {
    /// Validation metrics of the best-F1 epoch (zeros if F1 never rose above 0).
    pub metrics: EvalMetrics,
    /// Epoch that produced `metrics`.
    pub best_epoch: Option<usize>,
    /// Epochs actually trained before finishing or stopping early.
    pub epochs_run: usize,
}

/// Training loop for one fold.
pub struct SleepFineTune<'a> {
    cfg: &'a ExperimentConfig,
    device: Device,
    seed: u64,
}

impl<'a> SleepFineTune<'a> {
    /// Loop over `cfg`; `seed` drives the training loader's shuffle.
    pub fn new(cfg: &'a ExperimentConfig, device: Device, seed: u64) -> Self {
        SleepFineTune { cfg, device, seed }
    }

    /// Train the head of `model` on `train` and validate on `test` each
    /// epoch; report the metrics of the epoch with the highest macro-F1.
    pub fn fit(&self, model: &FtModel, train: &TuneDataset, test: &TuneDataset) -> TrainResult<FtOutcome> {
        if train.is_empty() || test.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        let cfg = self.cfg;
        let mut opt = nn::Adam { beta1: cfg.beta1, beta2: cfg.beta2, wd: cfg.weight_decay, ..Default::default() }
            .build(model.head_var_store(), cfg.lr)?;

        let train_loader = DataLoader::new(train, cfg.eval_batch_size, true, self.seed);
        let test_loader = DataLoader::new(test, cfg.eval_batch_size, false, self.seed);
        let mut stopper = EarlyStopping::new(cfg.eval_early_stopping, cfg.eval_min_delta);
        let mut best = BestMetrics::default();
        let mut epochs_run = 0;

        for epoch in 1..=cfg.num_ft_epoch {
            epochs_run = epoch;
            let train_loss = self.train_epoch(model, &mut opt, &train_loader, epoch)?;
            let (val_loss, metrics) = self.evaluate(model, &test_loader)?;
            debug!(
                "ft epoch {epoch}: train_loss={train_loss:.4} val_loss={val_loss:.4} {}",
                metrics.summary()
            );
            best.update(metrics, epoch);
            if stopper.observe(val_loss) {
                debug!("ft early stop at epoch {epoch} (best val loss {:.4})", stopper.best());
                break;
            }
        }
        Ok(FtOutcome { metrics: best.best(), best_epoch: best.epoch(), epochs_run })
    }

    fn train_epoch(
        &self,
        model: &FtModel,
        opt: &mut nn::Optimizer,
        loader: &DataLoader<'_, TuneDataset>,
        epoch: usize,
    ) -> TrainResult<f64> {
        let mut total = 0.0;
        let mut steps = 0usize;
        for batch in loader.epoch(epoch) {
            let (x, y) = tune_batch(&batch?, self.device)?;
            let loss = model.forward_t(&x, true).cross_entropy_for_logits(&y);
            opt.backward_step(&loss);
            total += loss_value(&loss);
            steps += 1;
        }
        Ok(total / steps.max(1) as f64)
    }

    /// Mean validation loss and metrics over the full prediction set.
    pub fn evaluate(
        &self,
        model: &FtModel,
        loader: &DataLoader<'_, TuneDataset>,
    ) -> TrainResult<(f64, EvalMetrics)> {
        let mut acc = MetricsAccumulator::new(self.cfg.num_classes);
        for batch in loader.epoch(0) {
            let (x, y) = tune_batch(&batch?, self.device)?;
            let (loss, preds) = tch::no_grad(|| {
                let logits = model.forward_t(&x, false);
                (logits.cross_entropy_for_logits(&y), logits.argmax(-1, false))
            });
            let preds = Vec::<i64>::try_from(&preds.to_device(Device::Cpu).to_kind(Kind::Int64))?;
            let targets = Vec::<i64>::try_from(&y.to_device(Device::Cpu))?;
            acc.update(&preds, &targets, loss_value(&loss));
        }
        match (acc.mean_loss(), acc.finalize()) {
            (Some(loss), Some(metrics)) => Ok((loss, metrics)),
            _ => Err(TrainError::EmptyDataset),
        }
    }
}

// ---------------------------------------------------------------------------
// k-fold
// ---------------------------------------------------------------------------

/// Subject-level k-fold linear evaluation of the encoder in `state`.
///
/// Each fold trains a fresh [`FtModel`] on the concatenated training
/// subjects and validates on the held-out ones. Returns the mean of the
/// per-fold best metrics.
pub fn do_kfold(
    cfg: &ExperimentConfig,
    device: Device,
    state: &StateDict,
    origin: &Path,
    subjects: &[TuneDataset],
) -> TrainResult<EvalMetrics> {
    kfold_with(cfg, device, subjects, || FtModel::from_state(state, origin, cfg, device))
}

/// [`do_kfold`] for the encoder stored in the checkpoint file at `path`.
///
/// Every fold restores its model with [`FtModel::from_checkpoint`].
///
/// # Errors
///
/// [`CheckpointError::MissingKey`](crate::error::CheckpointError::MissingKey)
/// when the file has no `eeg_model_state_dict` group.
pub fn do_kfold_from_checkpoint(
    cfg: &ExperimentConfig,
    device: Device,
    path: &Path,
    subjects: &[TuneDataset],
) -> TrainResult<EvalMetrics> {
    kfold_with(cfg, device, subjects, || FtModel::from_checkpoint(path, cfg, device))
}

fn kfold_with<F>(cfg: &ExperimentConfig, device: Device, subjects: &[TuneDataset], build: F) -> TrainResult<EvalMetrics>
where
    F: Fn() -> TrainResult<FtModel>,
{
    let folds = KFold::new(cfg.splits, cfg.kfold_seed).split(subjects.len())?;
    let mut results = Vec::with_capacity(folds.len());
    for (k, fold) in folds.iter().enumerate() {
        let train_parts: Vec<&TuneDataset> = fold.train.iter().map(|&i| &subjects[i]).collect();
        let test_parts: Vec<&TuneDataset> = fold.test.iter().map(|&i| &subjects[i]).collect();
        let train = TuneDataset::concat(&train_parts)?;
        let test = TuneDataset::concat(&test_parts)?;

        let model = build()?;
        let metrics = SleepFineTune::new(cfg, device, cfg.seed.wrapping_add(k as u64))
            .fit(&model, &train, &test)?
            .metrics;
        info!(
            "fold {}/{}: {} train / {} test windows, {}",
            k + 1,
            folds.len(),
            train.len(),
            test.len(),
            metrics.summary()
        );
        results.push(metrics);
    }
    mean_metrics(&results).ok_or(TrainError::EmptyDataset)
}

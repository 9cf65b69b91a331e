//! Contrastive pretraining harness (requires `tch-backend`).
//!
//! One [`SleepPretrain::fit`] call runs:
//!
//! ```text
//! for epoch in start..=num_epoch:
//!     train steps (autocast, scaled backward, Adam, EMA hook)
//!     log Epoch Loss / LR / Epoch, step ReduceLROnPlateau
//!     save <name>.pt (encoder) and <name>_full.pt (model + epoch)
//!     if epoch == 1 or epoch % eval_every == 0:
//!         k-fold linear evaluation → log F1 / Kappa / Bal Acc / Acc / Epoch
//!         save <name>__<epoch>.pt, and <name>_best.pt on a new best F1
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tch::{nn, nn::OptimizerConfig, Device};
use tracing::{debug, info};

use crate::amp::{autocast, GradScaler};
use crate::checkpoint::{Checkpoint, EEG_MODEL_STATE_DICT, MODEL_STATE_DICT};
use crate::collate::pretext_batch;
use crate::config::ExperimentConfig;
use crate::dataset::{DataLoader, PretextSample, SleepDataset, TuneDataset};
use crate::error::{TrainError, TrainResult};
use crate::finetune::do_kfold;
use crate::logger::{metric_map, MetricLogger, MetricMap};
use crate::losses::loss_value;
use crate::metrics::{BestMetrics, EvalMetrics};
use crate::models::{build_model, PretextModel};
use crate::schedule::ReduceLrOnPlateau;

/// Outcome of a pretraining run.
#[derive(Debug, Clone)]
pub struct PretrainSummary {
    /// Last epoch trained.
    pub last_epoch: usize,
    /// Mean loss of the last epoch.
    pub final_loss: f64,
    /// Best k-fold metrics seen.
    pub best: EvalMetrics,
    /// Epoch at which `best` was reached.
    pub best_epoch: Option<usize>,
}

/// Mean training loss and component means of one epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochStats {
    /// Mean total loss over the epoch's steps.
    pub loss: f64,
    /// Mean of each named loss component (e.g. `"Curr Loss"`).
    pub components: BTreeMap<&'static str, f64>,
    /// Steps dropped by the gradient scaler after an overflow.
    pub skipped_steps: usize,
}

impl EpochStats {
    /// Per-epoch log entry: `Epoch Loss`, `LR`, `Epoch`, the loss
    /// components and, when loss scaling is active, `Skipped Steps`.
    pub fn metric_map(&self, lr: f64, epoch: usize, amp: bool) -> MetricMap {
        let mut log = metric_map([("Epoch Loss", self.loss), ("LR", lr), ("Epoch", epoch as f64)]);
        log.extend(self.components.iter().map(|(k, v)| (k.to_string(), *v)));
        if amp {
            log.insert("Skipped Steps".to_string(), self.skipped_steps as f64);
        }
        log
    }
}

/// Pretraining state: model, optimiser, scheduler, scaler and logger.
pub struct SleepPretrain {
    cfg: ExperimentConfig,
    device: Device,
    model: Box<dyn PretextModel>,
    opt: nn::Optimizer,
    scheduler: ReduceLrOnPlateau,
    scaler: GradScaler,
    logger: Box<dyn MetricLogger>,
    best: BestMetrics,
    start_epoch: usize,
    rng: ChaCha8Rng,
}

impl SleepPretrain {
    /// Validate `cfg`, seed libtorch and build the selected model.
    pub fn new(cfg: ExperimentConfig, device: Device, logger: Box<dyn MetricLogger>) -> TrainResult<Self> {
        cfg.validate()?;
        tch::manual_seed(cfg.seed as i64);
        let model = build_model(&cfg, device)?;
        let opt = nn::Adam { beta1: cfg.beta1, beta2: cfg.beta2, wd: cfg.weight_decay, ..Default::default() }
            .build(model.var_store(), cfg.lr)?;
        let scheduler = ReduceLrOnPlateau::new(cfg.lr, cfg.scheduler_factor, cfg.scheduler_patience);
        let amp = cfg.mixed_precision && device.is_cuda();
        info!(
            "pretrain: variant={} device={:?} amp={} params={}",
            cfg.variant,
            device,
            amp,
            model.var_store().trainable_variables().iter().map(|t| t.numel()).sum::<usize>()
        );
        Ok(SleepPretrain {
            rng: ChaCha8Rng::seed_from_u64(cfg.seed),
            cfg,
            device,
            model,
            opt,
            scheduler,
            scaler: GradScaler::new(amp),
            logger,
            best: BestMetrics::default(),
            start_epoch: 1,
        })
    }

    /// Validated configuration of the run.
    pub fn config(&self) -> &ExperimentConfig {
        &self.cfg
    }

    /// The pretext model being trained.
    pub fn model(&self) -> &dyn PretextModel {
        self.model.as_ref()
    }

    /// Restore model parameters from a `<name>_full.pt` checkpoint and
    /// continue from the epoch after the stored one.
    pub fn resume(&mut self, path: &Path) -> TrainResult<usize> {
        let ckpt = Checkpoint::load(path)?;
        self.model.load_full_state(ckpt.group(MODEL_STATE_DICT)?, path)?;
        let epoch = ckpt.meta("epoch")? as usize;
        self.start_epoch = epoch + 1;
        info!("resumed from {} at epoch {epoch}", path.display());
        Ok(self.start_epoch)
    }

    /// Run all remaining epochs. `subjects` are the held-out subjects used
    /// for periodic k-fold evaluation.
    pub fn fit<D>(&mut self, pretext: &D, subjects: &[TuneDataset]) -> TrainResult<PretrainSummary>
    where
        D: SleepDataset<Sample = PretextSample> + ?Sized,
    {
        if pretext.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        let loader = DataLoader::new(pretext, self.cfg.batch_size, true, self.cfg.seed);
        info!(
            "pretrain: {} blocks from {}, {} batches/epoch, {} eval subjects",
            pretext.len(),
            pretext.name(),
            loader.num_batches(),
            subjects.len()
        );

        let mut summary = PretrainSummary {
            last_epoch: self.start_epoch.saturating_sub(1),
            final_loss: f64::NAN,
            best: self.best.best(),
            best_epoch: self.best.epoch(),
        };
        for epoch in self.start_epoch..=self.cfg.num_epoch {
            let stats = self.train_epoch(&loader, epoch)?;
            let lr = self.scheduler.lr();

            self.logger.log(&stats.metric_map(lr, epoch, self.scaler.is_enabled()))?;

            let new_lr = self.scheduler.step(stats.loss);
            if new_lr != lr {
                self.opt.set_lr(new_lr);
            }

            self.save_encoder(&self.cfg.checkpoint_path(""), &[("epoch", epoch as f64)])?;
            let full = self.cfg.checkpoint_path("_full");
            Checkpoint::new()
                .with_group(MODEL_STATE_DICT, self.model.full_state())
                .with_meta("epoch", epoch as f64)
                .save(&full)?;

            if self.cfg.is_eval_epoch(epoch) {
                self.evaluate_epoch(epoch, subjects)?;
            }

            summary.last_epoch = epoch;
            summary.final_loss = stats.loss;
        }
        summary.best = self.best.best();
        summary.best_epoch = self.best.epoch();
        Ok(summary)
    }

    /// One pass over the pretext loader.
    pub fn train_epoch<D>(&mut self, loader: &DataLoader<'_, D>, epoch: usize) -> TrainResult<EpochStats>
    where
        D: SleepDataset<Sample = PretextSample> + ?Sized,
    {
        let vars = self.model.var_store().trainable_variables();
        let amp = self.scaler.is_enabled();
        let mut losses = Vec::with_capacity(loader.num_batches());
        let mut components: BTreeMap<&'static str, f64> = BTreeMap::new();
        let mut skipped = 0usize;

        for (step, batch) in loader.epoch(epoch).enumerate() {
            let (weak, strong) = pretext_batch(&batch?, self.device)?;
            let model = &self.model;
            let rng = &mut self.rng;
            let out = autocast(amp, || model.forward_loss(&weak, &strong, rng, true));

            let value = loss_value(&out.total);
            if !value.is_finite() {
                return Err(TrainError::NonFiniteLoss { value, epoch, step });
            }
            if self.scaler.backward_step(&mut self.opt, &vars, &out.total) {
                self.model.after_step();
            } else {
                skipped += 1;
            }

            losses.push(value);
            for (name, t) in &out.components {
                *components.entry(*name).or_default() += loss_value(t);
            }
        }

        let n = losses.len().max(1) as f64;
        for v in components.values_mut() {
            *v /= n;
        }
        let loss = losses.iter().sum::<f64>() / n;
        debug!("epoch {epoch}: loss={loss:.5} steps={} skipped={skipped}", losses.len());
        Ok(EpochStats { loss, components, skipped_steps: skipped })
    }

    /// k-fold linear evaluation of the current encoder.
    pub fn do_kfold(&self, subjects: &[TuneDataset]) -> TrainResult<EvalMetrics> {
        do_kfold(&self.cfg, self.device, &self.model.encoder_state(), &self.cfg.checkpoint_path(""), subjects)
    }

    fn evaluate_epoch(&mut self, epoch: usize, subjects: &[TuneDataset]) -> TrainResult<()> {
        let metrics = self.do_kfold(subjects)?;
        let mut log: MetricMap = metrics.to_metric_map();
        log.insert("Epoch".to_string(), epoch as f64);
        self.logger.log(&log)?;

        let tagged = self.cfg.checkpoint_path(&format!("__{epoch}"));
        self.save_encoder(&tagged, &[("pretrain_epoch", epoch as f64), ("f1", metrics.f1)])?;
        self.logger.save(&tagged)?;

        if self.best.update(metrics, epoch) {
            let best = self.cfg.checkpoint_path("_best");
            self.save_encoder(&best, &[("best_pretrain_epoch", epoch as f64), ("f1", metrics.f1)])?;
            self.logger.save(&best)?;
            info!("new best F1 {:.4} at epoch {epoch}", metrics.f1);
        }
        Ok(())
    }

    fn save_encoder(&self, path: &Path, meta: &[(&str, f64)]) -> TrainResult<()> {
        let ckpt = meta
            .iter()
            .fold(Checkpoint::new().with_group(EEG_MODEL_STATE_DICT, self.model.encoder_state()), |c, (k, v)| {
                c.with_meta(k, *v)
            });
        ckpt.save(path)?;
        Ok(())
    }
}

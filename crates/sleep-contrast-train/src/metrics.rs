//! Sleep-stage classification metrics.
//!
//! This module provides:
//!
//! - **Accuracy**: fraction of correctly classified windows.
//! - **Macro-F1**: per-class F1 averaged with equal weight. Classes that are
//!   absent from both targets and predictions are left out of the average.
//! - **Cohen's kappa**: agreement corrected for chance, `(p_o − p_e) / (1 − p_e)`.
//! - **Balanced accuracy**: mean recall over the classes present in the
//!   targets.
//!
//! Predictions are accumulated over mini-batches via [`MetricsAccumulator`]
//! and finalized into an [`EvalMetrics`] over the full concatenated
//! prediction set. [`BestMetrics`] keeps the best-F1 epoch of a fold and
//! [`mean_metrics`] aggregates folds.

use ndarray::Array2;

use crate::logger::{metric_map, MetricMap};

// ---------------------------------------------------------------------------
// EvalMetrics
// ---------------------------------------------------------------------------

/// Metrics of one validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EvalMetrics {
    /// Macro-averaged F1 (0-1 scale).
    pub f1: f64,
    /// Cohen's kappa (−1 to 1).
    pub kappa: f64,
    /// Balanced accuracy (0-1 scale).
    pub bal_acc: f64,
    /// Plain accuracy (0-1 scale).
    pub acc: f64,
}

impl EvalMetrics {
    /// Returns `true` when this result is strictly better than `other` on the
    /// primary metric (macro-F1).
    pub fn is_better_than(&self, other: &EvalMetrics) -> bool {
        self.f1 > other.f1
    }

    /// Metric dictionary keyed by the logged display names.
    pub fn to_metric_map(&self) -> MetricMap {
        metric_map([
            ("F1", self.f1),
            ("Kappa", self.kappa),
            ("Bal Acc", self.bal_acc),
            ("Acc", self.acc),
        ])
    }

    /// A human-readable summary line suitable for logging.
    pub fn summary(&self) -> String {
        format!(
            "F1={:.4}  Kappa={:.4}  BalAcc={:.4}  Acc={:.4}",
            self.f1, self.kappa, self.bal_acc, self.acc
        )
    }
}

// ---------------------------------------------------------------------------
// ConfusionMatrix
// ---------------------------------------------------------------------------

/// `num_classes × num_classes` counts; rows are targets, columns predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    counts: Array2<u64>,
}

impl ConfusionMatrix {
    /// Empty matrix.
    pub fn new(num_classes: usize) -> Self {
        ConfusionMatrix { counts: Array2::zeros((num_classes, num_classes)) }
    }

    /// Build from paired prediction / target slices.
    ///
    /// Pairs with a label outside `[0, num_classes)` are ignored.
    pub fn from_predictions(preds: &[i64], targets: &[i64], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        cm.update(preds, targets);
        cm
    }

    /// Add a batch of predictions.
    pub fn update(&mut self, preds: &[i64], targets: &[i64]) {
        let k = self.num_classes() as i64;
        for (&p, &t) in preds.iter().zip(targets) {
            if (0..k).contains(&p) && (0..k).contains(&t) {
                self.counts[[t as usize, p as usize]] += 1;
            }
        }
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.counts.nrows()
    }

    /// Total number of counted pairs.
    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Raw counts.
    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    fn correct(&self) -> u64 {
        self.counts.diag().sum()
    }

    fn support(&self, class: usize) -> u64 {
        self.counts.row(class).sum()
    }

    fn predicted(&self, class: usize) -> u64 {
        self.counts.column(class).sum()
    }

    /// Fraction of correct predictions; `0.0` for an empty matrix.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.correct() as f64 / total as f64
    }

    /// Macro-averaged F1 over classes seen in targets or predictions.
    pub fn macro_f1(&self) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for c in 0..self.num_classes() {
            let tp = self.counts[[c, c]];
            let fp = self.predicted(c) - tp;
            let fn_ = self.support(c) - tp;
            let denom = 2 * tp + fp + fn_;
            if denom == 0 {
                continue;
            }
            sum += 2.0 * tp as f64 / denom as f64;
            n += 1;
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    }

    /// Cohen's kappa. A degenerate matrix where chance agreement is already
    /// perfect yields `0.0`.
    pub fn cohen_kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let p_o = self.correct() as f64 / total;
        let p_e: f64 = (0..self.num_classes())
            .map(|c| self.support(c) as f64 * self.predicted(c) as f64)
            .sum::<f64>()
            / (total * total);
        if (1.0 - p_e).abs() < f64::EPSILON {
            return 0.0;
        }
        (p_o - p_e) / (1.0 - p_e)
    }

    /// Mean recall over classes with non-zero support.
    pub fn balanced_accuracy(&self) -> f64 {
        let recalls: Vec<f64> = (0..self.num_classes())
            .filter_map(|c| {
                let support = self.support(c);
                (support > 0).then(|| self.counts[[c, c]] as f64 / support as f64)
            })
            .collect();
        if recalls.is_empty() {
            return 0.0;
        }
        recalls.iter().sum::<f64>() / recalls.len() as f64
    }

    /// All four metrics.
    pub fn metrics(&self) -> EvalMetrics {
        EvalMetrics {
            f1: self.macro_f1(),
            kappa: self.cohen_kappa(),
            bal_acc: self.balanced_accuracy(),
            acc: self.accuracy(),
        }
    }
}

/// Compute [`EvalMetrics`] for paired prediction / target slices.
pub fn classification_metrics(preds: &[i64], targets: &[i64], num_classes: usize) -> EvalMetrics {
    ConfusionMatrix::from_predictions(preds, targets, num_classes).metrics()
}

// ---------------------------------------------------------------------------
// MetricsAccumulator
// ---------------------------------------------------------------------------

/// Running accumulator for a validation epoch.
///
/// Call [`MetricsAccumulator::update`] for each mini-batch. After iterating
/// the full split call [`MetricsAccumulator::finalize`].
pub struct MetricsAccumulator {
    confusion: ConfusionMatrix,
    loss_sum: f64,
    loss_batches: usize,
}

impl MetricsAccumulator {
    /// Create an empty accumulator.
    pub fn new(num_classes: usize) -> Self {
        MetricsAccumulator {
            confusion: ConfusionMatrix::new(num_classes),
            loss_sum: 0.0,
            loss_batches: 0,
        }
    }

    /// Add one batch of predictions and its mean loss.
    pub fn update(&mut self, preds: &[i64], targets: &[i64], batch_loss: f64) {
        self.confusion.update(preds, targets);
        self.loss_sum += batch_loss;
        self.loss_batches += 1;
    }

    /// Mean of the per-batch losses, or `None` before the first update.
    pub fn mean_loss(&self) -> Option<f64> {
        (self.loss_batches > 0).then(|| self.loss_sum / self.loss_batches as f64)
    }

    /// Metrics over everything seen so far, or `None` if empty.
    pub fn finalize(&self) -> Option<EvalMetrics> {
        (self.confusion.total() > 0).then(|| self.confusion.metrics())
    }

    /// Accumulated confusion matrix.
    pub fn confusion(&self) -> &ConfusionMatrix {
        &self.confusion
    }

    /// Reset the accumulator to the initial (empty) state.
    pub fn reset(&mut self) {
        self.confusion = ConfusionMatrix::new(self.confusion.num_classes());
        self.loss_sum = 0.0;
        self.loss_batches = 0;
    }
}

// ---------------------------------------------------------------------------
// BestMetrics
// ---------------------------------------------------------------------------

/// Running best over validation epochs, keyed on macro-F1.
///
/// Starts from all-zero metrics. All four values are replaced together, and
/// only when F1 strictly improves.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestMetrics {
    best: EvalMetrics,
    epoch: Option<usize>,
}

impl BestMetrics {
    /// Offer a new result; returns `true` when it replaced the best.
    pub fn update(&mut self, candidate: EvalMetrics, epoch: usize) -> bool {
        if candidate.is_better_than(&self.best) {
            self.best = candidate;
            self.epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    /// Best metrics so far.
    pub fn best(&self) -> EvalMetrics {
        self.best
    }

    /// Epoch that produced [`BestMetrics::best`], if any improved.
    pub fn epoch(&self) -> Option<usize> {
        self.epoch
    }
}

/// Element-wise mean of per-fold results; `None` for an empty slice.
pub fn mean_metrics(folds: &[EvalMetrics]) -> Option<EvalMetrics> {
    if folds.is_empty() {
        return None;
    }
    let n = folds.len() as f64;
    let sum = folds.iter().fold(EvalMetrics::default(), |acc, m| EvalMetrics {
        f1: acc.f1 + m.f1,
        kappa: acc.kappa + m.kappa,
        bal_acc: acc.bal_acc + m.bal_acc,
        acc: acc.acc + m.acc,
    });
    Some(EvalMetrics {
        f1: sum.f1 / n,
        kappa: sum.kappa / n,
        bal_acc: sum.bal_acc / n,
        acc: sum.acc / n,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

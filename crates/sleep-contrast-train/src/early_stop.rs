//! Validation-loss early stopping for the fine-tuning loop.

/// Patience counter over validation losses.
///
/// An epoch counts as an improvement when `loss + min_delta < best`; the
/// counter then resets. Otherwise it increments, and [`EarlyStopping::observe`]
/// reports `true` once it reaches `patience`.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    counter: usize,
}

impl EarlyStopping {
    /// New counter; the first finite loss is always an improvement.
    pub fn new(patience: usize, min_delta: f64) -> Self {
        EarlyStopping { patience, min_delta, best: f64::INFINITY, counter: 0 }
    }

    /// Record one validation loss. Returns `true` when training should stop.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss + self.min_delta < self.best {
            self.best = loss;
            self.counter = 0;
        } else {
            self.counter += 1;
        }
        self.counter >= self.patience
    }

    /// Lowest loss seen so far.
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Consecutive non-improving epochs.
    pub fn counter(&self) -> usize {
        self.counter
    }
}

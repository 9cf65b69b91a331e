//! Plateau-triggered learning-rate schedule.

use tracing::info;

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// a relative improvement of the monitored (minimised) quantity.
///
/// Improvement uses a relative threshold: `value < best · (1 − threshold)`.
/// After a reduction the bad-epoch counter restarts.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    lr: f64,
    factor: f64,
    patience: usize,
    threshold: f64,
    min_lr: f64,
    best: f64,
    num_bad_epochs: usize,
}

impl ReduceLrOnPlateau {
    /// Default relative improvement threshold.
    pub const DEFAULT_THRESHOLD: f64 = 1e-4;

    /// New schedule starting at `initial_lr`.
    pub fn new(initial_lr: f64, factor: f64, patience: usize) -> Self {
        ReduceLrOnPlateau {
            lr: initial_lr,
            factor,
            patience,
            threshold: Self::DEFAULT_THRESHOLD,
            min_lr: 0.0,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        }
    }

    /// Lower bound for the learning rate.
    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    /// Current learning rate.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Feed one epoch's metric; returns the learning rate for the next epoch.
    pub fn step(&mut self, value: f64) -> f64 {
        if value < self.best * (1.0 - self.threshold) {
            self.best = value;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.patience {
            let new_lr = (self.lr * self.factor).max(self.min_lr);
            if self.lr - new_lr > 1e-12 {
                info!(old_lr = self.lr, new_lr, "reducing learning rate");
                self.lr = new_lr;
            }
            self.num_bad_epochs = 0;
        }
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reduces_after_patience_is_exceeded() {
        let mut s = ReduceLrOnPlateau::new(1.0, 0.2, 2);
        assert_abs_diff_eq!(s.step(1.0), 1.0);
        assert_abs_diff_eq!(s.step(1.0), 1.0);
        assert_abs_diff_eq!(s.step(1.0), 1.0);
        assert_abs_diff_eq!(s.step(1.0), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn improvement_resets_the_counter() {
        let mut s = ReduceLrOnPlateau::new(1.0, 0.5, 1);
        s.step(1.0);
        s.step(1.0);
        s.step(0.5);
        assert_abs_diff_eq!(s.step(0.5), 1.0);
    }

    #[test]
    fn lr_never_drops_below_min() {
        let mut s = ReduceLrOnPlateau::new(1.0, 0.1, 0).with_min_lr(0.05);
        s.step(1.0);
        for _ in 0..5 {
            s.step(1.0);
        }
        assert_abs_diff_eq!(s.lr(), 0.05, epsilon = 1e-12);
    }
}

//! Dynamic loss scaling for mixed-precision training (requires `tch-backend`).
//!
//! The forward pass runs under [`tch::autocast`]; the loss is multiplied by
//! the current scale before `backward()`, gradients are unscaled before the
//! optimiser step, and a step whose gradients contain `NaN`/`Inf` is skipped
//! while the scale backs off.

use tch::{nn, Tensor};
use tracing::debug;

const INIT_SCALE: f64 = 65536.0;
const GROWTH_FACTOR: f64 = 2.0;
const BACKOFF_FACTOR: f64 = 0.5;
const GROWTH_INTERVAL: u32 = 2000;

/// Loss scaler. When disabled every method is a pass-through.
#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled: bool,
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: u32,
    growth_tracker: u32,
}

impl GradScaler {
    /// Scaler starting at the default scale; a disabled scaler passes
    /// losses and gradients through unchanged.
    pub fn new(enabled: bool) -> Self {
        GradScaler {
            enabled,
            scale: INIT_SCALE,
            growth_factor: GROWTH_FACTOR,
            backoff_factor: BACKOFF_FACTOR,
            growth_interval: GROWTH_INTERVAL,
            growth_tracker: 0,
        }
    }

    /// Override the number of clean steps before the scale grows.
    pub fn with_growth_interval(mut self, steps: u32) -> Self {
        self.growth_interval = steps.max(1);
        self
    }

    /// Whether loss scaling is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current scale (`1.0` when disabled).
    pub fn scale(&self) -> f64 {
        if self.enabled {
            self.scale
        } else {
            1.0
        }
    }

    /// `loss · scale`.
    pub fn scale_loss(&self, loss: &Tensor) -> Tensor {
        if self.enabled {
            loss * self.scale
        } else {
            loss.shallow_clone()
        }
    }

    /// Zero gradients, back-propagate the scaled loss and step the optimiser.
    ///
    /// Returns `false` when the step was skipped because of overflow.
    pub fn backward_step(&mut self, opt: &mut nn::Optimizer, vars: &[Tensor], loss: &Tensor) -> bool {
        opt.zero_grad();
        self.scale_loss(loss).backward();
        self.step(opt, vars)
    }

    /// Unscale the gradients of `vars`, then step `opt` unless any of them
    /// overflowed.
    pub fn step(&mut self, opt: &mut nn::Optimizer, vars: &[Tensor]) -> bool {
        if !self.enabled {
            opt.step();
            return true;
        }
        let inv = 1.0 / self.scale;
        tch::no_grad(|| {
            for var in vars {
                let mut grad = var.grad();
                if grad.defined() {
                    let _ = grad.g_mul_scalar_(inv);
                }
            }
        });
        let found_inf = has_non_finite_grad(vars);
        if found_inf {
            opt.zero_grad();
        } else {
            opt.step();
        }
        self.update(found_inf);
        !found_inf
    }

    /// Back off on overflow, grow after `growth_interval` clean steps.
    pub fn update(&mut self, found_inf: bool) {
        if !self.enabled {
            return;
        }
        if found_inf {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
            debug!("grad scaler: overflow, scale -> {}", self.scale);
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.growth_tracker = 0;
            }
        }
    }
}

/// Run `f` under autocast when `enabled`.
pub fn autocast<T>(enabled: bool, f: impl FnOnce() -> T) -> T {
    if enabled {
        tch::autocast(true, f)
    } else {
        f()
    }
}

fn has_non_finite_grad(vars: &[Tensor]) -> bool {
    vars.iter().any(|v| {
        let g = v.grad();
        g.defined() && g.isfinite().all().int64_value(&[]) == 0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::OptimizerConfig;
    use tch::{Device, Kind};

    #[test]
    fn disabled_scaler_is_identity() {
        let s = GradScaler::new(false);
        assert_eq!(s.scale(), 1.0);
        let loss = Tensor::scalar_tensor(3.0, (Kind::Float, Device::Cpu));
        assert_eq!(s.scale_loss(&loss).double_value(&[]), 3.0);
    }

    #[test]
    fn scale_backs_off_and_grows() {
        let mut s = GradScaler::new(true).with_growth_interval(2);
        s.update(true);
        assert_eq!(s.scale(), INIT_SCALE * 0.5);
        s.update(false);
        assert_eq!(s.scale(), INIT_SCALE * 0.5);
        s.update(false);
        assert_eq!(s.scale(), INIT_SCALE);
    }

    #[test]
    fn overflowing_step_is_skipped() {
        let vs = nn::VarStore::new(Device::Cpu);
        let w = vs.root().ones("w", &[3]);
        let mut opt = nn::Sgd::default().build(&vs, 0.1).unwrap();
        let mut s = GradScaler::new(true);

        let before = w.copy();
        let loss = (&w * f64::INFINITY).sum(Kind::Float);
        assert!(!s.backward_step(&mut opt, &vs.trainable_variables(), &loss));
        assert!(w.allclose(&before, 0.0, 0.0, false), "weights must be untouched");
        assert_eq!(s.scale(), INIT_SCALE * 0.5);

        let loss = w.sum(Kind::Float);
        assert!(s.backward_step(&mut opt, &vs.trainable_variables(), &loss));
        // Unscaled gradient is 1, so w moves by exactly lr.
        let expected = before - 0.1;
        assert!(w.allclose(&expected, 1e-5, 1e-5, false));
    }
}

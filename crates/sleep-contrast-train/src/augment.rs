//! Weak / strong view augmentation for contrastive pretraining.
//!
//! A pretext sample is an `[epoch_len, channels, samples]` block of
//! consecutive EEG epochs. [`Augmenter::views`] turns one block into two
//! independently augmented views of identical shape:
//!
//! - **weak**: amplitude scaling then Gaussian jitter.
//! - **strong**: the weak transforms, then a circular time shift, a zeroed
//!   segment and a random polarity flip.
//!
//! Every epoch window is transformed with its own random draws. All
//! randomness comes from the caller's generator.
//!
//! ```rust
//! use ndarray::Array3;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use sleep_contrast_train::augment::Augmenter;
//!
//! let block = Array3::<f32>::ones((9, 1, 3000));
//! let mut rng = ChaCha8Rng::seed_from_u64(7);
//! let (weak, strong) = Augmenter::default().views(&block, &mut rng);
//! assert_eq!(weak.shape(), block.shape());
//! assert_eq!(strong.shape(), block.shape());
//! ```

use ndarray::{Array1, Array3, ArrayViewMut1};
use rand::Rng;
use rand_distr::{Distribution, Normal};

// ---------------------------------------------------------------------------
// Augmenter
// ---------------------------------------------------------------------------

/// Parameters of the weak and strong augmentation pipelines.
#[derive(Debug, Clone)]
pub struct Augmenter {
    /// Amplitude scale range `(min, max)`. Default: **(0.9, 1.1)**.
    pub scale_range: (f32, f32),
    /// Jitter σ as a fraction of the window's standard deviation. Default: **0.01**.
    pub jitter_ratio: f32,
    /// Largest circular shift as a fraction of the window. Default: **0.1**.
    pub max_shift_frac: f32,
    /// Largest zeroed segment as a fraction of the window. Default: **0.125**.
    pub max_mask_frac: f32,
    /// Probability of inverting polarity. Default: **0.5**.
    pub flip_prob: f64,
}

impl Default for Augmenter {
    fn default() -> Self {
        Augmenter {
            scale_range: (0.9, 1.1),
            jitter_ratio: 0.01,
            max_shift_frac: 0.1,
            max_mask_frac: 0.125,
            flip_prob: 0.5,
        }
    }
}

impl Augmenter {
    /// Produce the `(weak, strong)` pair for one block.
    pub fn views<R: Rng + ?Sized>(&self, block: &Array3<f32>, rng: &mut R) -> (Array3<f32>, Array3<f32>) {
        (self.weak(block, rng), self.strong(block, rng))
    }

    /// Weak view: scaling and jitter.
    pub fn weak<R: Rng + ?Sized>(&self, block: &Array3<f32>, rng: &mut R) -> Array3<f32> {
        let mut out = block.clone();
        for mut window in out.outer_iter_mut() {
            for channel in window.outer_iter_mut() {
                self.apply_weak(channel, rng);
            }
        }
        out
    }

    /// Strong view: weak transforms followed by shift, masking and flip.
    pub fn strong<R: Rng + ?Sized>(&self, block: &Array3<f32>, rng: &mut R) -> Array3<f32> {
        let mut out = block.clone();
        for mut window in out.outer_iter_mut() {
            for mut channel in window.outer_iter_mut() {
                self.apply_weak(channel.view_mut(), rng);
                let n = channel.len();
                let max_shift = (n as f32 * self.max_shift_frac) as usize;
                time_shift(channel.view_mut(), signed_draw(rng, max_shift));
                let max_mask = (n as f32 * self.max_mask_frac) as usize;
                if max_mask > 0 {
                    let len = rng.gen_range(0..=max_mask);
                    let start = rng.gen_range(0..=n - len);
                    zero_mask(channel.view_mut(), start, len);
                }
                if rng.gen_bool(self.flip_prob) {
                    channel.mapv_inplace(|v| -v);
                }
            }
        }
        out
    }

    fn apply_weak<R: Rng + ?Sized>(&self, mut channel: ArrayViewMut1<'_, f32>, rng: &mut R) {
        let (lo, hi) = self.scale_range;
        let factor = if hi > lo { rng.gen_range(lo..hi) } else { lo };
        channel.mapv_inplace(|v| v * factor);
        let sigma = channel.std(0.0) * self.jitter_ratio;
        jitter(channel, sigma, rng);
    }
}

fn signed_draw<R: Rng + ?Sized>(rng: &mut R, max: usize) -> isize {
    let max = max as isize;
    rng.gen_range(-max..=max)
}

// ---------------------------------------------------------------------------
// Individual transforms
// ---------------------------------------------------------------------------

/// Add zero-mean Gaussian noise with standard deviation `sigma`.
///
/// A non-positive or non-finite `sigma` leaves the signal untouched.
pub fn jitter<R: Rng + ?Sized>(mut signal: ArrayViewMut1<'_, f32>, sigma: f32, rng: &mut R) {
    if !(sigma > 0.0 && sigma.is_finite()) {
        return;
    }
    if let Ok(normal) = Normal::new(0.0f32, sigma) {
        signal.iter_mut().for_each(|v| *v += normal.sample(rng));
    }
}

/// Rotate the signal by `shift` samples (positive = towards later times).
pub fn time_shift(mut signal: ArrayViewMut1<'_, f32>, shift: isize) {
    let n = signal.len();
    if n == 0 {
        return;
    }
    let k = shift.rem_euclid(n as isize) as usize;
    if k == 0 {
        return;
    }
    let mut values = signal.to_vec();
    values.rotate_right(k);
    signal.assign(&Array1::from(values));
}

/// Zero `len` samples starting at `start`, clamped to the signal length.
pub fn zero_mask(mut signal: ArrayViewMut1<'_, f32>, start: usize, len: usize) {
    let n = signal.len();
    let start = start.min(n);
    let end = start.saturating_add(len).min(n);
    signal.slice_mut(ndarray::s![start..end]).fill(0.0);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ramp(n: usize) -> Array1<f32> {
        Array1::from_iter((0..n).map(|i| i as f32))
    }

    #[test]
    fn time_shift_rotates_circularly() {
        let mut x = ramp(5);
        time_shift(x.view_mut(), 2);
        assert_eq!(x.to_vec(), vec![3.0, 4.0, 0.0, 1.0, 2.0]);
        time_shift(x.view_mut(), -2);
        assert_eq!(x.to_vec(), ramp(5).to_vec());
    }

    #[test]
    fn zero_mask_is_clamped() {
        let mut x = Array1::<f32>::ones(6);
        zero_mask(x.view_mut(), 4, 10);
        assert_eq!(x.to_vec(), vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn zero_sigma_jitter_is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut x = ramp(8);
        jitter(x.view_mut(), 0.0, &mut rng);
        assert_eq!(x, ramp(8));
    }

    #[test]
    fn weak_view_stays_close_to_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let block = Array3::from_shape_fn((2, 1, 300), |(_, _, t)| (t as f32 * 0.1).sin());
        let weak = Augmenter::default().weak(&block, &mut rng);
        let max_dev = (&weak - &block).iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(max_dev < 0.2, "weak view drifted by {max_dev}");
    }

    #[test]
    fn views_are_seed_deterministic() {
        let block = Array3::from_shape_fn((3, 1, 100), |(e, _, t)| (e * 100 + t) as f32);
        let aug = Augmenter::default();
        let a = aug.views(&block, &mut ChaCha8Rng::seed_from_u64(11));
        let b = aug.views(&block, &mut ChaCha8Rng::seed_from_u64(11));
        assert_eq!(a, b);
        assert_ne!(a.0, a.1);
    }
}

//! Subject-level k-fold splitting.
//!
//! Folds are built over *subjects*, never over individual windows, so a
//! subject's records always land entirely in either the train or the test
//! side of a split. Fold sizes follow the usual convention: the first
//! `n % k` folds receive one extra element.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::ConfigError;

/// Train / test index lists of one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    /// Indices used for training (ascending).
    pub train: Vec<usize>,
    /// Held-out indices (in permutation order).
    pub test: Vec<usize>,
}

/// K-fold cross-validation splitter.
#[derive(Debug, Clone, Copy)]
pub struct KFold {
    /// Number of folds (≥ 2).
    pub n_splits: usize,
    /// Shuffle indices before cutting folds.
    pub shuffle: bool,
    /// Seed of the shuffle.
    pub seed: u64,
}

impl KFold {
    /// Shuffled splitter with a fixed seed.
    pub fn new(n_splits: usize, seed: u64) -> Self {
        KFold { n_splits, shuffle: true, seed }
    }

    /// Split `n` items into `n_splits` folds.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when `n_splits < 2` or `n < n_splits`.
    pub fn split(&self, n: usize) -> Result<Vec<FoldSplit>, ConfigError> {
        if self.n_splits < 2 {
            return Err(ConfigError::invalid_value("splits", "must be >= 2"));
        }
        if n < self.n_splits {
            return Err(ConfigError::invalid_value(
                "splits",
                format!("cannot split {n} subjects into {} folds", self.n_splits),
            ));
        }

        let mut order: Vec<usize> = (0..n).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            order.shuffle(&mut rng);
        }

        let base = n / self.n_splits;
        let extra = n % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for fold in 0..self.n_splits {
            let size = base + usize::from(fold < extra);
            let test = order[start..start + size].to_vec();
            let mut train: Vec<usize> = order[..start]
                .iter()
                .chain(&order[start + size..])
                .copied()
                .collect();
            train.sort_unstable();
            folds.push(FoldSplit { train, test });
            start += size;
        }
        Ok(folds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_sizes_front_load_the_remainder() {
        let folds = KFold::new(3, 0).split(10).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn unshuffled_folds_are_contiguous() {
        let kf = KFold { n_splits: 2, shuffle: false, seed: 0 };
        let folds = kf.split(4).unwrap();
        assert_eq!(folds[0].test, vec![0, 1]);
        assert_eq!(folds[0].train, vec![2, 3]);
        assert_eq!(folds[1].test, vec![2, 3]);
    }

    #[test]
    fn same_seed_same_folds() {
        let a = KFold::new(5, 1234).split(20).unwrap();
        let b = KFold::new(5, 1234).split(20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        assert!(KFold::new(1, 0).split(10).is_err());
        assert!(KFold::new(5, 0).split(4).is_err());
    }
}

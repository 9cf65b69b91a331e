//! Dataset abstractions and concrete implementations for EEG sleep staging.
//!
//! This module defines the [`SleepDataset`] trait plus the concrete sources
//! consumed by the two training phases:
//!
//! - [`PretextDataset`]: unlabelled `.npz` blocks of consecutive epochs,
//!   returned as weak/strong augmented [`PretextSample`]s.
//! - [`TuneDataset`]: labelled windows for linear evaluation, concatenated
//!   from one or more subject records.
//! - [`SyntheticPretextDataset`] / [`synthetic_subjects`]: deterministic
//!   class-dependent sinusoids for dry runs and tests.
//!
//! A [`DataLoader`] wraps any [`SleepDataset`] and provides batched iteration
//! with a seeded per-epoch shuffle.
//!
//! # Directory layout
//!
//! ```text
//! <pretext_dir>/
//!   SC4001_0000.npz          # pos      [epoch_len, 1, window_samples]
//!   SC4001_0001.npz
//!   ...
//! <test_dir>/
//!   SC4011_E0.npz            # windows  [N, 1, window_samples], y [N]
//!   SC4012_E0.npz
//!   ...
//! ```
//!
//! Test records are grouped into subjects by the file-stem prefix before the
//! first `_` (see [`discover_subjects`]).

use std::f32::consts::PI;
use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{concatenate, Array2, Array3, ArrayD, Axis, Ix1, Ix3, IxDyn, OwnedRepr};
use ndarray_npy::NpzReader;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::augment::Augmenter;
use crate::error::DatasetError;

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Two augmented views of one block of consecutive epochs.
#[derive(Debug, Clone)]
pub struct PretextSample {
    /// Weak view `[epoch_len, 1, window_samples]`.
    pub weak: Array3<f32>,
    /// Strong view `[epoch_len, 1, window_samples]`.
    pub strong: Array3<f32>,
}

/// One labelled epoch window.
#[derive(Debug, Clone)]
pub struct TuneSample {
    /// Signal `[1, window_samples]`.
    pub window: Array2<f32>,
    /// Sleep stage in `[0, num_classes)`.
    pub label: i64,
}

// ---------------------------------------------------------------------------
// SleepDataset trait
// ---------------------------------------------------------------------------

/// Common interface for pretext and fine-tuning datasets.
///
/// `get` receives the loader's generator so augmentations stay reproducible
/// without ambient random state.
pub trait SleepDataset: Send + Sync {
    /// Sample type yielded by this dataset.
    type Sample;

    /// Total number of samples in this dataset.
    fn len(&self) -> usize;

    /// Load the sample at position `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::IndexOutOfBounds`] when `idx >= self.len()` and
    /// dataset-specific errors for IO or format problems.
    fn get(&self, idx: usize, rng: &mut ChaCha8Rng) -> Result<Self::Sample, DatasetError>;

    /// Returns `true` when the dataset contains no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DataLoader
// ---------------------------------------------------------------------------

/// Batched, optionally-shuffled iterator over a [`SleepDataset`].
///
/// Each epoch uses its own ChaCha stream of the loader seed, so the order for
/// a given `(seed, epoch)` is always identical. The last batch is kept even
/// when it is smaller than `batch_size`.
pub struct DataLoader<'a, D: SleepDataset + ?Sized> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl<'a, D: SleepDataset + ?Sized> DataLoader<'a, D> {
    /// Create a new `DataLoader`. A `batch_size` of zero is treated as one.
    pub fn new(dataset: &'a D, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        DataLoader { dataset, batch_size: batch_size.max(1), shuffle, seed }
    }

    /// Number of complete (or partial) batches yielded per epoch.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Iterator over the batches of training epoch `epoch`.
    ///
    /// A failed sample load ends the epoch with that error.
    pub fn epoch(&self, epoch: usize) -> DataLoaderIter<'a, D> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(epoch as u64);
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            indices.shuffle(&mut rng);
        }
        DataLoaderIter { dataset: self.dataset, indices, batch_size: self.batch_size, cursor: 0, rng }
    }
}

/// Iterator returned by [`DataLoader::epoch`].
pub struct DataLoaderIter<'a, D: SleepDataset + ?Sized> {
    dataset: &'a D,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    rng: ChaCha8Rng,
}

impl<'a, D: SleepDataset + ?Sized> Iterator for DataLoaderIter<'a, D> {
    type Item = Result<Vec<D::Sample>, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.cursor..end];
        self.cursor = end;

        let batch = batch_indices
            .iter()
            .map(|&idx| self.dataset.get(idx, &mut self.rng))
            .collect::<Result<Vec<_>, _>>();
        if batch.is_err() {
            self.cursor = self.indices.len();
        }
        Some(batch)
    }
}

// ---------------------------------------------------------------------------
// PretextDataset
// ---------------------------------------------------------------------------

/// Directory of `.npz` pretext blocks, loaded lazily on access.
pub struct PretextDataset {
    files: Vec<PathBuf>,
    epoch_len: usize,
    window_samples: usize,
    augmenter: Augmenter,
}

impl PretextDataset {
    /// Scan `root` for `*.npz` files (sorted by name).
    ///
    /// # Errors
    ///
    /// [`DatasetError::DirectoryNotFound`] if `root` does not exist and
    /// [`DatasetError::NoRecords`] if it holds no `.npz` files.
    pub fn discover(
        root: &Path,
        epoch_len: usize,
        window_samples: usize,
        augmenter: Augmenter,
    ) -> Result<Self, DatasetError> {
        let files = list_npz(root)?;
        info!(
            "PretextDataset: {} blocks of {epoch_len}×{window_samples} (root={})",
            files.len(),
            root.display()
        );
        Ok(PretextDataset {
            files,
            epoch_len,
            window_samples,
            augmenter,
        })
    }

    /// Load the raw (un-augmented) block at `idx`.
    pub fn block(&self, idx: usize) -> Result<Array3<f32>, DatasetError> {
        let path = self
            .files
            .get(idx)
            .ok_or(DatasetError::IndexOutOfBounds { idx, len: self.files.len() })?;
        let mut npz = open_npz(path)?;
        let pos = read_f32_array(&mut npz, path, "pos")?;
        let expected = [self.epoch_len, 1, self.window_samples];
        if pos.shape() != expected {
            return Err(DatasetError::invalid_format(
                path,
                format!("`pos` has shape {:?}, expected {expected:?}", pos.shape()),
            ));
        }
        pos.into_dimensionality::<Ix3>()
            .map_err(|e| DatasetError::invalid_format(path, e.to_string()))
    }
}

impl SleepDataset for PretextDataset {
    type Sample = PretextSample;

    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, idx: usize, rng: &mut ChaCha8Rng) -> Result<PretextSample, DatasetError> {
        let block = self.block(idx)?;
        let (weak, strong) = self.augmenter.views(&block, rng);
        Ok(PretextSample { weak, strong })
    }

    fn name(&self) -> &str {
        "PretextDataset"
    }
}

// ---------------------------------------------------------------------------
// TuneDataset
// ---------------------------------------------------------------------------

/// Labelled windows held in memory.
#[derive(Debug, Clone)]
pub struct TuneDataset {
    windows: Array3<f32>,
    labels: Vec<i64>,
}

impl TuneDataset {
    /// Wrap pre-loaded arrays.
    ///
    /// # Errors
    ///
    /// [`DatasetError::InvalidFormat`] when the window and label counts differ.
    pub fn from_arrays(windows: Array3<f32>, labels: Vec<i64>) -> Result<Self, DatasetError> {
        if windows.len_of(Axis(0)) != labels.len() {
            return Err(DatasetError::invalid_format(
                "<memory>",
                format!("{} windows but {} labels", windows.len_of(Axis(0)), labels.len()),
            ));
        }
        Ok(TuneDataset { windows, labels })
    }

    /// Load and concatenate record files, validating labels against
    /// `num_classes`.
    pub fn from_records(
        records: &[PathBuf],
        window_samples: usize,
        num_classes: usize,
    ) -> Result<Self, DatasetError> {
        let parts = records
            .iter()
            .map(|p| load_record(p, window_samples, num_classes))
            .collect::<Result<Vec<_>, _>>()?;
        Self::concat(&parts.iter().collect::<Vec<_>>())
    }

    /// Concatenate several datasets in order.
    pub fn concat(parts: &[&TuneDataset]) -> Result<Self, DatasetError> {
        let Some(first) = parts.first() else {
            return Err(DatasetError::NoRecords { path: PathBuf::from("<memory>") });
        };
        let views: Vec<_> = parts.iter().map(|d| d.windows.view()).collect();
        let windows = concatenate(Axis(0), &views).map_err(|e| {
            DatasetError::invalid_format(
                "<memory>",
                format!("cannot concatenate windows of shape {:?}: {e}", first.windows.shape()),
            )
        })?;
        let labels = parts.iter().flat_map(|d| d.labels.iter().copied()).collect();
        Ok(TuneDataset { windows, labels })
    }

    /// All labels in order.
    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// Samples per window.
    pub fn window_samples(&self) -> usize {
        self.windows.len_of(Axis(2))
    }
}

impl SleepDataset for TuneDataset {
    type Sample = TuneSample;

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, idx: usize, _rng: &mut ChaCha8Rng) -> Result<TuneSample, DatasetError> {
        let label = *self
            .labels
            .get(idx)
            .ok_or(DatasetError::IndexOutOfBounds { idx, len: self.labels.len() })?;
        Ok(TuneSample { window: self.windows.index_axis(Axis(0), idx).to_owned(), label })
    }

    fn name(&self) -> &str {
        "TuneDataset"
    }
}

fn load_record(path: &Path, window_samples: usize, num_classes: usize) -> Result<TuneDataset, DatasetError> {
    let mut npz = open_npz(path)?;
    let windows = read_f32_array(&mut npz, path, "windows")?;
    let labels = read_i64_vec(&mut npz, path, "y")?;

    let shape = windows.shape().to_vec();
    if shape.len() != 3 || shape[1] != 1 || shape[2] != window_samples {
        return Err(DatasetError::invalid_format(
            path,
            format!("`windows` has shape {shape:?}, expected [N, 1, {window_samples}]"),
        ));
    }
    if let Some(&label) = labels.iter().find(|&&l| l < 0 || l >= num_classes as i64) {
        return Err(DatasetError::LabelOutOfRange { path: path.to_path_buf(), label, num_classes });
    }
    let windows = windows
        .into_dimensionality::<Ix3>()
        .map_err(|e| DatasetError::invalid_format(path, e.to_string()))?;
    debug!("loaded {} windows from {}", labels.len(), path.display());
    TuneDataset::from_arrays(windows, labels).map_err(|e| match e {
        DatasetError::InvalidFormat { message, .. } => DatasetError::invalid_format(path, message),
        other => other,
    })
}

// ---------------------------------------------------------------------------
// Subjects
// ---------------------------------------------------------------------------

/// All record files belonging to one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecords {
    /// Subject identifier (file-stem prefix).
    pub subject: String,
    /// Record files, sorted.
    pub records: Vec<PathBuf>,
}

impl SubjectRecords {
    /// Load every record of this subject into one [`TuneDataset`].
    pub fn load(&self, window_samples: usize, num_classes: usize) -> Result<TuneDataset, DatasetError> {
        TuneDataset::from_records(&self.records, window_samples, num_classes)
    }
}

/// Subject id of a record file: stem up to the first `_`, else the full stem.
pub fn subject_id(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    stem.split('_').next().unwrap_or(stem).to_string()
}

/// Group the `.npz` records in `test_dir` by subject, sorted by subject id.
pub fn discover_subjects(test_dir: &Path) -> Result<Vec<SubjectRecords>, DatasetError> {
    let mut subjects: Vec<SubjectRecords> = Vec::new();
    for file in list_npz(test_dir)? {
        let id = subject_id(&file);
        match subjects.iter_mut().find(|s| s.subject == id) {
            Some(s) => s.records.push(file),
            None => subjects.push(SubjectRecords { subject: id, records: vec![file] }),
        }
    }
    subjects.sort_by(|a, b| a.subject.cmp(&b.subject));
    info!("discovered {} subjects in {}", subjects.len(), test_dir.display());
    Ok(subjects)
}

/// Discover and load every subject of `test_dir`, one [`TuneDataset`] each.
pub fn load_subjects(
    test_dir: &Path,
    window_samples: usize,
    num_classes: usize,
) -> Result<Vec<TuneDataset>, DatasetError> {
    discover_subjects(test_dir)?
        .iter()
        .map(|s| {
            let ds = s.load(window_samples, num_classes)?;
            debug!("subject {}: {} windows", s.subject, ds.len());
            Ok(ds)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// NPZ helpers
// ---------------------------------------------------------------------------

fn list_npz(root: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    if !root.is_dir() {
        return Err(DatasetError::DirectoryNotFound { path: root.to_path_buf() });
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(root)
        .map_err(|e| DatasetError::io_error(root, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "npz"))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(DatasetError::NoRecords { path: root.to_path_buf() });
    }
    Ok(files)
}

fn open_npz(path: &Path) -> Result<NpzReader<File>, DatasetError> {
    let file = File::open(path).map_err(|e| DatasetError::io_error(path, e))?;
    NpzReader::new(file).map_err(|e| DatasetError::invalid_format(path, e.to_string()))
}

/// Archive member name for `array`, accepting both `name` and `name.npy`.
fn member_name(npz: &mut NpzReader<File>, path: &Path, array: &str) -> Result<String, DatasetError> {
    let names = npz.names().map_err(|e| DatasetError::npz_read(path, array, e.to_string()))?;
    let with_ext = format!("{array}.npy");
    names
        .into_iter()
        .find(|n| n == array || *n == with_ext)
        .ok_or_else(|| DatasetError::npz_read(path, array, "array not present"))
}

/// Read a float array stored as `float32` or `float64`.
fn read_f32_array(npz: &mut NpzReader<File>, path: &Path, array: &str) -> Result<ArrayD<f32>, DatasetError> {
    let name = member_name(npz, path, array)?;
    if let Ok(a) = npz.by_name::<OwnedRepr<f32>, IxDyn>(&name) {
        return Ok(a);
    }
    npz.by_name::<OwnedRepr<f64>, IxDyn>(&name)
        .map(|a| a.mapv(|v| v as f32))
        .map_err(|e| DatasetError::npz_read(path, array, e.to_string()))
}

/// Read a 1-D integer array stored as `int64` or `int32`.
fn read_i64_vec(npz: &mut NpzReader<File>, path: &Path, array: &str) -> Result<Vec<i64>, DatasetError> {
    let name = member_name(npz, path, array)?;
    if let Ok(a) = npz.by_name::<OwnedRepr<i64>, Ix1>(&name) {
        return Ok(a.to_vec());
    }
    npz.by_name::<OwnedRepr<i32>, Ix1>(&name)
        .map(|a| a.iter().map(|&v| v as i64).collect())
        .map_err(|e| DatasetError::npz_read(path, array, e.to_string()))
}

// ---------------------------------------------------------------------------
// Synthetic data
// ---------------------------------------------------------------------------

/// Characteristic frequency (cycles per window) of each synthetic stage.
fn stage_frequency(label: i64) -> f32 {
    [2.0, 7.0, 13.0, 1.0, 5.0][label.rem_euclid(5) as usize]
}

fn synthetic_window(label: i64, idx: usize, window_samples: usize) -> Array2<f32> {
    let freq = stage_frequency(label);
    let phase = (idx % 17) as f32 * 0.37;
    let amp = 1.0 + 0.1 * (idx % 3) as f32;
    Array2::from_shape_fn((1, window_samples), |(_, t)| {
        amp * (2.0 * PI * freq * t as f32 / window_samples as f32 + phase).sin()
    })
}

/// Deterministic pretext blocks: epoch `e` of sample `i` is a stage-like
/// sinusoid whose stage cycles with `i + e`.
pub struct SyntheticPretextDataset {
    num_samples: usize,
    epoch_len: usize,
    window_samples: usize,
    augmenter: Augmenter,
}

impl SyntheticPretextDataset {
    /// Create a synthetic dataset with `num_samples` blocks.
    pub fn new(num_samples: usize, epoch_len: usize, window_samples: usize, augmenter: Augmenter) -> Self {
        SyntheticPretextDataset { num_samples, epoch_len, window_samples, augmenter }
    }
}

impl SleepDataset for SyntheticPretextDataset {
    type Sample = PretextSample;

    fn len(&self) -> usize {
        self.num_samples
    }

    fn get(&self, idx: usize, rng: &mut ChaCha8Rng) -> Result<PretextSample, DatasetError> {
        if idx >= self.num_samples {
            return Err(DatasetError::IndexOutOfBounds { idx, len: self.num_samples });
        }
        let mut block = Array3::zeros((self.epoch_len, 1, self.window_samples));
        for e in 0..self.epoch_len {
            let label = ((idx + e) % 5) as i64;
            block
                .index_axis_mut(Axis(0), e)
                .assign(&synthetic_window(label, idx * self.epoch_len + e, self.window_samples));
        }
        let (weak, strong) = self.augmenter.views(&block, rng);
        Ok(PretextSample { weak, strong })
    }

    fn name(&self) -> &str {
        "SyntheticPretextDataset"
    }
}

/// `num_subjects` in-memory subjects of `windows_per_subject` labelled
/// windows each, labels cycling through `num_classes`.
pub fn synthetic_subjects(
    num_subjects: usize,
    windows_per_subject: usize,
    window_samples: usize,
    num_classes: usize,
) -> Vec<TuneDataset> {
    (0..num_subjects)
        .map(|s| {
            let labels: Vec<i64> = (0..windows_per_subject)
                .map(|i| ((i + s) % num_classes.max(1)) as i64)
                .collect();
            let mut windows = Array3::zeros((windows_per_subject, 1, window_samples));
            for (i, &label) in labels.iter().enumerate() {
                windows
                    .index_axis_mut(Axis(0), i)
                    .assign(&synthetic_window(label, s * windows_per_subject + i, window_samples));
            }
            TuneDataset { windows, labels }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(0)
    }

    #[test]
    fn subject_id_uses_prefix() {
        assert_eq!(subject_id(Path::new("/d/SC4011_E0.npz")), "SC4011");
        assert_eq!(subject_id(Path::new("/d/SC4011.npz")), "SC4011");
    }

    #[test]
    fn synthetic_pretext_shapes() {
        let ds = SyntheticPretextDataset::new(4, 9, 300, Augmenter::default());
        let s = ds.get(0, &mut rng()).unwrap();
        assert_eq!(s.weak.shape(), &[9, 1, 300]);
        assert_eq!(s.strong.shape(), &[9, 1, 300]);
        assert!(ds.get(4, &mut rng()).is_err());
    }

    #[test]
    fn dataloader_keeps_last_partial_batch() {
        let ds = synthetic_subjects(1, 10, 50, 5).remove(0);
        let loader = DataLoader::new(&ds, 4, false, 0);
        let sizes: Vec<usize> = loader.epoch(0).map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn dataloader_shuffle_is_a_seeded_permutation() {
        let ds = synthetic_subjects(1, 20, 10, 5).remove(0);
        let loader = DataLoader::new(&ds, 20, true, 7);
        let order = |epoch| -> Vec<i64> {
            loader.epoch(epoch).next().unwrap().unwrap().iter().map(|s| s.label).collect()
        };
        let mut a = order(0);
        assert_eq!(a, order(0));
        assert_ne!(a, order(1));
        a.sort_unstable();
        let mut expected = ds.labels().to_vec();
        expected.sort_unstable();
        assert_eq!(a, expected);
    }

    #[test]
    fn concat_preserves_order() {
        let subjects = synthetic_subjects(2, 3, 8, 5);
        let all = TuneDataset::concat(&[&subjects[0], &subjects[1]]).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(&all.labels()[..3], subjects[0].labels());
        assert_eq!(&all.labels()[3..], subjects[1].labels());
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        assert!(TuneDataset::from_arrays(Array3::zeros((3, 1, 4)), vec![0, 1]).is_err());
    }
}

//! Error types for the sleep-contrast training pipeline.
//!
//! This module is the single source of truth for all error types in the
//! training crate. Every module that produces an error imports its error type
//! from here rather than defining it inline.
//!
//! ## Hierarchy
//!
//! ```text
//! TrainError (top-level)
//! ├── ConfigError      (config validation / file loading)
//! ├── DatasetError     (npz records, labels, shapes)
//! └── CheckpointError  (missing parameter groups, incompatible weights)
//! ```

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// TrainResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by orchestration-level functions.
pub type TrainResult<T> = Result<T, TrainError>;

// ---------------------------------------------------------------------------
// TrainError: top-level aggregator
// ---------------------------------------------------------------------------

/// Top-level error type for the pretraining and fine-tuning harnesses.
///
/// Lower-level modules return their own error types which are coerced into
/// `TrainError` via [`From`]. A single failed batch aborts the run: nothing
/// in the crate retries.
#[derive(Debug, Error)]
pub enum TrainError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A dataset loading or access error.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// A checkpoint could not be written or read back.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error outside of dataset / checkpoint access.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by the libtorch backend.
    #[cfg(feature = "tch-backend")]
    #[error("Tensor backend error: {0}")]
    Tch(#[from] tch::TchError),

    /// The dataset is empty and no training can be performed.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// A shape mismatch was detected between two tensors.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<i64>,
        /// Actual shape.
        actual: Vec<i64>,
    },

    /// The training loss became NaN or infinite.
    #[error("Non-finite loss {value} at epoch {epoch}, step {step}")]
    NonFiniteLoss {
        /// The offending loss value.
        value: f64,
        /// Training epoch (1-based).
        epoch: usize,
        /// Step index within the epoch.
        step: usize,
    },
}

impl TrainError {
    /// Construct a [`TrainError::ShapeMismatch`].
    pub fn shape_mismatch(expected: Vec<i64>, actual: Vec<i64>) -> Self {
        TrainError::ShapeMismatch { expected, actual }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating an [`ExperimentConfig`].
///
/// [`ExperimentConfig`]: crate::config::ExperimentConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from disk.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// DatasetError
// ---------------------------------------------------------------------------

/// Errors produced while loading or accessing EEG windows.
///
/// Training code must not silently suppress these. If a record is missing or
/// malformed the run fails so the user is aware.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The data directory does not exist.
    #[error("Directory not found: {path}")]
    DirectoryNotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// A file was found but its layout or shape is wrong.
    #[error("Invalid data format in `{path}`: {message}")]
    InvalidFormat {
        /// Path of the malformed file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A low-level I/O error while reading a data file.
    #[error("I/O error reading `{path}`: {source}")]
    IoError {
        /// Path being read when the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An array inside an `.npz` archive could not be decoded.
    #[error("NPZ read error in `{path}` (array `{array}`): {message}")]
    NpzRead {
        /// Path of the archive.
        path: PathBuf,
        /// Name of the array inside the archive.
        array: String,
        /// Error description.
        message: String,
    },

    /// A sample index is out of bounds.
    #[error("Index {idx} out of bounds (dataset has {len} samples)")]
    IndexOutOfBounds {
        /// The requested index.
        idx: usize,
        /// Total length of the dataset.
        len: usize,
    },

    /// A sleep-stage label lies outside `[0, num_classes)`.
    #[error("Label {label} in `{path}` is outside [0, {num_classes})")]
    LabelOutOfRange {
        /// Record containing the label.
        path: PathBuf,
        /// The offending label.
        label: i64,
        /// Number of sleep-stage classes.
        num_classes: usize,
    },

    /// No record files were found where some were expected.
    #[error("No `.npz` records found in `{path}`")]
    NoRecords {
        /// Directory that was scanned.
        path: PathBuf,
    },
}

impl DatasetError {
    /// Construct a [`DatasetError::InvalidFormat`].
    pub fn invalid_format<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        DatasetError::InvalidFormat { path: path.into(), message: msg.into() }
    }

    /// Construct a [`DatasetError::IoError`].
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::IoError { path: path.into(), source }
    }

    /// Construct a [`DatasetError::NpzRead`].
    pub fn npz_read<S: Into<String>>(path: impl Into<PathBuf>, array: &str, msg: S) -> Self {
        DatasetError::NpzRead { path: path.into(), array: array.to_string(), message: msg.into() }
    }
}

// ---------------------------------------------------------------------------
// CheckpointError
// ---------------------------------------------------------------------------

/// Errors produced while writing or reading checkpoint files.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint does not contain the requested parameter group or
    /// metadata key (e.g. `eeg_model_state_dict`).
    #[error("Checkpoint `{path}` has no key `{key}`")]
    MissingKey {
        /// The key that was requested.
        key: String,
        /// Checkpoint file.
        path: PathBuf,
    },

    /// The stored tensors do not fit the module they are loaded into.
    #[error("Checkpoint `{path}` is incompatible: {message}")]
    Incompatible {
        /// Checkpoint file.
        path: PathBuf,
        /// Description of the mismatch.
        message: String,
    },

    /// The checkpoint file could not be written or read.
    #[error("Checkpoint I/O failed for `{path}`: {message}")]
    Io {
        /// Checkpoint file.
        path: PathBuf,
        /// Error description.
        message: String,
    },
}

impl CheckpointError {
    /// Construct a [`CheckpointError::MissingKey`].
    pub fn missing_key<S: Into<String>>(key: S, path: impl Into<PathBuf>) -> Self {
        CheckpointError::MissingKey { key: key.into(), path: path.into() }
    }

    /// Construct a [`CheckpointError::Incompatible`].
    pub fn incompatible<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        CheckpointError::Incompatible { path: path.into(), message: msg.into() }
    }

    /// Construct a [`CheckpointError::Io`].
    pub fn io<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        CheckpointError::Io { path: path.into(), message: msg.into() }
    }
}

//! Checkpoint files (requires `tch-backend`).
//!
//! A checkpoint is a flat map of named tensors written with
//! [`Tensor::save_multi`]:
//!
//! ```text
//! eeg_model_state_dict.model.stem_conv.weight   → parameter
//! eeg_model_state_dict.attention.W              → parameter
//! model_state_dict.curr_pred.fc1.bias           → parameter
//! epoch                                         → 0-d f64
//! f1                                            → 0-d f64
//! ```
//!
//! Keys containing a `.` belong to the parameter group named by their first
//! segment; keys without one are scalar metadata.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tch::{nn, Device, Kind, Tensor};
use tracing::debug;

use crate::error::CheckpointError;

/// Group holding the encoder handed to linear evaluation.
pub const EEG_MODEL_STATE_DICT: &str = "eeg_model_state_dict";
/// Group holding every parameter of the pretext model.
pub const MODEL_STATE_DICT: &str = "model_state_dict";

/// Ordered `(name, tensor)` pairs of one parameter group.
pub type StateDict = Vec<(String, Tensor)>;

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// In-memory view of one checkpoint file.
#[derive(Debug, Default)]
pub struct Checkpoint {
    groups: BTreeMap<String, StateDict>,
    metadata: BTreeMap<String, f64>,
    path: Option<PathBuf>,
}

impl Checkpoint {
    /// Empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter group.
    pub fn with_group(mut self, name: &str, state: StateDict) -> Self {
        self.groups.insert(name.to_string(), state);
        self
    }

    /// Add a scalar metadata entry.
    pub fn with_meta(mut self, key: &str, value: f64) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::io(path, e.to_string()))?;
        }
        let mut named: Vec<(String, Tensor)> = Vec::new();
        for (group, state) in &self.groups {
            for (name, tensor) in state {
                named.push((format!("{group}.{name}"), tensor.detach().to_device(Device::Cpu)));
            }
        }
        for (key, value) in &self.metadata {
            named.push((key.clone(), Tensor::scalar_tensor(*value, (Kind::Double, Device::Cpu))));
        }
        Tensor::save_multi(&named, path).map_err(|e| CheckpointError::io(path, e.to_string()))?;
        debug!("wrote checkpoint {} ({} tensors)", path.display(), named.len());
        Ok(())
    }

    /// Read a checkpoint written by [`Checkpoint::save`].
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let named = Tensor::load_multi(path).map_err(|e| CheckpointError::io(path, e.to_string()))?;
        let mut ckpt = Checkpoint { path: Some(path.to_path_buf()), ..Default::default() };
        for (key, tensor) in named {
            match key.split_once('.') {
                Some((group, name)) => ckpt
                    .groups
                    .entry(group.to_string())
                    .or_default()
                    .push((name.to_string(), tensor)),
                None => {
                    ckpt.metadata.insert(key, tensor.double_value(&[]));
                }
            }
        }
        Ok(ckpt)
    }

    /// Parameter group `name`.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::MissingKey`] when the group is absent.
    pub fn group(&self, name: &str) -> Result<&StateDict, CheckpointError> {
        self.groups.get(name).ok_or_else(|| CheckpointError::missing_key(name, self.display_path()))
    }

    /// Required scalar metadata entry.
    pub fn meta(&self, key: &str) -> Result<f64, CheckpointError> {
        self.metadata
            .get(key)
            .copied()
            .ok_or_else(|| CheckpointError::missing_key(key, self.display_path()))
    }

    fn display_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from("<memory>"))
    }
}

// ---------------------------------------------------------------------------
// VarStore <-> StateDict
// ---------------------------------------------------------------------------

/// Snapshot the variables of `vs`, optionally restricted to those under
/// `prefix` (which is then stripped from the names). Sorted by name.
pub fn state_dict(vs: &nn::VarStore, prefix: Option<&str>) -> StateDict {
    let mut state: StateDict = vs
        .variables()
        .into_iter()
        .filter_map(|(name, tensor)| match prefix {
            None => Some((name, tensor)),
            Some(p) => name
                .strip_prefix(p)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest.to_string(), tensor)),
        })
        .collect();
    state.sort_by(|a, b| a.0.cmp(&b.0));
    state
}

/// Copy `state` into the variables of `vs` (under `prefix`, if given).
///
/// Every targeted variable must be present in `state` with the same shape.
/// Entries of `state` with no matching variable are ignored.
pub fn load_state_dict(
    vs: &nn::VarStore,
    prefix: Option<&str>,
    state: &StateDict,
    path: &Path,
) -> Result<(), CheckpointError> {
    let source: BTreeMap<&str, &Tensor> = state.iter().map(|(n, t)| (n.as_str(), t)).collect();
    let targets = state_dict(vs, prefix);
    if targets.is_empty() {
        return Err(CheckpointError::incompatible(path, "no variables to load into"));
    }
    tch::no_grad(|| {
        for (name, mut dst) in targets {
            let src = source
                .get(name.as_str())
                .ok_or_else(|| CheckpointError::incompatible(path, format!("missing tensor `{name}`")))?;
            if src.size() != dst.size() {
                return Err(CheckpointError::incompatible(
                    path,
                    format!("`{name}` has shape {:?}, expected {:?}", src.size(), dst.size()),
                ));
            }
            dst.copy_(src);
        }
        Ok(())
    })
}

/// Prefix every name of `state` with `prefix.`.
pub fn prefixed(state: StateDict, prefix: &str) -> StateDict {
    state.into_iter().map(|(n, t)| (format!("{prefix}.{n}"), t)).collect()
}

/// Entries of `state` under `prefix.`, with the prefix stripped.
pub fn strip_prefix(state: &StateDict, prefix: &str) -> StateDict {
    state
        .iter()
        .filter_map(|(n, t)| {
            n.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest.to_string(), t.shallow_clone()))
        })
        .collect()
}

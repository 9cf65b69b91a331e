//! Scalar metric logging.
//!
//! Both harnesses report one [`MetricMap`] per logging call: the pretraining
//! loop logs `"Epoch Loss"`, `"LR"` and `"Epoch"` every epoch and
//! `"F1"`, `"Kappa"`, `"Bal Acc"`, `"Acc"` on evaluation epochs. Where those
//! maps end up is decided by the [`MetricLogger`] implementation:
//!
//! - [`TracingLogger`]: one structured `info!` event per call.
//! - [`JsonlLogger`]: one JSON object per line in `<exp_path>/<name>_metrics.jsonl`.
//! - [`MultiLogger`]: fans a call out to several loggers.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::TrainResult;

/// Scalar metrics keyed by display name (`"Epoch Loss"`, `"F1"`, …).
pub type MetricMap = BTreeMap<String, f64>;

/// Build a [`MetricMap`] from `(name, value)` pairs.
pub fn metric_map<'a, I>(pairs: I) -> MetricMap
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Sink for scalar metric dictionaries and saved artifacts.
pub trait MetricLogger {
    /// Record one dictionary of scalar metrics.
    fn log(&mut self, metrics: &MetricMap) -> TrainResult<()>;

    /// Register a file written by the run (e.g. an epoch-tagged checkpoint).
    fn save(&mut self, path: &Path) -> TrainResult<()>;
}

// ---------------------------------------------------------------------------
// TracingLogger
// ---------------------------------------------------------------------------

/// Emits every metric dictionary as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl MetricLogger for TracingLogger {
    fn log(&mut self, metrics: &MetricMap) -> TrainResult<()> {
        let rendered = metrics
            .iter()
            .map(|(k, v)| format!("{k}={v:.6}"))
            .collect::<Vec<_>>()
            .join("  ");
        info!(target: "metrics", "{rendered}");
        Ok(())
    }

    fn save(&mut self, path: &Path) -> TrainResult<()> {
        info!(target: "metrics", artifact = %path.display(), "saved artifact");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlLogger
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(untagged)]
enum Line<'a> {
    Metrics(&'a MetricMap),
    Artifact { artifact: &'a Path },
}

/// Appends one JSON object per call to a `.jsonl` file.
pub struct JsonlLogger {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlLogger {
    /// Open (or create) `path` in append mode, creating parent directories.
    pub fn create(path: impl Into<PathBuf>) -> TrainResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlLogger { path, writer: BufWriter::new(file) })
    }

    /// Logger writing to `<exp_path>/<name>_metrics.jsonl`.
    pub fn for_run(exp_path: &Path, name: &str) -> TrainResult<Self> {
        Self::create(exp_path.join(format!("{name}_metrics.jsonl")))
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &Line<'_>) -> TrainResult<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl MetricLogger for JsonlLogger {
    fn log(&mut self, metrics: &MetricMap) -> TrainResult<()> {
        self.write_line(&Line::Metrics(metrics))
    }

    fn save(&mut self, path: &Path) -> TrainResult<()> {
        self.write_line(&Line::Artifact { artifact: path })
    }
}

// ---------------------------------------------------------------------------
// MultiLogger
// ---------------------------------------------------------------------------

/// Forwards every call to each wrapped logger in order.
#[derive(Default)]
pub struct MultiLogger {
    sinks: Vec<Box<dyn MetricLogger>>,
}

impl MultiLogger {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: impl MetricLogger + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl MetricLogger for MultiLogger {
    fn log(&mut self, metrics: &MetricMap) -> TrainResult<()> {
        for sink in &mut self.sinks {
            sink.log(metrics)?;
        }
        Ok(())
    }

    fn save(&mut self, path: &Path) -> TrainResult<()> {
        for sink in &mut self.sinks {
            sink.save(path)?;
        }
        Ok(())
    }
}

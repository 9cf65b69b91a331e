//! Sample batches to tensors (requires `tch-backend`).

use tch::{Device, Kind, Tensor};
use tracing::warn;

use crate::config::ExperimentConfig;
use crate::dataset::{PretextSample, TuneSample};
use crate::error::{TrainError, TrainResult};

/// CUDA device `gpu_device_id` when requested and available, else CPU.
pub fn select_device(cfg: &ExperimentConfig) -> Device {
    if !cfg.use_gpu {
        return Device::Cpu;
    }
    if tch::Cuda::is_available() {
        Device::Cuda(cfg.gpu_device_id)
    } else {
        warn!("CUDA requested but not available; using CPU");
        Device::Cpu
    }
}

/// Stack weak and strong views into two `[B, L, 1, S]` float tensors.
pub fn pretext_batch(samples: &[PretextSample], device: Device) -> TrainResult<(Tensor, Tensor)> {
    let first = samples.first().ok_or(TrainError::EmptyDataset)?;
    let shape: Vec<i64> = first.weak.shape().iter().map(|&d| d as i64).collect();

    let mut weak = Vec::with_capacity(samples.len() * first.weak.len());
    let mut strong = Vec::with_capacity(samples.len() * first.strong.len());
    for s in samples {
        for view in [&s.weak, &s.strong] {
            let actual: Vec<i64> = view.shape().iter().map(|&d| d as i64).collect();
            if actual != shape {
                return Err(TrainError::shape_mismatch(shape, actual));
            }
        }
        weak.extend(s.weak.iter().copied());
        strong.extend(s.strong.iter().copied());
    }

    let dims = [samples.len() as i64, shape[0], shape[1], shape[2]];
    Ok((to_device(&weak, &dims, device), to_device(&strong, &dims, device)))
}

/// Windows `[B, 1, S]` (float) and labels `[B]` (int64).
pub fn tune_batch(samples: &[TuneSample], device: Device) -> TrainResult<(Tensor, Tensor)> {
    let first = samples.first().ok_or(TrainError::EmptyDataset)?;
    let shape: Vec<i64> = first.window.shape().iter().map(|&d| d as i64).collect();

    let mut windows = Vec::with_capacity(samples.len() * first.window.len());
    let mut labels = Vec::with_capacity(samples.len());
    for s in samples {
        let actual: Vec<i64> = s.window.shape().iter().map(|&d| d as i64).collect();
        if actual != shape {
            return Err(TrainError::shape_mismatch(shape, actual));
        }
        windows.extend(s.window.iter().copied());
        labels.push(s.label);
    }

    let x = to_device(&windows, &[samples.len() as i64, shape[0], shape[1]], device);
    let y = Tensor::from_slice(&labels).to_kind(Kind::Int64).to_device(device);
    Ok((x, y))
}

fn to_device(data: &[f32], dims: &[i64], device: Device) -> Tensor {
    Tensor::from_slice(data).reshape(dims).to_device(device)
}

//! Network building blocks (requires `tch-backend`).
//!
//! All modules hold their layers as struct fields and register parameters
//! once, at construction, under the `nn::Path` they are given. Parameter
//! names are therefore stable across runs and checkpoints.

pub mod attention;
pub mod backbone;
pub mod encoder;
pub mod heads;
pub mod transformer;

pub use attention::AttentionPool;
pub use backbone::{BasicBlock1d, ResNet1d};
pub use encoder::Encoder;
pub use heads::MlpHead;
pub use transformer::{Transformer, TransformerConfig};

use tch::Tensor;

/// Row-wise L2 normalisation of a `[N, D]` tensor (`‖x‖` clamped at 1e-12).
pub fn l2_normalize(xs: &Tensor) -> Tensor {
    xs / xs.norm_scalaropt_dim(2.0, [1i64], true).clamp_min(1e-12)
}

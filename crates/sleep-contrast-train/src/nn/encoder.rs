//! Window encoder: backbone followed by attention pooling.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use super::attention::AttentionPool;
use super::backbone::ResNet1d;

/// Maps one epoch window `[B, 1, S]` to an embedding `[B, feature_dim]`.
#[derive(Debug)]
pub struct Encoder {
    backbone: ResNet1d,
    attention: AttentionPool,
}

impl Encoder {
    /// Register the backbone under `p/model` and the pooling under
    /// `p/attention`.
    pub fn new(p: &nn::Path, feature_dim: i64) -> Self {
        Encoder {
            backbone: ResNet1d::new(&(p / "model"), feature_dim),
            attention: AttentionPool::new(&(p / "attention"), feature_dim),
        }
    }

    /// Embedding width.
    pub fn feature_dim(&self) -> i64 {
        self.backbone.feature_dim()
    }

    /// Encode every epoch of `[B, L, 1, S]` and stack to `[B, L, D]`.
    pub fn encode_epochs(&self, xs: &Tensor, train: bool) -> Tensor {
        let epochs = xs.size()[1];
        let encoded: Vec<Tensor> = (0..epochs).map(|i| self.forward_t(&xs.select(1, i), train)).collect();
        Tensor::stack(&encoded, 1)
    }
}

impl ModuleT for Encoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.attention.forward(&self.backbone.forward_t(xs, train))
    }
}

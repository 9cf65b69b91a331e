//! Projection and predictor heads.
//!
//! Both are `Linear → activation → Linear` with no normalisation layers. A
//! projection head maps `input_dim → hidden_dim`; a predictor head keeps
//! `hidden_dim → hidden_dim`.

use tch::{nn, nn::Module, Tensor};

use crate::config::HeadActivation;

/// Two-layer feed-forward head.
#[derive(Debug)]
pub struct MlpHead {
    fc1: nn::Linear,
    fc2: nn::Linear,
    activation: HeadActivation,
}

impl MlpHead {
    /// Projection head `input_dim → hidden_dim → hidden_dim`.
    pub fn projection(p: &nn::Path, input_dim: i64, hidden_dim: i64, activation: HeadActivation) -> Self {
        Self::build(p, input_dim, hidden_dim, activation)
    }

    /// Predictor head `hidden_dim → hidden_dim → hidden_dim`.
    pub fn predictor(p: &nn::Path, hidden_dim: i64, activation: HeadActivation) -> Self {
        Self::build(p, hidden_dim, hidden_dim, activation)
    }

    fn build(p: &nn::Path, input_dim: i64, hidden_dim: i64, activation: HeadActivation) -> Self {
        MlpHead {
            fc1: nn::linear(p / "fc1", input_dim, hidden_dim, Default::default()),
            fc2: nn::linear(p / "fc2", hidden_dim, hidden_dim, Default::default()),
            activation,
        }
    }
}

impl Module for MlpHead {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let batch = xs.size()[0];
        let h = self.fc1.forward(&xs.reshape([batch, -1]));
        let h = match self.activation {
            HeadActivation::Relu => h.relu(),
            HeadActivation::Tanh => h.tanh(),
        };
        self.fc2.forward(&h)
    }
}

//! Additive attention pooling over the backbone's time axis.

use tch::{nn, Kind, Tensor};

/// Learned additive attention that collapses `[B, D, T]` feature maps into a
/// single `[B, D]` embedding.
///
/// ```text
/// e_t   = tanh(x_t · W) · V · D^-0.5
/// α     = softmax_t(e)
/// out   = Σ_t α_t · x_t
/// ```
///
/// Both `W [D, D]` and `V [D, 1]` start from a standard normal.
#[derive(Debug)]
pub struct AttentionPool {
    w: Tensor,
    v: Tensor,
    scale: f64,
}

impl AttentionPool {
    /// Register `W` and `V` under `p`.
    pub fn new(p: &nn::Path, dim: i64) -> Self {
        AttentionPool {
            w: p.randn("W", &[dim, dim], 0.0, 1.0),
            v: p.randn("V", &[dim, 1], 0.0, 1.0),
            scale: (dim as f64).powf(-0.5),
        }
    }

    /// Attention weights `α` of shape `[B, T, 1]` for features `[B, D, T]`.
    pub fn weights(&self, xs: &Tensor) -> Tensor {
        let x = xs.permute([0, 2, 1]);
        let e = x.matmul(&self.w).tanh().matmul(&self.v) * self.scale;
        e.softmax(1, Kind::Float).to_kind(x.kind())
    }

    /// Pool `[B, D, T]` with precomputed weights `[B, T, 1]`.
    pub fn pool_with(xs: &Tensor, alpha: &Tensor) -> Tensor {
        let x = xs.permute([0, 2, 1]);
        (alpha * x).sum_dim_intlist(&[1i64][..], false, None::<Kind>)
    }
}

impl nn::Module for AttentionPool {
    fn forward(&self, xs: &Tensor) -> Tensor {
        Self::pool_with(xs, &self.weights(xs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::Module;
    use tch::Device;

    fn pool() -> (nn::VarStore, AttentionPool) {
        tch::manual_seed(0);
        let vs = nn::VarStore::new(Device::Cpu);
        let att = AttentionPool::new(&(vs.root() / "attention"), 8);
        (vs, att)
    }

    #[test]
    fn output_is_batch_by_dim() {
        let (_vs, att) = pool();
        let x = Tensor::randn([3, 8, 5], (Kind::Float, Device::Cpu));
        assert_eq!(att.forward(&x).size(), vec![3, 8]);
    }

    #[test]
    fn weights_sum_to_one_over_time() {
        let (_vs, att) = pool();
        let x = Tensor::randn([2, 8, 6], (Kind::Float, Device::Cpu));
        let total = att.weights(&x).sum_dim_intlist(&[1i64][..], false, Kind::Float);
        let err = (total - 1.0).abs().max().double_value(&[]);
        assert!(err < 1e-5, "weights must be a distribution over T, err={err}");
    }

    #[test]
    fn reordering_time_changes_output_unless_weights_follow() {
        let (_vs, att) = pool();
        let x = Tensor::randn([1, 8, 4], (Kind::Float, Device::Cpu));
        let perm = Tensor::from_slice(&[3i64, 1, 0, 2]);
        let x_perm = x.index_select(2, &perm);

        // Stale weights applied to the reordered sequence give a different result.
        let stale = AttentionPool::pool_with(&x_perm, &att.weights(&x));
        let diff = (&stale - att.forward(&x)).abs().max().double_value(&[]);
        assert!(diff > 1e-4, "stale weights should change the pooled vector");

        // Recomputed weights follow the reordering and the pooled vector is unchanged.
        let recomputed = att.forward(&x_perm);
        let diff = (&recomputed - att.forward(&x)).abs().max().double_value(&[]);
        assert!(diff < 1e-4, "recomputed weights should follow the permutation, diff={diff}");
    }
}

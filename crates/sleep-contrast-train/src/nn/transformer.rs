//! Pre-norm transformer aggregating per-epoch embeddings into one context
//! ("surrounding") embedding.
//!
//! Input `[B, L, D]` is prefixed with a learned `[CLS]` token, offset by a
//! learned positional embedding and passed through `depth` blocks of
//! multi-head self-attention and a GELU MLP. The normalised `[CLS]` output
//! `[B, D]` is returned.

use tch::{nn, nn::Module, nn::ModuleT, Kind, Tensor};

/// Shape of a [`Transformer`].
#[derive(Debug, Clone, Copy)]
pub struct TransformerConfig {
    /// Token width.
    pub dim: i64,
    /// Number of blocks.
    pub depth: i64,
    /// Attention heads per block; must divide `dim`.
    pub heads: i64,
    /// Hidden width of the MLP.
    pub mlp_dim: i64,
    /// Dropout probability.
    pub dropout: f64,
    /// Longest input sequence (excluding `[CLS]`).
    pub max_len: i64,
}

// ---------------------------------------------------------------------------
// Attention
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SelfAttention {
    qkv: nn::Linear,
    proj: nn::Linear,
    heads: i64,
    scale: f64,
    dropout: f64,
}

impl SelfAttention {
    fn new(p: &nn::Path, dim: i64, heads: i64, dropout: f64) -> Self {
        SelfAttention {
            qkv: nn::linear(p / "qkv", dim, 3 * dim, nn::LinearConfig { bias: false, ..Default::default() }),
            proj: nn::linear(p / "proj", dim, dim, Default::default()),
            heads,
            scale: ((dim / heads) as f64).powf(-0.5),
            dropout,
        }
    }
}

impl ModuleT for SelfAttention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let size = xs.size();
        let (b, l, d) = (size[0], size[1], size[2]);
        let qkv = self
            .qkv
            .forward(xs)
            .reshape([b, l, 3, self.heads, d / self.heads])
            .permute([2, 0, 3, 1, 4]);
        let (q, k, v) = (qkv.get(0), qkv.get(1), qkv.get(2));
        let attn = (q.matmul(&k.transpose(-2, -1)) * self.scale)
            .softmax(-1, Kind::Float)
            .to_kind(v.kind())
            .dropout(self.dropout, train);
        let out = attn.matmul(&v).transpose(1, 2).reshape([b, l, d]);
        self.proj.forward(&out).dropout(self.dropout, train)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Block {
    ln1: nn::LayerNorm,
    attn: SelfAttention,
    ln2: nn::LayerNorm,
    fc1: nn::Linear,
    fc2: nn::Linear,
    dropout: f64,
}

impl Block {
    fn new(p: &nn::Path, cfg: &TransformerConfig) -> Self {
        Block {
            ln1: nn::layer_norm(p / "ln1", vec![cfg.dim], Default::default()),
            attn: SelfAttention::new(&(p / "attn"), cfg.dim, cfg.heads, cfg.dropout),
            ln2: nn::layer_norm(p / "ln2", vec![cfg.dim], Default::default()),
            fc1: nn::linear(p / "fc1", cfg.dim, cfg.mlp_dim, Default::default()),
            fc2: nn::linear(p / "fc2", cfg.mlp_dim, cfg.dim, Default::default()),
            dropout: cfg.dropout,
        }
    }
}

impl ModuleT for Block {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let x = xs + self.attn.forward_t(&self.ln1.forward(xs), train);
        let h = self
            .fc1
            .forward(&self.ln2.forward(&x))
            .gelu("none")
            .dropout(self.dropout, train);
        &x + self.fc2.forward(&h).dropout(self.dropout, train)
    }
}

// ---------------------------------------------------------------------------
// Transformer
// ---------------------------------------------------------------------------

/// Sequence-to-vector transformer encoder.
#[derive(Debug)]
pub struct Transformer {
    cls_token: Tensor,
    pos_embedding: Tensor,
    blocks: Vec<Block>,
    norm: nn::LayerNorm,
    dropout: f64,
}

impl Transformer {
    /// Register all parameters under `p`.
    pub fn new(p: &nn::Path, cfg: TransformerConfig) -> Self {
        let blocks = (0..cfg.depth)
            .map(|i| Block::new(&(p / "blocks" / i), &cfg))
            .collect();
        Transformer {
            cls_token: p.randn("cls_token", &[1, 1, cfg.dim], 0.0, 0.02),
            pos_embedding: p.randn("pos_embedding", &[1, cfg.max_len + 1, cfg.dim], 0.0, 0.02),
            blocks,
            norm: nn::layer_norm(p / "norm", vec![cfg.dim], Default::default()),
            dropout: cfg.dropout,
        }
    }
}

impl ModuleT for Transformer {
    /// `[B, L, D]` → `[B, D]`.
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let size = xs.size();
        let (b, l, d) = (size[0], size[1], size[2]);
        let cls = self.cls_token.expand([b, 1, d], true).to_kind(xs.kind());
        let tokens = Tensor::cat(&[&cls, xs], 1)
            + self.pos_embedding.narrow(1, 0, l + 1).to_kind(xs.kind());
        let tokens = tokens.dropout(self.dropout, train);
        let out = self.blocks.iter().fold(tokens, |x, block| block.forward_t(&x, train));
        self.norm.forward(&out).select(1, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn tiny() -> TransformerConfig {
        TransformerConfig { dim: 8, depth: 2, heads: 2, mlp_dim: 16, dropout: 0.1, max_len: 5 }
    }

    #[test]
    fn sequence_collapses_to_one_vector() {
        tch::manual_seed(0);
        let vs = nn::VarStore::new(Device::Cpu);
        let tfmr = Transformer::new(&(vs.root() / "tfmr"), tiny());
        let x = Tensor::randn([3, 5, 8], (Kind::Float, Device::Cpu));
        assert_eq!(tfmr.forward_t(&x, true).size(), vec![3, 8]);
    }

    #[test]
    fn eval_mode_is_deterministic() {
        tch::manual_seed(0);
        let vs = nn::VarStore::new(Device::Cpu);
        let tfmr = Transformer::new(&(vs.root() / "tfmr"), tiny());
        let x = Tensor::randn([2, 4, 8], (Kind::Float, Device::Cpu));
        let a = tfmr.forward_t(&x, false);
        let b = tfmr.forward_t(&x, false);
        assert!(a.allclose(&b, 1e-6, 1e-6, false));
    }
}

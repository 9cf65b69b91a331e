//! 1-D ResNet backbone for raw single-channel EEG windows.
//!
//! ```text
//! [B, 1, S]
//!   │ Conv1d(k7, s2) ─ BN ─ ReLU ─ MaxPool(k3, s2)
//!   ▼
//! [B, 32, S/4]
//!   │ stage1: 2 × BasicBlock (32 → 64,  stride 2)
//!   │ stage2: 2 × BasicBlock (64 → 128, stride 2)
//!   │ stage3: 2 × BasicBlock (128 → D,  stride 2)
//!   ▼
//! [B, D, T']
//! ```

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

const STEM_CHANNELS: i64 = 32;

// ---------------------------------------------------------------------------
// BasicBlock1d
// ---------------------------------------------------------------------------

/// Two 3-tap convolutions with a residual connection.
///
/// ```text
/// x ─── Conv1d(s) ─── BN ─── ReLU ─── Conv1d(1) ─── BN ──+── ReLU
///  │                                                      │
///  └── (1×1 conv + BN if shape changes) ─────────────────┘
/// ```
#[derive(Debug)]
pub struct BasicBlock1d {
    conv1: nn::Conv1D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv1D,
    bn2: nn::BatchNorm,
    downsample: Option<(nn::Conv1D, nn::BatchNorm)>,
}

impl BasicBlock1d {
    /// Register the block's layers under `p`.
    pub fn new(p: &nn::Path, in_ch: i64, out_ch: i64, stride: i64) -> Self {
        let conv1 = nn::conv1d(
            p / "conv1",
            in_ch,
            out_ch,
            3,
            nn::ConvConfig { stride, padding: 1, bias: false, ..Default::default() },
        );
        let bn1 = nn::batch_norm1d(p / "bn1", out_ch, Default::default());
        let conv2 = nn::conv1d(
            p / "conv2",
            out_ch,
            out_ch,
            3,
            nn::ConvConfig { padding: 1, bias: false, ..Default::default() },
        );
        let bn2 = nn::batch_norm1d(p / "bn2", out_ch, Default::default());
        let downsample = (in_ch != out_ch || stride != 1).then(|| {
            let conv = nn::conv1d(
                p / "ds_conv",
                in_ch,
                out_ch,
                1,
                nn::ConvConfig { stride, bias: false, ..Default::default() },
            );
            (conv, nn::batch_norm1d(p / "ds_bn", out_ch, Default::default()))
        });
        BasicBlock1d { conv1, bn1, conv2, bn2, downsample }
    }
}

impl ModuleT for BasicBlock1d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let out = self.conv1.forward(xs).apply_t(&self.bn1, train).relu();
        let out = self.conv2.forward(&out).apply_t(&self.bn2, train);
        let residual = match &self.downsample {
            Some((conv, bn)) => conv.forward(xs).apply_t(bn, train),
            None => xs.shallow_clone(),
        };
        (out + residual).relu()
    }
}

// ---------------------------------------------------------------------------
// ResNet1d
// ---------------------------------------------------------------------------

/// Backbone mapping `[B, 1, S]` to `[B, feature_dim, T']`.
#[derive(Debug)]
pub struct ResNet1d {
    stem_conv: nn::Conv1D,
    stem_bn: nn::BatchNorm,
    blocks: Vec<BasicBlock1d>,
    feature_dim: i64,
}

impl ResNet1d {
    /// Register the backbone under `p`.
    pub fn new(p: &nn::Path, feature_dim: i64) -> Self {
        let stem_conv = nn::conv1d(
            p / "stem_conv",
            1,
            STEM_CHANNELS,
            7,
            nn::ConvConfig { stride: 2, padding: 3, bias: false, ..Default::default() },
        );
        let stem_bn = nn::batch_norm1d(p / "stem_bn", STEM_CHANNELS, Default::default());

        let widths = [STEM_CHANNELS, 64, 128, feature_dim];
        let mut blocks = Vec::with_capacity(6);
        for (stage, pair) in widths.windows(2).enumerate() {
            let sp = p / format!("layer{}", stage + 1);
            blocks.push(BasicBlock1d::new(&(&sp / "0"), pair[0], pair[1], 2));
            blocks.push(BasicBlock1d::new(&(&sp / "1"), pair[1], pair[1], 1));
        }
        ResNet1d { stem_conv, stem_bn, blocks, feature_dim }
    }

    /// Channel width of the output feature map.
    pub fn feature_dim(&self) -> i64 {
        self.feature_dim
    }
}

impl ModuleT for ResNet1d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let stem = self
            .stem_conv
            .forward(xs)
            .apply_t(&self.stem_bn, train)
            .relu()
            .max_pool1d([3], [2], [1], [1], false);
        self.blocks.iter().fold(stem, |x, block| block.forward_t(&x, train))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn backbone_output_shape() {
        tch::manual_seed(0);
        let vs = nn::VarStore::new(Device::Cpu);
        let net = ResNet1d::new(&(vs.root() / "backbone"), 16);
        let x = Tensor::randn([2, 1, 256], (Kind::Float, Device::Cpu));
        let y = net.forward_t(&x, true);
        // 256 /2 (stem) /2 (pool) /2 /2 /2 (stages) = 8
        assert_eq!(y.size(), vec![2, 16, 8]);
    }

    #[test]
    fn identity_block_has_no_downsample() {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = BasicBlock1d::new(&(vs.root() / "b"), 8, 8, 1);
        assert!(block.downsample.is_none());
        let x = Tensor::randn([1, 8, 10], (Kind::Float, Device::Cpu));
        assert_eq!(block.forward_t(&x, false).size(), vec![1, 8, 10]);
    }
}

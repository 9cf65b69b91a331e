//! Contrastive objectives (requires `tch-backend`).
//!
//! | Function                      | Used by         | Form                                     |
//! |-------------------------------|-----------------|------------------------------------------|
//! | [`info_nce_loss`]             | care, simclr    | `mean(−log(pos / Σ_{j≠i} sim_ij))`       |
//! | [`stop_gradient_cosine_loss`] | simsiam         | `−(⟨p₁, sg(z₂)⟩ + ⟨p₂, sg(z₁)⟩) / 2`     |
//! | [`CareLoss`]                  | care            | `l₁ + l₂ + λ₁ · (l₃ + l₄)`               |
//!
//! Every input is L2-normalised row-wise first and promoted to `f32`, so the
//! losses stay in full precision under autocast.

use tch::{Device, Kind, Tensor};

use crate::nn::l2_normalize;

// ─────────────────────────────────────────────────────────────────────────────
// LossOutput
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar training loss plus named components for logging.
#[derive(Debug)]
pub struct LossOutput {
    /// Differentiable scalar to back-propagate.
    pub total: Tensor,
    /// Detached components keyed by their logged name (e.g. `"Curr Loss"`).
    pub components: Vec<(&'static str, Tensor)>,
}

impl LossOutput {
    /// Loss without extra components.
    pub fn scalar(total: Tensor) -> Self {
        LossOutput { total, components: Vec::new() }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InfoNCE
// ─────────────────────────────────────────────────────────────────────────────

/// Temperature-scaled InfoNCE over `B` positive pairs.
///
/// Both batches are normalised and stacked into `2B` rows. For each row the
/// denominator sums `exp(⟨o_i, o_j⟩ / T)` over all `j ≠ i`, which includes
/// the row's own positive. The numerator is `exp(⟨o1_k, o2_k⟩ / T)` repeated
/// for both orderings. The result is the mean of `−log(pos / neg)`, which is
/// never negative.
pub fn info_nce_loss(out_1: &Tensor, out_2: &Tensor, temperature: f64) -> Tensor {
    let o1 = l2_normalize(&out_1.to_kind(Kind::Float));
    let o2 = l2_normalize(&out_2.to_kind(Kind::Float));

    let out = Tensor::cat(&[&o1, &o2], 0);
    let n = out.size()[0];

    let sim = (out.mm(&out.tr()) / temperature).exp();
    let mask = Tensor::eye(n, (Kind::Bool, out.device())).logical_not();
    let neg = sim
        .masked_select(&mask)
        .view([n, n - 1])
        .sum_dim_intlist(&[-1i64][..], false, Kind::Float);

    let pos = ((&o1 * &o2).sum_dim_intlist(&[-1i64][..], false, Kind::Float) / temperature).exp();
    let pos = Tensor::cat(&[&pos, &pos], 0);

    -(pos / neg).log().mean(Kind::Float)
}

// ─────────────────────────────────────────────────────────────────────────────
// Stop-gradient cosine loss
// ─────────────────────────────────────────────────────────────────────────────

/// Symmetric negative cosine similarity with stop-gradient on the targets.
///
/// `p1`, `p2` are predictor outputs and `z1`, `z2` projections of the two
/// views. `z1` and `z2` are detached, so gradient reaches the projections
/// only through the predictor path. Lies in `[−1, 1]`.
pub fn stop_gradient_cosine_loss(p1: &Tensor, p2: &Tensor, z1: &Tensor, z2: &Tensor) -> Tensor {
    let p1 = l2_normalize(&p1.to_kind(Kind::Float));
    let p2 = l2_normalize(&p2.to_kind(Kind::Float));
    let z1 = l2_normalize(&z1.to_kind(Kind::Float)).detach();
    let z2 = l2_normalize(&z2.to_kind(Kind::Float)).detach();

    let l_pos1 = (&p1 * &z2).sum_dim_intlist(&[1i64][..], false, Kind::Float).mean(Kind::Float);
    let l_pos2 = (&p2 * &z1).sum_dim_intlist(&[1i64][..], false, Kind::Float).mean(Kind::Float);
    -(l_pos1 + l_pos2) / 2.0
}

// ─────────────────────────────────────────────────────────────────────────────
// CareLoss
// ─────────────────────────────────────────────────────────────────────────────

/// Four-way InfoNCE combination of the dual-branch model.
///
/// ```text
/// l1 = nce(top_curr, bot_curr)     l3 = nce(top_curr, bot_surr)
/// l2 = nce(top_surr, bot_surr)     l4 = nce(top_surr, bot_curr)
/// total = (l1 + l2) + lambda1 · (l3 + l4)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CareLoss {
    /// InfoNCE temperature.
    pub temperature: f64,
    /// Weight of the cross terms `l3`, `l4`.
    pub lambda1: f64,
}

impl CareLoss {
    /// Combine the four branch embeddings.
    pub fn forward(&self, top_curr: &Tensor, top_surr: &Tensor, bot_curr: &Tensor, bot_surr: &Tensor) -> LossOutput {
        let t = self.temperature;
        let l1 = info_nce_loss(top_curr, bot_curr, t);
        let l2 = info_nce_loss(top_surr, bot_surr, t);
        let l3 = info_nce_loss(top_curr, bot_surr, t);
        let l4 = info_nce_loss(top_surr, bot_curr, t);

        let total = (&l1 + &l2) + (l3 + l4) * self.lambda1;
        LossOutput {
            total,
            components: vec![("Curr Loss", l1.detach()), ("Surr Loss", l2.detach())],
        }
    }
}

/// Scalar value of a 0-d loss tensor.
pub fn loss_value(loss: &Tensor) -> f64 {
    loss.to_device(Device::Cpu).double_value(&[])
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

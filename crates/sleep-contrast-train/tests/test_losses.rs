//! Integration tests for [`sleep_contrast_train::losses`].
//!
//! Gated behind `tch-backend`: the objectives operate on libtorch tensors.
//! Inputs are either fixed values or drawn after `tch::manual_seed`.

#[cfg(feature = "tch-backend")]
mod tch_tests {
    use approx::assert_abs_diff_eq;
    use sleep_contrast_train::losses::{info_nce_loss, loss_value, stop_gradient_cosine_loss, CareLoss};
    use tch::{Device, Kind, Tensor};

    fn cpu() -> (Kind, Device) {
        (Kind::Float, Device::Cpu)
    }

    // -----------------------------------------------------------------------
    // InfoNCE
    // -----------------------------------------------------------------------

    /// Swapping the two views only reorders the stacked rows.
    #[test]
    fn info_nce_is_symmetric_in_its_views() {
        tch::manual_seed(3);
        let a = Tensor::randn([8, 16], cpu());
        let b = Tensor::randn([8, 16], cpu());
        let ab = loss_value(&info_nce_loss(&a, &b, 0.5));
        let ba = loss_value(&info_nce_loss(&b, &a, 0.5));
        assert_abs_diff_eq!(ab, ba, epsilon = 1e-5);
    }

    /// Inputs are normalised, so rescaling rows changes nothing.
    #[test]
    fn info_nce_ignores_row_scale() {
        tch::manual_seed(4);
        let a = Tensor::randn([6, 10], cpu());
        let b = Tensor::randn([6, 10], cpu());
        let base = loss_value(&info_nce_loss(&a, &b, 0.2));
        let scaled = loss_value(&info_nce_loss(&(&a * 7.5), &(&b * 0.01), 0.2));
        assert_abs_diff_eq!(base, scaled, epsilon = 1e-4);
    }

    /// Half-precision inputs are promoted before the exponentials.
    #[test]
    fn info_nce_accepts_half_inputs() {
        tch::manual_seed(5);
        let a = Tensor::randn([4, 8], cpu()).to_kind(Kind::Half);
        let b = Tensor::randn([4, 8], cpu()).to_kind(Kind::Half);
        let loss = info_nce_loss(&a, &b, 0.1);
        assert_eq!(loss.kind(), Kind::Float);
        assert!(loss_value(&loss).is_finite());
    }

    /// Gradient flows to both views.
    #[test]
    fn info_nce_backpropagates_into_both_views() {
        tch::manual_seed(6);
        let a = Tensor::randn([4, 8], cpu()).set_requires_grad(true);
        let b = Tensor::randn([4, 8], cpu()).set_requires_grad(true);
        info_nce_loss(&a, &b, 0.5).backward();
        assert!(a.grad().defined());
        assert!(b.grad().defined());
    }

    // -----------------------------------------------------------------------
    // Stop-gradient cosine
    // -----------------------------------------------------------------------

    #[test]
    fn opposite_views_score_plus_one() {
        tch::manual_seed(7);
        let z = Tensor::randn([5, 4], cpu());
        let neg = -&z;
        let loss = loss_value(&stop_gradient_cosine_loss(&z, &z, &neg, &neg));
        assert_abs_diff_eq!(loss, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn cosine_loss_stays_in_unit_interval() {
        tch::manual_seed(8);
        for _ in 0..5 {
            let [p1, p2, z1, z2] = [0; 4].map(|_| Tensor::randn([7, 12], cpu()));
            let loss = loss_value(&stop_gradient_cosine_loss(&p1, &p2, &z1, &z2));
            assert!((-1.0..=1.0).contains(&loss), "loss={loss}");
        }
    }

    // -----------------------------------------------------------------------
    // CareLoss
    // -----------------------------------------------------------------------

    #[test]
    fn care_loss_reports_current_and_surrounding_terms() {
        tch::manual_seed(9);
        let [a, b, c, d] = [0; 4].map(|_| Tensor::randn([4, 6], cpu()));
        let out = CareLoss { temperature: 0.5, lambda1: 1.0 }.forward(&a, &b, &c, &d);
        let names: Vec<&str> = out.components.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["Curr Loss", "Surr Loss"]);
        assert_abs_diff_eq!(loss_value(&out.components[0].1), loss_value(&info_nce_loss(&a, &c, 0.5)), epsilon = 1e-5);
        assert_abs_diff_eq!(loss_value(&out.components[1].1), loss_value(&info_nce_loss(&b, &d, 0.5)), epsilon = 1e-5);
    }

    #[test]
    fn care_components_are_detached() {
        tch::manual_seed(10);
        let [a, b, c, d] = [0; 4].map(|_| Tensor::randn([4, 6], cpu()).set_requires_grad(true));
        let out = CareLoss { temperature: 0.5, lambda1: 0.5 }.forward(&a, &b, &c, &d);
        assert!(out.total.requires_grad());
        assert!(out.components.iter().all(|(_, t)| !t.requires_grad()));
    }
}

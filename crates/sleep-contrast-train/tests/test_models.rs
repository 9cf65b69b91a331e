//! Integration tests for the pretext models behind [`build_model`].
//!
//! Gated behind `tch-backend`. Every model is built from a small
//! configuration so each forward pass runs in milliseconds on CPU.

#[cfg(feature = "tch-backend")]
mod tch_tests {
    use std::path::Path;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sleep_contrast_train::checkpoint::StateDict;
    use sleep_contrast_train::config::{ExperimentConfig, Variant};
    use sleep_contrast_train::losses::loss_value;
    use sleep_contrast_train::models::build_model;
    use tch::nn::OptimizerConfig;
    use tch::{Device, Kind, Tensor};

    const VARIANTS: [Variant; 3] = [Variant::Care, Variant::SimClr, Variant::SimSiam];

    fn tiny(variant: Variant) -> ExperimentConfig {
        ExperimentConfig {
            variant,
            epoch_len: 3,
            window_samples: 128,
            feature_dim: 16,
            tc_hidden_dim: 8,
            ..Default::default()
        }
    }

    fn views(batch: i64) -> (Tensor, Tensor) {
        let opts = (Kind::Float, Device::Cpu);
        (Tensor::randn([batch, 3, 1, 128], opts), Tensor::randn([batch, 3, 1, 128], opts))
    }

    fn names(state: &StateDict) -> Vec<&str> {
        state.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn every_variant_produces_a_finite_scalar_loss() {
        for variant in VARIANTS {
            tch::manual_seed(0);
            let model = build_model(&tiny(variant), Device::Cpu).expect("build");
            assert_eq!(model.variant(), variant);

            let (weak, strong) = views(4);
            let mut rng = ChaCha8Rng::seed_from_u64(0);
            let out = model.forward_loss(&weak, &strong, &mut rng, true);
            assert_eq!(out.total.dim(), 0, "{variant}: loss must be a scalar");
            assert!(loss_value(&out.total).is_finite(), "{variant}");
        }
    }

    #[test]
    fn encoder_state_has_the_same_names_for_every_variant() {
        let exported: Vec<StateDict> = VARIANTS
            .iter()
            .map(|v| build_model(&tiny(*v), Device::Cpu).expect("build").encoder_state())
            .collect();
        assert!(!exported[0].is_empty());
        assert_eq!(names(&exported[0]), names(&exported[1]));
        assert_eq!(names(&exported[1]), names(&exported[2]));
        assert!(names(&exported[0]).iter().any(|n| n.starts_with("attention.")));
    }

    #[test]
    fn full_state_round_trip_restores_the_encoder() {
        for variant in VARIANTS {
            tch::manual_seed(1);
            let source = build_model(&tiny(variant), Device::Cpu).expect("build");
            tch::manual_seed(2);
            let mut dest = build_model(&tiny(variant), Device::Cpu).expect("build");

            dest.load_full_state(&source.full_state(), Path::new("mem")).expect("load");
            for ((na, a), (nb, b)) in source.encoder_state().iter().zip(dest.encoder_state().iter()) {
                assert_eq!(na, nb);
                assert!(a.equal(b), "{variant}: `{na}` differs after loading");
            }
        }
    }

    #[test]
    fn full_state_of_another_variant_is_rejected() {
        let simclr = build_model(&tiny(Variant::SimClr), Device::Cpu).expect("build");
        let mut care = build_model(&tiny(Variant::Care), Device::Cpu).expect("build");
        assert!(care.load_full_state(&simclr.full_state(), Path::new("mem")).is_err());
    }

    #[test]
    fn optimiser_step_changes_online_parameters() {
        for variant in VARIANTS {
            tch::manual_seed(3);
            let mut model = build_model(&tiny(variant), Device::Cpu).expect("build");
            let before: Vec<Tensor> = model.var_store().trainable_variables().iter().map(Tensor::copy).collect();

            let mut opt = tch::nn::Sgd::default().build(model.var_store(), 0.1).expect("optimiser");
            let (weak, strong) = views(4);
            let mut rng = ChaCha8Rng::seed_from_u64(3);
            let out = model.forward_loss(&weak, &strong, &mut rng, true);
            opt.backward_step(&out.total);
            model.after_step();

            let after = model.var_store().trainable_variables();
            let changed = before.iter().zip(after.iter()).filter(|(a, b)| !a.equal(b)).count();
            assert!(changed > 0, "{variant}: no parameter moved");
        }
    }
}

//! Benchmarks for the backend-free evaluation path.
//!
//! Inputs are deterministic (label ramps and fixed seeds) so numbers are
//! comparable between runs.
//!
//! ```bash
//! cargo bench -p sleep-contrast-train
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sleep_contrast_train::{
    augment::Augmenter,
    folds::KFold,
    metrics::{classification_metrics, MetricsAccumulator},
};

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

fn labels(n: usize, offset: usize) -> Vec<i64> {
    (0..n).map(|i| ((i * 7 + offset) % 5) as i64).collect()
}

/// Whole-test-set metrics for typical fold sizes.
fn bench_classification_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification_metrics");
    for n in [1_000usize, 10_000, 100_000] {
        let targets = labels(n, 0);
        let preds: Vec<i64> = labels(n, 0)
            .into_iter()
            .enumerate()
            .map(|(i, y)| if i % 4 == 0 { (y + 1) % 5 } else { y })
            .collect();
        group.bench_with_input(BenchmarkId::new("windows", n), &n, |b, _| {
            b.iter(|| classification_metrics(black_box(&preds), black_box(&targets), 5));
        });
    }
    group.finish();
}

/// Batch-wise accumulation as done by the evaluation loop.
fn bench_accumulator(c: &mut Criterion) {
    let targets = labels(25_600, 0);
    let preds = labels(25_600, 1);
    c.bench_function("accumulator_100_batches_of_256", |b| {
        b.iter(|| {
            let mut acc = MetricsAccumulator::new(5);
            for (p, t) in preds.chunks(256).zip(targets.chunks(256)) {
                acc.update(p, t, 0.5);
            }
            black_box(acc.finalize())
        });
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Folds and augmentation
// ─────────────────────────────────────────────────────────────────────────────

fn bench_kfold(c: &mut Criterion) {
    c.bench_function("kfold_5_over_200_subjects", |b| {
        b.iter(|| KFold::new(5, 1234).split(black_box(200)));
    });
}

/// Weak and strong views of one default-sized pretext block.
fn bench_augment_views(c: &mut Criterion) {
    let block = Array3::<f32>::from_shape_fn((9, 1, 3000), |(e, _, t)| ((e * 3000 + t) as f32 * 0.01).sin());
    let aug = Augmenter::default();
    c.bench_function("augment_views_9x3000", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        b.iter(|| aug.views(black_box(&block), &mut rng));
    });
}

criterion_group!(metrics, bench_classification_metrics, bench_accumulator);
criterion_group!(data, bench_kfold, bench_augment_views);
criterion_main!(metrics, data);

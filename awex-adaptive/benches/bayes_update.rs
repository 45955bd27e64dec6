use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::time::Duration;

use awex_adaptive::{
    AdaptiveController, BayesConfig, FitSample, PsychometricFitter, SequentialBayesEstimator,
};
use awex_core::LevelBounds;

fn estimator(grid_size: usize) -> SequentialBayesEstimator {
    let bounds = LevelBounds::new(7.0, 500.0).expect("valid bounds");
    SequentialBayesEstimator::new(
        BayesConfig {
            grid_size,
            n_trials: 10_000,
            ..BayesConfig::default()
        },
        bounds,
    )
    .expect("valid config")
}

/// One query/response round trip across grid resolutions.
pub fn bench_bayes_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("bayes_update");
    group
        .sample_size(50)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1));

    for grid_size in [31usize, 61, 201] {
        group.bench_with_input(
            BenchmarkId::from_parameter(grid_size),
            &grid_size,
            |b, &n| {
                let mut e = estimator(n);
                let mut flip = false;
                b.iter(|| {
                    if e.is_done() {
                        e = estimator(n);
                    }
                    let level = e.next_level().expect("budget left");
                    flip = !flip;
                    e.add_response(black_box(flip)).expect("update");
                    black_box(level);
                });
            },
        );
    }
    group.finish();
}

pub fn bench_fit(c: &mut Criterion) {
    let samples: Vec<FitSample> = (0..9)
        .flat_map(|i| {
            let x = 50.0 + 12.5 * i as f64;
            (0..16).map(move |j| FitSample::new(x, if j < i * 2 { 1.0 } else { 0.0 }))
        })
        .collect();
    let fitter = PsychometricFitter::default();
    c.bench_function("logistic_fit_144", |b| {
        b.iter_batched(
            || samples.clone(),
            |s| black_box(fitter.fit(&s)),
            BatchSize::SmallInput,
        )
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .confidence_level(0.95)
        .noise_threshold(0.02);
    targets = bench_bayes_update, bench_fit
}

criterion_main!(benches);

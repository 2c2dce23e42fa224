use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hazard_drift::{CoxModel, FlexibleParametricModel, SubjectStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn synthetic_trial(n_per_arm: usize) -> SubjectStore {
    let mut rng = StdRng::seed_from_u64(42);
    let mut times = Vec::new();
    let mut events = Vec::new();
    let mut arms = Vec::new();

    for arm in [0u8, 1u8] {
        let hazard = if arm == 1 { 0.06 } else { 0.08 };
        for _ in 0..n_per_arm {
            let draw: f64 = rng.gen();
            let time = -draw.ln() / hazard;
            if time < 36.0 {
                times.push(time.max(1e-3));
                events.push(true);
            } else {
                times.push(36.0);
                events.push(false);
            }
            arms.push(arm);
        }
    }

    SubjectStore::from_columns(&times, &events, &arms).unwrap()
}

fn bench_cox_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cox_fit");
    for &n in &[100usize, 500, 2000] {
        let store = synthetic_trial(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &store, |b, store| {
            b.iter(|| CoxModel::new().fit(black_box(store)).unwrap());
        });
    }
    group.finish();
}

fn bench_flexible_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("flexible_fit");
    group.sample_size(20);
    for &n in &[100usize, 500] {
        let store = synthetic_trial(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &store, |b, store| {
            b.iter(|| {
                FlexibleParametricModel::new()
                    .with_baseline_df(3)
                    .with_tvc_df(1)
                    .fit(black_box(store))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cox_fit, bench_flexible_fit);
criterion_main!(benches);

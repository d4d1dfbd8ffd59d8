use calibration::statistics::{percentile, Distribution};
use calibration::{FatigueCalibration, ModuleCalibrator, PhotoMetrics};
use camera_capture::landmarks::synthetic_face;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_statistics(c: &mut Criterion) {
    let values: Vec<f64> = (0..1000).map(|i| 0.2 + (i % 97) as f64 * 0.001).collect();

    c.bench_function("percentile_1000", |b| b.iter(|| percentile(black_box(&values), 80.0)));
    c.bench_function("distribution_1000", |b| {
        b.iter(|| Distribution::compute(black_box(&values), &[20, 50, 80]))
    });
}

fn bench_prepare(c: &mut Criterion) {
    let photos: Vec<PhotoMetrics> = (0..8)
        .map(|i| PhotoMetrics::extract(&synthetic_face(0.25 + i as f64 * 0.01, 0.0), 120.0))
        .collect();

    c.bench_function("fatigue_prepare_8", |b| {
        b.iter(|| FatigueCalibration::prepare(black_box(&photos)))
    });
}

criterion_group!(benches, bench_statistics, bench_prepare);
criterion_main!(benches);

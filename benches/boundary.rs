//! Boundary fitting and scoring benchmarks.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ndarray::Array2;

use counterfeit_detector::{
    boundary::{KernelSpec, fit},
    extractor::{FeatureExtractor, PatchProjectionEncoder},
    preprocess::CanonicalTransform,
    scoring::Scorer,
};

fn embeddings(n: usize, d: usize) -> Array2<f32> {
    Array2::from_shape_fn((n, d), |(i, j)| {
        let t = (i * 31 + j * 17) as f32;
        (t * 0.618).sin() * 0.5 + (t * 0.173).cos() * 0.25
    })
}

fn benchmark_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_boundary");
    group.sample_size(10);

    for n in [100, 500] {
        let x = embeddings(n, 64);
        group.bench_with_input(BenchmarkId::from_parameter(n), &x, |b, x| {
            b.iter(|| fit(black_box(x.view()), 0.01, KernelSpec::default()).unwrap());
        });
    }

    group.finish();
}

fn benchmark_score(c: &mut Criterion) {
    let x = embeddings(500, 64);
    let model = fit(x.view(), 0.05, KernelSpec::default()).unwrap();
    let scorer = Scorer::new(&model);
    let queries = embeddings(64, 64);

    c.bench_function("score_single", |b| {
        b.iter(|| scorer.score(black_box(queries.row(0))).unwrap());
    });

    c.bench_function("score_batch_64", |b| {
        b.iter(|| scorer.score_batch(black_box(queries.view())).unwrap());
    });
}

fn benchmark_embed(c: &mut Criterion) {
    let extractor = FeatureExtractor::new(PatchProjectionEncoder::seeded("bench", 768, 42));
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(640, 480, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }));
    let transform = CanonicalTransform::new();

    c.bench_function("canonical_embed_640x480", |b| {
        b.iter(|| {
            let tensor = transform.apply(black_box(&image));
            extractor.embed_one(&tensor).unwrap()
        });
    });
}

criterion_group!(benches, benchmark_fit, benchmark_score, benchmark_embed);
criterion_main!(benches);

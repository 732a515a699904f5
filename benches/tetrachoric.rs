use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use eyfactor::factor::tetrachoric::tetrachoric_matrix;
use eyfactor::factor::{FactorConfig, ItemMatrix};
use eyfactor::progress::NoopProgress;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Items driven by one shared normal factor so every pair is correlated.
fn responses(n: usize, config: &FactorConfig) -> ItemMatrix {
    let items = config.items();
    let k = items.len();
    let mut rng = StdRng::seed_from_u64(0x5EED + n as u64);
    let mut values = Array2::<f64>::zeros((n, k));
    for mut row in values.rows_mut() {
        let common: f64 = rng.gen_range(-1.0..1.0);
        for (i, cell) in row.iter_mut().enumerate() {
            let noise: f64 = rng.gen_range(-1.0..1.0);
            let threshold = -0.5 + i as f64 / k as f64;
            *cell = if common + noise > threshold { 1.0 } else { 0.0 };
        }
    }
    let pupils = (0..n).map(|i| format!("p{i}")).collect();
    ItemMatrix::new(items, pupils, values)
}

fn benchmark_tetrachoric(c: &mut Criterion) {
    let config = FactorConfig::default();
    let sizes = [1_000_usize, 10_000, 100_000];
    let matrices: Vec<_> = sizes.iter().map(|&n| (n, responses(n, &config))).collect();

    let mut group = c.benchmark_group("tetrachoric_matrix");
    group.sample_size(10);
    for (n, matrix) in matrices.iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), matrix, |b, input| {
            b.iter(|| {
                let tetra = tetrachoric_matrix(black_box(input), &config, &mut NoopProgress).unwrap();
                black_box(tetra);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_tetrachoric);
criterion_main!(benches);

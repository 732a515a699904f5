use eyfactor::factor::{FactorConfig, ItemMatrix};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal, Uniform};

pub const TRUE_LOADING: [f64; 2] = [0.75, 0.7];
pub const TRUE_CORRELATION: f64 = 0.4;

/// Binary responses from a two-factor probit model: every item loads only on
/// its own factor, thresholds are spread over [-1.0, 0.3] and `missing` of the
/// cells are blanked at random.
pub fn simulate_responses(n: usize, missing: f64, seed: u64) -> ItemMatrix {
    let config = FactorConfig::default();
    let items = config.items();
    let groups = config.groups();
    let k = items.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Uniform::new(0.0, 1.0);

    let mut values = Array2::from_elem((n, k), f64::NAN);
    for row in 0..n {
        let z1: f64 = StandardNormal.sample(&mut rng);
        let z2: f64 = StandardNormal.sample(&mut rng);
        let eta = [
            z1,
            TRUE_CORRELATION * z1 + (1.0 - TRUE_CORRELATION * TRUE_CORRELATION).sqrt() * z2,
        ];
        for (i, &g) in groups.iter().enumerate() {
            let lambda = TRUE_LOADING[g];
            let e: f64 = StandardNormal.sample(&mut rng);
            let latent = lambda * eta[g] + (1.0 - lambda * lambda).sqrt() * e;
            let threshold = -1.0 + 1.3 * i as f64 / (k - 1) as f64;
            if unit.sample(&mut rng) >= missing {
                values[[row, i]] = if latent > threshold { 1.0 } else { 0.0 };
            }
        }
    }
    let pupils = (0..n).map(|i| format!("p{i:05}")).collect();
    ItemMatrix::new(items, pupils, values)
}

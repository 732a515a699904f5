//! Tetrachoric correlations between binary items.
//!
//! Each pair is estimated from its pairwise-complete 2x2 table assuming an
//! underlying standard bivariate normal cut at the item thresholds. Thresholds
//! come from the table margins, and the correlation maximises the multinomial
//! likelihood of the four cells. The asymptotic variance of each estimate is
//! kept so the confirmatory fit can weight residuals by their precision.

use super::data::{ItemMatrix, is_observed};
use super::normal;
use super::{FactorConfig, FactorError};
use crate::progress::{ProgressObserver, ProgressStage};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};

const RHO_BOUND: f64 = 0.999;
const GOLDEN: f64 = 0.618_033_988_749_894_9;
const SEARCH_TOLERANCE: f64 = 1e-10;

/// Counts of a 2x2 table, indexed `[first][second]` by response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairTable {
    pub cells: [[f64; 2]; 2],
}

impl PairTable {
    pub fn count(x: &[f64], y: &[f64]) -> Self {
        let mut cells = [[0.0; 2]; 2];
        for (&a, &b) in x.iter().zip(y) {
            if is_observed(a) && is_observed(b) {
                cells[(a > 0.5) as usize][(b > 0.5) as usize] += 1.0;
            }
        }
        Self { cells }
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().flatten().sum()
    }

    /// Adds `correction` to every empty cell.
    pub fn corrected(mut self, correction: f64) -> Self {
        for cell in self.cells.iter_mut().flatten() {
            if *cell == 0.0 {
                *cell = correction;
            }
        }
        self
    }
}

/// One pairwise estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairEstimate {
    pub rho: f64,
    /// Asymptotic sampling variance of `rho`.
    pub variance: f64,
    pub n: f64,
}

fn cell_probabilities(tau: [f64; 2], p: [f64; 2], rho: f64) -> [[f64; 2]; 2] {
    let p11 = normal::bivariate_upper(tau[0], tau[1], rho);
    let p10 = p[0] - p11;
    let p01 = p[1] - p11;
    let p00 = 1.0 - p[0] - p[1] + p11;
    [[p00, p01], [p10, p11]]
}

fn log_likelihood(table: &PairTable, tau: [f64; 2], p: [f64; 2], rho: f64) -> f64 {
    let probs = cell_probabilities(tau, p, rho);
    let mut ll = 0.0;
    for a in 0..2 {
        for b in 0..2 {
            let n = table.cells[a][b];
            if n > 0.0 {
                ll += n * probs[a][b].max(1e-300).ln();
            }
        }
    }
    ll
}

/// Maximises a unimodal function on `[lo, hi]` by golden-section search.
fn golden_section_max<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64) -> f64 {
    let mut x1 = hi - GOLDEN * (hi - lo);
    let mut x2 = lo + GOLDEN * (hi - lo);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    while hi - lo > SEARCH_TOLERANCE {
        if f1 < f2 {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + GOLDEN * (hi - lo);
            f2 = f(x2);
        } else {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - GOLDEN * (hi - lo);
            f1 = f(x1);
        }
    }
    0.5 * (lo + hi)
}

/// Maximum-likelihood tetrachoric correlation of an already corrected table.
pub fn estimate_pair(table: &PairTable) -> PairEstimate {
    let n = table.total();
    let p = [
        (table.cells[1][0] + table.cells[1][1]) / n,
        (table.cells[0][1] + table.cells[1][1]) / n,
    ];
    let tau = [normal::quantile(1.0 - p[0]), normal::quantile(1.0 - p[1])];
    let rho = golden_section_max(|r| log_likelihood(table, tau, p, r), -RHO_BOUND, RHO_BOUND);

    let density = normal::bivariate_pdf(tau[0], tau[1], rho);
    let inverse_sum: f64 = cell_probabilities(tau, p, rho)
        .iter()
        .flatten()
        .map(|pi| 1.0 / pi.max(1e-300))
        .sum();
    let variance = 1.0 / (n * density * density * inverse_sum);
    PairEstimate { rho, variance, n }
}

/// Tetrachoric matrix with its sampling information.
#[derive(Debug, Clone)]
pub struct TetrachoricMatrix {
    pub correlations: Array2<f64>,
    /// DWLS weights: per-observation precision `1 / (n * variance)` of each
    /// off-diagonal estimate. The diagonal is zero.
    pub weights: Array2<f64>,
    pub pair_counts: Array2<f64>,
    pub thresholds: Array1<f64>,
    pub smoothed: bool,
}

/// Checks every item has both responses among its observed values.
pub fn check_variance(matrix: &ItemMatrix) -> Result<Array1<f64>, FactorError> {
    let proportions = matrix.proportions();
    for (item, &p) in matrix.items.iter().zip(proportions.iter()) {
        if !(p > 0.0 && p < 1.0) {
            return Err(FactorError::DegenerateItem {
                item: item.clone(),
                proportion: p,
            });
        }
    }
    Ok(proportions)
}

pub fn tetrachoric_matrix(
    matrix: &ItemMatrix,
    config: &FactorConfig,
    progress: &mut dyn ProgressObserver,
) -> Result<TetrachoricMatrix, FactorError> {
    let proportions = check_variance(matrix)?;
    let k = matrix.n_items();
    let columns: Vec<Vec<f64>> = matrix.values.columns().into_iter().map(|c| c.to_vec()).collect();

    let mut correlations = Array2::<f64>::eye(k);
    let mut weights = Array2::<f64>::zeros((k, k));
    let mut pair_counts = Array2::<f64>::zeros((k, k));
    let pairs = k * (k - 1) / 2;

    progress.on_stage_start(ProgressStage::TetrachoricPairs, pairs);
    for i in 0..k {
        pair_counts[[i, i]] = columns[i].iter().filter(|v| is_observed(**v)).count() as f64;
    }
    for (done, (i, j)) in (0..k).tuple_combinations().enumerate() {
        let raw = PairTable::count(&columns[i], &columns[j]);
        if raw.total() == 0.0 {
            return Err(FactorError::EmptyPair {
                first: matrix.items[i].clone(),
                second: matrix.items[j].clone(),
            });
        }
        let estimate = estimate_pair(&raw.corrected(config.zero_cell_correction));
        correlations[[i, j]] = estimate.rho;
        correlations[[j, i]] = estimate.rho;
        let weight = 1.0 / (estimate.n * estimate.variance);
        weights[[i, j]] = weight;
        weights[[j, i]] = weight;
        pair_counts[[i, j]] = raw.total();
        pair_counts[[j, i]] = raw.total();
        progress.on_stage_advance(ProgressStage::TetrachoricPairs, done + 1);
    }
    progress.on_stage_finish(ProgressStage::TetrachoricPairs);

    let smoothed = smooth_to_positive_definite(&mut correlations, config.smoothing_floor)?;
    if smoothed {
        log::warn!(
            "Tetrachoric matrix was not positive definite; eigenvalues were floored at {} and the diagonal rescaled.",
            config.smoothing_floor
        );
    }
    let thresholds = proportions.mapv(|p| normal::quantile(1.0 - p));
    Ok(TetrachoricMatrix {
        correlations,
        weights,
        pair_counts,
        thresholds,
        smoothed,
    })
}

/// Raises eigenvalues below `floor` to `floor` and rescales to a unit diagonal.
/// Returns whether the matrix changed.
pub fn smooth_to_positive_definite(r: &mut Array2<f64>, floor: f64) -> Result<bool, FactorError> {
    let (eigenvalues, eigenvectors) = r.eigh(UPLO::Lower)?;
    if eigenvalues.iter().all(|&v| v >= floor) {
        return Ok(false);
    }
    let clipped = eigenvalues.mapv(|v| v.max(floor));
    let scaled = &eigenvectors * &clipped;
    let rebuilt = scaled.dot(&eigenvectors.t());
    let scale = rebuilt.diag().mapv(|d| 1.0 / d.sqrt());
    let k = r.nrows();
    for i in 0..k {
        for j in 0..k {
            r[[i, j]] = if i == j {
                1.0
            } else {
                rebuilt[[i, j]] * scale[i] * scale[j]
            };
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_symmetric_table_recovers_sine_relation() {
        let table = PairTable {
            cells: [[375.0, 125.0], [125.0, 375.0]],
        };
        let estimate = estimate_pair(&table);
        assert_abs_diff_eq!(estimate.rho, std::f64::consts::FRAC_PI_4.sin(), epsilon = 1e-6);
        assert!(estimate.variance > 0.0);
        assert_eq!(estimate.n, 1000.0);
    }

    #[test]
    fn test_independent_table_gives_zero() {
        // Margins 0.3 and 0.6 with independent cells.
        let table = PairTable {
            cells: [[280.0, 420.0], [120.0, 180.0]],
        };
        assert_abs_diff_eq!(estimate_pair(&table).rho, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_cells_are_corrected() {
        let table = PairTable::count(&[1.0, 1.0, 0.0, 0.0, f64::NAN], &[1.0, 1.0, 0.0, 0.0, 1.0]);
        assert_eq!(table.cells, [[2.0, 0.0], [0.0, 2.0]]);
        let corrected = table.corrected(0.5);
        assert_eq!(corrected.cells, [[2.0, 0.5], [0.5, 2.0]]);
        let estimate = estimate_pair(&corrected);
        assert!(estimate.rho > 0.8 && estimate.rho < RHO_BOUND);
    }

    #[test]
    fn test_constant_item_is_fatal() {
        let matrix = ItemMatrix::new(
            vec!["a".to_string(), "b".to_string()],
            vec!["p1".to_string(), "p2".to_string()],
            array![[1.0, 0.0], [1.0, 1.0]],
        );
        let err = tetrachoric_matrix(&matrix, &FactorConfig::default(), &mut NoopProgress).unwrap_err();
        assert!(matches!(err, FactorError::DegenerateItem { ref item, .. } if item == "a"));
    }

    #[test]
    fn test_pair_counts_are_pairwise_complete() {
        let nan = f64::NAN;
        let matrix = ItemMatrix::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            (1..=9).map(|i| format!("p{i}")).collect(),
            array![
                [1.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, nan, 1.0],
                [0.0, 1.0, nan],
                [nan, 0.0, 0.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [nan, nan, 0.0],
                [0.0, nan, 0.0]
            ],
        );
        let tetra = tetrachoric_matrix(&matrix, &FactorConfig::default(), &mut NoopProgress).unwrap();
        assert_eq!(
            tetra.pair_counts,
            array![[7.0, 5.0, 6.0], [5.0, 6.0, 5.0], [6.0, 5.0, 8.0]]
        );
    }

    #[test]
    fn test_smoothing_restores_positive_definiteness() {
        let mut r = array![[1.0, 0.9, -0.9], [0.9, 1.0, 0.9], [-0.9, 0.9, 1.0]];
        assert!(smooth_to_positive_definite(&mut r, 1e-4).unwrap());
        let (eigenvalues, _) = r.eigh(UPLO::Lower).unwrap();
        assert!(eigenvalues.iter().all(|&v| v > 0.0));
        for i in 0..3 {
            assert_abs_diff_eq!(r[[i, i]], 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(r[[0, 1]], r[[1, 0]], epsilon = 1e-12);

        let mut identity = Array2::<f64>::eye(3);
        assert!(!smooth_to_positive_definite(&mut identity, 1e-4).unwrap());
    }
}

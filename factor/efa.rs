//! Exploratory two-factor solution used for starting values.
//!
//! Factors are extracted by iterated principal axes from squared multiple
//! correlations, then rotated obliquely to the direct quartimin criterion by
//! gradient projection. The rotated factors are matched to the semantic item
//! groups and reflected so every group loads positively on its own factor.

use super::{FactorConfig, FactorError};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Eigh, Inverse, UPLO};

const COMMUNALITY_FLOOR: f64 = 0.005;
const STEP_HALVINGS: usize = 10;

#[derive(Debug, Clone)]
pub struct Extraction {
    pub loadings: Array2<f64>,
    pub communalities: Array1<f64>,
    pub iterations: usize,
    pub heywood: bool,
}

/// Iterated principal-axis factoring of a correlation matrix.
pub fn principal_axis(r: &Array2<f64>, n_factors: usize, config: &FactorConfig) -> Result<Extraction, FactorError> {
    let k = r.nrows();
    let ceiling = config.heywood_ceiling;
    let mut heywood = false;

    let inverse_diag = r.inv()?.diag().to_owned();
    let mut h2 = inverse_diag.mapv(|d| (1.0 - 1.0 / d).clamp(COMMUNALITY_FLOOR, ceiling));
    let mut change = f64::INFINITY;

    for iteration in 1..=config.extraction_max_iterations {
        let mut reduced = r.clone();
        reduced.diag_mut().assign(&h2);
        let (values, vectors) = reduced.eigh(UPLO::Lower)?;

        let mut loadings = Array2::<f64>::zeros((k, n_factors));
        for f in 0..n_factors {
            let idx = k - 1 - f;
            let scale = values[idx].max(0.0).sqrt();
            loadings.column_mut(f).assign(&vectors.column(idx).mapv(|v| v * scale));
        }

        let mut next = loadings.mapv(|v| v * v).sum_axis(Axis(1));
        if next.iter().any(|&v| v > ceiling) {
            heywood = true;
            next.mapv_inplace(|v| v.min(ceiling));
        }
        change = next
            .iter()
            .zip(h2.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        h2 = next;

        if change < config.extraction_tolerance {
            if heywood {
                log::warn!(
                    "Heywood case during principal-axis extraction; communalities were capped at {ceiling}."
                );
            }
            return Ok(Extraction {
                loadings,
                communalities: h2,
                iterations: iteration,
                heywood,
            });
        }
    }
    Err(FactorError::ExtractionNotConverged {
        iterations: config.extraction_max_iterations,
        change,
    })
}

/// Direct quartimin criterion and its gradient with respect to the loadings.
fn quartimin(l: &Array2<f64>) -> (f64, Array2<f64>) {
    let m = l.ncols();
    let off_diagonal = Array2::<f64>::ones((m, m)) - Array2::<f64>::eye(m);
    let l2 = l.mapv(|v| v * v);
    let l2n = l2.dot(&off_diagonal);
    let f = (&l2 * &l2n).sum() / 4.0;
    (f, l * &l2n)
}

struct Candidate {
    t: Array2<f64>,
    t_inv: Array2<f64>,
    loadings: Array2<f64>,
    f: f64,
    gq: Array2<f64>,
}

fn candidate(a: &Array2<f64>, x: Array2<f64>) -> Result<Candidate, FactorError> {
    let norms = x.mapv(|v| v * v).sum_axis(Axis(0)).mapv(|v| 1.0 / v.sqrt());
    let t = &x * &norms;
    let t_inv = t.inv()?;
    let loadings = a.dot(&t_inv.t());
    let (f, gq) = quartimin(&loadings);
    Ok(Candidate {
        t,
        t_inv,
        loadings,
        f,
        gq,
    })
}

fn oblique_gradient(loadings: &Array2<f64>, gq: &Array2<f64>, t_inv: &Array2<f64>) -> Array2<f64> {
    -loadings.t().dot(gq).dot(t_inv).reversed_axes()
}

#[derive(Debug, Clone)]
pub struct Rotation {
    pub loadings: Array2<f64>,
    pub phi: Array2<f64>,
    pub iterations: usize,
}

/// Oblique gradient-projection rotation to direct quartimin, starting from
/// the unrotated solution.
pub fn quartimin_rotation(a: &Array2<f64>, config: &FactorConfig) -> Result<Rotation, FactorError> {
    let m = a.ncols();
    let mut current = candidate(a, Array2::<f64>::eye(m))?;
    let mut g = oblique_gradient(&current.loadings, &current.gq, &current.t_inv);
    let mut alpha = 1.0;
    let mut s = f64::INFINITY;

    for iteration in 0..=config.rotation_max_iterations {
        let t = &current.t;
        let projection = (t * &g).sum_axis(Axis(0));
        let gp = &g - &(t * &projection);
        s = gp.mapv(|v| v * v).sum().sqrt();
        if s < config.rotation_tolerance {
            let phi = current.t.t().dot(&current.t);
            return Ok(Rotation {
                loadings: current.loadings,
                phi,
                iterations: iteration,
            });
        }

        alpha *= 2.0;
        let mut next = candidate(a, t - &(&gp * alpha))?;
        for _ in 0..STEP_HALVINGS {
            if current.f - next.f > 0.5 * s * s * alpha {
                break;
            }
            alpha /= 2.0;
            next = candidate(a, t - &(&gp * alpha))?;
        }
        g = oblique_gradient(&next.loadings, &next.gq, &next.t_inv);
        current = next;
    }
    Err(FactorError::RotationNotConverged {
        iterations: config.rotation_max_iterations,
        gradient: s,
    })
}

/// Orders factors so factor 0 carries the larger share of cognitive-item
/// variance, then reflects each factor so its own group's loadings sum
/// positive.
pub fn align_to_groups(loadings: &mut Array2<f64>, phi: &mut Array2<f64>, groups: &[usize]) {
    let mass = |l: &Array2<f64>, f: usize| -> f64 {
        groups
            .iter()
            .enumerate()
            .filter(|(_, g)| **g == 0)
            .map(|(i, _)| l[[i, f]] * l[[i, f]])
            .sum()
    };
    if mass(loadings, 1) > mass(loadings, 0) {
        swap_factors(loadings, phi);
    }
    for f in 0..loadings.ncols() {
        let own: f64 = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| **g == f)
            .map(|(i, _)| loadings[[i, f]])
            .sum();
        if own < 0.0 {
            loadings.column_mut(f).mapv_inplace(|v| -v);
            phi.column_mut(f).mapv_inplace(|v| -v);
            phi.row_mut(f).mapv_inplace(|v| -v);
        }
    }
}

fn swap_factors(loadings: &mut Array2<f64>, phi: &mut Array2<f64>) {
    let order = [1usize, 0];
    let swapped_l = loadings.select(Axis(1), &order);
    let swapped_phi = phi.select(Axis(0), &order).select(Axis(1), &order);
    *loadings = swapped_l;
    *phi = swapped_phi;
}

#[derive(Debug, Clone)]
pub struct ExploratoryFit {
    pub loadings: Array2<f64>,
    pub phi: Array2<f64>,
    pub communalities: Array1<f64>,
    pub extraction_iterations: usize,
    pub rotation_iterations: usize,
    pub heywood: bool,
}

pub fn exploratory(r: &Array2<f64>, groups: &[usize], config: &FactorConfig) -> Result<ExploratoryFit, FactorError> {
    let extraction = principal_axis(r, 2, config)?;
    log::info!(
        "Principal-axis extraction converged in {} iterations.",
        extraction.iterations
    );
    let rotation = quartimin_rotation(&extraction.loadings, config)?;
    log::info!("Quartimin rotation converged in {} iterations.", rotation.iterations);

    let mut loadings = rotation.loadings;
    let mut phi = rotation.phi;
    align_to_groups(&mut loadings, &mut phi, groups);
    Ok(ExploratoryFit {
        loadings,
        phi,
        communalities: extraction.communalities,
        extraction_iterations: extraction.iterations,
        rotation_iterations: rotation.iterations,
        heywood: extraction.heywood,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn implied(lambda: &Array2<f64>, phi: &Array2<f64>) -> Array2<f64> {
        let mut r = lambda.dot(phi).dot(&lambda.t());
        r.diag_mut().fill(1.0);
        r
    }

    fn two_cluster() -> (Array2<f64>, Array2<f64>, Vec<usize>) {
        let lambda = array![
            [0.8, 0.0],
            [0.7, 0.0],
            [0.6, 0.0],
            [0.75, 0.0],
            [0.0, 0.7],
            [0.0, 0.6],
            [0.0, 0.8],
            [0.0, 0.65],
        ];
        let phi = array![[1.0, 0.4], [0.4, 1.0]];
        (lambda, phi, vec![0, 0, 0, 0, 1, 1, 1, 1])
    }

    #[test]
    fn test_principal_axis_reproduces_population_communalities() {
        let (lambda, phi, _) = two_cluster();
        let r = implied(&lambda, &phi);
        let extraction = principal_axis(&r, 2, &FactorConfig::default()).unwrap();
        let expected = lambda.mapv(|v| v * v).sum_axis(Axis(1));
        for (got, want) in extraction.communalities.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-3);
        }
        assert!(!extraction.heywood);
    }

    #[test]
    fn test_rotation_recovers_simple_structure() {
        let (lambda, phi, groups) = two_cluster();
        let r = implied(&lambda, &phi);
        let fit = exploratory(&r, &groups, &FactorConfig::default()).unwrap();
        for i in 0..lambda.nrows() {
            for f in 0..2 {
                assert_abs_diff_eq!(fit.loadings[[i, f]], lambda[[i, f]], epsilon = 5e-3);
            }
        }
        assert_abs_diff_eq!(fit.phi[[0, 1]], 0.4, epsilon = 5e-3);
        assert_abs_diff_eq!(fit.phi[[0, 0]], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_extraction_cap_is_fatal() {
        let (lambda, phi, _) = two_cluster();
        let r = implied(&lambda, &phi);
        let config = FactorConfig {
            extraction_max_iterations: 1,
            ..FactorConfig::default()
        };
        let err = principal_axis(&r, 2, &config).unwrap_err();
        assert!(matches!(err, FactorError::ExtractionNotConverged { iterations: 1, change } if change > 0.0));
    }

    #[test]
    fn test_rotation_cap_is_fatal() {
        let (lambda, phi, groups) = two_cluster();
        let r = implied(&lambda, &phi);
        let unrotated = principal_axis(&r, 2, &FactorConfig::default()).unwrap();
        let config = FactorConfig {
            rotation_max_iterations: 0,
            ..FactorConfig::default()
        };
        let err = quartimin_rotation(&unrotated.loadings, &config).unwrap_err();
        assert!(matches!(err, FactorError::RotationNotConverged { iterations: 0, .. }));
        assert!(matches!(
            exploratory(&r, &groups, &config),
            Err(FactorError::RotationNotConverged { .. })
        ));
    }

    #[test]
    fn test_alignment_swaps_and_reflects() {
        let mut loadings = array![[0.1, -0.8], [0.0, -0.7], [0.6, 0.1], [0.7, 0.0]];
        let mut phi = array![[1.0, -0.3], [-0.3, 1.0]];
        align_to_groups(&mut loadings, &mut phi, &[0, 0, 1, 1]);
        assert_eq!(loadings, array![[0.8, 0.1], [0.7, 0.0], [-0.1, 0.6], [0.0, 0.7]]);
        assert_abs_diff_eq!(phi[[0, 1]], 0.3);
        assert_abs_diff_eq!(phi[[1, 0]], 0.3);
    }

    #[test]
    fn test_quartimin_vanishes_on_perfect_clusters() {
        let (lambda, _, _) = two_cluster();
        let (f, gq) = quartimin(&lambda);
        assert_eq!(f, 0.0);
        assert!(gq.iter().all(|v| *v == 0.0));
    }
}

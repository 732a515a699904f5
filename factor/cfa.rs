//! Confirmatory two-factor model fitted by diagonally weighted least squares.
//!
//! Parameters are each item's loading on its own factor plus the factor
//! correlation, optimised on an unconstrained scale (`phi = tanh(a)`). One
//! cross-loading per factor is held at its exploratory value; every other
//! cross-loading is zero. Factor variances are 1 and residual variances follow
//! from the unit-variance latent responses, `theta_i = 1 - lambda_i' Phi lambda_i`.

use super::efa::ExploratoryFit;
use super::tetrachoric::TetrachoricMatrix;
use super::{FactorConfig, FactorError};
use ndarray::{Array1, Array2, array};
use ndarray_linalg::{Cholesky, UPLO};
use serde::{Deserialize, Serialize};
use wolfe_bfgs::{Bfgs, BfgsSolution};

const START_CORRELATION_BOUND: f64 = 0.95;

/// Which loadings are free, which are fixed and at what value.
#[derive(Debug, Clone)]
pub struct Specification {
    pub groups: Vec<usize>,
    /// `anchors[f]` is the item whose loading on factor `f` is fixed.
    pub anchors: [usize; 2],
    pub anchor_values: [f64; 2],
}

impl Specification {
    pub fn n_items(&self) -> usize {
        self.groups.len()
    }

    pub fn n_free(&self) -> usize {
        self.n_items() + 1
    }

    /// Expands the parameter vector into the loading matrix and factor correlation.
    pub fn unpack(&self, x: &Array1<f64>) -> (Array2<f64>, f64) {
        let k = self.n_items();
        let mut lambda = Array2::<f64>::zeros((k, 2));
        for (i, &g) in self.groups.iter().enumerate() {
            lambda[[i, g]] = x[i];
        }
        for f in 0..2 {
            lambda[[self.anchors[f], f]] = self.anchor_values[f];
        }
        (lambda, x[k].tanh())
    }

    pub fn start(&self, efa: &ExploratoryFit) -> Array1<f64> {
        let k = self.n_items();
        let mut x = Array1::<f64>::zeros(k + 1);
        for (i, &g) in self.groups.iter().enumerate() {
            x[i] = efa.loadings[[i, g]];
        }
        x[k] = efa.phi[[0, 1]]
            .clamp(-START_CORRELATION_BOUND, START_CORRELATION_BOUND)
            .atanh();
        x
    }
}

fn correlation_matrix(phi: f64) -> Array2<f64> {
    array![[1.0, phi], [phi, 1.0]]
}

/// DWLS discrepancy over the off-diagonal correlations and its gradient.
pub fn objective(x: &Array1<f64>, spec: &Specification, r: &Array2<f64>, w: &Array2<f64>) -> (f64, Array1<f64>) {
    let k = spec.n_items();
    let (lambda, phi) = spec.unpack(x);
    let lp = lambda.dot(&correlation_matrix(phi));
    let sigma = lp.dot(&lambda.t());
    let dphi = 1.0 - phi * phi;

    let mut value = 0.0;
    let mut grad = Array1::<f64>::zeros(k + 1);
    for i in 0..k {
        let gi = spec.groups[i];
        for j in (i + 1)..k {
            let gj = spec.groups[j];
            let e = r[[i, j]] - sigma[[i, j]];
            value += w[[i, j]] * e * e;
            let d = -2.0 * w[[i, j]] * e;
            grad[i] += d * lp[[j, gi]];
            grad[j] += d * lp[[i, gj]];
            let cross = lambda[[i, 0]] * lambda[[j, 1]] + lambda[[i, 1]] * lambda[[j, 0]];
            grad[k] += d * cross * dphi;
        }
    }
    (value, grad)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    pub objective: f64,
    pub chi_square: f64,
    pub df: usize,
    pub srmr: f64,
    pub rmsea: f64,
    pub cfi: f64,
    pub n: usize,
}

pub fn fit_statistics(
    objective: f64,
    residuals: &Array2<f64>,
    r: &Array2<f64>,
    w: &Array2<f64>,
    n_free: usize,
    n: usize,
) -> FitStatistics {
    let k = r.nrows();
    let moments = k * (k - 1) / 2;
    let df = moments.saturating_sub(n_free);
    let nf = n as f64;
    let chi_square = nf * objective;

    let mut squared = 0.0;
    let mut baseline = 0.0;
    for i in 0..k {
        for j in (i + 1)..k {
            squared += residuals[[i, j]] * residuals[[i, j]];
            baseline += w[[i, j]] * r[[i, j]] * r[[i, j]];
        }
    }
    let srmr = (squared / moments.max(1) as f64).sqrt();

    let excess = (chi_square - df as f64).max(0.0);
    let rmsea = if df == 0 || n < 2 {
        0.0
    } else {
        (excess / (df as f64 * (nf - 1.0))).sqrt()
    };
    let baseline_excess = (nf * baseline - moments as f64).max(excess);
    let cfi = if baseline_excess > 0.0 {
        1.0 - excess / baseline_excess
    } else {
        1.0
    };

    FitStatistics {
        objective,
        chi_square,
        df,
        srmr,
        rmsea,
        cfi,
        n,
    }
}

/// Rejects a solution whose factor correlation matrix is not positive definite
/// or whose implied residual variance is not positive for some item. Returns
/// the implied correlations and the residual variances.
pub fn admissible_solution(
    lambda: &Array2<f64>,
    phi: &Array2<f64>,
    items: &[String],
) -> Result<(Array2<f64>, Array1<f64>), FactorError> {
    if phi.cholesky(UPLO::Lower).is_err() {
        return Err(FactorError::NotPositiveDefinite("the factor correlation matrix"));
    }
    let implied = lambda.dot(phi).dot(&lambda.t());
    let theta = implied.diag().mapv(|v| 1.0 - v);
    if let Some((i, &value)) = theta.iter().enumerate().find(|(_, v)| **v <= 0.0) {
        return Err(FactorError::InadmissibleResidual {
            item: items[i].clone(),
            value,
        });
    }
    Ok((implied, theta))
}

#[derive(Debug, Clone)]
pub struct ConfirmatoryFit {
    pub lambda: Array2<f64>,
    pub phi: Array2<f64>,
    pub theta: Array1<f64>,
    pub iterations: usize,
    pub fit: FitStatistics,
}

pub fn confirmatory(
    tetra: &TetrachoricMatrix,
    efa: &ExploratoryFit,
    spec: &Specification,
    items: &[String],
    n: usize,
    config: &FactorConfig,
) -> Result<ConfirmatoryFit, FactorError> {
    let r = &tetra.correlations;
    let w = &tetra.weights;
    let x0 = spec.start(efa);

    let (initial, _) = objective(&x0, spec, r, w);
    if !initial.is_finite() {
        return Err(FactorError::OptimizationFailed(format!(
            "objective at the exploratory starting values is not finite: {initial}"
        )));
    }
    log::info!("Initial DWLS objective: {:.6}", initial);

    let BfgsSolution {
        final_point,
        final_value,
        iterations,
        ..
    } = Bfgs::new(x0, |x: &Array1<f64>| -> (f64, Array1<f64>) { objective(x, spec, r, w) })
        .with_tolerance(config.cfa_tolerance)
        .with_max_iterations(config.cfa_max_iterations)
        .run()
        .map_err(|e| FactorError::OptimizationFailed(format!("BFGS failed: {:?}", e)))?;
    log::info!(
        "Confirmatory fit converged in {} iterations; DWLS objective {:.6}.",
        iterations,
        final_value
    );

    let (lambda, phi_value) = spec.unpack(&final_point);
    let phi = correlation_matrix(phi_value);
    let (implied, theta) = admissible_solution(&lambda, &phi, items)?;

    let residuals = r - &implied;
    let fit = fit_statistics(final_value, &residuals, r, w, spec.n_free(), n);
    Ok(ConfirmatoryFit {
        lambda,
        phi,
        theta,
        iterations,
        fit,
    })
}

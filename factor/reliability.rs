use super::data::{ItemMatrix, is_observed};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Internal-consistency and model-based reliability for each factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reliability {
    /// Cronbach's alpha (KR-20) per factor, from pupils observed on every
    /// item of the group. NaN when fewer than two such pupils exist.
    pub alpha: [f64; 2],
    /// McDonald's omega per factor from the confirmatory solution.
    pub omega: [f64; 2],
    pub complete_cases: [usize; 2],
}

/// KR-20 on the complete cases of the columns in `items`.
pub fn kr20(matrix: &ItemMatrix, items: &[usize]) -> (f64, usize) {
    let k = items.len();
    let rows: Vec<Vec<f64>> = matrix
        .values
        .rows()
        .into_iter()
        .map(|row| items.iter().map(|&c| row[c]).collect::<Vec<f64>>())
        .filter(|row| row.iter().all(|v| is_observed(*v)))
        .collect();
    let n = rows.len();
    if n < 2 || k < 2 {
        return (f64::NAN, n);
    }
    let nf = n as f64;
    let pq: f64 = (0..k)
        .map(|c| {
            let p = rows.iter().map(|row| row[c]).sum::<f64>() / nf;
            p * (1.0 - p)
        })
        .sum();
    let totals: Vec<f64> = rows.iter().map(|row| row.iter().sum()).collect();
    let mean = totals.iter().sum::<f64>() / nf;
    let variance = totals.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / nf;
    if variance == 0.0 {
        return (f64::NAN, n);
    }
    let kf = k as f64;
    (kf / (kf - 1.0) * (1.0 - pq / variance), n)
}

/// `(sum lambda)^2 / ((sum lambda)^2 + sum theta)` over the factor's own items.
pub fn omega(lambda: &Array2<f64>, theta: &Array1<f64>, items: &[usize], factor: usize) -> f64 {
    let loading_sum: f64 = items.iter().map(|&i| lambda[[i, factor]]).sum();
    let residual_sum: f64 = items.iter().map(|&i| theta[i]).sum();
    let common = loading_sum * loading_sum;
    common / (common + residual_sum)
}

pub fn reliability(matrix: &ItemMatrix, groups: &[usize], lambda: &Array2<f64>, theta: &Array1<f64>) -> Reliability {
    let members = |f: usize| -> Vec<usize> { (0..groups.len()).filter(|&i| groups[i] == f).collect() };
    let own = [members(0), members(1)];
    let (alpha0, n0) = kr20(matrix, &own[0]);
    let (alpha1, n1) = kr20(matrix, &own[1]);
    Reliability {
        alpha: [alpha0, alpha1],
        omega: [omega(lambda, theta, &own[0], 0), omega(lambda, theta, &own[1], 1)],
        complete_cases: [n0, n1],
    }
}

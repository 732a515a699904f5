//! Empirical Bayes factor scores.
//!
//! With loadings `L`, residual variances `Theta` and factor covariance `Psi`,
//! a pupil observed on the item subset `O` is scored as
//! `W_O z_O` where `W_O = Psi L_O' (L_O Psi L_O' + Theta_O)^-1` and `z` are the
//! items standardised by their sample proportions. The posterior covariance
//! `V_O = (Psi^-1 + L_O' Theta_O^-1 L_O)^-1` is the measurement-error
//! covariance of that pupil's scores. Weights depend only on the missingness
//! pattern and are computed once per pattern.

use super::data::{ItemMatrix, is_observed};
use super::model::FactorModel;
use super::{FACTOR_NAMES, FactorError};
use crate::files::{PUPIL_ID_COLUMN, TableError, format_float, write_table};
use crate::progress::{ProgressObserver, ProgressStage};
use ahash::AHashMap;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::Inverse;
use std::collections::hash_map::Entry;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct FactorScore {
    pub pupil_id: String,
    /// `None` when the pupil has no observed factor item.
    pub scores: Option<[f64; 2]>,
    /// Diagonal of the posterior covariance.
    pub error_variance: Option<[f64; 2]>,
    pub observed_items: usize,
}

#[derive(Debug, Clone)]
pub struct PatternWeights {
    pub observed: Vec<usize>,
    pub weights: Array2<f64>,
    pub posterior: Array2<f64>,
}

struct Measurement {
    lambda: Array2<f64>,
    theta: Array1<f64>,
    psi: Array2<f64>,
    psi_inv: Array2<f64>,
    proportions: Array1<f64>,
}

impl Measurement {
    fn pattern_weights(&self, observed: &[usize]) -> Result<PatternWeights, FactorError> {
        let lambda_o = self.lambda.select(Axis(0), observed);
        let theta_o = self.theta.select(Axis(0), observed);

        let mut sigma = lambda_o.dot(&self.psi).dot(&lambda_o.t());
        for (i, t) in theta_o.iter().enumerate() {
            sigma[[i, i]] += t;
        }
        let weights = self.psi.dot(&lambda_o.t()).dot(&sigma.inv()?);

        let scaled = &lambda_o / &theta_o.view().insert_axis(Axis(1));
        let precision = &self.psi_inv + &lambda_o.t().dot(&scaled);
        let posterior = precision.inv()?;

        Ok(PatternWeights {
            observed: observed.to_vec(),
            weights,
            posterior,
        })
    }

    fn standardise(&self, item: usize, value: f64) -> f64 {
        let p = self.proportions[item];
        (value - p) / (p * (1.0 - p)).sqrt()
    }
}

/// Scores pupils against a fitted measurement model, caching weights per
/// missingness pattern.
pub struct Scorer {
    model: Measurement,
    cache: AHashMap<Vec<bool>, PatternWeights>,
}

impl Scorer {
    pub fn new(
        lambda: Array2<f64>,
        theta: Array1<f64>,
        psi: Array2<f64>,
        proportions: Array1<f64>,
    ) -> Result<Self, FactorError> {
        let k = lambda.nrows();
        if theta.len() != k || proportions.len() != k {
            return Err(FactorError::MismatchedItems {
                found: theta.len().min(proportions.len()),
                expected: k,
            });
        }
        let psi_inv = psi.inv()?;
        Ok(Self {
            model: Measurement {
                lambda,
                theta,
                psi,
                psi_inv,
                proportions,
            },
            cache: AHashMap::new(),
        })
    }

    pub fn from_model(model: &FactorModel) -> Result<Self, FactorError> {
        Self::new(
            model.lambda.clone(),
            model.theta.clone(),
            model.phi.clone(),
            model.proportions.clone(),
        )
    }

    fn n_items(&self) -> usize {
        self.model.lambda.nrows()
    }

    /// Weights and posterior covariance for pupils observed on `observed`.
    pub fn pattern_weights(&self, observed: &[usize]) -> Result<PatternWeights, FactorError> {
        self.model.pattern_weights(observed)
    }

    /// Weights for a pupil observed on every item.
    pub fn full_weights(&self) -> Result<PatternWeights, FactorError> {
        let all: Vec<usize> = (0..self.n_items()).collect();
        self.model.pattern_weights(&all)
    }

    pub fn score_row(&mut self, pupil_id: &str, row: ArrayView1<'_, f64>) -> Result<FactorScore, FactorError> {
        if row.len() != self.n_items() {
            return Err(FactorError::MismatchedItems {
                found: row.len(),
                expected: self.n_items(),
            });
        }
        let pattern: Vec<bool> = row.iter().map(|v| is_observed(*v)).collect();
        let observed_items = pattern.iter().filter(|o| **o).count();
        if observed_items == 0 {
            return Ok(FactorScore {
                pupil_id: pupil_id.to_string(),
                scores: None,
                error_variance: None,
                observed_items,
            });
        }

        let model = &self.model;
        let w = match self.cache.entry(pattern) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let observed: Vec<usize> = entry
                    .key()
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| **o)
                    .map(|(i, _)| i)
                    .collect();
                entry.insert(model.pattern_weights(&observed)?)
            }
        };
        let z: Array1<f64> = w.observed.iter().map(|&i| model.standardise(i, row[i])).collect();
        let s = w.weights.dot(&z);
        Ok(FactorScore {
            pupil_id: pupil_id.to_string(),
            scores: Some([s[0], s[1]]),
            error_variance: Some([w.posterior[[0, 0]], w.posterior[[1, 1]]]),
            observed_items,
        })
    }

    pub fn patterns(&self) -> usize {
        self.cache.len()
    }

    pub fn score_matrix(
        &mut self,
        matrix: &ItemMatrix,
        progress: &mut dyn ProgressObserver,
    ) -> Result<Vec<FactorScore>, FactorError> {
        if matrix.n_items() != self.n_items() {
            return Err(FactorError::MismatchedItems {
                found: matrix.n_items(),
                expected: self.n_items(),
            });
        }
        progress.on_stage_start(ProgressStage::PupilScoring, matrix.n_pupils());
        let mut scores = Vec::with_capacity(matrix.n_pupils());
        for (i, pupil_id) in matrix.pupils.iter().enumerate() {
            scores.push(self.score_row(pupil_id, matrix.row(i))?);
            if (i + 1) % 1024 == 0 {
                progress.on_stage_advance(ProgressStage::PupilScoring, i + 1);
            }
        }
        progress.on_stage_advance(ProgressStage::PupilScoring, matrix.n_pupils());
        progress.on_stage_finish(ProgressStage::PupilScoring);
        log::info!(
            "Scored {} pupils using {} missingness patterns; {} had no observed item.",
            scores.len(),
            self.patterns(),
            scores.iter().filter(|s| s.scores.is_none()).count()
        );
        Ok(scores)
    }
}

pub fn score_header() -> Vec<String> {
    let mut header = vec![PUPIL_ID_COLUMN.to_string()];
    header.extend(FACTOR_NAMES.iter().map(|f| f.to_string()));
    header.extend(FACTOR_NAMES.iter().map(|f| format!("{f}_error_var")));
    header
}

pub fn write_scores(path: &Path, scores: &[FactorScore]) -> Result<usize, TableError> {
    let mut buffer = ryu::Buffer::new();
    let rows: Vec<Vec<String>> = scores
        .iter()
        .map(|score| {
            let mut row = vec![score.pupil_id.clone()];
            for f in 0..2 {
                row.push(format_float(score.scores.map(|s| s[f]), &mut buffer));
            }
            for f in 0..2 {
                row.push(format_float(score.error_variance.map(|v| v[f]), &mut buffer));
            }
            row
        })
        .collect();
    write_table(path, &score_header(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn scorer() -> Scorer {
        let lambda = array![[0.8, 0.0], [0.7, 0.1], [0.6, 0.0], [0.2, 0.7], [0.0, 0.6], [0.0, 0.8]];
        let phi = array![[1.0, 0.45], [0.45, 1.0]];
        let implied = lambda.dot(&phi).dot(&lambda.t());
        let theta = implied.diag().mapv(|v| 1.0 - v);
        let proportions = array![0.7, 0.6, 0.5, 0.65, 0.4, 0.55];
        Scorer::new(lambda, theta, phi, proportions).unwrap()
    }

    #[test]
    fn test_regression_weights_match_posterior_form() {
        let scorer = scorer();
        let full = scorer.full_weights().unwrap();
        // W = V L' Theta^-1 for the complete pattern.
        let theta_inv = scorer.model.theta.mapv(|t| 1.0 / t);
        let alternative = full.posterior.dot(&scorer.model.lambda.t()) * &theta_inv;
        for (a, b) in full.weights.iter().zip(alternative.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
        assert!(full.posterior[[0, 0]] > 0.0 && full.posterior[[0, 0]] < 1.0);
    }

    #[test]
    fn test_scores_are_reproducible_bit_for_bit() {
        let matrix = ItemMatrix::new(
            (0..6).map(|i| format!("i{i}")).collect(),
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
            array![
                [1.0, 1.0, 0.0, 1.0, 0.0, 1.0],
                [0.0, f64::NAN, 1.0, 1.0, 1.0, 0.0],
                [f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN],
                [1.0, f64::NAN, 0.0, 0.0, 1.0, 1.0],
            ],
        );
        let first = scorer().score_matrix(&matrix, &mut NoopProgress).unwrap();
        let mut reused = scorer();
        let second = reused.score_matrix(&matrix, &mut NoopProgress).unwrap();
        let third = reused.score_matrix(&matrix, &mut NoopProgress).unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(reused.patterns(), 2);

        assert_eq!(first[2].scores, None);
        assert_eq!(first[2].observed_items, 0);
        assert_eq!(first[1].observed_items, 5);
        // Missing items leave more posterior uncertainty.
        let complete = first[0].error_variance.unwrap();
        let partial = first[1].error_variance.unwrap();
        assert!(partial[0] > complete[0]);
    }

    #[test]
    fn test_higher_cognitive_responses_raise_cognitive_score() {
        let mut scorer = scorer();
        let low = scorer
            .score_row("low", array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0].view())
            .unwrap();
        let high = scorer
            .score_row("high", array![1.0, 1.0, 1.0, 1.0, 1.0, 1.0].view())
            .unwrap();
        assert!(high.scores.unwrap()[0] > low.scores.unwrap()[0]);
        let err = scorer.score_row("short", array![1.0, 0.0].view()).unwrap_err();
        assert!(matches!(err, FactorError::MismatchedItems { found: 2, expected: 6 }));
    }

    #[test]
    fn test_score_table_leaves_unscored_cells_blank() {
        let scores = vec![
            FactorScore {
                pupil_id: "a".to_string(),
                scores: Some([0.25, -1.5]),
                error_variance: Some([0.1, 0.2]),
                observed_items: 6,
            },
            FactorScore {
                pupil_id: "b".to_string(),
                scores: None,
                error_variance: None,
                observed_items: 0,
            },
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.tsv");
        write_scores(&path, &scores).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "pupil_id\tcognitive\tsocioemotional\tcognitive_error_var\tsocioemotional_error_var");
        assert_eq!(lines[1], "a\t0.25\t-1.5\t0.1\t0.2");
        assert_eq!(lines[2], "b\t\t\t\t");
    }
}

use super::FACTOR_NAMES;
use super::cfa::FitStatistics;
use super::reliability::Reliability;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// The fitted measurement model: everything needed to re-score pupils plus
/// the diagnostics reported alongside the scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorModel {
    pub items: Vec<String>,
    /// Own factor of each item (0 cognitive, 1 socio-emotional).
    pub groups: Vec<usize>,
    /// `[cognitive anchor, socio-emotional anchor]`.
    pub anchors: Vec<String>,
    pub n_pupils: usize,
    pub proportions: Array1<f64>,
    pub thresholds: Array1<f64>,
    pub tetrachoric: Array2<f64>,
    pub tetrachoric_smoothed: bool,
    /// Pairwise-complete pupil counts; the diagonal holds each item's observed count.
    pub pair_counts: Array2<f64>,
    pub efa_loadings: Array2<f64>,
    pub efa_phi: Array2<f64>,
    pub efa_communalities: Array1<f64>,
    pub extraction_iterations: usize,
    pub rotation_iterations: usize,
    pub heywood: bool,
    pub cfa_iterations: usize,
    pub lambda: Array2<f64>,
    pub phi: Array2<f64>,
    pub theta: Array1<f64>,
    /// Posterior covariance of a pupil observed on every item.
    pub posterior_covariance: Array2<f64>,
    /// Score weights of a pupil observed on every item (factors x items).
    pub weights: Array2<f64>,
    pub fit: FitStatistics,
    pub reliability: Reliability,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl FactorModel {
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }

    /// Smallest number of pupils behind any tetrachoric correlation.
    pub fn min_pair_count(&self) -> f64 {
        self.pair_counts.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn log_summary(&self) {
        log::info!(
            "Tetrachoric correlations rest on at least {} pupils per pair.",
            self.min_pair_count()
        );
        log::info!(
            "Exploratory solution: {} extraction and {} rotation iterations{}.",
            self.extraction_iterations,
            self.rotation_iterations,
            if self.heywood { ", Heywood case" } else { "" }
        );
        log::info!("Confirmatory solution reached after {} iterations.", self.cfa_iterations);
        log::info!(
            "Confirmatory fit on {} pupils: chi2 = {:.3} (df {}), SRMR = {:.4}, RMSEA = {:.4}, CFI = {:.4}",
            self.fit.n,
            self.fit.chi_square,
            self.fit.df,
            self.fit.srmr,
            self.fit.rmsea,
            self.fit.cfi
        );
        log::info!("Factor correlation: {:.4}", self.phi[[0, 1]]);
        for (i, item) in self.items.iter().enumerate() {
            log::info!(
                "  {:<12} {:>8.4} {:>8.4}  theta {:.4}  efa h2 {:.4}",
                item,
                self.lambda[[i, 0]],
                self.lambda[[i, 1]],
                self.theta[i],
                self.efa_communalities[i]
            );
        }
        for f in 0..2 {
            log::info!(
                "{}: alpha {:.4} ({} complete cases), omega {:.4}, error variance {:.4}",
                FACTOR_NAMES[f],
                self.reliability.alpha[f],
                self.reliability.complete_cases[f],
                self.reliability.omega[f],
                self.posterior_covariance[[f, f]]
            );
        }
    }
}

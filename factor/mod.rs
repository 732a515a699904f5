//! # Latent Factor Scoring
//!
//! Two correlated factors (cognitive and socio-emotional) measured by a fixed
//! list of binary profile items. The model is estimated in two passes:
//!
//! 1. An exploratory two-factor solution on the tetrachoric matrix, obliquely
//!    rotated, supplies starting values.
//! 2. A confirmatory model frees each item's loading on its own factor, fixes
//!    one anchor cross-loading per factor at its exploratory value and every
//!    other cross-loading at zero, and is fitted by diagonally weighted least
//!    squares on the tetrachoric correlations.
//!
//! Pupils are then scored with the empirical Bayes posterior, keeping the
//! posterior covariance as the measurement-error variance of each score.

pub mod cfa;
pub mod data;
pub mod efa;
pub mod estimate;
pub mod model;
pub mod normal;
pub mod reliability;
pub mod scoring;
pub mod tetrachoric;

pub use data::ItemMatrix;
pub use estimate::fit_model;
pub use model::{FactorModel, ModelError};
pub use scoring::{FactorScore, Scorer, write_scores};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FACTOR_NAMES: [&str; 2] = ["cognitive", "socioemotional"];

#[derive(Error, Debug)]
pub enum FactorError {
    #[error("Factor item '{0}' is not a profile item column.")]
    UnknownItem(String),
    #[error("Invalid factor configuration: {0}")]
    InvalidConfig(String),
    #[error("Item '{item}' has no variance (proportion achieved {proportion:.4}); a tetrachoric correlation is undefined.")]
    DegenerateItem { item: String, proportion: f64 },
    #[error("Items '{first}' and '{second}' are never observed together.")]
    EmptyPair { first: String, second: String },
    #[error("Principal-axis extraction did not converge within {iterations} iterations (last change {change:.3e}).")]
    ExtractionNotConverged { iterations: usize, change: f64 },
    #[error("Oblique rotation did not converge within {iterations} iterations (gradient norm {gradient:.3e}).")]
    RotationNotConverged { iterations: usize, gradient: f64 },
    #[error("Confirmatory estimation failed: {0}")]
    OptimizationFailed(String),
    #[error("Inadmissible solution: residual variance of '{item}' is {value:.6}.")]
    InadmissibleResidual { item: String, value: f64 },
    #[error("Inadmissible solution: {0} is not positive definite.")]
    NotPositiveDefinite(&'static str),
    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
    #[error("The item matrix has {found} items but the model was estimated on {expected}.")]
    MismatchedItems { found: usize, expected: usize },
}

/// The fixed measurement model and its numerical settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorConfig {
    pub cognitive_items: Vec<String>,
    pub socioemotional_items: Vec<String>,
    /// Socio-emotional item whose loading on the cognitive factor is fixed.
    pub cognitive_anchor: String,
    /// Cognitive item whose loading on the socio-emotional factor is fixed.
    pub socioemotional_anchor: String,
    pub zero_cell_correction: f64,
    pub smoothing_floor: f64,
    pub heywood_ceiling: f64,
    pub extraction_max_iterations: usize,
    pub extraction_tolerance: f64,
    pub rotation_max_iterations: usize,
    pub rotation_tolerance: f64,
    pub cfa_max_iterations: usize,
    pub cfa_tolerance: f64,
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            cognitive_items: names(&[
                "cll_lsl_5",
                "cll_r_6",
                "cll_w_5",
                "psrn_nlc_6",
                "psrn_c_5",
                "psrn_ssm_6",
                "kuw_6",
            ]),
            socioemotional_items: names(&[
                "psed_da_6",
                "psed_sd_5",
                "psed_sd_7",
                "psed_ed_5",
                "psed_ed_7",
                "psed_ed_8",
                "cll_lct_6",
            ]),
            cognitive_anchor: "psed_da_6".to_string(),
            socioemotional_anchor: "kuw_6".to_string(),
            zero_cell_correction: 0.5,
            smoothing_floor: 1e-4,
            heywood_ceiling: 0.995,
            extraction_max_iterations: 1000,
            extraction_tolerance: 1e-6,
            rotation_max_iterations: 1000,
            rotation_tolerance: 1e-5,
            cfa_max_iterations: 1000,
            cfa_tolerance: 1e-6,
        }
    }
}

impl FactorConfig {
    /// All factor items, cognitive first.
    pub fn items(&self) -> Vec<String> {
        self.cognitive_items
            .iter()
            .chain(&self.socioemotional_items)
            .cloned()
            .collect()
    }

    /// Factor index (0 cognitive, 1 socio-emotional) of every item in [`Self::items`] order.
    pub fn groups(&self) -> Vec<usize> {
        std::iter::repeat_n(0, self.cognitive_items.len())
            .chain(std::iter::repeat_n(1, self.socioemotional_items.len()))
            .collect()
    }

    /// Item positions of the two anchors: `[cognitive anchor, socio-emotional anchor]`.
    pub fn anchor_positions(&self) -> Result<[usize; 2], FactorError> {
        let items = self.items();
        let groups = self.groups();
        let locate = |name: &str, factor: usize| -> Result<usize, FactorError> {
            let pos = items
                .iter()
                .position(|item| item == name)
                .ok_or_else(|| FactorError::InvalidConfig(format!("anchor '{name}' is not a factor item")))?;
            if groups[pos] == factor {
                return Err(FactorError::InvalidConfig(format!(
                    "anchor '{name}' for the {} factor must belong to the other group",
                    FACTOR_NAMES[factor]
                )));
            }
            Ok(pos)
        };
        Ok([
            locate(&self.cognitive_anchor, 0)?,
            locate(&self.socioemotional_anchor, 1)?,
        ])
    }

    pub fn validate(&self) -> Result<(), FactorError> {
        if self.cognitive_items.len() < 3 || self.socioemotional_items.len() < 3 {
            return Err(FactorError::InvalidConfig(
                "each factor needs at least three items".to_string(),
            ));
        }
        let mut items = self.items();
        items.sort();
        if let Some(w) = items.windows(2).find(|w| w[0] == w[1]) {
            return Err(FactorError::InvalidConfig(format!("item '{}' is listed twice", w[0])));
        }
        if !(0.0..1.0).contains(&self.zero_cell_correction) {
            return Err(FactorError::InvalidConfig(
                "zero_cell_correction must lie in [0, 1)".to_string(),
            ));
        }
        self.anchor_positions()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover::Catalogue;

    #[test]
    fn test_default_items_are_profile_columns() {
        let config = FactorConfig::default();
        config.validate().unwrap();
        let catalogue = Catalogue::eyfsp();
        for item in config.items() {
            assert!(catalogue.item_position(&item).is_some(), "{item}");
        }
        assert_eq!(config.anchor_positions().unwrap(), [7, 6]);
        assert_eq!(config.groups()[6], 0);
        assert_eq!(config.groups()[7], 1);
    }

    #[test]
    fn test_anchor_must_cross_groups() {
        let config = FactorConfig {
            cognitive_anchor: "cll_r_6".to_string(),
            ..FactorConfig::default()
        };
        assert!(matches!(config.validate(), Err(FactorError::InvalidConfig(_))));
    }
}

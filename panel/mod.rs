//! # Cross-Year Longitudinal Aggregator
//!
//! Folds yearly census snapshots with heterogeneous schemas into one record per
//! pupil of the baseline cohort table. Snapshots are first normalised into
//! long-form `(pupil, year, field, value)` observations; every derived column is
//! then a fold over a bounded calendar window of one pupil's history.

pub mod build;
pub mod cohort;
pub mod long;
pub mod resolve;
pub mod schema;

pub use build::{PanelRecord, PanelSummary, assemble, build_panel, panel_header, write_panel_table};
pub use cohort::{CohortSpec, Population, load_population};
pub use long::{LongTable, ingest_snapshot};
pub use schema::Field;

use crate::files::{PUPIL_ID_COLUMN, TableError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("No census snapshots (.tsv, .csv, .txt) were found in '{dir}'.")]
    NoSnapshots { dir: String },
    #[error("Cannot tell which census year '{path}' covers: its file name has no four-digit year.")]
    SnapshotYear { path: String },
    #[error("The cohort table '{path}' defines no pupils in any configured cohort.")]
    EmptyPopulation { path: String },
    #[error("Invalid panel configuration: {0}")]
    InvalidConfig(String),
}

/// Cohort alignment and aggregation windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub id_column: String,
    pub cohort_column: String,
    pub cohorts: Vec<CohortSpec>,
    /// Academic years 0 (reception) through `span_years - 1`.
    pub span_years: u16,
    /// Length of the ever-true window starting at each cohort's baseline.
    pub ever_window_years: u16,
    pub sibling_years: Vec<u16>,
    pub sibling_fallback_year: Option<u16>,
    /// School moves count the consecutive-year pairs whose later calendar year
    /// lies in this inclusive range.
    pub move_window_start: u16,
    pub move_window_end: u16,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            id_column: PUPIL_ID_COLUMN.to_string(),
            cohort_column: "cohort".to_string(),
            cohorts: cohort::default_cohorts(),
            span_years: 12,
            ever_window_years: 7,
            sibling_years: vec![2008, 2013],
            sibling_fallback_year: Some(2016),
            move_window_start: 2010,
            move_window_end: 2014,
        }
    }
}

impl PanelConfig {
    pub fn validate(&self) -> Result<(), PanelError> {
        if self.cohorts.is_empty() {
            return Err(PanelError::InvalidConfig("at least one cohort is required".to_string()));
        }
        if self.span_years < 2 {
            return Err(PanelError::InvalidConfig(format!(
                "span_years must be at least 2, got {}",
                self.span_years
            )));
        }
        if self.ever_window_years == 0 {
            return Err(PanelError::InvalidConfig("ever_window_years must be positive".to_string()));
        }
        if self.move_window_start > self.move_window_end {
            return Err(PanelError::InvalidConfig(format!(
                "move window {}..={} is empty",
                self.move_window_start, self.move_window_end
            )));
        }
        let mut labels: Vec<&str> = self.cohorts.iter().map(|c| c.label.as_str()).collect();
        labels.sort_unstable();
        if labels.windows(2).any(|w| w[0] == w[1]) {
            return Err(PanelError::InvalidConfig("cohort labels must be unique".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PanelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let reversed = PanelConfig {
            move_window_start: 2014,
            move_window_end: 2010,
            ..PanelConfig::default()
        };
        assert!(matches!(reversed.validate(), Err(PanelError::InvalidConfig(_))));

        let mut repeated = PanelConfig::default();
        repeated.cohorts.push(CohortSpec::new("2008", 2010));
        assert!(repeated.validate().is_err());
    }
}

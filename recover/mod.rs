//! # Item Recovery & Validation
//!
//! Converts raw profile extracts into per-item binary indicators and rebuilds
//! missing scale, domain and overall totals from the level below. Reported
//! totals that disagree with their recomputed sums are tallied, not corrected.

pub mod catalogue;
pub mod engine;
pub mod table;
pub mod tokens;

pub use catalogue::{Catalogue, ITEMS_PER_SCALE, OVERALL_COLUMN};
pub use engine::{CleanAssessment, RecoveryReport, recover_record};
pub use table::{load_and_recover, read_clean_table, write_clean_table, write_report};
pub use tokens::TokenSet;

use crate::files::TableError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("The assessment extract contains none of the {expected} profile item columns.")]
    NoProfileColumns { expected: usize },
}

/// Settings for reading the assessment extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub id_column: String,
    pub affirmative_tokens: Vec<String>,
    pub negative_tokens: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            id_column: "pupil_id".to_string(),
            affirmative_tokens: tokens::DEFAULT_AFFIRMATIVE.iter().map(|s| s.to_string()).collect(),
            negative_tokens: tokens::DEFAULT_NEGATIVE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RecoveryConfig {
    pub fn token_set(&self) -> TokenSet {
        TokenSet::new(&self.affirmative_tokens, &self.negative_tokens)
    }
}

//! Hierarchical total recovery and validation.
//!
//! Every level of the profile follows one rule. A reported total that parses as
//! an exact in-range integer is kept. A missing (or rejected) total is rebuilt
//! from the level below only when every input at that level is present. Whenever
//! the inputs are complete and a total was reported, the recomputed sum is
//! compared with it and a disagreement is tallied; the reported value is never
//! altered. Levels are evaluated bottom-up (items, scales, domains, overall) and
//! each level is validated on its own: a mismatch below is not carried upward.

use super::catalogue::{Catalogue, OVERALL_COLUMN, OVERALL_LABEL};
use super::tokens::{ItemToken, TokenSet, TotalToken, parse_total};
use std::fmt;

/// Where a level's final value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalSource {
    Reported,
    Recovered,
    Missing,
}

/// Result of comparing a reported total with the sum of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Agree,
    Mismatch { reported: u16, recomputed: u16 },
    /// Either no total was reported or some input was missing.
    Unchecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovered {
    pub value: Option<u16>,
    pub source: TotalSource,
    pub check: Check,
    /// The reported text was present but not an acceptable total.
    pub rejected: bool,
}

/// Sum of the inputs when every input is present.
pub fn complete_sum(inputs: &[Option<u16>]) -> Option<u16> {
    inputs
        .iter()
        .try_fold(0u16, |acc, value| value.map(|v| acc.saturating_add(v)))
}

/// Applies the recovery rule to one total given its inputs and reported token.
pub fn recover_total(inputs: &[Option<u16>], reported: TotalToken) -> Recovered {
    let recomputed = complete_sum(inputs);
    match reported {
        TotalToken::Accepted(value) => {
            let check = match recomputed {
                Some(sum) if sum == value => Check::Agree,
                Some(sum) => Check::Mismatch {
                    reported: value,
                    recomputed: sum,
                },
                None => Check::Unchecked,
            };
            Recovered {
                value: Some(value),
                source: TotalSource::Reported,
                check,
                rejected: false,
            }
        }
        TotalToken::Missing | TotalToken::Rejected => Recovered {
            value: recomputed,
            source: if recomputed.is_some() {
                TotalSource::Recovered
            } else {
                TotalSource::Missing
            },
            check: Check::Unchecked,
            rejected: reported == TotalToken::Rejected,
        },
    }
}

/// One pupil's cleaned profile. Vectors follow catalogue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanAssessment {
    pub pupil_id: String,
    pub items: Vec<Option<u8>>,
    pub scale_totals: Vec<Option<u16>>,
    pub domain_totals: Vec<Option<u16>>,
    pub overall: Option<u16>,
    pub missing_items: usize,
    pub mismatches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Scale,
    Domain,
    Overall,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scale => "scale",
            Self::Domain => "domain",
            Self::Overall => "overall",
        })
    }
}

/// Counts for one total column across all pupils.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTally {
    pub column: String,
    pub label: String,
    pub level: Level,
    pub reported: usize,
    pub recovered: usize,
    pub agreed: usize,
    pub mismatched: usize,
    pub rejected: usize,
    pub missing: usize,
}

impl LevelTally {
    fn new(column: &str, label: &str, level: Level) -> Self {
        Self {
            column: column.to_string(),
            label: label.to_string(),
            level,
            reported: 0,
            recovered: 0,
            agreed: 0,
            mismatched: 0,
            rejected: 0,
            missing: 0,
        }
    }

    fn record(&mut self, outcome: &Recovered) {
        match outcome.source {
            TotalSource::Reported => self.reported += 1,
            TotalSource::Recovered => self.recovered += 1,
            TotalSource::Missing => self.missing += 1,
        }
        match outcome.check {
            Check::Agree => self.agreed += 1,
            Check::Mismatch { .. } => self.mismatched += 1,
            Check::Unchecked => {}
        }
        if outcome.rejected {
            self.rejected += 1;
        }
    }
}

/// Diagnostic tallies accumulated over a whole extract. Nothing here feeds back
/// into the cleaned values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub pupils: usize,
    pub duplicate_rows: usize,
    pub missing_id_rows: usize,
    pub unrecognised_item_tokens: usize,
    pub missing_item_cells: usize,
    pub levels: Vec<LevelTally>,
}

impl RecoveryReport {
    pub fn new(catalogue: &Catalogue) -> Self {
        let mut levels = Vec::with_capacity(catalogue.scales().len() + catalogue.domains().len() + 1);
        for scale in catalogue.scales() {
            levels.push(LevelTally::new(&scale.total_column, scale.label, Level::Scale));
        }
        for domain in catalogue.domains() {
            levels.push(LevelTally::new(&domain.total_column, domain.label, Level::Domain));
        }
        levels.push(LevelTally::new(OVERALL_COLUMN, OVERALL_LABEL, Level::Overall));
        Self {
            pupils: 0,
            duplicate_rows: 0,
            missing_id_rows: 0,
            unrecognised_item_tokens: 0,
            missing_item_cells: 0,
            levels,
        }
    }

    pub fn total_mismatches(&self) -> usize {
        self.levels.iter().map(|l| l.mismatched).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.levels.iter().map(|l| l.rejected).sum()
    }

    pub fn log_summary(&self) {
        log::info!(
            "Recovered profiles for {} pupils ({} duplicate rows and {} rows without an identifier skipped).",
            self.pupils,
            self.duplicate_rows,
            self.missing_id_rows
        );
        log::info!(
            "Item cells: {} missing, {} unrecognised tokens.",
            self.missing_item_cells,
            self.unrecognised_item_tokens
        );
        for tally in &self.levels {
            log::info!(
                "  {:<10} {:<8} reported={} recovered={} agreed={} mismatched={} rejected={} missing={} ({})",
                tally.column,
                tally.level,
                tally.reported,
                tally.recovered,
                tally.agreed,
                tally.mismatched,
                tally.rejected,
                tally.missing,
                tally.label
            );
        }
        let mismatches = self.total_mismatches();
        if mismatches > 0 {
            log::warn!("{mismatches} reported totals disagree with the sum of their inputs.");
        }
        let rejected = self.total_rejected();
        if rejected > 0 {
            log::warn!("{rejected} reported totals were unreadable or out of range and were rebuilt where possible.");
        }
    }
}

/// Cleans one pupil's raw profile. `lookup` returns the raw cell for a column
/// name, or `None` when the column is absent or the cell is empty.
pub fn recover_record<'a, F>(
    catalogue: &Catalogue,
    tokens: &TokenSet,
    pupil_id: &str,
    lookup: F,
    report: &mut RecoveryReport,
) -> CleanAssessment
where
    F: Fn(&str) -> Option<&'a str>,
{
    let n_scales = catalogue.scales().len();
    let mut items = Vec::with_capacity(catalogue.item_count());
    let mut scale_totals = Vec::with_capacity(n_scales);
    let mut mismatches = 0usize;
    let mut missing_items = 0usize;

    for (s, scale) in catalogue.scales().iter().enumerate() {
        let mut inputs = Vec::with_capacity(scale.item_columns.len());
        for column in &scale.item_columns {
            let token = tokens.parse_item(lookup(column));
            match token {
                ItemToken::Present(_) => {}
                ItemToken::Missing => missing_items += 1,
                ItemToken::Unrecognised => {
                    missing_items += 1;
                    report.unrecognised_item_tokens += 1;
                }
            }
            let value = token.value();
            items.push(value);
            inputs.push(value.map(u16::from));
        }
        let outcome = recover_total(&inputs, parse_total(lookup(&scale.total_column), scale.max));
        report.levels[s].record(&outcome);
        if matches!(outcome.check, Check::Mismatch { .. }) {
            mismatches += 1;
        }
        scale_totals.push(outcome.value);
    }

    let mut domain_totals = Vec::with_capacity(catalogue.domains().len());
    for (d, domain) in catalogue.domains().iter().enumerate() {
        let inputs = &scale_totals[domain.scales.clone()];
        let outcome = recover_total(inputs, parse_total(lookup(&domain.total_column), domain.max));
        report.levels[n_scales + d].record(&outcome);
        if matches!(outcome.check, Check::Mismatch { .. }) {
            mismatches += 1;
        }
        domain_totals.push(outcome.value);
    }

    let overall = recover_total(
        &domain_totals,
        parse_total(lookup(OVERALL_COLUMN), catalogue.overall_max()),
    );
    if let Some(tally) = report.levels.last_mut() {
        tally.record(&overall);
    }
    if matches!(overall.check, Check::Mismatch { .. }) {
        mismatches += 1;
    }

    report.pupils += 1;
    report.missing_item_cells += missing_items;

    CleanAssessment {
        pupil_id: pupil_id.to_string(),
        items,
        scale_totals,
        domain_totals,
        overall: overall.value,
        missing_items,
        mismatches,
    }
}

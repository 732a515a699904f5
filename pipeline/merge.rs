//! The analysis table consumed by the regression stage: the census panel
//! inner-joined to the cleaned assessment totals, with factor scores and
//! offending outcomes left-joined on the pupil identifier.

use crate::files::{PUPIL_ID_COLUMN, Table, TableError, read_table, write_table};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Column '{column}' from '{source_table}' already exists in the analysis table.")]
    ColumnClash { column: String, source_table: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Identifier column of the offending-outcome extract.
    pub offending_id_column: String,
    /// Outcome columns to carry; empty carries every non-identifier column.
    pub offending_columns: Vec<String>,
    /// Value given to pupils absent from the outcome extract.
    pub absent_outcome: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            offending_id_column: PUPIL_ID_COLUMN.to_string(),
            offending_columns: Vec::new(),
            absent_outcome: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub rows: usize,
    pub panel_without_assessment: usize,
    pub assessment_without_panel: usize,
    pub unscored: usize,
    pub without_outcome: usize,
}

/// A table keyed by pupil, with the columns it contributes.
struct Keyed<'a> {
    table: &'a Table,
    name: String,
    columns: Vec<usize>,
    rows: AHashMap<&'a str, usize>,
}

impl<'a> Keyed<'a> {
    fn new(table: &'a Table, name: &str, id_column: &str, columns: Vec<usize>) -> Result<Self, TableError> {
        let id_idx = table.require_column(Path::new(name), id_column)?;
        let mut rows = AHashMap::with_capacity(table.height());
        let mut repeated = 0usize;
        for row in 0..table.height() {
            if let Some(id) = table.cell_at(row, id_idx) {
                if rows.contains_key(id) {
                    repeated += 1;
                } else {
                    rows.insert(id, row);
                }
            }
        }
        if repeated > 0 {
            log::warn!("{repeated} repeated pupil rows in '{name}' were ignored.");
        }
        Ok(Self {
            table,
            name: name.to_string(),
            columns,
            rows,
        })
    }

    fn header(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|&c| self.table.columns()[c].as_str())
    }

    fn cells(&self, pupil_id: &str) -> Option<Vec<String>> {
        self.rows.get(pupil_id).map(|&row| {
            self.columns
                .iter()
                .map(|&c| self.table.cell_at(row, c).unwrap_or_default().to_string())
                .collect()
        })
    }
}

fn non_id_columns(table: &Table, id_column: &str) -> Vec<usize> {
    (0..table.columns().len())
        .filter(|&c| table.columns()[c] != id_column)
        .collect()
}

fn append_header(header: &mut Vec<String>, seen: &mut AHashSet<String>, keyed: &Keyed<'_>) -> Result<(), MergeError> {
    for column in keyed.header() {
        if !seen.insert(column.to_string()) {
            return Err(MergeError::ColumnClash {
                column: column.to_string(),
                source_table: keyed.name.clone(),
            });
        }
        header.push(column.to_string());
    }
    Ok(())
}

/// Joins the stage outputs into the analysis table at `output`.
///
/// `assessment_columns` selects the cleaned assessment columns to carry (the
/// recovered totals and diagnostics). The outcome extract is optional; without
/// it no outcome columns are added.
pub fn merge_tables(
    panel_path: &Path,
    assessment_path: &Path,
    assessment_columns: &[String],
    scores_path: &Path,
    offending_path: Option<&Path>,
    config: &MergeConfig,
    output: &Path,
) -> Result<MergeSummary, MergeError> {
    let panel = read_table(panel_path)?;
    let panel_id = panel.require_column(panel_path, PUPIL_ID_COLUMN)?;

    let assessment = read_table(assessment_path)?;
    let selected = assessment_columns
        .iter()
        .map(|c| assessment.require_column(assessment_path, c))
        .collect::<Result<Vec<usize>, TableError>>()?;
    let assessment = Keyed::new(&assessment, &assessment_path.display().to_string(), PUPIL_ID_COLUMN, selected)?;

    let scores = read_table(scores_path)?;
    let scores = Keyed::new(
        &scores,
        &scores_path.display().to_string(),
        PUPIL_ID_COLUMN,
        non_id_columns(&scores, PUPIL_ID_COLUMN),
    )?;

    let offending_table = offending_path.map(read_table).transpose()?;
    let offending = match (&offending_table, offending_path) {
        (Some(table), Some(path)) => {
            let columns = if config.offending_columns.is_empty() {
                non_id_columns(table, &config.offending_id_column)
            } else {
                config
                    .offending_columns
                    .iter()
                    .map(|c| table.require_column(path, c))
                    .collect::<Result<Vec<usize>, TableError>>()?
            };
            Some(Keyed::new(table, &path.display().to_string(), &config.offending_id_column, columns)?)
        }
        _ => None,
    };

    let mut header = panel.columns().to_vec();
    let mut seen: AHashSet<String> = header.iter().cloned().collect();
    append_header(&mut header, &mut seen, &assessment)?;
    append_header(&mut header, &mut seen, &scores)?;
    if let Some(offending) = &offending {
        append_header(&mut header, &mut seen, offending)?;
    }

    let mut summary = MergeSummary::default();
    let mut joined = AHashSet::with_capacity(panel.height());
    let mut rows = Vec::with_capacity(panel.height());
    for row in 0..panel.height() {
        let Some(pupil_id) = panel.cell_at(row, panel_id) else {
            continue;
        };
        let Some(totals) = assessment.cells(pupil_id) else {
            summary.panel_without_assessment += 1;
            continue;
        };
        joined.insert(pupil_id);

        let mut out: Vec<String> = (0..panel.columns().len())
            .map(|c| panel.cell_at(row, c).unwrap_or_default().to_string())
            .collect();
        out.extend(totals);
        match scores.cells(pupil_id) {
            Some(cells) if cells.iter().any(|c| !c.is_empty()) => out.extend(cells),
            _ => {
                summary.unscored += 1;
                out.extend(std::iter::repeat_n(String::new(), scores.columns.len()));
            }
        }
        if let Some(offending) = &offending {
            match offending.cells(pupil_id) {
                Some(cells) => out.extend(cells),
                None => {
                    summary.without_outcome += 1;
                    out.extend(std::iter::repeat_n(config.absent_outcome.clone(), offending.columns.len()));
                }
            }
        }
        rows.push(out);
    }
    summary.assessment_without_panel = assessment.rows.keys().filter(|id| !joined.contains(*id)).count();
    summary.rows = write_table(output, &header, rows)?;

    log::info!(
        "Analysis table: {} pupils ({} panel pupils without an assessment, {} assessed pupils outside the panel, {} unscored, {} without outcome records).",
        summary.rows,
        summary.panel_without_assessment,
        summary.assessment_without_panel,
        summary.unscored,
        summary.without_outcome
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_join_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let panel = write(dir.path(), "panel.tsv", "pupil_id\tcohort\tsex\np1\t2008\tF\np2\t2008\tM\np3\t2009\tF\n");
        let clean = write(dir.path(), "clean.tsv", "pupil_id\ttotal\tmismatches\np1\t80\t0\np3\t\t1\np9\t50\t0\n");
        let scores = write(
            dir.path(),
            "scores.tsv",
            "pupil_id\tcognitive\tsocioemotional\np1\t0.5\t-0.2\np3\t\t\n",
        );
        let offending = write(dir.path(), "offending.csv", "pupil_id,offences\np3,2\n");
        let output = dir.path().join("analysis.tsv");

        let summary = merge_tables(
            &panel,
            &clean,
            &["total".to_string(), "mismatches".to_string()],
            &scores,
            Some(&offending),
            &MergeConfig::default(),
            &output,
        )
        .unwrap();
        assert_eq!(
            summary,
            MergeSummary {
                rows: 2,
                panel_without_assessment: 1,
                assessment_without_panel: 1,
                unscored: 1,
                without_outcome: 1,
            }
        );

        let table = read_table(&output).unwrap();
        assert_eq!(
            table.columns(),
            &["pupil_id", "cohort", "sex", "total", "mismatches", "cognitive", "socioemotional", "offences"]
        );
        assert_eq!(table.cell(0, "pupil_id"), Some("p1"));
        assert_eq!(table.cell(0, "cognitive"), Some("0.5"));
        assert_eq!(table.cell(0, "offences"), Some("0"));
        assert_eq!(table.cell(1, "pupil_id"), Some("p3"));
        assert_eq!(table.cell(1, "total"), None);
        assert_eq!(table.cell(1, "cognitive"), None);
        assert_eq!(table.cell(1, "offences"), Some("2"));
    }

    #[test]
    fn test_clashing_columns_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let panel = write(dir.path(), "panel.tsv", "pupil_id\ttotal\np1\t1\n");
        let clean = write(dir.path(), "clean.tsv", "pupil_id\ttotal\np1\t80\n");
        let scores = write(dir.path(), "scores.tsv", "pupil_id\tcognitive\np1\t0.1\n");
        let err = merge_tables(
            &panel,
            &clean,
            &["total".to_string()],
            &scores,
            None,
            &MergeConfig::default(),
            &dir.path().join("analysis.tsv"),
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::ColumnClash { ref column, .. } if column == "total"));
    }
}

use super::catalogue::{Catalogue, OVERALL_COLUMN};
use super::engine::{CleanAssessment, RecoveryReport, recover_record};
use super::{RecoveryConfig, RecoveryError};
use crate::files::{PUPIL_ID_COLUMN, TableError, format_opt, read_table, write_table};
use ahash::AHashSet;
use std::path::Path;

/// Reads a raw assessment extract and cleans every pupil's profile.
///
/// Columns the catalogue expects but the extract lacks are treated as missing
/// cells. Repeated pupil identifiers keep their first row; rows with an empty
/// identifier are counted and skipped.
pub fn load_and_recover(
    path: &Path,
    config: &RecoveryConfig,
    catalogue: &Catalogue,
) -> Result<(Vec<CleanAssessment>, RecoveryReport), RecoveryError> {
    let table = read_table(path)?;
    let id_idx = table.require_column(path, &config.id_column)?;

    let absent_items = catalogue
        .item_columns()
        .filter(|c| !table.has_column(c))
        .count();
    if absent_items == catalogue.item_count() {
        return Err(RecoveryError::NoProfileColumns {
            expected: catalogue.item_count(),
        });
    }
    if absent_items > 0 {
        log::warn!(
            "{} of {} item columns are absent from '{}'; their cells are treated as missing.",
            absent_items,
            catalogue.item_count(),
            path.display()
        );
    }

    let tokens = config.token_set();
    let mut report = RecoveryReport::new(catalogue);
    let mut seen = AHashSet::with_capacity(table.height());
    let mut records = Vec::with_capacity(table.height());

    for row in 0..table.height() {
        let Some(pupil_id) = table.cell_at(row, id_idx) else {
            report.missing_id_rows += 1;
            continue;
        };
        if !seen.insert(pupil_id.to_string()) {
            report.duplicate_rows += 1;
            continue;
        }
        let record = recover_record(
            catalogue,
            &tokens,
            pupil_id,
            |column| table.cell(row, column),
            &mut report,
        );
        records.push(record);
    }

    if report.missing_id_rows > 0 {
        log::warn!(
            "{} rows have no pupil identifier in column '{}' and were skipped.",
            report.missing_id_rows,
            config.id_column
        );
    }
    if report.duplicate_rows > 0 {
        log::warn!(
            "{} rows repeat an earlier pupil identifier and were skipped.",
            report.duplicate_rows
        );
    }
    Ok((records, report))
}

/// Reads back a table produced by [`write_clean_table`]. Running recovery over
/// an already-clean table is a fixed point, so the same engine is used.
pub fn read_clean_table(path: &Path, catalogue: &Catalogue) -> Result<Vec<CleanAssessment>, RecoveryError> {
    let (records, _) = load_and_recover(path, &RecoveryConfig::default(), catalogue)?;
    Ok(records)
}

pub fn clean_header(catalogue: &Catalogue) -> Vec<String> {
    let mut header = vec![PUPIL_ID_COLUMN.to_string()];
    header.extend(catalogue.item_columns().map(str::to_string));
    header.extend(catalogue.scales().iter().map(|s| s.total_column.clone()));
    header.extend(catalogue.domains().iter().map(|d| d.total_column.clone()));
    header.push(OVERALL_COLUMN.to_string());
    header.push("missing_items".to_string());
    header.push("mismatches".to_string());
    header
}

pub fn write_clean_table(
    path: &Path,
    catalogue: &Catalogue,
    records: &[CleanAssessment],
) -> Result<usize, TableError> {
    let header = clean_header(catalogue);
    let rows = records.iter().map(|record| {
        let mut row = Vec::with_capacity(header.len());
        row.push(record.pupil_id.clone());
        row.extend(record.items.iter().map(|v| format_opt(*v)));
        row.extend(record.scale_totals.iter().map(|v| format_opt(*v)));
        row.extend(record.domain_totals.iter().map(|v| format_opt(*v)));
        row.push(format_opt(record.overall));
        row.push(record.missing_items.to_string());
        row.push(record.mismatches.to_string());
        row
    });
    write_table(path, &header, rows)
}

pub fn write_report(path: &Path, report: &RecoveryReport) -> Result<usize, TableError> {
    let header: Vec<String> = [
        "column",
        "label",
        "level",
        "reported",
        "recovered",
        "agreed",
        "mismatched",
        "rejected",
        "missing",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let rows = report.levels.iter().map(|tally| {
        vec![
            tally.column.clone(),
            tally.label.clone(),
            tally.level.to_string(),
            tally.reported.to_string(),
            tally.recovered.to_string(),
            tally.agreed.to_string(),
            tally.mismatched.to_string(),
            tally.rejected.to_string(),
            tally.missing.to_string(),
        ]
    });
    write_table(path, &header, rows)
}

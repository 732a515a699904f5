use super::cohort::{CohortSpec, Population, load_population};
use super::long::{History, LongTable, ingest_snapshot, snapshot_year};
use super::resolve::{changed, ever_true, first_available, max_over, year_indexed};
use super::schema::Field;
use super::{PanelConfig, PanelError};
use crate::files::{PUPIL_ID_COLUMN, TableError, format_opt, list_tables, read_table, write_table};
use crate::progress::{ProgressObserver, ProgressStage};
use std::path::Path;

/// Fields resolved once from the baseline year, falling forward when missing.
pub const INVARIANT_FIELDS: [Field; 9] = [
    Field::Sex,
    Field::BirthYear,
    Field::BirthMonth,
    Field::WhiteBritish,
    Field::Eal,
    Field::IdaciDecile,
    Field::HomeLa,
    Field::SchoolLa,
    Field::SchoolId,
];

/// Flags aggregated by logical OR over the cohort window.
pub const EVER_FIELDS: [Field; 6] = [
    Field::Fsm,
    Field::PartTime,
    Field::Sen,
    Field::SenAction,
    Field::SenActionPlus,
    Field::SenStatement,
];

/// Identifiers re-indexed onto academic years.
pub const YEAR_INDEXED_FIELDS: [Field; 3] = [Field::SchoolId, Field::HomeLa, Field::SchoolLa];

/// One pupil's longitudinal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRecord {
    pub pupil_id: String,
    pub cohort: String,
    /// Aligned with [`INVARIANT_FIELDS`].
    pub invariant: Vec<Option<String>>,
    pub nsiblings: Option<i64>,
    /// Aligned with [`EVER_FIELDS`].
    pub ever: Vec<Option<bool>>,
    /// Aligned with [`YEAR_INDEXED_FIELDS`]; each holds one slot per academic year.
    pub by_year: Vec<Vec<Option<String>>>,
    /// `changed_school[y]` compares academic years `y` and `y + 1`.
    pub changed_school: Vec<Option<bool>>,
    pub school_moves: Option<u32>,
}

impl PanelRecord {
    pub fn invariant(&self, field: Field) -> Option<&str> {
        INVARIANT_FIELDS
            .iter()
            .position(|f| *f == field)
            .and_then(|i| self.invariant[i].as_deref())
    }

    pub fn ever(&self, field: Field) -> Option<bool> {
        EVER_FIELDS
            .iter()
            .position(|f| *f == field)
            .and_then(|i| self.ever[i])
    }

    pub fn school_id(&self, year_index: usize) -> Option<&str> {
        self.by_year[0].get(year_index).and_then(|v| v.as_deref())
    }
}

/// Diagnostic counts from one panel build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelSummary {
    pub pupils: usize,
    pub snapshots: usize,
    pub observations: usize,
    pub outside_population_rows: usize,
    pub duplicate_snapshot_rows: usize,
    pub missing_id_rows: usize,
    pub dropped_cohort_rows: usize,
    pub pupils_without_snapshots: usize,
    /// Invariant values taken from a year after the baseline.
    pub fallback_resolutions: usize,
    pub sibling_fallbacks: usize,
}

impl PanelSummary {
    pub fn log_summary(&self) {
        log::info!(
            "Panel: {} pupils from {} snapshots ({} observations).",
            self.pupils,
            self.snapshots,
            self.observations
        );
        log::info!(
            "Snapshot rows ignored: {} outside the population, {} repeated, {} without an identifier.",
            self.outside_population_rows,
            self.duplicate_snapshot_rows,
            self.missing_id_rows
        );
        if self.pupils_without_snapshots > 0 {
            log::warn!(
                "{} cohort pupils never appear in a census snapshot.",
                self.pupils_without_snapshots
            );
        }
        log::info!(
            "{} invariant values and {} sibling counts resolved from fallback years.",
            self.fallback_resolutions,
            self.sibling_fallbacks
        );
    }
}

fn count_school_moves(changes: &[Option<bool>], cohort: &CohortSpec, config: &PanelConfig) -> Option<u32> {
    let window = config.move_window_start..=config.move_window_end;
    let in_window: Vec<bool> = changes
        .iter()
        .enumerate()
        .filter(|(y, _)| {
            u16::try_from(*y + 1)
                .map(|later| window.contains(&cohort.calendar_year(later)))
                .unwrap_or(false)
        })
        .filter_map(|(_, change)| *change)
        .collect();
    if in_window.is_empty() {
        None
    } else {
        Some(in_window.iter().filter(|moved| **moved).count() as u32)
    }
}

/// Resolves one pupil's history into a panel record.
pub fn build_record(
    pupil_id: &str,
    cohort: &CohortSpec,
    history: &History,
    config: &PanelConfig,
    summary: &mut PanelSummary,
) -> PanelRecord {
    let span = config.span_years as usize;
    let last = cohort.calendar_year(config.span_years.saturating_sub(1));

    let invariant = INVARIANT_FIELDS
        .iter()
        .map(|&field| {
            first_available(history, field, cohort.baseline_year, last).map(|resolved| {
                if resolved.year != cohort.baseline_year {
                    summary.fallback_resolutions += 1;
                }
                resolved.value.to_string()
            })
        })
        .collect();

    let observed_siblings = max_over(history, Field::Siblings, &config.sibling_years, None);
    let nsiblings = observed_siblings.or_else(|| {
        let fallback = max_over(history, Field::Siblings, &[], config.sibling_fallback_year);
        if fallback.is_some() {
            summary.sibling_fallbacks += 1;
        }
        fallback
    });

    let window = cohort.window(config.ever_window_years);
    let ever = EVER_FIELDS
        .iter()
        .map(|&field| ever_true(history, field, window.clone()))
        .collect();

    let by_year: Vec<Vec<Option<String>>> = YEAR_INDEXED_FIELDS
        .iter()
        .map(|&field| year_indexed(history, field, cohort.baseline_year, span))
        .collect();

    let schools = &by_year[0];
    let changed_school: Vec<Option<bool>> = schools
        .windows(2)
        .map(|pair| changed(pair[0].as_deref(), pair[1].as_deref()))
        .collect();
    let school_moves = count_school_moves(&changed_school, cohort, config);

    PanelRecord {
        pupil_id: pupil_id.to_string(),
        cohort: cohort.label.clone(),
        invariant,
        nsiblings,
        ever,
        by_year,
        changed_school,
        school_moves,
    }
}

/// Builds one record per population member from the long-form table.
pub fn build_panel(
    population: &Population,
    long: &LongTable,
    config: &PanelConfig,
    summary: &mut PanelSummary,
) -> Vec<PanelRecord> {
    let empty = History::default();
    population
        .members()
        .map(|(pupil_id, cohort)| {
            let history = long.history(pupil_id).unwrap_or_else(|| {
                summary.pupils_without_snapshots += 1;
                &empty
            });
            build_record(pupil_id, &config.cohorts[cohort], history, config, summary)
        })
        .collect()
}

/// Reads the cohort table and every snapshot in `snapshot_dir`, then resolves
/// the panel.
pub fn assemble(
    config: &PanelConfig,
    cohort_path: &Path,
    snapshot_dir: &Path,
    progress: &mut dyn ProgressObserver,
) -> Result<(Vec<PanelRecord>, PanelSummary), PanelError> {
    config.validate()?;
    let population = load_population(cohort_path, &config.id_column, &config.cohort_column, &config.cohorts)?;

    let paths = list_tables(snapshot_dir)?;
    if paths.is_empty() {
        return Err(PanelError::NoSnapshots {
            dir: snapshot_dir.display().to_string(),
        });
    }
    let mut dated = Vec::with_capacity(paths.len());
    for path in paths {
        let year = snapshot_year(&path).ok_or_else(|| PanelError::SnapshotYear {
            path: path.display().to_string(),
        })?;
        dated.push((year, path));
    }
    dated.sort_by_key(|(year, _)| *year);
    for pair in dated.windows(2) {
        if pair[0].0 == pair[1].0 {
            log::warn!(
                "'{}' repeats census year {}; values already seen for that year are kept.",
                pair[1].1.display(),
                pair[1].0
            );
        }
    }

    let mut summary = PanelSummary {
        dropped_cohort_rows: population.unknown_cohort_rows,
        ..PanelSummary::default()
    };
    let mut long = LongTable::new();
    progress.on_stage_start(ProgressStage::SnapshotIngest, dated.len());
    for (done, (year, path)) in dated.iter().enumerate() {
        let table = read_table(path)?;
        let counts = ingest_snapshot(&table, *year, &config.id_column, |id| population.contains(id), &mut long);
        log::debug!("Snapshot {} ({}): {:?}", year, path.display(), counts);
        summary.snapshots += 1;
        summary.outside_population_rows += counts.outside_population;
        summary.duplicate_snapshot_rows += counts.duplicate_rows;
        summary.missing_id_rows += counts.missing_id;
        progress.on_stage_advance(ProgressStage::SnapshotIngest, done + 1);
    }
    progress.on_stage_finish(ProgressStage::SnapshotIngest);
    summary.observations = long.observations();

    let records = build_panel(&population, &long, config, &mut summary);
    summary.pupils = records.len();
    Ok((records, summary))
}

pub fn panel_header(span: usize) -> Vec<String> {
    let mut header = vec![PUPIL_ID_COLUMN.to_string(), "cohort".to_string()];
    header.extend(INVARIANT_FIELDS.iter().map(|f| f.name().to_string()));
    header.push(Field::Siblings.name().to_string());
    header.extend(EVER_FIELDS.iter().map(|f| format!("ever_{}", f.name())));
    for field in YEAR_INDEXED_FIELDS {
        header.extend((0..span).map(|y| format!("{}_y{}", field.name(), y)));
    }
    header.extend((0..span.saturating_sub(1)).map(|y| format!("changed_school_y{y}")));
    header.push("school_moves".to_string());
    header
}

fn flag(value: Option<bool>) -> String {
    format_opt(value.map(u8::from))
}

pub fn write_panel_table(path: &Path, span: usize, records: &[PanelRecord]) -> Result<usize, TableError> {
    let header = panel_header(span);
    let rows = records.iter().map(|record| {
        let mut row = Vec::with_capacity(header.len());
        row.push(record.pupil_id.clone());
        row.push(record.cohort.clone());
        row.extend(record.invariant.iter().cloned().map(Option::unwrap_or_default));
        row.push(format_opt(record.nsiblings));
        row.extend(record.ever.iter().map(|v| flag(*v)));
        for slots in &record.by_year {
            row.extend(slots.iter().cloned().map(Option::unwrap_or_default));
        }
        row.extend(record.changed_school.iter().map(|v| flag(*v)));
        row.push(format_opt(record.school_moves));
        row
    });
    write_table(path, &header, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::long::Observation;

    fn observe(long: &mut LongTable, pupil: &str, year: u16, field: Field, value: &str) {
        long.insert(Observation {
            pupil_id: pupil.to_string(),
            year,
            field,
            value: value.to_string(),
        });
    }

    fn population(pairs: &[(&str, &str)]) -> Population {
        Population::from_pairs(
            pairs.iter().map(|(id, cohort)| (Some(*id), Some(*cohort))),
            &PanelConfig::default().cohorts,
        )
    }

    #[test]
    fn test_siblings_resolve_to_maximum_over_sibling_years() {
        let config = PanelConfig::default();
        let mut long = LongTable::new();
        observe(&mut long, "p1", 2008, Field::Siblings, "2");
        observe(&mut long, "p1", 2013, Field::Siblings, "3");
        let mut summary = PanelSummary::default();
        let records = build_panel(&population(&[("p1", "2008")]), &long, &config, &mut summary);
        assert_eq!(records[0].nsiblings, Some(3));
        assert_eq!(summary.sibling_fallbacks, 0);
    }

    #[test]
    fn test_sen_in_one_year_sets_ever_flag() {
        let config = PanelConfig::default();
        let mut long = LongTable::new();
        observe(&mut long, "p1", 2008, Field::Sen, "0");
        observe(&mut long, "p1", 2012, Field::Sen, "1");
        let mut summary = PanelSummary::default();
        let records = build_panel(&population(&[("p1", "2007")]), &long, &config, &mut summary);
        assert_eq!(records[0].ever(Field::Sen), Some(true));
        assert_eq!(records[0].ever(Field::Fsm), None);
    }

    #[test]
    fn test_invariants_prefer_baseline_and_count_fallbacks() {
        let config = PanelConfig::default();
        let mut long = LongTable::new();
        observe(&mut long, "p1", 2009, Field::Sex, "F");
        observe(&mut long, "p1", 2010, Field::Sex, "M");
        observe(&mut long, "p1", 2011, Field::IdaciDecile, "4");
        observe(&mut long, "p1", 2008, Field::IdaciDecile, "9");
        let mut summary = PanelSummary::default();
        let records = build_panel(&population(&[("p1", "2009")]), &long, &config, &mut summary);
        assert_eq!(records[0].invariant(Field::Sex), Some("F"));
        // 2008 precedes the cohort's baseline and is never consulted.
        assert_eq!(records[0].invariant(Field::IdaciDecile), Some("4"));
        assert_eq!(summary.fallback_resolutions, 1);
    }

    #[test]
    fn test_school_moves_use_calendar_window() {
        let config = PanelConfig::default();
        let mut long = LongTable::new();
        for (year, school) in [(2008, "A"), (2009, "A"), (2010, "B"), (2011, "B"), (2012, "C"), (2016, "D")] {
            observe(&mut long, "p1", year, Field::SchoolId, school);
        }
        let mut summary = PanelSummary::default();
        let records = build_panel(&population(&[("p1", "2008"), ("p2", "2009")]), &long, &config, &mut summary);
        let p1 = &records[0];
        assert_eq!(p1.school_id(0), Some("A"));
        assert_eq!(p1.changed_school.len(), 11);
        assert_eq!(p1.changed_school[1], Some(true));
        assert_eq!(p1.changed_school[4], None);
        // Pairs ending 2010, 2011 and 2012 are defined; 2010 and 2012 are moves.
        assert_eq!(p1.school_moves, Some(2));

        let p2 = &records[1];
        assert_eq!(p2.school_moves, None);
        assert_eq!(summary.pupils_without_snapshots, 1);
    }

    #[test]
    fn test_header_matches_rows() {
        let config = PanelConfig::default();
        let span = config.span_years as usize;
        let header = panel_header(span);
        assert_eq!(header.len(), 2 + 9 + 1 + 6 + 3 * 12 + 11 + 1);
        assert!(header.contains(&"ever_sen_action_plus".to_string()));
        assert!(header.contains(&"school_la_y11".to_string()));
        assert!(header.contains(&"changed_school_y10".to_string()));

        let long = LongTable::new();
        let mut summary = PanelSummary::default();
        let records = build_panel(&population(&[("p1", "2007")]), &long, &config, &mut summary);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.tsv");
        write_panel_table(&path, span, &records).unwrap();
        let table = read_table(&path).unwrap();
        assert_eq!(table.columns().len(), header.len());
        assert_eq!(table.cell(0, "cohort"), Some("2007"));
        assert_eq!(table.cell(0, "school_moves"), None);
    }
}

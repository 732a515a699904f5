//! Long-form census observations: one `(pupil, year, field) -> value` entry per
//! recoded cell. Every later resolution rule is a fold over a bounded year range
//! of one pupil's history.

use super::schema::{Field, SnapshotLayout};
use crate::files::Table;
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::ops::{Bound, RangeInclusive};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub pupil_id: String,
    pub year: u16,
    pub field: Field,
    pub value: String,
}

/// One pupil's observations ordered by field, then calendar year.
#[derive(Debug, Clone, Default)]
pub struct History {
    values: BTreeMap<(Field, u16), String>,
}

impl History {
    pub fn get(&self, field: Field, year: u16) -> Option<&str> {
        self.values.get(&(field, year)).map(String::as_str)
    }

    /// Observed `(year, value)` pairs of `field` within `years`, chronologically.
    pub fn series(&self, field: Field, years: RangeInclusive<u16>) -> impl Iterator<Item = (u16, &str)> {
        let (start, end) = (*years.start(), *years.end());
        let bounds = if start <= end {
            (Bound::Included((field, start)), Bound::Included((field, end)))
        } else {
            (Bound::Included((field, start)), Bound::Excluded((field, start)))
        };
        self.values
            .range(bounds)
            .map(|((_, year), value)| (*year, value.as_str()))
    }

    /// Records a value unless one already exists for that field and year.
    pub fn insert(&mut self, field: Field, year: u16, value: String) -> bool {
        match self.values.entry((field, year)) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LongTable {
    pupils: AHashMap<String, History>,
    observations: usize,
}

impl LongTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, observation: Observation) -> bool {
        let inserted = self
            .pupils
            .entry(observation.pupil_id)
            .or_default()
            .insert(observation.field, observation.year, observation.value);
        if inserted {
            self.observations += 1;
        }
        inserted
    }

    pub fn history(&self, pupil_id: &str) -> Option<&History> {
        self.pupils.get(pupil_id)
    }

    pub fn pupils(&self) -> usize {
        self.pupils.len()
    }

    pub fn observations(&self) -> usize {
        self.observations
    }
}

/// Counts from ingesting one yearly extract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    pub rows: usize,
    pub outside_population: usize,
    pub duplicate_rows: usize,
    pub missing_id: usize,
    pub observations: usize,
}

/// Normalises one yearly extract into `long`. Rows whose pupil is not in the
/// population are skipped; a pupil repeated within the year keeps its first row.
pub fn ingest_snapshot<F>(
    table: &Table,
    year: u16,
    id_column: &str,
    in_population: F,
    long: &mut LongTable,
) -> IngestCounts
where
    F: Fn(&str) -> bool,
{
    let mut counts = IngestCounts::default();
    let Some(id_idx) = table.column_index(id_column) else {
        log::warn!("Snapshot {year} has no '{id_column}' column; skipped.");
        return counts;
    };
    let layout = SnapshotLayout::resolve(table);
    log::debug!("Snapshot {year} supplies fields {:?}", layout.fields());

    let mut seen = AHashSet::with_capacity(table.height());
    for row in 0..table.height() {
        counts.rows += 1;
        let Some(pupil_id) = table.cell_at(row, id_idx) else {
            counts.missing_id += 1;
            continue;
        };
        if !in_population(pupil_id) {
            counts.outside_population += 1;
            continue;
        }
        if !seen.insert(pupil_id) {
            counts.duplicate_rows += 1;
            continue;
        }
        for (field, value) in layout.observe(table, row) {
            let inserted = long.insert(Observation {
                pupil_id: pupil_id.to_string(),
                year,
                field,
                value,
            });
            if inserted {
                counts.observations += 1;
            }
        }
    }
    counts
}

/// The calendar year a snapshot file covers: the last run of exactly four
/// digits in its file name (`census_2008.tsv` -> 2008).
pub fn snapshot_year(path: &Path) -> Option<u16> {
    let name = path.file_name()?.to_string_lossy();
    let bytes = name.as_bytes();
    let mut found = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                found = name[start..i].parse::<u16>().ok();
            }
        } else {
            i += 1;
        }
    }
    found
}

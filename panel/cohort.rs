use super::PanelError;
use crate::files::read_table;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;

/// One of the assessment cohorts and the calendar year of its reception year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortSpec {
    pub label: String,
    pub baseline_year: u16,
}

impl CohortSpec {
    pub fn new(label: &str, baseline_year: u16) -> Self {
        Self {
            label: label.to_string(),
            baseline_year,
        }
    }

    /// Calendar year of academic-year index `index` (0 = reception).
    pub fn calendar_year(&self, index: u16) -> u16 {
        self.baseline_year.saturating_add(index)
    }

    /// Inclusive calendar window of `length` years starting at the baseline.
    pub fn window(&self, length: u16) -> RangeInclusive<u16> {
        self.baseline_year..=self.calendar_year(length.saturating_sub(1))
    }
}

pub fn default_cohorts() -> Vec<CohortSpec> {
    vec![
        CohortSpec::new("2007", 2007),
        CohortSpec::new("2008", 2008),
        CohortSpec::new("2009", 2009),
    ]
}

/// The analysis population: pupils of the baseline cohort table, in file order.
#[derive(Debug, Clone, Default)]
pub struct Population {
    members: Vec<(String, usize)>,
    index: AHashMap<String, usize>,
    pub unknown_cohort_rows: usize,
    pub duplicate_rows: usize,
    pub missing_id_rows: usize,
}

impl Population {
    pub fn from_pairs<'a, I>(pairs: I, cohorts: &[CohortSpec]) -> Self
    where
        I: IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
    {
        let mut population = Population::default();
        for (pupil_id, label) in pairs {
            let Some(pupil_id) = pupil_id else {
                population.missing_id_rows += 1;
                continue;
            };
            let Some(cohort) = label.and_then(|l| cohorts.iter().position(|c| c.label == l)) else {
                population.unknown_cohort_rows += 1;
                continue;
            };
            if population.index.contains_key(pupil_id) {
                population.duplicate_rows += 1;
                continue;
            }
            population.index.insert(pupil_id.to_string(), population.members.len());
            population.members.push((pupil_id.to_string(), cohort));
        }
        population
    }

    pub fn contains(&self, pupil_id: &str) -> bool {
        self.index.contains_key(pupil_id)
    }

    /// `(pupil_id, cohort index)` pairs in population order.
    pub fn members(&self) -> impl Iterator<Item = (&str, usize)> {
        self.members.iter().map(|(id, cohort)| (id.as_str(), *cohort))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Reads the baseline cohort table. Rows naming an unconfigured cohort are
/// dropped and counted; a repeated pupil keeps its first row.
pub fn load_population(
    path: &Path,
    id_column: &str,
    cohort_column: &str,
    cohorts: &[CohortSpec],
) -> Result<Population, PanelError> {
    let table = read_table(path)?;
    let id_idx = table.require_column(path, id_column)?;
    let cohort_idx = table.require_column(path, cohort_column)?;
    let population = Population::from_pairs(
        (0..table.height()).map(|row| (table.cell_at(row, id_idx), table.cell_at(row, cohort_idx))),
        cohorts,
    );
    if population.unknown_cohort_rows > 0 {
        log::warn!(
            "{} rows of '{}' name a cohort outside {:?} and were dropped.",
            population.unknown_cohort_rows,
            path.display(),
            cohorts.iter().map(|c| c.label.as_str()).collect::<Vec<_>>()
        );
    }
    if population.duplicate_rows > 0 {
        log::warn!("{} repeated pupils in the cohort table were skipped.", population.duplicate_rows);
    }
    if population.is_empty() {
        return Err(PanelError::EmptyPopulation {
            path: path.display().to_string(),
        });
    }
    log::info!("Population of {} pupils across {} cohorts.", population.len(), cohorts.len());
    Ok(population)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohort_calendar_alignment() {
        let cohorts = default_cohorts();
        assert_eq!(cohorts[1].calendar_year(0), 2008);
        assert_eq!(cohorts[1].calendar_year(11), 2019);
        assert_eq!(cohorts[0].window(7), 2007..=2013);
        assert_eq!(cohorts[2].window(7), 2009..=2015);
    }

    #[test]
    fn test_population_membership() {
        let cohorts = default_cohorts();
        let population = Population::from_pairs(
            vec![
                (Some("a"), Some("2008")),
                (Some("b"), Some("2010")),
                (Some("a"), Some("2009")),
                (None, Some("2007")),
                (Some("c"), Some("2007")),
            ],
            &cohorts,
        );
        assert_eq!(population.len(), 2);
        assert!(population.contains("a"));
        assert!(!population.contains("b"));
        assert_eq!(population.unknown_cohort_rows, 1);
        assert_eq!(population.duplicate_rows, 1);
        assert_eq!(population.missing_id_rows, 1);
        let members: Vec<(&str, usize)> = population.members().collect();
        assert_eq!(members, vec![("a", 1), ("c", 0)]);
    }
}

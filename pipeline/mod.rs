//! # Stage Orchestration
//!
//! Runs recover → panel → score → merge. Every stage persists its complete
//! output in the output directory, and the next stage reads that file back
//! rather than sharing memory, so a failed stage leaves earlier outputs intact.

pub mod config;
pub mod merge;

pub use config::{ConfigError, PipelineConfig};
pub use merge::{MergeConfig, MergeError, MergeSummary, merge_tables};

use crate::factor::{self, FactorError, FactorModel, ItemMatrix, ModelError, Scorer};
use crate::files::TableError;
use crate::panel::{self, PanelError};
use crate::progress::ProgressObserver;
use crate::recover::{self, Catalogue, OVERALL_COLUMN, RecoveryError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CLEAN_ASSESSMENT_FILE: &str = "assessment_clean.tsv";
pub const RECOVERY_REPORT_FILE: &str = "recovery_report.tsv";
pub const PANEL_FILE: &str = "census_panel.tsv";
pub const SCORES_FILE: &str = "factor_scores.tsv";
pub const MODEL_FILE: &str = "factor_model.toml";
pub const ANALYSIS_FILE: &str = "analysis.tsv";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Recover,
    Panel,
    Score,
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recover => "recover",
            Self::Panel => "panel",
            Self::Score => "score",
            Self::Merge => "merge",
        })
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Recover stage failed: {0}")]
    Recovery(#[from] RecoveryError),
    #[error("Panel stage failed: {0}")]
    Panel(#[from] PanelError),
    #[error("Score stage failed: {0}")]
    Scoring(#[from] FactorError),
    #[error("Score stage failed to persist the model: {0}")]
    Model(#[from] ModelError),
    #[error("Merge stage failed: {0}")]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{stage} stage failed: {source}")]
    Table {
        stage: Stage,
        #[source]
        source: TableError,
    },
    #[error("{stage} stage cannot start: '{}' does not exist. Run the earlier stages first.", path.display())]
    MissingInput { stage: Stage, path: PathBuf },
    #[error("Cannot create output directory '{}': {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file a stage wrote and the number of data rows in it.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: Stage,
    pub path: PathBuf,
    pub rows: usize,
}

/// External inputs of a full run.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub assessment: PathBuf,
    pub cohort: PathBuf,
    pub snapshot_dir: PathBuf,
    pub offending: Option<PathBuf>,
}

fn table_error(stage: Stage) -> impl Fn(TableError) -> PipelineError {
    move |source| PipelineError::Table { stage, source }
}

fn prepare_output_dir(out_dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(out_dir).map_err(|source| PipelineError::OutputDir {
        path: out_dir.to_path_buf(),
        source,
    })
}

fn require_input(stage: Stage, path: PathBuf) -> Result<PathBuf, PipelineError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(PipelineError::MissingInput { stage, path })
    }
}

/// Columns of the cleaned assessment carried into the analysis table.
pub fn assessment_total_columns(catalogue: &Catalogue) -> Vec<String> {
    let mut columns: Vec<String> = catalogue.scales().iter().map(|s| s.total_column.clone()).collect();
    columns.extend(catalogue.domains().iter().map(|d| d.total_column.clone()));
    columns.push(OVERALL_COLUMN.to_string());
    columns.push("missing_items".to_string());
    columns.push("mismatches".to_string());
    columns
}

pub fn run_recover(
    config: &PipelineConfig,
    assessment: &Path,
    out_dir: &Path,
) -> Result<Vec<StageOutput>, PipelineError> {
    prepare_output_dir(out_dir)?;
    let catalogue = Catalogue::eyfsp();
    let (records, report) = recover::load_and_recover(assessment, &config.recovery, &catalogue)?;
    report.log_summary();

    let clean_path = out_dir.join(CLEAN_ASSESSMENT_FILE);
    let rows = recover::write_clean_table(&clean_path, &catalogue, &records).map_err(table_error(Stage::Recover))?;
    let report_path = out_dir.join(RECOVERY_REPORT_FILE);
    let report_rows = recover::write_report(&report_path, &report).map_err(table_error(Stage::Recover))?;
    Ok(vec![
        StageOutput {
            stage: Stage::Recover,
            path: clean_path,
            rows,
        },
        StageOutput {
            stage: Stage::Recover,
            path: report_path,
            rows: report_rows,
        },
    ])
}

pub fn run_panel(
    config: &PipelineConfig,
    cohort: &Path,
    snapshot_dir: &Path,
    out_dir: &Path,
    progress: &mut dyn ProgressObserver,
) -> Result<Vec<StageOutput>, PipelineError> {
    prepare_output_dir(out_dir)?;
    let (records, summary) = panel::assemble(&config.panel, cohort, snapshot_dir, progress)?;
    summary.log_summary();

    let path = out_dir.join(PANEL_FILE);
    let rows = panel::write_panel_table(&path, usize::from(config.panel.span_years), &records)
        .map_err(table_error(Stage::Panel))?;
    Ok(vec![StageOutput {
        stage: Stage::Panel,
        path,
        rows,
    }])
}

/// Estimates the factor model on the cleaned assessment and scores every
/// assessed pupil with it.
pub fn run_score(
    config: &PipelineConfig,
    out_dir: &Path,
    progress: &mut dyn ProgressObserver,
) -> Result<Vec<StageOutput>, PipelineError> {
    let clean_path = require_input(Stage::Score, out_dir.join(CLEAN_ASSESSMENT_FILE))?;
    let catalogue = Catalogue::eyfsp();
    let records = recover::read_clean_table(&clean_path, &catalogue)?;
    let matrix = ItemMatrix::from_assessments(&records, &catalogue, &config.factor.items())?;

    let model = factor::fit_model(&matrix, &config.factor, progress)?;
    model.log_summary();
    let model_path = out_dir.join(MODEL_FILE);
    model.save(&model_path)?;
    log::info!("Factor model saved to '{}'.", model_path.display());

    let scores = score_with(&model, &matrix, progress)?;
    let scores_path = out_dir.join(SCORES_FILE);
    let rows = factor::write_scores(&scores_path, &scores).map_err(table_error(Stage::Score))?;
    Ok(vec![
        StageOutput {
            stage: Stage::Score,
            path: model_path,
            rows: model.items.len(),
        },
        StageOutput {
            stage: Stage::Score,
            path: scores_path,
            rows,
        },
    ])
}

fn score_with(
    model: &FactorModel,
    matrix: &ItemMatrix,
    progress: &mut dyn ProgressObserver,
) -> Result<Vec<factor::FactorScore>, FactorError> {
    let mut scorer = Scorer::from_model(model)?;
    scorer.score_matrix(matrix, progress)
}

pub fn run_merge(
    config: &PipelineConfig,
    offending: Option<&Path>,
    out_dir: &Path,
) -> Result<Vec<StageOutput>, PipelineError> {
    let panel_path = require_input(Stage::Merge, out_dir.join(PANEL_FILE))?;
    let clean_path = require_input(Stage::Merge, out_dir.join(CLEAN_ASSESSMENT_FILE))?;
    let scores_path = require_input(Stage::Merge, out_dir.join(SCORES_FILE))?;
    if offending.is_none() {
        log::warn!("No offending-outcome extract given; the analysis table carries no outcome columns.");
    }

    let path = out_dir.join(ANALYSIS_FILE);
    let summary = merge_tables(
        &panel_path,
        &clean_path,
        &assessment_total_columns(&Catalogue::eyfsp()),
        &scores_path,
        offending,
        &config.merge,
        &path,
    )?;
    Ok(vec![StageOutput {
        stage: Stage::Merge,
        path,
        rows: summary.rows,
    }])
}

/// Runs every stage in order, stopping at the first failure.
pub fn run_all(
    config: &PipelineConfig,
    inputs: &PipelineInputs,
    out_dir: &Path,
    progress: &mut dyn ProgressObserver,
) -> Result<Vec<StageOutput>, PipelineError> {
    let mut outputs = run_recover(config, &inputs.assessment, out_dir)?;
    outputs.extend(run_panel(config, &inputs.cohort, &inputs.snapshot_dir, out_dir, progress)?);
    outputs.extend(run_score(config, out_dir, progress)?);
    outputs.extend(run_merge(config, inputs.offending.as_deref(), out_dir)?);
    Ok(outputs)
}

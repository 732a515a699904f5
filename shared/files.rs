//! # Flat-file table I/O
//!
//! Every stage of the pipeline reads complete tab-separated tables and writes
//! complete tab-separated tables. Reading goes through the `polars` CSV reader
//! with schema inference switched off, so every cell arrives as text and the
//! stages decide for themselves what a token means. Writing goes through a
//! temporary sibling file that is renamed into place once fully flushed, so a
//! table on disk is either absent or complete.

use ahash::AHashMap;
use flate2::read::MultiGzDecoder;
use natord::compare;
use polars::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identifier column used by every table this crate writes.
pub const PUPIL_ID_COLUMN: &str = "pupil_id";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV writer error on '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("The required column '{column}' was not found in '{path}'.")]
    ColumnNotFound { path: PathBuf, column: String },
    #[error("Row {row} of '{path}' has {found} cells, but the header declares {expected}.")]
    RaggedRow {
        path: PathBuf,
        row: usize,
        found: usize,
        expected: usize,
    },
}

impl TableError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A fully materialised text table. Missing cells are `None`.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    index: AHashMap<String, usize>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Builds a table from a header and row-major cells. Empty or whitespace-only
    /// cells are normalised to missing.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(normalise_cell).collect())
            .collect();
        Self {
            columns,
            index,
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The text of one cell, or `None` when the column is absent or the cell is missing.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.cell_at(row, idx)
    }

    pub fn cell_at(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .and_then(|cell| cell.as_deref())
    }

    /// Fails with `ColumnNotFound` when `column` is not part of the header.
    pub fn require_column(&self, path: &Path, column: &str) -> Result<usize, TableError> {
        self.column_index(column)
            .ok_or_else(|| TableError::ColumnNotFound {
                path: path.to_path_buf(),
                column: column.to_string(),
            })
    }
}

fn normalise_cell(cell: Option<String>) -> Option<String> {
    cell.and_then(|text| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == text.len() {
            Some(text)
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn strip_gz(path: &Path) -> (bool, PathBuf) {
    if path.extension().is_some_and(|ext| ext == "gz") {
        (true, path.with_extension(""))
    } else {
        (false, path.to_path_buf())
    }
}

fn read_bytes(path: &Path) -> Result<(Vec<u8>, u8), TableError> {
    let (compressed, logical) = strip_gz(path);
    let separator = if logical.extension().is_some_and(|ext| ext == "csv") {
        b','
    } else {
        b'\t'
    };

    let file = File::open(path).map_err(|e| TableError::io(path, e))?;
    let mut reader: Box<dyn Read> = if compressed {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| TableError::io(path, e))?;
    Ok((bytes, separator))
}

/// Reads a `.tsv`, `.csv` or gzip-compressed variant of either into a text table.
pub fn read_table(path: &Path) -> Result<Table, TableError> {
    let (bytes, separator) = read_bytes(path)?;
    log::debug!("Read {} bytes from '{}'", bytes.len(), path.display());

    let df = CsvReader::new(Cursor::new(bytes))
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let height = df.height();
    let mut rows: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(columns.len()); height];

    for name in &columns {
        let series = df.column(name.as_str())?.as_materialized_series();
        let casted = series.cast(&DataType::String)?;
        let values = casted.str()?;
        for (row, value) in rows.iter_mut().zip(values.into_iter()) {
            row.push(value.map(str::to_string));
        }
    }

    log::info!(
        "Loaded '{}': {} rows, {} columns",
        path.display(),
        height,
        columns.len()
    );
    Ok(Table::from_rows(columns, rows))
}

/// Lists the table files inside `dir` in natural order (`census_9` before `census_10`).
pub fn list_tables(dir: &Path) -> Result<Vec<PathBuf>, TableError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TableError::io(dir, e))? {
        let entry = entry.map_err(|e| TableError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let (_, logical) = strip_gz(&path);
        let is_table = logical
            .extension()
            .is_some_and(|ext| ext == "tsv" || ext == "csv" || ext == "txt");
        if is_table {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(paths)
}

/// Formats an optional float for output; missing becomes an empty cell.
pub fn format_float(value: Option<f64>, buffer: &mut ryu::Buffer) -> String {
    match value {
        Some(v) if v.is_finite() => buffer.format(v).to_string(),
        _ => String::new(),
    }
}

/// Formats an optional displayable value; missing becomes an empty cell.
pub fn format_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes a complete tab-separated table. The rows are streamed into a temporary
/// sibling that replaces `path` only after it has been flushed and synced.
pub fn write_table<I>(path: &Path, header: &[String], rows: I) -> Result<usize, TableError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TableError::io(parent, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.partial"));

    let write_result = (|| -> Result<usize, TableError> {
        let file = File::create(&temp_path).map_err(|e| TableError::io(&temp_path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(BufWriter::new(file));
        let csv_err = |source| TableError::Csv {
            path: temp_path.clone(),
            source,
        };

        writer.write_record(header).map_err(csv_err)?;
        let mut written = 0usize;
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != header.len() {
                return Err(TableError::RaggedRow {
                    path: path.to_path_buf(),
                    row: i + 1,
                    found: row.len(),
                    expected: header.len(),
                });
            }
            writer.write_record(&row).map_err(csv_err)?;
            written += 1;
        }

        writer.flush().map_err(|e| TableError::io(&temp_path, e))?;
        let buffered = writer
            .into_inner()
            .map_err(|e| TableError::io(&temp_path, std::io::Error::other(e.error().to_string())))?;
        let file = buffered
            .into_inner()
            .map_err(|e| TableError::io(&temp_path, e.into_error()))?;
        file.sync_all().map_err(|e| TableError::io(&temp_path, e))?;
        Ok(written)
    })();

    match write_result {
        Ok(written) => {
            fs::rename(&temp_path, path).map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                TableError::io(path, e)
            })?;
            log::info!("Wrote {} rows to '{}'", written, path.display());
            Ok(written)
        }
        Err(err) => {
            let _ = fs::remove_file(&temp_path);
            Err(err)
        }
    }
}

//! Delimited-file artifacts between stages.
//!
//! Every intermediate file is comma-delimited UTF-8 with a header row and
//! no index column. Files are written with the column list the dataset was
//! read with, so a drifted header row stays visible to later stages.

use std::fs;
use std::io::Write;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dataset::{Dataset, Record};
use crate::error::{PipelineError, Result};
use crate::mapper::{map_headers, MappingReport};
use crate::schema::{canonical_columns, Field};

/// Cells that failed to parse are listed individually up to this many.
const MAX_REPORTED_CELL_ERRORS: usize = 5;

/// Header row plus untyped rows, before any column mapping.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

/// What happened while turning a raw table into typed records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadReport {
    pub rows: usize,
    /// Cells whose content did not parse for their column type.
    pub invalid_cells: usize,
    /// Columns outside the canonical schema; their values are not carried.
    pub ignored_columns: Vec<String>,
}

/// Decode file bytes as UTF-8, dropping a leading BOM.
///
/// Bytes that are not valid UTF-8 fall back to Windows-1252, the encoding
/// spreadsheet exports tend to produce on Windows.
pub fn decode(bytes: &[u8]) -> String {
    let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(bytes);
    if !had_errors {
        return text.into_owned();
    }

    warn!("input is not valid UTF-8, decoding as Windows-1252");
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Parse delimited content into a [`RawTable`]. Short rows are tolerated;
/// missing trailing cells read as blank.
pub fn parse_table(content: &str) -> std::result::Result<RawTable, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::None)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(RawTable { headers, rows })
}

/// Read a delimited file from disk.
pub fn read_table(path: &Path) -> Result<RawTable> {
    if !path.exists() {
        return Err(PipelineError::InputMissing(path.to_path_buf()));
    }

    let bytes = fs::read(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = decode(&bytes);

    let table = parse_table(&content).map_err(|source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        path = %path.display(),
        rows = table.rows.len(),
        columns = table.headers.len(),
        "file loaded"
    );
    Ok(table)
}

impl RawTable {
    /// Convert rows into typed records. Headers must already be canonical
    /// (see [`map_headers`]); any other column is ignored.
    pub fn into_dataset(self) -> (Dataset, ReadReport) {
        let mut report = ReadReport {
            rows: self.rows.len(),
            ..Default::default()
        };

        let mut positions: Vec<(usize, Field)> = Vec::new();
        for (idx, header) in self.headers.iter().enumerate() {
            match Field::from_canonical(header) {
                Some(field) if !positions.iter().any(|(_, f)| *f == field) => {
                    positions.push((idx, field));
                }
                _ => report.ignored_columns.push(header.clone()),
            }
        }

        let mut cell_errors = Vec::new();
        let records: Vec<Record> = self
            .rows
            .iter()
            .enumerate()
            .map(|(row_idx, row)| {
                let mut record = Record::default();
                for (col_idx, field) in &positions {
                    let raw = row.get(*col_idx).unwrap_or("");
                    if let Err(e) = record.set_cell(*field, raw) {
                        // +2: 1-indexed plus header line
                        cell_errors.push(format!("line {}: {}", row_idx + 2, e));
                    }
                }
                record
            })
            .collect();

        report.invalid_cells = cell_errors.len();
        if !cell_errors.is_empty() {
            warn!(count = cell_errors.len(), "cells could not be parsed and were left empty");
            for err in cell_errors.iter().take(MAX_REPORTED_CELL_ERRORS) {
                warn!("  {}", err);
            }
            if cell_errors.len() > MAX_REPORTED_CELL_ERRORS {
                warn!("  ... and {} more", cell_errors.len() - MAX_REPORTED_CELL_ERRORS);
            }
        }
        if !report.ignored_columns.is_empty() {
            debug!(columns = ?report.ignored_columns, "ignoring non-canonical columns");
        }

        (Dataset::new(self.headers, records), report)
    }
}

/// Read a file, map its headers and type its rows.
pub fn read_dataset(path: &Path) -> Result<(Dataset, MappingReport, ReadReport)> {
    let mut table = read_table(path)?;
    let (headers, mapping) = map_headers(&table.headers);
    table.headers = headers;
    let (dataset, read) = table.into_dataset();
    Ok((dataset, mapping, read))
}

/// Header row for `dataset`: its own columns, or the canonical ones when it
/// has none.
fn output_columns(dataset: &Dataset) -> Vec<&str> {
    if dataset.columns.is_empty() {
        canonical_columns()
    } else {
        dataset.columns.iter().map(String::as_str).collect()
    }
}

/// Serialize a dataset under its own header row. Columns outside the
/// canonical schema are written empty; their values are not carried.
pub fn write_to<W: Write>(writer: W, dataset: &Dataset) -> std::result::Result<(), csv::Error> {
    let columns = output_columns(dataset);
    let fields: Vec<Option<Field>> = columns.iter().map(|c| Field::from_canonical(c)).collect();

    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record(&columns)?;
    for record in &dataset.records {
        writer.write_record(
            fields
                .iter()
                .map(|f| f.map(|f| record.cell(f)).unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a dataset to `path`, creating parent directories.
pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PipelineError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let file = fs::File::create(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_to(file, dataset).map_err(|source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), rows = dataset.len(), "dataset written");
    Ok(())
}

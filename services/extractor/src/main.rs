//! Extractor - Converts the statistics workbook into the raw CSV artifact
//!
//! Reads a single fixed sheet and writes it unchanged apart from number
//! formatting: integral numbers lose their `.0`, error cells become empty.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_SHEET: &str = "Country";

#[derive(Parser, Debug)]
#[command(name = "extractor", about = "Extracts the workbook sheet into a raw CSV file")]
struct Args {
    /// Workbook to read (xls, xlsx, xlsb, ods)
    #[arg(long)]
    input: PathBuf,

    /// CSV file to write
    #[arg(long, default_value = "data/raw/renewable_energy_data.csv")]
    output: PathBuf,

    /// Sheet holding the per-country rows
    #[arg(long, default_value = DEFAULT_SHEET)]
    sheet: String,
}

/// Render one cell as a CSV field.
fn cell_to_field(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // 2^53: beyond this f64 no longer holds every integer
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            format!("{}", *f as i64)
        }
        Data::Float(f) => f.to_string(),
        other => other.to_string(),
    }
}

/// Serialize every row of the sheet, header included.
fn range_to_csv(range: &Range<Data>) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in range.rows() {
        writer.write_record(row.iter().map(cell_to_field))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV buffer: {}", e))
}

fn read_sheet(input: &Path, sheet: &str) -> Result<Range<Data>> {
    if !input.exists() {
        bail!("Input file not found: {}", input.display());
    }

    let mut workbook = open_workbook_auto(input)
        .with_context(|| format!("Failed to open workbook {}", input.display()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    if !sheet_names.iter().any(|name| name == sheet) {
        bail!(
            "Sheet '{}' not found in {} (available: {})",
            sheet,
            input.display(),
            sheet_names.join(", ")
        );
    }

    let range = workbook
        .worksheet_range(sheet)
        .with_context(|| format!("Failed to read sheet '{}'", sheet))?;
    if range.is_empty() {
        bail!("Sheet '{}' is empty", sheet);
    }
    Ok(range)
}

fn extract(input: &Path, output: &Path, sheet: &str) -> Result<usize> {
    let range = read_sheet(input, sheet)?;
    let (rows, columns) = range.get_size();
    info!(sheet, rows, columns, "sheet loaded");

    if let Some(first) = range.rows().nth(1) {
        debug!(row = ?first.iter().map(cell_to_field).collect::<Vec<_>>(), "first data row");
    }
    if let Some(last) = range.rows().last() {
        debug!(row = ?last.iter().map(cell_to_field).collect::<Vec<_>>(), "last row");
    }

    let bytes = range_to_csv(&range)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(output, bytes).with_context(|| format!("Failed to write {}", output.display()))?;

    info!(output = %output.display(), rows = rows.saturating_sub(1), "raw data written");
    Ok(rows.saturating_sub(1))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    info!(input = %args.input.display(), sheet = %args.sheet, "starting extraction");
    extract(&args.input, &args.output, &args.sheet)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::CellErrorType;

    // -------------------------------------------------------------------------
    // CELL RENDERING
    // -------------------------------------------------------------------------

    #[test]
    fn test_integral_floats_lose_fraction() {
        assert_eq!(cell_to_field(&Data::Float(2020.0)), "2020");
        assert_eq!(cell_to_field(&Data::Float(-3.0)), "-3");
        assert_eq!(cell_to_field(&Data::Float(123.456)), "123.456");
        assert_eq!(cell_to_field(&Data::Int(76)), "76");
    }

    #[test]
    fn test_empty_and_error_cells() {
        assert_eq!(cell_to_field(&Data::Empty), "");
        assert_eq!(cell_to_field(&Data::Error(CellErrorType::NA)), "");
        assert_eq!(cell_to_field(&Data::String(" Brazil ".into())), " Brazil ");
    }

    // -------------------------------------------------------------------------
    // SHEET → CSV
    // -------------------------------------------------------------------------

    #[test]
    fn test_range_to_csv() {
        let mut range = Range::new((0, 0), (2, 2));
        range.set_value((0, 0), Data::String("Country".into()));
        range.set_value((0, 1), Data::String("Year".into()));
        range.set_value((0, 2), Data::String("Electricity Generation (GWh)".into()));
        range.set_value((1, 0), Data::String("Brazil".into()));
        range.set_value((1, 1), Data::Float(2020.0));
        range.set_value((1, 2), Data::Float(123.456));
        range.set_value((2, 0), Data::String("Chile, Rep.".into()));
        range.set_value((2, 1), Data::Float(2021.0));

        let csv = String::from_utf8(range_to_csv(&range).unwrap()).unwrap();
        assert_eq!(
            csv,
            "Country,Year,Electricity Generation (GWh)\nBrazil,2020,123.456\n\"Chile, Rep.\",2021,\n"
        );
    }

    #[test]
    fn test_missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("raw").join("out.csv");

        let err = extract(&dir.path().join("missing.xlsx"), &output, DEFAULT_SHEET).unwrap_err();
        assert!(err.to_string().contains("Input file not found"));
        assert!(!output.exists());
    }

    #[test]
    fn test_unreadable_workbook_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.xlsx");
        fs::write(&input, b"not a workbook").unwrap();
        let output = dir.path().join("out.csv");

        assert!(extract(&input, &output, DEFAULT_SHEET).is_err());
        assert!(!output.exists());
    }
}

//! Stage sequencing: read → map → normalize → validate → load, with the
//! intermediate artifacts written between stages.

use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn, Instrument};

use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};
use crate::io::{read_dataset, write_dataset, ReadReport};
use crate::loader::{load, LoadReport};
use crate::mapper::MappingReport;
use crate::report::RunReport;
use crate::transform::{normalize_numeric, normalize_text, NumericReport, TextReport};
use crate::validation::{validate, FailurePolicy, Thresholds, ValidationReport};
use crate::warehouse::Warehouse;

/// Stage artifacts relative to the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub raw: PathBuf,
    pub text: PathBuf,
    pub clean: PathBuf,
    pub final_: PathBuf,
}

impl Artifacts {
    pub fn under(data_dir: &Path) -> Self {
        let processed = data_dir.join("processed");
        Self {
            raw: data_dir.join("raw").join("renewable_energy_data.csv"),
            text: processed.join("renewable_energy_data_text.csv"),
            clean: processed.join("renewable_energy_data_clean.csv"),
            final_: processed.join("renewable_energy_data_final.csv"),
        }
    }
}

/// Output of the transform stages.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub dataset: Dataset,
    pub mapping: MappingReport,
    pub read: ReadReport,
    pub text: TextReport,
    pub numeric: NumericReport,
}

/// Map and normalize a raw extract, writing the text-normalized and the
/// clean artifact.
pub fn transform_file(input: &Path, text_output: &Path, clean_output: &Path) -> Result<Transformed> {
    let (dataset, mapping, read) = read_dataset(input)?;

    let (dataset, text) = info_span!("text").in_scope(|| normalize_text(dataset));
    write_dataset(text_output, &dataset)?;

    let (dataset, numeric) = info_span!("numeric").in_scope(|| normalize_numeric(dataset));
    write_dataset(clean_output, &dataset)?;

    info!(
        rows_in = read.rows,
        rows_out = dataset.len(),
        "transform complete"
    );
    Ok(Transformed {
        dataset,
        mapping,
        read,
        text,
        numeric,
    })
}

/// Turn `Fail` findings into an error when the policy requires it.
pub fn enforce(report: &ValidationReport, policy: FailurePolicy) -> Result<()> {
    if report.permits_load(policy) {
        if report.has_failures() {
            warn!(
                failed = report.failures().count(),
                "validation failures ignored under advisory policy"
            );
        }
        return Ok(());
    }
    Err(PipelineError::ValidationFailed(report.failure_messages()))
}

/// Validate an artifact and, when the policy allows, write it as the load
/// input. The dataset is written unchanged.
pub fn validate_file(
    input: &Path,
    output: &Path,
    thresholds: &Thresholds,
    policy: FailurePolicy,
) -> Result<ValidationReport> {
    let (dataset, _, _) = read_dataset(input)?;
    let report = validate(&dataset, thresholds);
    enforce(&report, policy)?;
    write_dataset(output, &dataset)?;
    Ok(report)
}

/// Load a validated artifact into the warehouse.
pub async fn load_file<W: Warehouse + ?Sized>(warehouse: &mut W, input: &Path) -> Result<LoadReport> {
    let (dataset, _, _) = read_dataset(input)?;
    Ok(load(warehouse, &dataset).await?)
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub artifacts: Artifacts,
    pub thresholds: Thresholds,
    pub policy: FailurePolicy,
}

/// Every stage end to end. Without a warehouse the run stops after writing
/// the final artifact. Stage reports accumulate in `report` whether or not
/// the run succeeds.
pub async fn run<W: Warehouse + ?Sized>(
    options: &RunOptions,
    warehouse: Option<&mut W>,
    report: &mut RunReport,
) -> Result<()> {
    let span = info_span!("run", run_id = %report.run_id);
    async move {
        info!(input = %options.input.display(), policy = ?options.policy, "pipeline started");

        let transformed = info_span!("transform").in_scope(|| {
            transform_file(
                &options.input,
                &options.artifacts.text,
                &options.artifacts.clean,
            )
        })?;
        report.mapping = Some(transformed.mapping);
        report.read = Some(transformed.read);
        report.text = Some(transformed.text);
        report.numeric = Some(transformed.numeric);
        let dataset = transformed.dataset;

        let validation =
            info_span!("validate").in_scope(|| validate(&dataset, &options.thresholds));
        report.validation = Some(validation.clone());
        enforce(&validation, options.policy)?;
        write_dataset(&options.artifacts.final_, &dataset)?;

        match warehouse {
            Some(warehouse) => {
                let loaded = load(warehouse, &dataset).await?;
                report.load = Some(loaded);
                info!(facts = loaded.facts, "pipeline finished");
            }
            None => info!("dry run, warehouse not touched"),
        }
        Ok(())
    }
    .instrument(span)
    .await
}

//! Pipeline CLI - transforms, validates and loads renewable energy statistics

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use pipeline::config::Config;
use pipeline::logging;
use pipeline::pipeline::{load_file, run, transform_file, validate_file, Artifacts, RunOptions};
use pipeline::report::RunReport;
use pipeline::schema::verify_mapping;
use pipeline::validation::{FailurePolicy, Thresholds};
use pipeline::warehouse::PgWarehouse;

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Loads renewable energy statistics into the warehouse")]
struct Args {
    /// Root of the raw/ and processed/ artifacts (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Also append log lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Map headers and normalize text and numeric fields
    Transform {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Clean (numeric-normalized) artifact
        #[arg(long)]
        output: Option<PathBuf>,
        /// Text-normalized artifact
        #[arg(long)]
        text_output: Option<PathBuf>,
    },
    /// Run the data-quality checks and write the load input
    Validate {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Report failed checks but do not stop
        #[arg(long, default_value = "false")]
        allow_validation_errors: bool,
    },
    /// Truncate the warehouse and load the validated dataset
    Load {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// All stages end to end
    Run {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Stop before touching the warehouse
        #[arg(long, default_value = "false")]
        dry_run: bool,
        /// Report failed checks but load anyway
        #[arg(long, default_value = "false")]
        allow_validation_errors: bool,
        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Create the warehouse tables
    InitDb,
    /// Check warehouse connectivity
    CheckDb,
}

fn policy(allow_validation_errors: bool) -> FailurePolicy {
    if allow_validation_errors {
        FailurePolicy::Advisory
    } else {
        FailurePolicy::Strict
    }
}

/// Input, text and clean paths for `transform`, defaulting to the artifacts.
fn transform_paths(
    artifacts: &Artifacts,
    input: Option<PathBuf>,
    text_output: Option<PathBuf>,
    output: Option<PathBuf>,
) -> (PathBuf, PathBuf, PathBuf) {
    (
        input.unwrap_or_else(|| artifacts.raw.clone()),
        text_output.unwrap_or_else(|| artifacts.text.clone()),
        output.unwrap_or_else(|| artifacts.clean.clone()),
    )
}

fn connect(config: &Config) -> Result<PgWarehouse> {
    PgWarehouse::connect(
        config.db_url()?,
        config.db_max_connections,
        config.db_connect_timeout,
    )
    .context("Failed to configure database pool")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let _log_guard = logging::init(args.log_file.as_deref())?;

    if let Err(defects) = verify_mapping() {
        for defect in &defects {
            error!("{}", defect);
        }
        bail!("column mapping is inconsistent ({} defects)", defects.len());
    }

    let config = Config::from_env()?;
    let data_dir = args.data_dir.unwrap_or_else(|| config.data_dir.clone());
    let artifacts = Artifacts::under(&data_dir);
    let thresholds = Thresholds::default();

    match args.command {
        Command::Transform {
            input,
            output,
            text_output,
        } => {
            let (input, text_output, output) =
                transform_paths(&artifacts, input, text_output, output);
            let transformed = transform_file(&input, &text_output, &output)
                .with_context(|| format!("Transform failed for {}", input.display()))?;
            info!(rows = transformed.dataset.len(), output = %output.display(), "transform done");
        }
        Command::Validate {
            input,
            output,
            allow_validation_errors,
        } => {
            let input = input.unwrap_or_else(|| artifacts.clean.clone());
            let output = output.unwrap_or_else(|| artifacts.final_.clone());
            let report = validate_file(
                &input,
                &output,
                &thresholds,
                policy(allow_validation_errors),
            )?;
            info!(
                warnings = report.warnings().count(),
                failures = report.failures().count(),
                "validation done"
            );
        }
        Command::Load { input } => {
            let input = input.unwrap_or_else(|| artifacts.final_.clone());
            let mut warehouse = connect(&config)?;
            let report = load_file(&mut warehouse, &input).await?;
            info!(facts = report.facts, "load done");
        }
        Command::Run {
            input,
            dry_run,
            allow_validation_errors,
            report: report_path,
        } => {
            let options = RunOptions {
                input: input.unwrap_or_else(|| artifacts.raw.clone()),
                artifacts,
                thresholds,
                policy: policy(allow_validation_errors),
            };
            let mut report = RunReport::new(options.policy);

            let outcome = if dry_run {
                run::<PgWarehouse>(&options, None, &mut report).await
            } else {
                let mut warehouse = connect(&config)?;
                run(&options, Some(&mut warehouse), &mut report).await
            };
            report.finish(&outcome);

            if let Some(path) = report_path {
                report
                    .write_json(&path)
                    .with_context(|| format!("Failed to write run report {}", path.display()))?;
                info!(path = %path.display(), "run report written");
            }
            outcome.context("Pipeline run failed")?;
        }
        Command::InitDb => {
            let warehouse = connect(&config)?;
            warehouse
                .init_schema()
                .await
                .context("Failed to apply warehouse schema")?;
        }
        Command::CheckDb => {
            let warehouse = connect(&config)?;
            let version = warehouse
                .server_version()
                .await
                .context("Warehouse connection failed")?;
            println!("Connected: {}", version);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform_args(argv: &[&str]) -> (Option<PathBuf>, Option<PathBuf>, Option<PathBuf>) {
        match Args::try_parse_from(argv).unwrap().command {
            Command::Transform {
                input,
                output,
                text_output,
            } => (input, text_output, output),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_transform_defaults_to_artifacts() {
        let artifacts = Artifacts::under(std::path::Path::new("data"));
        let (input, text_output, output) = transform_args(&["pipeline", "transform"]);
        assert_eq!(
            transform_paths(&artifacts, input, text_output, output),
            (artifacts.raw.clone(), artifacts.text.clone(), artifacts.clean.clone())
        );
    }

    #[test]
    fn test_transform_output_flags_move_both_artifacts() {
        let artifacts = Artifacts::under(std::path::Path::new("data"));
        let (input, text_output, output) = transform_args(&[
            "pipeline",
            "transform",
            "--output",
            "out/clean.csv",
            "--text-output",
            "out/text.csv",
        ]);
        let (_, text, clean) = transform_paths(&artifacts, input, text_output, output);
        assert_eq!(text, PathBuf::from("out/text.csv"));
        assert_eq!(clean, PathBuf::from("out/clean.csv"));
    }
}

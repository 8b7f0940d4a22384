//! Machine-readable summary of one pipeline run.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::io::ReadReport;
use crate::loader::LoadReport;
use crate::mapper::MappingReport;
use crate::transform::{NumericReport, TextReport};
use crate::validation::{FailurePolicy, ValidationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every stage up to validation ran; the warehouse was not touched.
    DryRun,
    Loaded,
    Failed,
}

/// Stage reports collected as the run progresses. Stages that did not run
/// stay `None`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub policy: FailurePolicy,
    pub mapping: Option<MappingReport>,
    pub read: Option<ReadReport>,
    pub text: Option<TextReport>,
    pub numeric: Option<NumericReport>,
    pub validation: Option<ValidationReport>,
    pub load: Option<LoadReport>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            policy,
            mapping: None,
            read: None,
            text: None,
            numeric: None,
            validation: None,
            load: None,
            error: None,
        }
    }

    /// Stamp the end time and final status from the run's result.
    pub fn finish<T>(&mut self, outcome: &Result<T>) {
        self.finished_at = Some(Utc::now());
        match outcome {
            Ok(_) if self.load.is_some() => self.status = RunStatus::Loaded,
            Ok(_) => self.status = RunStatus::DryRun,
            Err(err) => {
                self.status = RunStatus::Failed;
                self.error = Some(err.to_string());
            }
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let io_err = |source: std::io::Error| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = self.to_json().map_err(|e| io_err(e.into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, json).map_err(io_err)
    }
}

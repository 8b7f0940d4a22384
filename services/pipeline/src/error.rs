use std::path::PathBuf;

use crate::loader::LoadState;

/// Errors surfaced by a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Input artifact does not exist.
    #[error("input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    /// Artifact exists but could not be read or written.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Delimited file is malformed.
    #[error("csv error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// At least one check failed and the run uses the strict policy.
    #[error("validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Failures talking to the warehouse store.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no open transaction")]
    NoTransaction,

    /// A row was rejected by a table constraint.
    #[error("constraint violation on {table}: {detail}")]
    Constraint { table: &'static str, detail: String },

    #[error("warehouse unreachable: {0}")]
    Unreachable(String),
}

/// A load that aborted; the warehouse transaction has been rolled back.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("load aborted during {state}: {source}")]
    Warehouse {
        state: LoadState,
        #[source]
        source: WarehouseError,
    },

    /// A record without a year cannot form a time dimension row.
    #[error("load aborted during {}: row {row} has no year", LoadState::LoadDimensions)]
    MissingYear { row: usize },

    /// A record's natural key was not found in a dimension read back from the
    /// warehouse.
    #[error("load aborted during {}: row {row} has no {dimension} key", LoadState::ResolveKeys)]
    UnresolvedKey { row: usize, dimension: &'static str },
}

impl LoadError {
    pub(crate) fn at(state: LoadState) -> impl FnOnce(WarehouseError) -> LoadError {
        move |source| LoadError::Warehouse { state, source }
    }

    /// State the loader was in when it aborted.
    pub fn state(&self) -> LoadState {
        match self {
            LoadError::Warehouse { state, .. } => *state,
            LoadError::MissingYear { .. } => LoadState::LoadDimensions,
            LoadError::UnresolvedKey { .. } => LoadState::ResolveKeys,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

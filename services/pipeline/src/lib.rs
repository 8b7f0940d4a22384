//! Renewable energy statistics ETL: header mapping, text and numeric
//! normalization, a data-quality gate, and a truncate-and-reload into a
//! Postgres star schema.

pub mod config;
pub mod dataset;
pub mod error;
pub mod io;
pub mod loader;
pub mod logging;
pub mod mapper;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod transform;
pub mod validation;
pub mod warehouse;

pub use dataset::{BusinessKey, Dataset, Record};
pub use error::{LoadError, PipelineError, Result, WarehouseError};
pub use loader::{load, LoadReport, LoadState};
pub use validation::{validate, FailurePolicy, Thresholds, ValidationReport};

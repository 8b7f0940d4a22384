//! Text and numeric normalization stages.
//!
//! Both stages take ownership of the dataset and hand it back with rows
//! removed but never reordered.

pub mod numeric;
pub mod text;

pub use numeric::{normalize_numeric, round_metric, NumericReport};
pub use text::{normalize_text, TextReport};

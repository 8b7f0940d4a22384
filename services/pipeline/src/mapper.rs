//! Raw header → canonical column renaming.

use serde::Serialize;
use tracing::{info, warn};

use crate::schema::Field;

/// Outcome of renaming one header row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingReport {
    /// Raw headers renamed to their canonical name.
    pub renamed: usize,
    /// Headers that were already canonical.
    pub canonical: usize,
    /// Headers with no entry in the lookup table, kept as-is.
    pub passed_through: Vec<String>,
    /// Canonical fields with no column in the input.
    pub missing: Vec<Field>,
}

/// Rename raw spreadsheet headers to canonical field names.
///
/// Unknown headers pass through unchanged and absent ones are only reported:
/// the schema check decides what a drifted header row means.
pub fn map_headers(headers: &[String]) -> (Vec<String>, MappingReport) {
    let mut report = MappingReport::default();

    let mapped: Vec<String> = headers
        .iter()
        .map(|header| {
            if let Some(field) = Field::from_raw_header(header.trim()) {
                report.renamed += 1;
                field.canonical_name().to_string()
            } else if Field::from_canonical(header.trim()).is_some() {
                report.canonical += 1;
                header.trim().to_string()
            } else {
                report.passed_through.push(header.clone());
                header.clone()
            }
        })
        .collect();

    report.missing = Field::ALL
        .into_iter()
        .filter(|f| !mapped.iter().any(|c| c == f.canonical_name()))
        .collect();

    info!(
        renamed = report.renamed,
        canonical = report.canonical,
        "column headers mapped"
    );
    if !report.passed_through.is_empty() {
        warn!(headers = ?report.passed_through, "headers with no canonical mapping");
    }
    if !report.missing.is_empty() {
        warn!(fields = ?report.missing, "expected columns not found in input");
    }

    (mapped, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_headers() -> Vec<String> {
        Field::ALL
            .iter()
            .map(|f| f.raw_header().to_string())
            .collect()
    }

    #[test]
    fn test_full_raw_header_row() {
        let (mapped, report) = map_headers(&raw_headers());
        let expected: Vec<String> = Field::ALL
            .iter()
            .map(|f| f.canonical_name().to_string())
            .collect();
        assert_eq!(mapped, expected);
        assert_eq!(report.renamed, 17);
        assert!(report.missing.is_empty());
        assert!(report.passed_through.is_empty());
    }

    #[test]
    fn test_canonical_headers_pass_through() {
        let canonical: Vec<String> = vec!["country".into(), "year".into()];
        let (mapped, report) = map_headers(&canonical);
        assert_eq!(mapped, canonical);
        assert_eq!(report.canonical, 2);
        assert_eq!(report.renamed, 0);
        assert_eq!(report.missing.len(), 15);
    }

    #[test]
    fn test_unknown_and_missing_headers_reported() {
        let mut headers = raw_headers();
        headers.retain(|h| h != "Heat Generation (TJ)");
        headers.push("Notes".to_string());

        let (mapped, report) = map_headers(&headers);
        assert_eq!(mapped.last().map(String::as_str), Some("Notes"));
        assert_eq!(report.passed_through, vec!["Notes".to_string()]);
        assert_eq!(report.missing, vec![Field::HeatGenerationTj]);
    }

    #[test]
    fn test_header_whitespace_tolerated() {
        let headers = vec![" Country ".to_string()];
        let (mapped, _) = map_headers(&headers);
        assert_eq!(mapped, vec!["country".to_string()]);
    }
}

//! Data-quality gate run before loading.
//!
//! Every check reads the dataset and returns a tagged [`Outcome`]; none of
//! them filters rows or stops the run. Whether a `Fail` blocks the load is
//! decided by the caller through [`FailurePolicy`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::dataset::{BusinessKey, Dataset, Record};
use crate::schema::{canonical_columns, Metric};

/// Below this many rows the extract is probably truncated.
pub const MIN_ROW_COUNT: usize = 60_000;

/// Below this many distinct countries the extract is probably partial.
pub const MIN_COUNTRY_COUNT: usize = 200;

pub const VALID_REGIONS: [&str; 5] = ["Africa", "Americas", "Asia", "Europe", "Oceania"];

/// Offending keys or values listed in a finding.
const MAX_EXAMPLES: usize = 5;

/// Compiled-in limits for the volume and cardinality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub min_rows: usize,
    pub min_countries: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_rows: MIN_ROW_COUNT,
            min_countries: MIN_COUNTRY_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Schema,
    Volume,
    NullYear,
    RegionWhitelist,
    CountryCardinality,
    CapacityConsistency,
    CompositeKeyUniqueness,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::Schema => "schema",
            Check::Volume => "volume",
            Check::NullYear => "null_year",
            Check::RegionWhitelist => "region_whitelist",
            Check::CountryCardinality => "country_cardinality",
            Check::CapacityConsistency => "capacity_consistency",
            Check::CompositeKeyUniqueness => "composite_key_uniqueness",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Warn(String),
    Fail(String),
}

impl Outcome {
    pub fn is_fail(&self) -> bool {
        matches!(self, Outcome::Fail(_))
    }

    pub fn is_warn(&self) -> bool {
        matches!(self, Outcome::Warn(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Pass => None,
            Outcome::Warn(r) | Outcome::Fail(r) => Some(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub check: Check,
    pub outcome: Outcome,
}

/// What the runner does with `Fail` findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed check aborts the run before the warehouse is touched.
    #[default]
    Strict,
    /// Failed checks are logged and the load proceeds.
    Advisory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub results: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn outcome(&self, check: Check) -> Option<&Outcome> {
        self.results
            .iter()
            .find(|r| r.check == check)
            .map(|r| &r.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.outcome.is_fail())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.outcome.is_warn())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Whether the policy lets this report through to the loader.
    pub fn permits_load(&self, policy: FailurePolicy) -> bool {
        match policy {
            FailurePolicy::Strict => !self.has_failures(),
            FailurePolicy::Advisory => true,
        }
    }

    /// `check: reason` for every failure.
    pub fn failure_messages(&self) -> Vec<String> {
        self.failures()
            .map(|r| format!("{}: {}", r.check, r.outcome.reason().unwrap_or_default()))
            .collect()
    }
}

/// Duplicate business keys in a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateSummary {
    /// Rows beyond the first occurrence of each key.
    pub extra_rows: usize,
    /// Up to [`MAX_EXAMPLES`] duplicated keys with their occurrence count.
    pub examples: Vec<(BusinessKey, usize)>,
}

fn examples_text<T: fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items
        .take(MAX_EXAMPLES)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Exact column names and order against the canonical schema.
pub fn check_schema(dataset: &Dataset) -> Outcome {
    let expected = canonical_columns();
    let found: Vec<&str> = dataset.columns.iter().map(String::as_str).collect();

    if found == expected {
        return Outcome::Pass;
    }

    let missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|c| !found.contains(c))
        .collect();
    let extra: Vec<&str> = found
        .iter()
        .copied()
        .filter(|c| !expected.contains(c))
        .collect();
    let found_common: Vec<&str> = found
        .iter()
        .copied()
        .filter(|c| expected.contains(c))
        .collect();
    let expected_common: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|c| found.contains(c))
        .collect();

    let mut problems = Vec::new();
    if !missing.is_empty() {
        problems.push(format!("missing columns {:?}", missing));
    }
    if !extra.is_empty() {
        problems.push(format!("extra columns {:?}", extra));
    }
    if found_common != expected_common {
        problems.push(format!(
            "column order differs: expected {:?}, found {:?}",
            expected_common, found_common
        ));
    }
    if problems.is_empty() {
        // Same columns and order but duplicated headers.
        problems.push(format!("expected {:?}, found {:?}", expected, found));
    }

    Outcome::Fail(problems.join("; "))
}

pub fn check_volume(dataset: &Dataset, thresholds: &Thresholds) -> Outcome {
    match dataset.len() {
        0 => Outcome::Fail("dataset has no rows".to_string()),
        n if n < thresholds.min_rows => Outcome::Warn(format!(
            "{} rows, expected at least {}",
            n, thresholds.min_rows
        )),
        _ => Outcome::Pass,
    }
}

pub fn check_null_year(dataset: &Dataset) -> Outcome {
    let missing = dataset.records.iter().filter(|r| r.year.is_none()).count();
    if missing == 0 {
        Outcome::Pass
    } else {
        Outcome::Fail(format!("{} rows have no year", missing))
    }
}

pub fn check_regions(dataset: &Dataset) -> Outcome {
    let mut offending: BTreeMap<String, usize> = BTreeMap::new();
    for record in &dataset.records {
        match record.region.as_deref() {
            Some(region) if VALID_REGIONS.contains(&region) => {}
            Some(region) => *offending.entry(region.to_string()).or_default() += 1,
            None => *offending.entry("<missing>".to_string()).or_default() += 1,
        }
    }

    if offending.is_empty() {
        return Outcome::Pass;
    }
    let rows: usize = offending.values().sum();
    Outcome::Warn(format!(
        "{} rows outside {:?}: {}",
        rows,
        VALID_REGIONS,
        examples_text(offending.iter().map(|(r, n)| format!("'{r}' ({n})")))
    ))
}

pub fn check_country_cardinality(dataset: &Dataset, thresholds: &Thresholds) -> Outcome {
    let countries: HashSet<&str> = dataset
        .records
        .iter()
        .filter_map(|r| r.country.as_deref())
        .collect();

    if countries.len() < thresholds.min_countries {
        Outcome::Warn(format!(
            "{} distinct countries, expected at least {}",
            countries.len(),
            thresholds.min_countries
        ))
    } else {
        Outcome::Pass
    }
}

/// Generation or per-capita capacity without any installed capacity.
fn is_capacity_inconsistent(record: &Record) -> bool {
    let positive = |m: Metric| record.metric(m).is_some_and(|v| v > 0.0);
    let capacity = record.metric(Metric::InstalledCapacity).unwrap_or(0.0);
    (positive(Metric::ElectricityGeneration) || positive(Metric::CapacityPerCapita))
        && capacity <= 0.0
}

pub fn check_capacity_consistency(dataset: &Dataset) -> Outcome {
    let inconsistent: Vec<BusinessKey> = dataset
        .records
        .iter()
        .filter(|r| is_capacity_inconsistent(r))
        .map(Record::business_key)
        .collect();

    if inconsistent.is_empty() {
        return Outcome::Pass;
    }
    Outcome::Warn(format!(
        "{} rows report generation or per-capita capacity with no installed capacity, e.g. {}",
        inconsistent.len(),
        examples_text(inconsistent.iter())
    ))
}

pub fn find_duplicates(dataset: &Dataset) -> DuplicateSummary {
    let mut counts: BTreeMap<BusinessKey, usize> = BTreeMap::new();
    for record in &dataset.records {
        *counts.entry(record.business_key()).or_default() += 1;
    }

    let extra_rows = dataset.len() - counts.len();
    let examples = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .take(MAX_EXAMPLES)
        .collect();

    DuplicateSummary {
        extra_rows,
        examples,
    }
}

pub fn check_composite_key(dataset: &Dataset) -> Outcome {
    let duplicates = find_duplicates(dataset);
    if duplicates.extra_rows == 0 {
        return Outcome::Pass;
    }
    Outcome::Fail(format!(
        "{} duplicate rows for (country, year, technology, sub_technology, producer_type), e.g. {}",
        duplicates.extra_rows,
        examples_text(
            duplicates
                .examples
                .iter()
                .map(|(key, n)| format!("{key} x{n}"))
        )
    ))
}

fn log_result(result: &CheckResult) {
    match &result.outcome {
        Outcome::Pass => info!(check = %result.check, "check passed"),
        Outcome::Warn(reason) => warn!(check = %result.check, "{}", reason),
        Outcome::Fail(reason) => error!(check = %result.check, "{}", reason),
    }
}

/// Run every check in order. The dataset is only read.
pub fn validate(dataset: &Dataset, thresholds: &Thresholds) -> ValidationReport {
    info!(rows = dataset.len(), "starting validation");

    let results: Vec<CheckResult> = [
        (Check::Schema, check_schema(dataset)),
        (Check::Volume, check_volume(dataset, thresholds)),
        (Check::NullYear, check_null_year(dataset)),
        (Check::RegionWhitelist, check_regions(dataset)),
        (
            Check::CountryCardinality,
            check_country_cardinality(dataset, thresholds),
        ),
        (
            Check::CapacityConsistency,
            check_capacity_consistency(dataset),
        ),
        (Check::CompositeKeyUniqueness, check_composite_key(dataset)),
    ]
    .into_iter()
    .map(|(check, outcome)| CheckResult { check, outcome })
    .collect();

    for result in &results {
        log_result(result);
    }

    let report = ValidationReport { results };
    info!(
        failed = report.failures().count(),
        warnings = report.warnings().count(),
        "validation complete"
    );
    report
}

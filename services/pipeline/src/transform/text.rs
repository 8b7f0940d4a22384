//! Text field canonicalization and structural row filtering.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dataset::{Dataset, Record};
use crate::schema::Field;

/// Place names: trimmed and title-cased.
const PROPER_NOUN_FIELDS: &[Field] = &[Field::Region, Field::SubRegion, Field::Country];

/// Classification labels: punctuation stripped, lower-cased.
const CATEGORICAL_FIELDS: &[Field] = &[
    Field::RenewableOrNot,
    Field::GroupTechnology,
    Field::Technology,
    Field::SubTechnology,
    Field::ProducerType,
];

/// Rows missing any of these carry no usable observation.
const CRITICAL_FIELDS: &[Field] = &[Field::Country, Field::Year, Field::Technology];

const STRIPPED_CHARS: &[char] = &['*', '(', ')', '-'];

/// Substrings that carry no meaning inside a technology label.
const TECHNOLOGY_NOISE: &[&str] = &["n.e.s.", "energy", "renewable "];

/// Exact-match relabeling applied to technology and sub-technology after
/// pruning.
const RELABELS: &[(&str, &str)] = &[
    ("crops", "energy crops"),
    ("other biogases from anaerobic fermentation", "biogas anaerobic"),
    ("other primary solid biofuels", "other primary biofuels"),
];

/// Aggregates and residual rollups that appear in the country column but are
/// not countries. Compared lower-cased.
const INVALID_COUNTRIES: &[&str] = &[
    "european union (27)",
    "multilateral",
    "unspecified",
    "africa n.e.s.",
    "americas n.e.s.",
    "asia n.e.s.",
    "europe n.e.s.",
    "oceania n.e.s.",
    "caribbean n.e.s.",
    "central america n.e.s.",
    "south america n.e.s.",
    "middle east n.e.s.",
    "residual/unallocated oda: central asia and southern asia",
    "residual/unallocated oda: eastern and south-eastern asia",
    "residual/unallocated oda: latin america and the caribbean",
    "residual/unallocated oda: oceania",
    "residual/unallocated oda: sub-saharan africa",
    "residual/unallocated oda: unspecified developing countries",
    "residual/unallocated oda: western asia and northern africa",
];

/// Counts produced by [`normalize_text`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextReport {
    pub rows_in: usize,
    pub rows_out: usize,
    /// Rows dropped for a missing critical field, attributed to the first
    /// missing field in country, year, technology order.
    pub dropped_missing: BTreeMap<Field, usize>,
    pub dropped_invalid_country: usize,
    /// Text fields skipped because their column is absent.
    pub skipped_fields: Vec<Field>,
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_alpha = false;
    for c in value.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn normalize_categorical(value: &str) -> String {
    let stripped: String = value.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
    stripped
        .replace(" excl. ", " excluding ")
        .trim()
        .to_lowercase()
}

fn strip_total_prefix(value: &str) -> String {
    value.strip_prefix("total ").unwrap_or(value).trim().to_string()
}

fn prune_technology(value: &str) -> String {
    let mut pruned = value.to_string();
    for noise in TECHNOLOGY_NOISE {
        pruned = pruned.replace(noise, "");
    }
    pruned.trim().to_string()
}

fn prune_group_technology(value: &str) -> String {
    value.strip_suffix(" n.e.s.").unwrap_or(value).trim().to_string()
}

fn relabel(value: String) -> String {
    match RELABELS.iter().find(|(from, _)| *from == value) {
        Some((_, to)) => (*to).to_string(),
        None => value,
    }
}

/// Canonical form of one text field's value.
fn normalize_value(field: Field, value: &str) -> String {
    match field {
        Field::Region | Field::SubRegion | Field::Country => title_case(value.trim()),
        Field::Iso3Code => value.trim().to_uppercase(),
        Field::RenewableOrNot => strip_total_prefix(&normalize_categorical(value)),
        Field::GroupTechnology => prune_group_technology(&normalize_categorical(value)),
        Field::Technology => relabel(prune_technology(&normalize_categorical(value))),
        Field::SubTechnology => relabel(prune_technology(&strip_total_prefix(
            &normalize_categorical(value),
        ))),
        Field::ProducerType => normalize_categorical(value),
        _ => value.trim().to_string(),
    }
}

fn normalize_record(record: &mut Record, fields: &[Field]) {
    for field in fields {
        if let Some(slot) = record.text_mut(*field) {
            if let Some(value) = slot.take() {
                let normalized = normalize_value(*field, &value);
                *slot = (!normalized.is_empty()).then_some(normalized);
            }
        }
    }
}

pub fn is_invalid_country(country: &str) -> bool {
    let lowered = country.to_lowercase();
    INVALID_COUNTRIES.iter().any(|c| *c == lowered)
}

/// Canonicalize text fields, then drop incomplete and non-country rows.
pub fn normalize_text(dataset: Dataset) -> (Dataset, TextReport) {
    let present = dataset.present_fields();
    let Dataset { columns, records } = dataset;

    let mut report = TextReport {
        rows_in: records.len(),
        ..Default::default()
    };

    // M49 codes are not in any normalization rule but still get trimmed so
    // that padded cells do not split a country dimension row.
    let text_fields: Vec<Field> = PROPER_NOUN_FIELDS
        .iter()
        .chain([Field::Iso3Code, Field::M49Code].iter())
        .chain(CATEGORICAL_FIELDS.iter())
        .copied()
        .collect();
    let (active, skipped): (Vec<Field>, Vec<Field>) =
        text_fields.into_iter().partition(|f| present.contains(f));
    for field in &skipped {
        warn!(field = %field, "column absent, normalization skipped");
    }
    report.skipped_fields = skipped;

    let mut records = records;
    for record in &mut records {
        normalize_record(record, &active);
    }
    debug!(fields = active.len(), "text fields normalized");

    for field in CRITICAL_FIELDS {
        let before = records.len();
        records.retain(|r| r.is_present(*field));
        let removed = before - records.len();
        report.dropped_missing.insert(*field, removed);
        if removed > 0 {
            warn!(field = %field, removed, "rows dropped for missing critical field");
        } else {
            info!(field = %field, "no rows missing critical field");
        }
    }

    let before = records.len();
    records.retain(|r| !r.country.as_deref().is_some_and(is_invalid_country));
    report.dropped_invalid_country = before - records.len();
    info!(
        removed = report.dropped_invalid_country,
        "aggregate and residual country rows removed"
    );

    report.rows_out = records.len();
    info!(
        rows_in = report.rows_in,
        rows_out = report.rows_out,
        "text normalization complete"
    );

    (Dataset::new(columns, records), report)
}

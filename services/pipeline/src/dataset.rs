//! In-memory dataset: ordered records plus the column list they were read with.

use std::fmt;

use serde::Serialize;

use crate::schema::{canonical_columns, Field, FieldKind, Metric};
use crate::transform::numeric::{round_metric, METRIC_DECIMALS};

/// One observation: a (country, technology, sub-technology, producer type, year)
/// combination with its six measurements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub region: Option<String>,
    pub sub_region: Option<String>,
    pub country: Option<String>,
    pub iso3_code: Option<String>,
    pub m49_code: Option<String>,
    pub renewable_or_not: Option<String>,
    pub group_technology: Option<String>,
    pub technology: Option<String>,
    pub sub_technology: Option<String>,
    pub producer_type: Option<String>,
    pub year: Option<i32>,
    /// Indexed by [`Metric::index`].
    pub metrics: [Option<f64>; 6],
}

/// A cell value that could not be parsed into its column's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellError {
    pub field: Field,
    pub value: String,
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value '{}' for column {}", self.value, self.field)
    }
}

impl Record {
    /// Text value of a text column. `None` for absent values and for
    /// non-text columns.
    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::Region => self.region.as_deref(),
            Field::SubRegion => self.sub_region.as_deref(),
            Field::Country => self.country.as_deref(),
            Field::Iso3Code => self.iso3_code.as_deref(),
            Field::M49Code => self.m49_code.as_deref(),
            Field::RenewableOrNot => self.renewable_or_not.as_deref(),
            Field::GroupTechnology => self.group_technology.as_deref(),
            Field::Technology => self.technology.as_deref(),
            Field::SubTechnology => self.sub_technology.as_deref(),
            Field::ProducerType => self.producer_type.as_deref(),
            _ => None,
        }
    }

    pub fn text_mut(&mut self, field: Field) -> Option<&mut Option<String>> {
        match field {
            Field::Region => Some(&mut self.region),
            Field::SubRegion => Some(&mut self.sub_region),
            Field::Country => Some(&mut self.country),
            Field::Iso3Code => Some(&mut self.iso3_code),
            Field::M49Code => Some(&mut self.m49_code),
            Field::RenewableOrNot => Some(&mut self.renewable_or_not),
            Field::GroupTechnology => Some(&mut self.group_technology),
            Field::Technology => Some(&mut self.technology),
            Field::SubTechnology => Some(&mut self.sub_technology),
            Field::ProducerType => Some(&mut self.producer_type),
            _ => None,
        }
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics[metric.index()]
    }

    pub fn set_metric(&mut self, metric: Metric, value: Option<f64>) {
        self.metrics[metric.index()] = value;
    }

    /// Whether `field` holds a value.
    pub fn is_present(&self, field: Field) -> bool {
        match field.kind() {
            FieldKind::Text => self.text(field).is_some(),
            FieldKind::Year => self.year.is_some(),
            FieldKind::Metric => Metric::from_field(field)
                .and_then(|m| self.metric(m))
                .is_some(),
        }
    }

    /// Parse a delimited-file cell into `field`. Blank cells become absent.
    ///
    /// On error the field is left absent and the offending value is returned.
    pub fn set_cell(&mut self, field: Field, raw: &str) -> Result<(), CellError> {
        let trimmed = raw.trim();
        let invalid = || CellError {
            field,
            value: trimmed.to_string(),
        };

        match field.kind() {
            FieldKind::Text => {
                if let Some(slot) = self.text_mut(field) {
                    *slot = if trimmed.is_empty() {
                        None
                    } else {
                        Some(raw.to_string())
                    };
                }
                Ok(())
            }
            FieldKind::Year => {
                self.year = None;
                if trimmed.is_empty() {
                    return Ok(());
                }
                self.year = Some(parse_year(trimmed).ok_or_else(invalid)?);
                Ok(())
            }
            FieldKind::Metric => {
                let Some(metric) = Metric::from_field(field) else {
                    return Ok(());
                };
                self.set_metric(metric, None);
                if trimmed.is_empty() {
                    return Ok(());
                }
                let value: f64 = trimmed.parse().map_err(|_| invalid())?;
                // NaN and infinities are how spreadsheets spell "no value"
                if value.is_finite() {
                    self.set_metric(metric, Some(value));
                }
                Ok(())
            }
        }
    }

    /// Render `field` as a delimited-file cell.
    pub fn cell(&self, field: Field) -> String {
        match field.kind() {
            FieldKind::Text => self.text(field).unwrap_or_default().to_string(),
            FieldKind::Year => self.year.map(|y| y.to_string()).unwrap_or_default(),
            FieldKind::Metric => Metric::from_field(field)
                .and_then(|m| self.metric(m))
                .map(format_metric)
                .unwrap_or_default(),
        }
    }

    pub fn business_key(&self) -> BusinessKey {
        BusinessKey {
            country: self.country.clone(),
            year: self.year,
            technology: self.technology.clone(),
            sub_technology: self.sub_technology.clone(),
            producer_type: self.producer_type.clone(),
        }
    }
}

/// Rounded metrics are written with exactly [`METRIC_DECIMALS`] places; values
/// not yet rounded keep their full precision.
fn format_metric(value: f64) -> String {
    if round_metric(value) == value {
        format!("{:.*}", METRIC_DECIMALS as usize, value)
    } else {
        value.to_string()
    }
}

/// Years arrive as `2020` or, after a spreadsheet round trip, `2020.0`.
fn parse_year(value: &str) -> Option<i32> {
    if let Ok(year) = value.parse::<i32>() {
        return Some(year);
    }
    let float: f64 = value.parse().ok()?;
    if float.is_finite() && float.fract() == 0.0 && float.abs() <= i32::MAX as f64 {
        Some(float as i32)
    } else {
        None
    }
}

/// The grain of the fact table: must be unique across a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BusinessKey {
    pub country: Option<String>,
    pub year: Option<i32>,
    pub technology: Option<String>,
    pub sub_technology: Option<String>,
    pub producer_type: Option<String>,
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = |v: &Option<String>| v.clone().unwrap_or_else(|| "<none>".to_string());
        write!(
            f,
            "({}, {}, {}, {}, {})",
            text(&self.country),
            self.year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            text(&self.technology),
            text(&self.sub_technology),
            text(&self.producer_type)
        )
    }
}

/// Ordered records sharing one column schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Column names in file order. May differ from the canonical schema;
    /// the validation gate reports the difference.
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, records: Vec<Record>) -> Self {
        Self { columns, records }
    }

    /// Dataset with the canonical 17-column schema.
    pub fn canonical(records: Vec<Record>) -> Self {
        Self {
            columns: canonical_columns().into_iter().map(String::from).collect(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, field: Field) -> bool {
        self.columns.iter().any(|c| c == field.canonical_name())
    }

    /// Fields of the canonical schema that are present, in schema order.
    pub fn present_fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| self.has_column(*f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_cell_text_blank_is_absent() {
        let mut record = Record::default();
        record.set_cell(Field::Country, "   ").unwrap();
        assert_eq!(record.country, None);
        record.set_cell(Field::Country, " Brazil ").unwrap();
        assert_eq!(record.country.as_deref(), Some(" Brazil "));
    }

    #[test]
    fn test_set_cell_year_accepts_float_form() {
        let mut record = Record::default();
        record.set_cell(Field::Year, "2020.0").unwrap();
        assert_eq!(record.year, Some(2020));
        record.set_cell(Field::Year, "2021").unwrap();
        assert_eq!(record.year, Some(2021));
    }

    #[test]
    fn test_set_cell_year_rejects_fraction() {
        let mut record = Record::default();
        let err = record.set_cell(Field::Year, "2020.5").unwrap_err();
        assert_eq!(err.field, Field::Year);
        assert_eq!(record.year, None);
    }

    #[test]
    fn test_set_cell_metric_nan_is_absent() {
        let mut record = Record::default();
        record.set_cell(Field::HeatGenerationTj, "NaN").unwrap();
        assert_eq!(record.metric(Metric::HeatGeneration), None);
        record.set_cell(Field::HeatGenerationTj, "12.5").unwrap();
        assert_eq!(record.metric(Metric::HeatGeneration), Some(12.5));
    }

    #[test]
    fn test_set_cell_metric_garbage_is_error() {
        let mut record = Record::default();
        let err = record
            .set_cell(Field::ElectricityGenerationGwh, "n/a")
            .unwrap_err();
        assert_eq!(err.value, "n/a");
        assert_eq!(record.metric(Metric::ElectricityGeneration), None);
    }

    #[test]
    fn test_cell_rendering() {
        let mut record = Record {
            country: Some("Brazil".into()),
            year: Some(2020),
            ..Default::default()
        };
        record.set_metric(Metric::ElectricityGeneration, Some(123.46));
        assert_eq!(record.cell(Field::Country), "Brazil");
        assert_eq!(record.cell(Field::Year), "2020");
        assert_eq!(record.cell(Field::ElectricityGenerationGwh), "123.46");
        assert_eq!(record.cell(Field::Region), "");
    }

    #[test]
    fn test_metric_cells_keep_two_decimals() {
        let mut record = Record::default();
        record.set_metric(Metric::ElectricityGeneration, Some(0.0));
        record.set_metric(Metric::InstalledCapacity, Some(123.4));
        record.set_metric(Metric::HeatGeneration, Some(123.456));
        assert_eq!(record.cell(Field::ElectricityGenerationGwh), "0.00");
        assert_eq!(record.cell(Field::ElectricityInstalledCapacityMw), "123.40");
        // not yet rounded, e.g. the text-normalized artifact
        assert_eq!(record.cell(Field::HeatGenerationTj), "123.456");
    }

    #[test]
    fn test_business_key_display() {
        let record = Record {
            country: Some("Brazil".into()),
            year: Some(2020),
            technology: Some("solar".into()),
            ..Default::default()
        };
        assert_eq!(
            record.business_key().to_string(),
            "(Brazil, 2020, solar, <none>, <none>)"
        );
    }

    #[test]
    fn test_present_fields() {
        let dataset = Dataset::new(
            vec!["country".into(), "unknown".into(), "year".into()],
            Vec::new(),
        );
        assert_eq!(dataset.present_fields(), vec![Field::Country, Field::Year]);
        assert!(Dataset::canonical(Vec::new()).has_column(Field::CapacityPerCapitaW));
    }
}

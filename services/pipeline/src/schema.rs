//! Canonical field schema and the raw header lookup table.
//!
//! The source spreadsheet uses human-readable headers with units in
//! parentheses. Every stage after extraction works on the canonical
//! snake_case names. The mapping between the two is a fixed table over the
//! [`Field`] enumeration, never inferred from the data.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

/// Number of columns in the canonical schema.
pub const FIELD_COUNT: usize = 17;

/// One column of the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Region,
    SubRegion,
    Country,
    Iso3Code,
    M49Code,
    RenewableOrNot,
    GroupTechnology,
    Technology,
    SubTechnology,
    ProducerType,
    Year,
    ElectricityGenerationGwh,
    ElectricityInstalledCapacityMw,
    HeatGenerationTj,
    TotalPublicFlowsUsdM,
    InternationalPublicFlowsUsdM,
    CapacityPerCapitaW,
}

/// What kind of value a column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Year,
    Metric,
}

impl Field {
    /// All fields, in canonical column order.
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::Region,
        Field::SubRegion,
        Field::Country,
        Field::Iso3Code,
        Field::M49Code,
        Field::RenewableOrNot,
        Field::GroupTechnology,
        Field::Technology,
        Field::SubTechnology,
        Field::ProducerType,
        Field::Year,
        Field::ElectricityGenerationGwh,
        Field::ElectricityInstalledCapacityMw,
        Field::HeatGenerationTj,
        Field::TotalPublicFlowsUsdM,
        Field::InternationalPublicFlowsUsdM,
        Field::CapacityPerCapitaW,
    ];

    pub fn canonical_name(self) -> &'static str {
        match self {
            Field::Region => "region",
            Field::SubRegion => "sub_region",
            Field::Country => "country",
            Field::Iso3Code => "iso3_code",
            Field::M49Code => "m49_code",
            Field::RenewableOrNot => "renewable_or_not",
            Field::GroupTechnology => "group_technology",
            Field::Technology => "technology",
            Field::SubTechnology => "sub_technology",
            Field::ProducerType => "producer_type",
            Field::Year => "year",
            Field::ElectricityGenerationGwh => "electricity_generation_gwh",
            Field::ElectricityInstalledCapacityMw => "electricity_installed_capacity_mw",
            Field::HeatGenerationTj => "heat_generation_tj",
            Field::TotalPublicFlowsUsdM => "total_public_flows_usd_m",
            Field::InternationalPublicFlowsUsdM => "international_public_flows_usd_m",
            Field::CapacityPerCapitaW => "capacity_per_capita_w",
        }
    }

    /// Exact header string used by the source spreadsheet.
    pub fn raw_header(self) -> &'static str {
        match self {
            Field::Region => "Region",
            Field::SubRegion => "Sub-region",
            Field::Country => "Country",
            Field::Iso3Code => "ISO3 code",
            Field::M49Code => "M49 code",
            Field::RenewableOrNot => "RE or Non-RE",
            Field::GroupTechnology => "Group Technology",
            Field::Technology => "Technology",
            Field::SubTechnology => "Sub-Technology",
            Field::ProducerType => "Producer Type",
            Field::Year => "Year",
            Field::ElectricityGenerationGwh => "Electricity Generation (GWh)",
            Field::ElectricityInstalledCapacityMw => "Electricity Installed Capacity (MW)",
            Field::HeatGenerationTj => "Heat Generation (TJ)",
            Field::TotalPublicFlowsUsdM => "Public Flows (2022 USD M)",
            Field::InternationalPublicFlowsUsdM => "SDG 7a1 Intl. Public Flows (2022 USD M)",
            Field::CapacityPerCapitaW => "SDG 7b1 RE capacity per capita (W/inhabitant)",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Year => FieldKind::Year,
            f if Metric::from_field(f).is_some() => FieldKind::Metric,
            _ => FieldKind::Text,
        }
    }

    pub fn from_canonical(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.canonical_name() == name)
    }

    pub fn from_raw_header(header: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.raw_header() == header)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Canonical column names in schema order.
pub fn canonical_columns() -> Vec<&'static str> {
    Field::ALL.iter().map(|f| f.canonical_name()).collect()
}

/// The six numeric measurements carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    ElectricityGeneration,
    InstalledCapacity,
    HeatGeneration,
    TotalPublicFlows,
    InternationalPublicFlows,
    CapacityPerCapita,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::ElectricityGeneration,
        Metric::InstalledCapacity,
        Metric::HeatGeneration,
        Metric::TotalPublicFlows,
        Metric::InternationalPublicFlows,
        Metric::CapacityPerCapita,
    ];

    /// Position inside a record's metric array.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn field(self) -> Field {
        match self {
            Metric::ElectricityGeneration => Field::ElectricityGenerationGwh,
            Metric::InstalledCapacity => Field::ElectricityInstalledCapacityMw,
            Metric::HeatGeneration => Field::HeatGenerationTj,
            Metric::TotalPublicFlows => Field::TotalPublicFlowsUsdM,
            Metric::InternationalPublicFlows => Field::InternationalPublicFlowsUsdM,
            Metric::CapacityPerCapita => Field::CapacityPerCapitaW,
        }
    }

    pub fn from_field(field: Field) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.field() == field)
    }
}

/// Problems found when checking the lookup table for exhaustiveness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingDefect {
    DuplicateRawHeader(&'static str),
    DuplicateCanonicalName(&'static str),
    NotRoundTripping(Field),
}

impl fmt::Display for MappingDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingDefect::DuplicateRawHeader(h) => write!(f, "raw header '{h}' mapped twice"),
            MappingDefect::DuplicateCanonicalName(n) => {
                write!(f, "canonical name '{n}' used twice")
            }
            MappingDefect::NotRoundTripping(field) => {
                write!(f, "field '{field}' does not round-trip through its raw header")
            }
        }
    }
}

/// Verify the header table is a bijection over [`Field::ALL`].
///
/// Called once at startup by the binaries.
pub fn verify_mapping() -> Result<(), Vec<MappingDefect>> {
    let mut defects = Vec::new();
    let mut raw_seen = HashSet::new();
    let mut canonical_seen = HashSet::new();

    for field in Field::ALL {
        if !raw_seen.insert(field.raw_header()) {
            defects.push(MappingDefect::DuplicateRawHeader(field.raw_header()));
        }
        if !canonical_seen.insert(field.canonical_name()) {
            defects.push(MappingDefect::DuplicateCanonicalName(field.canonical_name()));
        }
        if Field::from_raw_header(field.raw_header()) != Some(field)
            || Field::from_canonical(field.canonical_name()) != Some(field)
        {
            defects.push(MappingDefect::NotRoundTripping(field));
        }
    }

    if defects.is_empty() {
        Ok(())
    } else {
        Err(defects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_exhaustive() {
        assert_eq!(verify_mapping(), Ok(()));
    }

    #[test]
    fn test_canonical_order() {
        let columns = canonical_columns();
        assert_eq!(columns.len(), FIELD_COUNT);
        assert_eq!(columns[0], "region");
        assert_eq!(columns[10], "year");
        assert_eq!(columns[16], "capacity_per_capita_w");
    }

    #[test]
    fn test_raw_headers_keep_units() {
        assert_eq!(
            Field::from_raw_header("Electricity Generation (GWh)"),
            Some(Field::ElectricityGenerationGwh)
        );
        assert_eq!(Field::from_raw_header("electricity generation (gwh)"), None);
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(Field::Country.kind(), FieldKind::Text);
        assert_eq!(Field::M49Code.kind(), FieldKind::Text);
        assert_eq!(Field::Year.kind(), FieldKind::Year);
        assert_eq!(Field::HeatGenerationTj.kind(), FieldKind::Metric);
        let metrics = Field::ALL
            .iter()
            .filter(|f| f.kind() == FieldKind::Metric)
            .count();
        assert_eq!(metrics, Metric::ALL.len());
    }

    #[test]
    fn test_metric_indices_follow_declaration() {
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i);
        }
    }
}

//! Truncate-and-reload of the star schema.
//!
//! One pass per call, all inside a single warehouse transaction:
//! `ConnectCheck -> Truncate -> LoadDimensions -> ResolveKeys -> LoadFact -> Commit`.
//! Any error rolls the transaction back and is returned tagged with the
//! state it occurred in.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

use crate::dataset::Dataset;
use crate::error::LoadError;
use crate::warehouse::{CountryKey, FactRow, ProducerKey, TechnologyKey, TimeRow, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    ConnectCheck,
    Truncate,
    LoadDimensions,
    ResolveKeys,
    LoadFact,
    Commit,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadState::ConnectCheck => "connect check",
            LoadState::Truncate => "truncate",
            LoadState::LoadDimensions => "dimension load",
            LoadState::ResolveKeys => "key resolution",
            LoadState::LoadFact => "fact load",
            LoadState::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Rows inserted per table by a committed load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub countries: u64,
    pub technologies: u64,
    pub times: u64,
    pub producers: u64,
    pub facts: u64,
}

/// Distinct dimension rows in first-seen order.
#[derive(Debug, Default)]
struct Dimensions {
    countries: Vec<CountryKey>,
    technologies: Vec<TechnologyKey>,
    times: Vec<TimeRow>,
    producers: Vec<ProducerKey>,
}

fn push_distinct<K: Clone + Eq + Hash>(seen: &mut HashSet<K>, rows: &mut Vec<K>, key: K) {
    if seen.insert(key.clone()) {
        rows.push(key);
    }
}

fn project(dataset: &Dataset) -> Result<Dimensions, LoadError> {
    let mut dims = Dimensions::default();
    let mut countries = HashSet::new();
    let mut technologies = HashSet::new();
    let mut years = HashSet::new();
    let mut producers = HashSet::new();

    for (row, record) in dataset.records.iter().enumerate() {
        let year = record.year.ok_or(LoadError::MissingYear { row })?;
        push_distinct(&mut countries, &mut dims.countries, CountryKey::from(record));
        push_distinct(
            &mut technologies,
            &mut dims.technologies,
            TechnologyKey::from(record),
        );
        if years.insert(year) {
            dims.times.push(TimeRow::for_year(year));
        }
        push_distinct(&mut producers, &mut dims.producers, ProducerKey::from(record));
    }

    Ok(dims)
}

fn key_index<K: Eq + Hash>(rows: Vec<(i32, K)>) -> HashMap<K, i32> {
    rows.into_iter().map(|(id, key)| (key, id)).collect()
}

async fn resolve_keys<W: Warehouse + ?Sized>(
    warehouse: &mut W,
    dataset: &Dataset,
) -> Result<Vec<FactRow>, LoadError> {
    let at = || LoadError::at(LoadState::ResolveKeys);
    let countries = key_index(warehouse.read_countries().await.map_err(at())?);
    let technologies = key_index(warehouse.read_technologies().await.map_err(at())?);
    let times: HashMap<i32, i32> = warehouse
        .read_times()
        .await
        .map_err(at())?
        .into_iter()
        .map(|(id, t)| (t.year, id))
        .collect();
    let producers = key_index(warehouse.read_producers().await.map_err(at())?);

    let unresolved = |row, dimension| LoadError::UnresolvedKey { row, dimension };

    dataset
        .records
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let country_id = *countries
                .get(&CountryKey::from(record))
                .ok_or_else(|| unresolved(row, "country"))?;
            let technology_id = *technologies
                .get(&TechnologyKey::from(record))
                .ok_or_else(|| unresolved(row, "technology"))?;
            let time_id = *record
                .year
                .and_then(|year| times.get(&year))
                .ok_or_else(|| unresolved(row, "time"))?;
            let producer_id = *producers
                .get(&ProducerKey::from(record))
                .ok_or_else(|| unresolved(row, "producer"))?;

            Ok(FactRow {
                country_id,
                technology_id,
                time_id,
                producer_id,
                metrics: record.metrics,
            })
        })
        .collect()
}

async fn load_in_transaction<W: Warehouse + ?Sized>(
    warehouse: &mut W,
    dataset: &Dataset,
    dims: &Dimensions,
) -> Result<LoadReport, LoadError> {
    warehouse
        .truncate_all()
        .await
        .map_err(LoadError::at(LoadState::Truncate))?;
    info!("warehouse tables truncated");

    let at = || LoadError::at(LoadState::LoadDimensions);
    let mut report = LoadReport {
        countries: warehouse.insert_countries(&dims.countries).await.map_err(at())?,
        technologies: warehouse
            .insert_technologies(&dims.technologies)
            .await
            .map_err(at())?,
        times: warehouse.insert_times(&dims.times).await.map_err(at())?,
        producers: warehouse.insert_producers(&dims.producers).await.map_err(at())?,
        facts: 0,
    };
    info!(
        countries = report.countries,
        technologies = report.technologies,
        times = report.times,
        producers = report.producers,
        "dimensions loaded"
    );

    let facts = resolve_keys(warehouse, dataset).await?;
    info!(rows = facts.len(), "dimension keys resolved");

    report.facts = warehouse
        .insert_facts(&facts)
        .await
        .map_err(LoadError::at(LoadState::LoadFact))?;
    info!(rows = report.facts, "fact table loaded");

    warehouse
        .commit()
        .await
        .map_err(LoadError::at(LoadState::Commit))?;
    Ok(report)
}

/// Replace the warehouse contents with `dataset`.
///
/// On error the transaction is rolled back, so the warehouse keeps the last
/// successfully loaded snapshot.
pub async fn load<W: Warehouse + ?Sized>(
    warehouse: &mut W,
    dataset: &Dataset,
) -> Result<LoadReport, LoadError> {
    let span = info_span!("load", rows = dataset.len());
    async move {
        warehouse
            .check_connection()
            .await
            .map_err(LoadError::at(LoadState::ConnectCheck))?;

        let dims = project(dataset)?;

        warehouse
            .begin()
            .await
            .map_err(LoadError::at(LoadState::Truncate))?;

        match load_in_transaction(warehouse, dataset, &dims).await {
            Ok(report) => {
                info!(facts = report.facts, "load committed");
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback) = warehouse.rollback().await {
                    error!(error = %rollback, "rollback failed");
                }
                error!(state = %err.state(), error = %err, "load rolled back");
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;
    use crate::error::WarehouseError;
    use crate::schema::Metric;
    use crate::warehouse::memory::{FailPoint, MemoryWarehouse};

    fn record(country: &str, year: i32, technology: &str, producer: &str) -> Record {
        let mut r = Record {
            region: Some("Americas".into()),
            sub_region: Some("Latin America and the Caribbean".into()),
            country: Some(country.into()),
            iso3_code: Some(country[..3].to_uppercase()),
            m49_code: Some("76".into()),
            renewable_or_not: Some("renewable".into()),
            group_technology: Some(format!("{technology} energy")),
            technology: Some(technology.into()),
            sub_technology: Some(format!("{technology} photovoltaic")),
            producer_type: Some(producer.into()),
            year: Some(year),
            metrics: [Some(0.0); 6],
        };
        r.set_metric(Metric::ElectricityGeneration, Some(123.46));
        r
    }

    fn sample() -> Dataset {
        Dataset::canonical(vec![
            record("Brazil", 2020, "solar", "ongrid electricity"),
            record("Brazil", 2021, "solar", "ongrid electricity"),
            record("Brazil", 2020, "wind", "offgrid electricity"),
            record("Chile", 2020, "solar", "ongrid electricity"),
            record("Chile", 2019, "hydropower", "ongrid electricity"),
        ])
    }

    // -------------------------------------------------------------------------
    // SUCCESSFUL LOADS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_load_report_counts() {
        let mut warehouse = MemoryWarehouse::new();
        let report = load(&mut warehouse, &sample()).await.unwrap();

        assert_eq!(
            report,
            LoadReport {
                countries: 2,
                technologies: 3,
                times: 3,
                producers: 2,
                facts: 5,
            }
        );
        assert_eq!(warehouse.committed.row_counts(), [2, 3, 3, 2, 5]);
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let mut warehouse = MemoryWarehouse::new();
        load(&mut warehouse, &sample()).await.unwrap();
        let first = warehouse.committed.clone();

        load(&mut warehouse, &sample()).await.unwrap();
        assert_eq!(warehouse.committed, first);
    }

    #[tokio::test]
    async fn test_referential_integrity() {
        let mut warehouse = MemoryWarehouse::new();
        load(&mut warehouse, &sample()).await.unwrap();
        let tables = &warehouse.committed;

        for fact in &tables.facts {
            assert!(tables.countries.iter().any(|(id, _)| *id == fact.country_id));
            assert!(tables.technologies.iter().any(|(id, _)| *id == fact.technology_id));
            assert!(tables.times.iter().any(|(id, _)| *id == fact.time_id));
            assert!(tables.producers.iter().any(|(id, _)| *id == fact.producer_id));
        }
        let brazil = tables
            .countries
            .iter()
            .find(|(_, c)| c.country.as_deref() == Some("Brazil"))
            .map(|(id, _)| *id)
            .unwrap();
        assert_eq!(tables.facts[0].country_id, brazil);
        assert_eq!(
            tables.facts[0].metrics[Metric::ElectricityGeneration.index()],
            Some(123.46)
        );
    }

    #[tokio::test]
    async fn test_dimensions_hold_distinct_natural_keys() {
        let mut warehouse = MemoryWarehouse::new();
        load(&mut warehouse, &sample()).await.unwrap();
        let tables = &warehouse.committed;

        let countries: HashSet<_> = tables.countries.iter().map(|(_, k)| k).collect();
        assert_eq!(countries.len(), tables.countries.len());
        let years: HashSet<_> = tables.times.iter().map(|(_, t)| t.year).collect();
        assert_eq!(years.len(), tables.times.len());

        let (_, first_time) = tables.times[0];
        assert_eq!(first_time, TimeRow { year: 2020, decade: 2020 });
        assert!(tables.times.contains(&(3, TimeRow { year: 2019, decade: 2010 })));
    }

    #[tokio::test]
    async fn test_empty_dataset_clears_warehouse() {
        let mut warehouse = MemoryWarehouse::new();
        load(&mut warehouse, &sample()).await.unwrap();

        let report = load(&mut warehouse, &Dataset::canonical(Vec::new()))
            .await
            .unwrap();
        assert_eq!(report, LoadReport::default());
        assert_eq!(warehouse.committed.row_counts(), [0; 5]);
    }

    // -------------------------------------------------------------------------
    // ABORTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fact_failure_keeps_previous_snapshot() {
        let mut warehouse = MemoryWarehouse::new();
        load(&mut warehouse, &sample()).await.unwrap();
        let before = warehouse.committed.clone();

        warehouse.fail_at = Some(FailPoint::InsertFacts);
        let mut smaller = sample();
        smaller.records.truncate(1);
        let err = load(&mut warehouse, &smaller).await.unwrap_err();

        assert_eq!(err.state(), LoadState::LoadFact);
        assert_eq!(warehouse.committed, before);
    }

    #[tokio::test]
    async fn test_failures_carry_their_state() {
        for (point, state) in [
            (FailPoint::Truncate, LoadState::Truncate),
            (FailPoint::InsertCountries, LoadState::LoadDimensions),
            (FailPoint::ReadProducers, LoadState::ResolveKeys),
            (FailPoint::Commit, LoadState::Commit),
        ] {
            let mut warehouse = MemoryWarehouse::new();
            warehouse.fail_at = Some(point);
            let err = load(&mut warehouse, &sample()).await.unwrap_err();
            assert_eq!(err.state(), state, "{point:?}");
            assert_eq!(warehouse.committed.row_counts(), [0; 5]);
        }
    }

    #[tokio::test]
    async fn test_unreachable_warehouse_aborts_before_mutation() {
        let mut warehouse = MemoryWarehouse::new();
        warehouse.unreachable = true;

        let err = load(&mut warehouse, &sample()).await.unwrap_err();
        assert_eq!(err.state(), LoadState::ConnectCheck);
        assert!(matches!(
            err,
            LoadError::Warehouse {
                source: WarehouseError::Unreachable(_),
                ..
            }
        ));
        assert_eq!(warehouse.mutations, 0);
    }

    #[tokio::test]
    async fn test_missing_year_aborts_before_mutation() {
        let mut dataset = sample();
        dataset.records[2].year = None;
        let mut warehouse = MemoryWarehouse::new();

        let err = load(&mut warehouse, &dataset).await.unwrap_err();
        assert!(matches!(err, LoadError::MissingYear { row: 2 }));
        assert_eq!(warehouse.mutations, 0);
    }

    #[tokio::test]
    async fn test_duplicate_business_key_violates_fact_grain() {
        let mut dataset = sample();
        dataset.records.push(dataset.records[0].clone());
        let mut warehouse = MemoryWarehouse::new();

        let err = load(&mut warehouse, &dataset).await.unwrap_err();
        assert_eq!(err.state(), LoadState::LoadFact);
        assert!(matches!(
            err,
            LoadError::Warehouse {
                source: WarehouseError::Constraint {
                    table: "fact_energy_generation",
                    ..
                },
                ..
            }
        ));
        assert_eq!(warehouse.committed.row_counts(), [0; 5]);
    }
}

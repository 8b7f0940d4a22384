//! In-memory warehouse for loader tests. Enforces the same natural-key,
//! foreign-key and fact-grain constraints as the Postgres schema.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{CountryKey, FactRow, ProducerKey, TechnologyKey, TimeRow, Warehouse};
use crate::error::WarehouseError;

/// Call that should fail on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Truncate,
    InsertCountries,
    ReadProducers,
    InsertFacts,
    Commit,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub countries: Vec<(i32, CountryKey)>,
    pub technologies: Vec<(i32, TechnologyKey)>,
    pub times: Vec<(i32, TimeRow)>,
    pub producers: Vec<(i32, ProducerKey)>,
    pub facts: Vec<FactRow>,
}

impl Tables {
    pub fn row_counts(&self) -> [usize; 5] {
        [
            self.countries.len(),
            self.technologies.len(),
            self.times.len(),
            self.producers.len(),
            self.facts.len(),
        ]
    }
}

fn next_id<T>(rows: &[(i32, T)]) -> i32 {
    rows.last().map_or(1, |(id, _)| id + 1)
}

fn append_unique<K: Clone + Eq + std::hash::Hash>(
    table: &'static str,
    existing: &mut Vec<(i32, K)>,
    rows: &[K],
) -> Result<u64, WarehouseError> {
    let mut seen: HashSet<K> = existing.iter().map(|(_, k)| k.clone()).collect();
    for row in rows {
        if !seen.insert(row.clone()) {
            return Err(WarehouseError::Constraint {
                table,
                detail: "duplicate natural key".to_string(),
            });
        }
        let id = next_id(existing);
        existing.push((id, row.clone()));
    }
    Ok(rows.len() as u64)
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    pub committed: Tables,
    staged: Option<Tables>,
    pub unreachable: bool,
    pub fail_at: Option<FailPoint>,
    /// Mutating calls received, committed or not.
    pub mutations: usize,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn staged(&mut self) -> Result<&mut Tables, WarehouseError> {
        self.staged.as_mut().ok_or(WarehouseError::NoTransaction)
    }

    fn trip(&self, point: FailPoint) -> Result<(), WarehouseError> {
        if self.fail_at == Some(point) {
            return Err(WarehouseError::Unreachable(format!(
                "injected failure at {point:?}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn check_connection(&mut self) -> Result<(), WarehouseError> {
        if self.unreachable {
            return Err(WarehouseError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), WarehouseError> {
        self.check_connection().await?;
        if self.staged.is_none() {
            self.staged = Some(self.committed.clone());
        }
        Ok(())
    }

    async fn truncate_all(&mut self) -> Result<(), WarehouseError> {
        self.trip(FailPoint::Truncate)?;
        self.mutations += 1;
        *self.staged()? = Tables::default();
        Ok(())
    }

    async fn insert_countries(&mut self, rows: &[CountryKey]) -> Result<u64, WarehouseError> {
        self.trip(FailPoint::InsertCountries)?;
        self.mutations += 1;
        append_unique("dim_country", &mut self.staged()?.countries, rows)
    }

    async fn insert_technologies(
        &mut self,
        rows: &[TechnologyKey],
    ) -> Result<u64, WarehouseError> {
        self.mutations += 1;
        append_unique("dim_technology", &mut self.staged()?.technologies, rows)
    }

    async fn insert_times(&mut self, rows: &[TimeRow]) -> Result<u64, WarehouseError> {
        self.mutations += 1;
        let times = &mut self.staged()?.times;
        let mut years: HashSet<i32> = times.iter().map(|(_, t)| t.year).collect();
        for row in rows {
            if !years.insert(row.year) {
                return Err(WarehouseError::Constraint {
                    table: "dim_time",
                    detail: format!("duplicate year {}", row.year),
                });
            }
            let id = next_id(times);
            times.push((id, *row));
        }
        Ok(rows.len() as u64)
    }

    async fn insert_producers(&mut self, rows: &[ProducerKey]) -> Result<u64, WarehouseError> {
        self.mutations += 1;
        append_unique("dim_producer", &mut self.staged()?.producers, rows)
    }

    async fn read_countries(&mut self) -> Result<Vec<(i32, CountryKey)>, WarehouseError> {
        Ok(self.staged()?.countries.clone())
    }

    async fn read_technologies(&mut self) -> Result<Vec<(i32, TechnologyKey)>, WarehouseError> {
        Ok(self.staged()?.technologies.clone())
    }

    async fn read_times(&mut self) -> Result<Vec<(i32, TimeRow)>, WarehouseError> {
        Ok(self.staged()?.times.clone())
    }

    async fn read_producers(&mut self) -> Result<Vec<(i32, ProducerKey)>, WarehouseError> {
        self.trip(FailPoint::ReadProducers)?;
        Ok(self.staged()?.producers.clone())
    }

    async fn insert_facts(&mut self, rows: &[FactRow]) -> Result<u64, WarehouseError> {
        self.trip(FailPoint::InsertFacts)?;
        self.mutations += 1;
        let tables = self.staged()?;

        let country_ids: HashSet<i32> = tables.countries.iter().map(|(id, _)| *id).collect();
        let technology_ids: HashSet<i32> = tables.technologies.iter().map(|(id, _)| *id).collect();
        let time_ids: HashSet<i32> = tables.times.iter().map(|(id, _)| *id).collect();
        let producer_ids: HashSet<i32> = tables.producers.iter().map(|(id, _)| *id).collect();

        let mut grain: HashSet<(i32, i32, i32, i32)> = tables
            .facts
            .iter()
            .map(|f| (f.country_id, f.technology_id, f.time_id, f.producer_id))
            .collect();

        for row in rows {
            let references_ok = country_ids.contains(&row.country_id)
                && technology_ids.contains(&row.technology_id)
                && time_ids.contains(&row.time_id)
                && producer_ids.contains(&row.producer_id);
            if !references_ok {
                return Err(WarehouseError::Constraint {
                    table: "fact_energy_generation",
                    detail: "foreign key violation".to_string(),
                });
            }
            if !grain.insert((row.country_id, row.technology_id, row.time_id, row.producer_id)) {
                return Err(WarehouseError::Constraint {
                    table: "fact_energy_generation",
                    detail: "duplicate fact grain".to_string(),
                });
            }
            tables.facts.push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        self.trip(FailPoint::Commit)?;
        let staged = self.staged.take().ok_or(WarehouseError::NoTransaction)?;
        self.committed = staged;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        self.staged = None;
        Ok(())
    }
}

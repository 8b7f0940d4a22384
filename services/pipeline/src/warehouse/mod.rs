//! Star-schema warehouse access.
//!
//! The loader drives a [`Warehouse`] through one transaction. All mutating
//! calls operate on the transaction opened by [`Warehouse::begin`].

use async_trait::async_trait;

use crate::dataset::Record;
use crate::error::WarehouseError;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgWarehouse;

/// Rows per multi-row INSERT statement.
pub const INSERT_CHUNK_SIZE: usize = 1000;

/// Natural key of `dim_country`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CountryKey {
    pub country: Option<String>,
    pub iso3_code: Option<String>,
    pub m49_code: Option<String>,
    pub region: Option<String>,
    pub sub_region: Option<String>,
}

impl From<&Record> for CountryKey {
    fn from(r: &Record) -> Self {
        Self {
            country: r.country.clone(),
            iso3_code: r.iso3_code.clone(),
            m49_code: r.m49_code.clone(),
            region: r.region.clone(),
            sub_region: r.sub_region.clone(),
        }
    }
}

/// Natural key of `dim_technology`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TechnologyKey {
    pub technology: Option<String>,
    pub sub_technology: Option<String>,
    pub group_technology: Option<String>,
    pub renewable_or_not: Option<String>,
}

impl From<&Record> for TechnologyKey {
    fn from(r: &Record) -> Self {
        Self {
            technology: r.technology.clone(),
            sub_technology: r.sub_technology.clone(),
            group_technology: r.group_technology.clone(),
            renewable_or_not: r.renewable_or_not.clone(),
        }
    }
}

/// A `dim_time` row; `year` is the natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRow {
    pub year: i32,
    pub decade: i32,
}

impl TimeRow {
    pub fn for_year(year: i32) -> Self {
        Self {
            year,
            decade: year.div_euclid(10) * 10,
        }
    }
}

/// Natural key of `dim_producer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerKey {
    pub producer_type: Option<String>,
}

impl From<&Record> for ProducerKey {
    fn from(r: &Record) -> Self {
        Self {
            producer_type: r.producer_type.clone(),
        }
    }
}

/// A `fact_energy_generation` row: four surrogate keys plus the metrics in
/// [`crate::schema::Metric`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub country_id: i32,
    pub technology_id: i32,
    pub time_id: i32,
    pub producer_id: i32,
    pub metrics: [Option<f64>; 6],
}

#[async_trait]
pub trait Warehouse: Send {
    /// Cheap round trip; fails with [`WarehouseError::Unreachable`] when the
    /// store cannot be reached.
    async fn check_connection(&mut self) -> Result<(), WarehouseError>;

    async fn begin(&mut self) -> Result<(), WarehouseError>;

    /// Empty the fact and dimension tables and restart surrogate keys at 1.
    async fn truncate_all(&mut self) -> Result<(), WarehouseError>;

    async fn insert_countries(&mut self, rows: &[CountryKey]) -> Result<u64, WarehouseError>;
    async fn insert_technologies(&mut self, rows: &[TechnologyKey])
        -> Result<u64, WarehouseError>;
    async fn insert_times(&mut self, rows: &[TimeRow]) -> Result<u64, WarehouseError>;
    async fn insert_producers(&mut self, rows: &[ProducerKey]) -> Result<u64, WarehouseError>;

    async fn read_countries(&mut self) -> Result<Vec<(i32, CountryKey)>, WarehouseError>;
    async fn read_technologies(&mut self) -> Result<Vec<(i32, TechnologyKey)>, WarehouseError>;
    async fn read_times(&mut self) -> Result<Vec<(i32, TimeRow)>, WarehouseError>;
    async fn read_producers(&mut self) -> Result<Vec<(i32, ProducerKey)>, WarehouseError>;

    async fn insert_facts(&mut self, rows: &[FactRow]) -> Result<u64, WarehouseError>;

    async fn commit(&mut self) -> Result<(), WarehouseError>;

    /// Discard the open transaction. A no-op when none is open.
    async fn rollback(&mut self) -> Result<(), WarehouseError>;
}

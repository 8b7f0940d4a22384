use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use super::{
    CountryKey, FactRow, ProducerKey, TechnologyKey, TimeRow, Warehouse, INSERT_CHUNK_SIZE,
};
use crate::error::WarehouseError;

const SCHEMA_DDL: &str = include_str!("../../sql/create_tables.sql");

const TRUNCATE_ALL: &str = "TRUNCATE TABLE fact_energy_generation, dim_country, dim_technology, dim_time, dim_producer RESTART IDENTITY CASCADE";

/// Postgres-backed warehouse. Holds at most one open transaction.
pub struct PgWarehouse {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

/// Map integrity-constraint violations (SQLSTATE class 23) to
/// [`WarehouseError::Constraint`].
fn classify(table: &'static str) -> impl Fn(sqlx::Error) -> WarehouseError {
    move |err| {
        if let Some(db) = err.as_database_error() {
            if db.code().is_some_and(|code| code.starts_with("23")) {
                return WarehouseError::Constraint {
                    table,
                    detail: db.message().to_string(),
                };
            }
        }
        WarehouseError::Database(err)
    }
}

async fn execute(
    conn: &mut PgConnection,
    table: &'static str,
    builder: &mut QueryBuilder<'_, Postgres>,
) -> Result<u64, WarehouseError> {
    let done = builder
        .build()
        .execute(conn)
        .await
        .map_err(classify(table))?;
    Ok(done.rows_affected())
}

impl PgWarehouse {
    /// Build a lazily connecting pool; nothing touches the network until the
    /// first query.
    pub fn connect(
        db_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, WarehouseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect_lazy(db_url)?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// `SELECT version()`.
    pub async fn server_version(&self) -> Result<String, WarehouseError> {
        let (version,): (String,) = sqlx::query_as("SELECT version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WarehouseError::Unreachable(e.to_string()))?;
        Ok(version)
    }

    /// Create the star-schema tables if they do not exist.
    pub async fn init_schema(&self) -> Result<(), WarehouseError> {
        sqlx::raw_sql(SCHEMA_DDL).execute(&self.pool).await?;
        info!("warehouse schema applied");
        Ok(())
    }

    fn conn(&mut self) -> Result<&mut PgConnection, WarehouseError> {
        self.tx.as_deref_mut().ok_or(WarehouseError::NoTransaction)
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn check_connection(&mut self) -> Result<(), WarehouseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| WarehouseError::Unreachable(e.to_string()))?;
        debug!("warehouse reachable");
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), WarehouseError> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        Ok(())
    }

    async fn truncate_all(&mut self) -> Result<(), WarehouseError> {
        let conn = self.conn()?;
        sqlx::query(TRUNCATE_ALL).execute(conn).await?;
        Ok(())
    }

    async fn insert_countries(&mut self, rows: &[CountryKey]) -> Result<u64, WarehouseError> {
        let conn = self.conn()?;
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO dim_country (country, iso3_code, m49_code, region, sub_region) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.country.as_deref())
                    .push_bind(row.iso3_code.as_deref())
                    .push_bind(row.m49_code.as_deref())
                    .push_bind(row.region.as_deref())
                    .push_bind(row.sub_region.as_deref());
            });
            inserted += execute(&mut *conn, "dim_country", &mut builder).await?;
        }
        Ok(inserted)
    }

    async fn insert_technologies(
        &mut self,
        rows: &[TechnologyKey],
    ) -> Result<u64, WarehouseError> {
        let conn = self.conn()?;
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO dim_technology (technology, sub_technology, group_technology, renewable_or_not) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.technology.as_deref())
                    .push_bind(row.sub_technology.as_deref())
                    .push_bind(row.group_technology.as_deref())
                    .push_bind(row.renewable_or_not.as_deref());
            });
            inserted += execute(&mut *conn, "dim_technology", &mut builder).await?;
        }
        Ok(inserted)
    }

    async fn insert_times(&mut self, rows: &[TimeRow]) -> Result<u64, WarehouseError> {
        let conn = self.conn()?;
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new("INSERT INTO dim_time (year, decade) ");
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.year).push_bind(row.decade);
            });
            inserted += execute(&mut *conn, "dim_time", &mut builder).await?;
        }
        Ok(inserted)
    }

    async fn insert_producers(&mut self, rows: &[ProducerKey]) -> Result<u64, WarehouseError> {
        let conn = self.conn()?;
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new("INSERT INTO dim_producer (producer_type) ");
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.producer_type.as_deref());
            });
            inserted += execute(&mut *conn, "dim_producer", &mut builder).await?;
        }
        Ok(inserted)
    }

    async fn read_countries(&mut self) -> Result<Vec<(i32, CountryKey)>, WarehouseError> {
        let conn = self.conn()?;
        let rows: Vec<(i32, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT country_id, country, iso3_code, m49_code, region, sub_region FROM dim_country ORDER BY country_id",
            )
            .fetch_all(conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, country, iso3_code, m49_code, region, sub_region)| {
                (
                    id,
                    CountryKey {
                        country,
                        iso3_code,
                        m49_code,
                        region,
                        sub_region,
                    },
                )
            })
            .collect())
    }

    async fn read_technologies(&mut self) -> Result<Vec<(i32, TechnologyKey)>, WarehouseError> {
        let conn = self.conn()?;
        let rows: Vec<(i32, Option<String>, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT technology_id, technology, sub_technology, group_technology, renewable_or_not FROM dim_technology ORDER BY technology_id",
            )
            .fetch_all(conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, technology, sub_technology, group_technology, renewable_or_not)| {
                    (
                        id,
                        TechnologyKey {
                            technology,
                            sub_technology,
                            group_technology,
                            renewable_or_not,
                        },
                    )
                },
            )
            .collect())
    }

    async fn read_times(&mut self) -> Result<Vec<(i32, TimeRow)>, WarehouseError> {
        let conn = self.conn()?;
        let rows: Vec<(i32, i32, i32)> =
            sqlx::query_as("SELECT time_id, year, decade FROM dim_time ORDER BY time_id")
                .fetch_all(conn)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, year, decade)| (id, TimeRow { year, decade }))
            .collect())
    }

    async fn read_producers(&mut self) -> Result<Vec<(i32, ProducerKey)>, WarehouseError> {
        let conn = self.conn()?;
        let rows: Vec<(i32, Option<String>)> = sqlx::query_as(
            "SELECT producer_id, producer_type FROM dim_producer ORDER BY producer_id",
        )
        .fetch_all(conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, producer_type)| (id, ProducerKey { producer_type }))
            .collect())
    }

    async fn insert_facts(&mut self, rows: &[FactRow]) -> Result<u64, WarehouseError> {
        let conn = self.conn()?;
        let mut inserted = 0;
        for (n, chunk) in rows.chunks(INSERT_CHUNK_SIZE).enumerate() {
            let mut builder = QueryBuilder::new(
                "INSERT INTO fact_energy_generation (country_id, technology_id, time_id, producer_id, \
                 electricity_generation_gwh, electricity_installed_capacity_mw, heat_generation_tj, \
                 total_public_flows_usd_m, international_public_flows_usd_m, capacity_per_capita_w) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.country_id)
                    .push_bind(row.technology_id)
                    .push_bind(row.time_id)
                    .push_bind(row.producer_id);
                for value in row.metrics {
                    b.push_bind(value);
                }
            });
            inserted += execute(&mut *conn, "fact_energy_generation", &mut builder).await?;
            debug!(chunk = n, rows = chunk.len(), "fact chunk inserted");
        }
        Ok(inserted)
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        let tx = self.tx.take().ok_or(WarehouseError::NoTransaction)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

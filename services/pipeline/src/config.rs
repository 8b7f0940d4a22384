//! Runtime configuration from the environment (and `.env` via `dotenvy`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// Only needed by commands that touch the warehouse.
    pub db_url: Option<String>,
    pub data_dir: PathBuf,
    pub db_max_connections: u32,
    pub db_connect_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_max_connections = match var("DB_MAX_CONNECTIONS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("DB_MAX_CONNECTIONS is not a number: {v}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        let timeout_secs = match var("DB_CONNECT_TIMEOUT_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("DB_CONNECT_TIMEOUT_SECS is not a number: {v}"))?,
            None => DEFAULT_CONNECT_TIMEOUT_SECS,
        };

        Ok(Self {
            db_url: var("DB_URL").filter(|v| !v.trim().is_empty()),
            data_dir: PathBuf::from(var("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            db_max_connections,
            db_connect_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }
}

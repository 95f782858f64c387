use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::debug;

pub mod queries;

pub type DbPool = Pool<Postgres>;

/// Sizing for the shared pool. Each live subscription pins one extra
/// connection for LISTEN on top of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// A sweep or command waiting longer than this fails as a transport error
    /// and is retried on the next tick or redelivery.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

pub async fn init_pool(database_url: &str, settings: &PoolSettings) -> Result<DbPool> {
    debug!("Opening alert store pool: {:?}", settings);
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await
        .context("connecting to the alert store")?;
    Ok(pool)
}

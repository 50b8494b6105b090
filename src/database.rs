//! # PostgreSQL Connection Pool
//!
//! The relational store is the system of record for queue items and
//! delivery attempts (spec §5 "Shared-resource policy"). This module owns
//! pool creation and a trivial health check, the same shape as the rest of
//! the workspace's `database` module.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::PipelineError;

/// Creates a PostgreSQL connection pool from configuration.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, PipelineError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    info!("database connection pool created");
    Ok(pool)
}

/// Verifies database connectivity with a trivial query.
pub async fn health_check(pool: &PgPool) -> Result<(), PipelineError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Applies the `migrations/` directory's pending `sqlx` migrations. Run at
/// startup so a fresh deployment provisions `notifications`, `email_queue`
/// and `email_deliveries` without a separate operator step.
pub async fn run_migrations(pool: &PgPool) -> Result<(), PipelineError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| PipelineError::Storage(sqlx::Error::Migrate(Box::new(err))))?;
    info!("database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    // Real connectivity tests require a live Postgres instance; run them
    // with `cargo test --features integration -- --ignored` once wired to
    // a test database.
}

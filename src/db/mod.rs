//! # Database connection
//!
//! Owns the sqlx Postgres pool used by the block and transaction stores and applies the
//! schema in `migrations/` at startup.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Pool, Postgres};
use tracing::info;

use crate::errors::{IngestError, Result};


pub const DB_MAX_CONNECTIONS: u32 = 50;

/// Statements slower than this are logged at debug level.
const SLOW_STATEMENT_THRESHOLD: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub struct DbConnection {
    pub pool: Pool<Postgres>,
}

impl DbConnection {
    pub async fn new(db_conn_string: impl AsRef<str>) -> Result<Arc<Self>> {
        let conn_options: PgConnectOptions = db_conn_string.as_ref().parse().map_err(|e| {
            IngestError::configuration(
                "db_conn_string",
                &format!("Invalid database connection string: {e}"),
            )
        })?;
        let conn_options = conn_options
            .log_slow_statements(tracing::log::LevelFilter::Debug, SLOW_STATEMENT_THRESHOLD);

        let pool = PgPoolOptions::new()
            .max_connections(DB_MAX_CONNECTIONS)
            .connect_with(conn_options)
            .await
            .map_err(|e| {
                IngestError::database_connection(format!("Failed to connect to database: {e}"))
            })?;

        Ok(Arc::new(Self { pool }))
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("[db] running migrations");
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub async fn check_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

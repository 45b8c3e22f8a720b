use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

/// PostgreSQL client with connection pooling.
///
/// Holds the durable copies of pool snapshots, token prices and IBC denom
/// traces behind the in-memory caches. Uses `deadpool-postgres` for
/// connection management.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    /// Builds the connection pool and waits for the database to accept
    /// connections.
    ///
    /// The indexer usually starts alongside its database, so the first
    /// connection races server startup. The pool is built once; only the
    /// readiness probe is retried, with a linear backoff taken from the
    /// settings, before giving up on the whole process.
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        let mgr = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(mgr)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let attempts = settings.connect_attempts.max(1);
        let backoff = Duration::from_millis(settings.connect_backoff_ms);
        let mut attempt = 1;
        loop {
            match pool.get().await {
                Ok(_conn) => {
                    info!(
                        "Connected to PostgreSQL at {}:{}/{}",
                        settings.host, settings.port, settings.database
                    );
                    return Ok(Self { pool });
                }
                Err(e) if attempt < attempts => {
                    let wait = backoff * attempt;
                    warn!(
                        "PostgreSQL not ready (attempt {attempt}/{attempts}): {e}; \
                         retrying in {wait:?}"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "PostgreSQL at {}:{} still unreachable after {attempts} attempts",
                            settings.host, settings.port
                        )
                    });
                }
            }
        }
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    /// Applies `schema/postgres.sql`.
    ///
    /// The script is sent to the server in one batch, so statement splitting
    /// is the server's job: dollar-quoted function bodies and semicolons in
    /// literals need no client-side parsing. Every statement in the file is
    /// `IF NOT EXISTS`-guarded, which keeps the batch idempotent across
    /// restarts.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        let client = self.pool.get().await?;
        client
            .batch_execute(&schema)
            .await
            .context("Failed to apply schema/postgres.sql")?;

        info!("PostgreSQL schema applied");
        Ok(())
    }
}

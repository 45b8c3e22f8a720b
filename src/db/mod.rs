use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Settings;

pub mod models;
pub mod postgres;

pub use postgres::PostgresClient;

use models::{DenomTrace, PoolSnapshot, TokenPrice};

/// Durable storage behind the in-memory caches.
///
/// Coins persist as their canonical normalized string, instants as
/// nanoseconds since epoch. Lookups return `None`/empty rather than erroring
/// on absence; errors are reserved for connectivity and malformed rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_ibc_denom(&self, trace: &DenomTrace) -> anyhow::Result<()>;
    async fn save_token_price(&self, price: &TokenPrice) -> anyhow::Result<()>;
    async fn save_pool(&self, pool: &PoolSnapshot) -> anyhow::Result<()>;

    async fn ibc_denom(&self, ibc_denom: &str) -> anyhow::Result<Option<DenomTrace>>;
    async fn ibc_denom_all(&self) -> anyhow::Result<Vec<DenomTrace>>;

    async fn token_price(
        &self,
        at: DateTime<Utc>,
        denom: &str,
    ) -> anyhow::Result<Option<TokenPrice>>;
    /// Nearest stored prices around `at`: the latest at or before it and the
    /// earliest at or after it, at most two rows.
    async fn nearest_token_price(
        &self,
        at: DateTime<Utc>,
        denom: &str,
    ) -> anyhow::Result<Vec<TokenPrice>>;
    async fn latest_token_price(&self, denom: &str) -> anyhow::Result<Option<TokenPrice>>;

    async fn latest_pool(&self, pool_id: u64) -> anyhow::Result<Option<PoolSnapshot>>;
    /// Pools within [min_height, max_height]; `pool_id == 0` means all pools.
    async fn pools_range(
        &self,
        min_height: u64,
        max_height: u64,
        pool_id: u64,
    ) -> anyhow::Result<Vec<PoolSnapshot>>;
    /// Prices within [min, max]; empty `denom` means all denoms.
    async fn token_prices_range(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
        denom: &str,
    ) -> anyhow::Result<Vec<TokenPrice>>;

    /// Removes prices strictly older than the cutoff; returns rows removed.
    async fn prune_token_prices(&self, before: DateTime<Utc>) -> anyhow::Result<u64>;
    /// Removes pools strictly below the height; returns rows removed.
    async fn prune_pools(&self, min_height: u64) -> anyhow::Result<u64>;
}

/// Database handle shared across indexer tasks.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;
        postgres.migrate().await?;

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.postgres.clone()
    }
}

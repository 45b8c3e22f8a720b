use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;

use crate::db::models::{DenomTrace, PoolSnapshot, TokenPrice};
use crate::db::postgres::PostgresClient;
use crate::db::Store;
use crate::utils::{datetime_to_ns, ns_to_datetime};

fn row_to_trace(row: &Row) -> DenomTrace {
    DenomTrace {
        ibc_denom: row.get("ibc_denom"),
        path: row.get("path"),
        base_denom: row.get("base_denom"),
    }
}

fn row_to_price(row: &Row) -> TokenPrice {
    TokenPrice {
        last_updated: ns_to_datetime(row.get("last_updated")),
        name: row.get("name"),
        base: row.get("base"),
        value: row.get("value"),
    }
}

fn row_to_pool(row: &Row) -> anyhow::Result<PoolSnapshot> {
    let height: i64 = row.get("height");
    let pool_id: i64 = row.get("pool_id");
    let liquidity: String = row.get("liquidity");
    let volume: String = row.get("volume");

    Ok(PoolSnapshot {
        height: height as u64,
        pool_id: pool_id as u64,
        timestamp: ns_to_datetime(row.get("ts")),
        liquidity: liquidity.parse()?,
        volume: volume.parse()?,
    })
}

#[async_trait]
impl Store for PostgresClient {
    async fn save_ibc_denom(&self, trace: &DenomTrace) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO indexer.ibc_denoms (ibc_denom, path, base_denom)
                VALUES ($1, $2, $3)
                ON CONFLICT (ibc_denom) DO NOTHING
                "#,
                &[&trace.ibc_denom, &trace.path, &trace.base_denom],
            )
            .await?;
        Ok(())
    }

    async fn save_token_price(&self, price: &TokenPrice) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO indexer.token_prices (name, base, last_updated, value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (name, base, last_updated) DO UPDATE SET
                    value = EXCLUDED.value,
                    last_updated = EXCLUDED.last_updated
                "#,
                &[
                    &price.name,
                    &price.base,
                    &datetime_to_ns(price.last_updated),
                    &price.value,
                ],
            )
            .await?;
        Ok(())
    }

    async fn save_pool(&self, pool: &PoolSnapshot) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO indexer.pools (height, pool_id, ts, liquidity, volume)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (height, pool_id) DO UPDATE SET
                    liquidity = EXCLUDED.liquidity,
                    volume = EXCLUDED.volume,
                    ts = EXCLUDED.ts
                "#,
                &[
                    &(pool.height as i64),
                    &(pool.pool_id as i64),
                    &datetime_to_ns(pool.timestamp),
                    &pool.liquidity.to_string(),
                    &pool.volume.to_string(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn ibc_denom(&self, ibc_denom: &str) -> anyhow::Result<Option<DenomTrace>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT ibc_denom, path, base_denom FROM indexer.ibc_denoms WHERE ibc_denom = $1",
                &[&ibc_denom],
            )
            .await?;
        Ok(row.as_ref().map(row_to_trace))
    }

    async fn ibc_denom_all(&self) -> anyhow::Result<Vec<DenomTrace>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT ibc_denom, path, base_denom FROM indexer.ibc_denoms",
                &[],
            )
            .await?;
        Ok(rows.iter().map(row_to_trace).collect())
    }

    async fn token_price(
        &self,
        at: DateTime<Utc>,
        denom: &str,
    ) -> anyhow::Result<Option<TokenPrice>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT name, base, last_updated, value FROM indexer.token_prices
                WHERE name = $1 AND last_updated = $2
                "#,
                &[&denom, &datetime_to_ns(at)],
            )
            .await?;
        Ok(row.as_ref().map(row_to_price))
    }

    async fn nearest_token_price(
        &self,
        at: DateTime<Utc>,
        denom: &str,
    ) -> anyhow::Result<Vec<TokenPrice>> {
        let client = self.pool.get().await?;
        let ts = datetime_to_ns(at);
        let rows = client
            .query(
                r#"
                SELECT name, base, last_updated, value FROM indexer.token_prices
                WHERE name = $1 AND (
                    last_updated = (
                        SELECT MAX(last_updated) FROM indexer.token_prices
                        WHERE name = $1 AND last_updated <= $2
                    ) OR last_updated = (
                        SELECT MIN(last_updated) FROM indexer.token_prices
                        WHERE name = $1 AND last_updated >= $2
                    )
                )
                ORDER BY last_updated
                LIMIT 2
                "#,
                &[&denom, &ts],
            )
            .await?;
        Ok(rows.iter().map(row_to_price).collect())
    }

    async fn latest_token_price(&self, denom: &str) -> anyhow::Result<Option<TokenPrice>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT name, base, last_updated, value FROM indexer.token_prices
                WHERE name = $1
                ORDER BY last_updated DESC
                LIMIT 1
                "#,
                &[&denom],
            )
            .await?;
        Ok(row.as_ref().map(row_to_price))
    }

    async fn latest_pool(&self, pool_id: u64) -> anyhow::Result<Option<PoolSnapshot>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT height, pool_id, ts, liquidity, volume FROM indexer.pools
                WHERE pool_id = $1
                ORDER BY height DESC
                LIMIT 1
                "#,
                &[&(pool_id as i64)],
            )
            .await?;
        row.as_ref().map(row_to_pool).transpose()
    }

    async fn pools_range(
        &self,
        min_height: u64,
        max_height: u64,
        pool_id: u64,
    ) -> anyhow::Result<Vec<PoolSnapshot>> {
        let client = self.pool.get().await?;
        let min = min_height as i64;
        let max = max_height as i64;

        let rows = if pool_id == 0 {
            client
                .query(
                    r#"
                    SELECT height, pool_id, ts, liquidity, volume FROM indexer.pools
                    WHERE height >= $1 AND height <= $2
                    ORDER BY height
                    "#,
                    &[&min, &max],
                )
                .await?
        } else {
            client
                .query(
                    r#"
                    SELECT height, pool_id, ts, liquidity, volume FROM indexer.pools
                    WHERE height >= $1 AND height <= $2 AND pool_id = $3
                    ORDER BY height
                    "#,
                    &[&min, &max, &(pool_id as i64)],
                )
                .await?
        };

        rows.iter().map(row_to_pool).collect()
    }

    async fn token_prices_range(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
        denom: &str,
    ) -> anyhow::Result<Vec<TokenPrice>> {
        let client = self.pool.get().await?;
        let min = datetime_to_ns(min);
        let max = datetime_to_ns(max);

        let rows = if denom.is_empty() {
            client
                .query(
                    r#"
                    SELECT name, base, last_updated, value FROM indexer.token_prices
                    WHERE last_updated >= $1 AND last_updated <= $2
                    "#,
                    &[&min, &max],
                )
                .await?
        } else {
            client
                .query(
                    r#"
                    SELECT name, base, last_updated, value FROM indexer.token_prices
                    WHERE last_updated >= $1 AND last_updated <= $2 AND name = $3
                    "#,
                    &[&min, &max, &denom],
                )
                .await?
        };

        Ok(rows.iter().map(row_to_price).collect())
    }

    async fn prune_token_prices(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM indexer.token_prices WHERE last_updated < $1",
                &[&datetime_to_ns(before)],
            )
            .await?;
        Ok(removed)
    }

    async fn prune_pools(&self, min_height: u64) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM indexer.pools WHERE height < $1",
                &[&(min_height as i64)],
            )
            .await?;
        Ok(removed)
    }
}

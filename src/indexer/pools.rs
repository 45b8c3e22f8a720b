use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context};
use log::{error, info, warn};
use rustc_hash::FxHashMap;

use crate::db::models::PoolSnapshot;
use crate::indexer::status::{PoolStatus, PoolStatusVolumeAt};
use crate::indexer::Indexer;
use crate::utils::join_errors;

/// Height-indexed pool snapshots behind a single mutex.
///
/// Two-level map `height -> pool_id -> snapshot`. No iteration is exposed:
/// callers can only observe complete snapshots, never partial state. Size is
/// bounded externally by the periodic prune.
pub struct PoolCache {
    pools: Mutex<FxHashMap<u64, FxHashMap<u64, PoolSnapshot>>>,
}

impl PoolCache {
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<u64, FxHashMap<u64, PoolSnapshot>>> {
        match self.pools.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set(&self, pool: PoolSnapshot) {
        let mut pools = self.lock();
        pools
            .entry(pool.height)
            .or_default()
            .insert(pool.pool_id, pool);
    }

    pub fn has(&self, height: u64, id: u64) -> bool {
        let pools = self.lock();
        pools
            .get(&height)
            .map(|m| m.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn get(&self, height: u64, id: u64) -> Option<PoolSnapshot> {
        let pools = self.lock();
        pools.get(&height).and_then(|m| m.get(&id)).cloned()
    }

    /// Drops every height strictly below `min_height`; returns the number of
    /// heights removed.
    pub fn prune(&self, min_height: u64) -> usize {
        let mut pools = self.lock();
        let before = pools.len();
        pools.retain(|height, _| *height >= min_height);
        before - pools.len()
    }
}

impl Default for PoolCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer {
    /// Loads the recent-height window of pool snapshots from the store.
    pub(crate) async fn preheat_pools(&self) {
        let height = self.current_height.load(Ordering::Acquire);
        let start = height.saturating_sub(self.window);

        let pools = match self.store.pools_range(start, height, 0).await {
            Ok(pools) => pools,
            Err(e) => {
                warn!("Failed fetching pools for blocks from {start} till {height}: {e:#}");
                return;
            }
        };

        let mut first_height = height + 10;
        let mut last_height = 0u64;
        let count = pools.len();
        for pool in pools {
            self.current_height.fetch_max(pool.height, Ordering::AcqRel);
            if pool.height > last_height {
                last_height = pool.height;
            }
            if pool.height < first_height {
                first_height = pool.height;
            }
            self.pools.set(pool);
        }

        info!(
            "SYNC: Pools loaded: {count} for start_block={start} and end_block={height}; \
             first_block={first_height} last_block={last_height}"
        );
    }

    pub(crate) async fn pools_prune(&self, min_height: u64) {
        self.pools.prune(min_height);

        if let Err(e) = self.store.prune_pools(min_height).await {
            warn!("Failed pruning pools below {min_height}: {e:#}");
        }
    }

    /// Enriched statuses for several pools at one height (`0` means the
    /// current height).
    ///
    /// Attempts every pool: individual failures leave a default entry at
    /// their index and are joined into the returned error.
    pub async fn pool_statuses_at(
        &self,
        height: u64,
        pool_ids: &[u64],
    ) -> (Vec<PoolStatus>, u64, anyhow::Result<()>) {
        let height = if height == 0 {
            self.current_height.load(Ordering::Acquire)
        } else {
            height
        };

        let mut statuses = vec![PoolStatus::default(); pool_ids.len()];
        let mut errors = Vec::new();
        for (i, id) in pool_ids.iter().enumerate() {
            match self.pool_status_at(height, *id).await {
                Ok((status, _)) => statuses[i] = status,
                Err(e) => errors.push(e),
            }
        }

        (statuses, height, join_errors(errors))
    }

    /// Status of one pool at the given height, read through the cache.
    pub async fn pool_status_at(
        &self,
        height: u64,
        pool_id: u64,
    ) -> anyhow::Result<(PoolStatus, u64)> {
        let height = if height == 0 {
            self.current_height.load(Ordering::Acquire)
        } else {
            height
        };

        let pool = match self.get_pool(height, pool_id).await {
            Ok(pool) => pool,
            Err(e) => {
                error!("SYNC: PoolStatusAt failed for {pool_id} at height={height} err={e:#}");
                return Err(e);
            }
        };

        let status = PoolStatus {
            pool_id,
            total_liquidity: pool.liquidity,
            volumes: vec![PoolStatusVolumeAt {
                block_height: height as i64,
                volume: pool.volume,
                ..Default::default()
            }],
        };

        Ok((status, height))
    }

    /// Cache lookup with RPC read-through.
    ///
    /// On a miss both the liquidity and the volume query must succeed before
    /// anything is cached or persisted; an error caches no partial snapshot.
    async fn get_pool(&self, height: u64, pool_id: u64) -> anyhow::Result<PoolSnapshot> {
        let height = if height == 0 {
            self.current_height.load(Ordering::Acquire)
        } else {
            height
        };

        if let Some(pool) = self.pools.get(height, pool_id) {
            return Ok(pool);
        }

        let liquidity = self
            .rpc
            .pools_total_liquidity_at(height, &[pool_id])
            .await?;
        let volume = self.rpc.pools_volume_at(height, &[pool_id]).await?;

        let (Some(liquidity), Some(volume)) =
            (liquidity.into_iter().next(), volume.into_iter().next())
        else {
            bail!("empty response for pool {pool_id} at height {height}");
        };

        let pool = PoolSnapshot {
            height,
            pool_id,
            timestamp: self.block_to_timestamp(height),
            liquidity: liquidity.liquidity,
            volume: volume.volume,
        };

        self.pools.set(pool.clone());
        self.store
            .save_pool(&pool)
            .await
            .context("saving pool snapshot")?;

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::models::Coins;
    use crate::db::MockStore;
    use crate::indexer::testing::{bare_indexer, with_services};
    use crate::rpc::{MockChainRpc, PoolLiquidity, PoolVolume};

    fn snapshot(height: u64, pool_id: u64) -> PoolSnapshot {
        PoolSnapshot {
            height,
            pool_id,
            timestamp: Utc::now(),
            liquidity: "10stake".parse().unwrap(),
            volume: "100500uosmo".parse().unwrap(),
        }
    }

    #[test]
    fn set_then_get_preserves_snapshot() {
        let cache = PoolCache::new();
        let pool = snapshot(5, 1);

        cache.set(pool.clone());

        assert!(cache.has(5, 1));
        assert_eq!(cache.get(5, 1), Some(pool));
        assert!(!cache.has(5, 2));
        assert!(!cache.has(6, 1));
    }

    #[test]
    fn prune_removes_everything_below_watermark() {
        let cache = PoolCache::new();
        for height in 1..=10 {
            cache.set(snapshot(height, 1));
        }

        let removed = cache.prune(6);

        assert_eq!(removed, 5);
        for height in 1..6 {
            assert!(!cache.has(height, 1));
            assert!(cache.get(height, 1).is_none());
        }
        for height in 6..=10 {
            assert!(cache.has(height, 1));
        }
    }

    #[tokio::test]
    async fn read_through_fetches_once() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_pools_total_liquidity_at()
            .withf(|height, ids| *height == 5 && ids == [1])
            .times(1)
            .returning(|_, _| {
                Ok(vec![PoolLiquidity {
                    pool_id: 1,
                    liquidity: "10stake".parse().unwrap(),
                }])
            });
        rpc.expect_pools_volume_at()
            .withf(|height, ids| *height == 5 && ids == [1])
            .times(1)
            .returning(|_, _| {
                Ok(vec![PoolVolume {
                    pool_id: 1,
                    volume: "100500uosmo".parse().unwrap(),
                }])
            });

        let mut store = MockStore::new();
        store.expect_save_pool().times(1).returning(|_| Ok(()));

        let indexer = with_services(store, rpc, vec![1], 100);

        let (status, height) = indexer.pool_status_at(5, 1).await.unwrap();
        assert_eq!(height, 5);
        assert_eq!(status.pool_id, 1);
        assert_eq!(status.total_liquidity, "10stake".parse::<Coins>().unwrap());
        assert_eq!(status.volumes.len(), 1);
        assert_eq!(status.volumes[0].block_height, 5);

        // Second call must be served from the cache: the mock expectations
        // above would fail on a repeated RPC hit.
        let (status, _) = indexer.pool_status_at(5, 1).await.unwrap();
        assert_eq!(
            status.volumes[0].volume,
            "100500uosmo".parse::<Coins>().unwrap()
        );
    }

    #[tokio::test]
    async fn failed_fetch_caches_nothing() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_pools_total_liquidity_at()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("deadline exceeded")));

        let indexer = with_services(MockStore::new(), rpc, vec![1], 100);

        assert!(indexer.pool_status_at(5, 1).await.is_err());
        assert!(!indexer.pools.has(5, 1));
    }

    #[tokio::test]
    async fn statuses_join_errors_without_short_circuit() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_pools_total_liquidity_at()
            .returning(|_height, ids| {
                if ids[0] == 13 {
                    Err(anyhow::anyhow!("pool 13 unavailable"))
                } else {
                    Ok(vec![PoolLiquidity {
                        pool_id: ids[0],
                        liquidity: "10stake".parse().unwrap(),
                    }])
                }
            });
        rpc.expect_pools_volume_at().returning(|_, ids| {
            Ok(vec![PoolVolume {
                pool_id: ids[0],
                volume: "5uosmo".parse().unwrap(),
            }])
        });

        let mut store = MockStore::new();
        store.expect_save_pool().returning(|_| Ok(()));

        let indexer = with_services(store, rpc, vec![1, 13, 2], 100);

        let (statuses, height, result) = indexer.pool_statuses_at(7, &[1, 13, 2]).await;
        assert_eq!(height, 7);
        assert!(result.is_err());
        assert_eq!(statuses.len(), 3);
        // The failed pool keeps a zero-valued placeholder at its index.
        assert_eq!(statuses[1].pool_id, 0);
        assert!(statuses[1].volumes.is_empty());
        assert_eq!(statuses[0].pool_id, 1);
        assert_eq!(statuses[2].pool_id, 2);
    }

    #[tokio::test]
    async fn zero_height_substitutes_current() {
        let indexer = bare_indexer(vec![1], 100);
        indexer.set_latest_block_height(50, Utc::now());
        indexer.pools.set(snapshot(50, 1));

        // Height 0 resolves to the current height and hits the cache, so
        // the inert mocks are never consulted.
        let (status, height) = indexer.pool_status_at(0, 1).await.unwrap();
        assert_eq!(height, 50);
        assert_eq!(status.pool_id, 1);
        assert_eq!(status.volumes[0].block_height, 50);
    }
}

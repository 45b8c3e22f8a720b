//! Back-fill of missing heights within the tracked window.
//!
//! Two cooperating tasks share a bounded height queue: the monitor sweeps
//! the window once a minute and enqueues heights with missing pools, the
//! worker drains the queue through the read-through cache. The queue is the
//! backpressure boundary: the monitor skips a sweep entirely while the
//! worker is behind, so the queue never grows past one window.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::indexer::Indexer;

const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

impl Indexer {
    /// Runs the back-fill loop until cancellation.
    ///
    /// Consumes the sync queue; can only be started once per indexer.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut heights = {
            let mut slot = match self.sync_rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take().context("indexer is already running")?
        };

        let monitor = {
            let indexer = self.clone();
            let token = cancel.child_token();
            tokio::spawn(async move { indexer.monitor_heights(token).await })
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("indexer.run: cancelled");
                    break;
                }
                height = heights.recv() => {
                    let Some(height) = height else { break };
                    info!(
                        "SYNC height={height} current_height={} queue_heights={}",
                        self.current_height.load(Ordering::Acquire),
                        self.sync_queue_len(),
                    );
                    if let Err(e) = self.sync_height(height).await {
                        error!("SYNC: failed syncing height={height} err={e:#}");
                    }
                }
            }
        }

        match monitor.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("monitor task panicked: {e}")),
        }
    }

    /// Periodically queues missing heights, then prunes cache and store
    /// below one and a half windows behind the tip.
    async fn monitor_heights(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            self.queue_missing_heights(&cancel).await;

            let min_height = self
                .current_height
                .load(Ordering::Acquire)
                .saturating_sub(self.window * 3 / 2);
            self.pools_prune(min_height).await;
            self.prices_prune(min_height).await;

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("indexer.monitor_heights: cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
            }
        }
    }

    /// Sweeps the window and enqueues each height missing any monitored
    /// pool, at most once per sweep.
    ///
    /// Skips entirely while the queue is non-empty: when ingest outruns the
    /// RPC there is no point stacking up further sweeps.
    async fn queue_missing_heights(&self, cancel: &CancellationToken) {
        if self.sync_queue_len() > 0 {
            return;
        }

        let height_end = self.current_height.load(Ordering::Acquire);
        let height_start = height_end.saturating_sub(self.window);

        'heights: for height in height_start..height_end {
            for id in &self.pool_ids {
                // One missing pool is enough to queue the height; the
                // read-through lookup skips whatever is already cached.
                if self.pools.has(height, *id) {
                    continue;
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("indexer.queue_missing_heights: cancelled");
                        return;
                    }
                    sent = self.sync_tx.send(height) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }

                continue 'heights;
            }
        }
    }

    /// Back-fills one height through the read-through cache.
    async fn sync_height(&self, height: u64) -> anyhow::Result<()> {
        let (_, _, result) = self.pool_statuses_at(height, &self.pool_ids).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::db::models::PoolSnapshot;
    use crate::db::MockStore;
    use crate::indexer::testing::with_services;
    use crate::rpc::{MockChainRpc, PoolLiquidity, PoolVolume};

    #[tokio::test]
    async fn worker_backfills_queued_heights() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_pools_total_liquidity_at().returning(|_, ids| {
            Ok(vec![PoolLiquidity {
                pool_id: ids[0],
                liquidity: "10stake".parse().unwrap(),
            }])
        });
        rpc.expect_pools_volume_at().returning(|_, ids| {
            Ok(vec![PoolVolume {
                pool_id: ids[0],
                volume: "5uosmo".parse().unwrap(),
            }])
        });

        let mut store = MockStore::new();
        store.expect_save_pool().returning(|_| Ok(()));
        store.expect_prune_pools().returning(|_| Ok(0));
        store.expect_prune_token_prices().returning(|_| Ok(0));

        let indexer = std::sync::Arc::new(with_services(store, rpc, vec![1], 3));
        indexer.set_latest_block_height(5, Utc::now());
        // Height 3 is already cached; 2 and 4 are missing.
        indexer.pools.set(PoolSnapshot {
            height: 3,
            pool_id: 1,
            timestamp: Utc::now(),
            liquidity: "10stake".parse().unwrap(),
            volume: "5uosmo".parse().unwrap(),
        });

        let cancel = tokio_util::sync::CancellationToken::new();
        let handle = tokio::spawn(indexer.clone().run(cancel.clone()));

        // The first monitor sweep runs immediately; give the worker a
        // moment to drain the queue, then stop.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        for height in 2..5 {
            assert!(indexer.pools.has(height, 1), "height {height} not filled");
        }
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let mut store = MockStore::new();
        store.expect_prune_pools().returning(|_| Ok(0));
        store.expect_prune_token_prices().returning(|_| Ok(0));

        let indexer = std::sync::Arc::new(with_services(store, MockChainRpc::new(), vec![], 3));

        let cancel = tokio_util::sync::CancellationToken::new();
        let first = tokio::spawn(indexer.clone().run(cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(indexer.clone().run(cancel.clone()).await.is_err());

        cancel.cancel();
        first.await.unwrap().unwrap();
    }
}

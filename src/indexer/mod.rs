//! The indexing core: block-height pool cache, token price series, IBC denom
//! registry and the controller joining them into USD valuations.
//!
//! One `Indexer` value owns all shared state. The ingest path
//! ([`Indexer::set_latest_block_height`], [`Indexer::set_latest_price`]) is
//! called by the subscription handlers; the back-fill tasks spawned by
//! [`Indexer::run`] keep the recent-height window populated through the
//! read-through cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::db::Store;
use crate::rpc::ChainRpc;
use crate::utils::{datetime_to_ns, ns_to_datetime};

mod denoms;
mod pools;
mod prices;
mod status;
mod syncing;
mod volume;

pub use pools::PoolCache;
pub use prices::PriceSeries;
pub use status::{PoolStatus, PoolStatusVolumeAt};
pub use volume::BASE_VOLUME_DENOM;

use denoms::DenomRegistry;

/// Fallback block production rate: one block every five seconds.
pub const DEFAULT_BLOCKS_PER_HOUR: i64 = 720;

pub(crate) const NANOS_PER_HOUR: i64 = 3_600_000_000_000;

/// Time-series cache and enrichment engine over pool state and prices.
pub struct Indexer {
    store: Arc<dyn Store>,
    rpc: Arc<dyn ChainRpc>,

    pools: PoolCache,
    prices: PriceSeries,
    denoms: DenomRegistry,

    sync_tx: mpsc::Sender<u64>,
    sync_rx: Mutex<Option<mpsc::Receiver<u64>>>,

    pool_ids: Vec<u64>,
    /// Number of recent heights guaranteed to be present in the cache.
    window: u64,
    verbose: bool,

    current_height: AtomicU64,
    current_time_ns: AtomicI64,
    blocks_per_hour: AtomicI64,
    last_height: AtomicU64,
    last_timestamp_ns: AtomicI64,

    err_counter: AtomicU64,
}

impl Indexer {
    /// Connects the caches to their backing services, seeds the clock from
    /// the chain tip and preheats from the store.
    pub async fn new(
        store: Arc<dyn Store>,
        rpc: Arc<dyn ChainRpc>,
        pool_ids: Vec<u64>,
        window: u64,
        verbose: bool,
    ) -> anyhow::Result<Arc<Self>> {
        let ret = Arc::new(Self::with_parts(store, rpc, pool_ids, window, verbose));

        let block = ret.rpc.block_at(0).await?;
        ret.current_height.store(block.height, Ordering::Release);
        ret.current_time_ns
            .store(datetime_to_ns(block.time), Ordering::Release);

        ret.preheat_denom_traces().await;
        ret.preheat_pools().await;
        ret.preheat_prices().await;

        Ok(ret)
    }

    fn with_parts(
        store: Arc<dyn Store>,
        rpc: Arc<dyn ChainRpc>,
        pool_ids: Vec<u64>,
        window: u64,
        verbose: bool,
    ) -> Self {
        let (sync_tx, sync_rx) = mpsc::channel(DEFAULT_BLOCKS_PER_HOUR as usize);

        Self {
            store,
            rpc,
            pools: PoolCache::new(),
            prices: PriceSeries::new(),
            denoms: DenomRegistry::new(),
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
            pool_ids,
            window,
            verbose,
            current_height: AtomicU64::new(0),
            current_time_ns: AtomicI64::new(0),
            blocks_per_hour: AtomicI64::new(DEFAULT_BLOCKS_PER_HOUR),
            last_height: AtomicU64::new(0),
            last_timestamp_ns: AtomicI64::new(0),
            err_counter: AtomicU64::new(0),
        }
    }

    /// Records a newly observed finalized block.
    ///
    /// Heights only move forward: a late or duplicate delivery of a lower
    /// height leaves every clock field untouched. Once enough blocks have
    /// passed, the block production rate is re-estimated over the elapsed
    /// wall-clock interval and the anchor advances to the current block, so
    /// the estimate tracks a recent window rather than the whole uptime.
    pub fn set_latest_block_height(&self, height: u64, block_time: DateTime<Utc>) {
        let old = self.current_height.fetch_max(height, Ordering::AcqRel);
        if old >= height {
            return;
        }

        self.current_time_ns
            .store(datetime_to_ns(block_time), Ordering::Release);

        // Assumes delivery at the moment the block was received.
        let now_ns = datetime_to_ns(Utc::now());
        if self.last_height.load(Ordering::Acquire) == 0 {
            self.last_height.store(height, Ordering::Release);
            self.last_timestamp_ns.store(now_ns, Ordering::Release);
        }

        let last_height = self.last_height.load(Ordering::Acquire);
        let bph = self.blocks_per_hour.load(Ordering::Acquire).max(1);
        if height.saturating_sub(last_height) >= bph as u64 {
            let elapsed_ns = now_ns - self.last_timestamp_ns.load(Ordering::Acquire);
            if elapsed_ns > 0 {
                let hours = elapsed_ns as f64 / NANOS_PER_HOUR as f64;
                let rate = ((height - last_height) as f64 / hours) as i64;
                if rate > 0 {
                    self.blocks_per_hour.store(rate, Ordering::Release);
                    self.last_height.store(height, Ordering::Release);
                    self.last_timestamp_ns.store(now_ns, Ordering::Release);
                }
            }
        }
    }

    pub fn average_block_time(&self) -> chrono::Duration {
        let mut bph = self.blocks_per_hour.load(Ordering::Acquire);
        if bph == 0 {
            bph = DEFAULT_BLOCKS_PER_HOUR;
        }

        chrono::Duration::nanoseconds(NANOS_PER_HOUR / bph)
    }

    pub fn current_height(&self) -> u64 {
        self.current_height.load(Ordering::Acquire)
    }

    /// Telemetry snapshot for the status endpoint.
    pub fn get_status(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                "indexer_errors".to_string(),
                self.err_counter.load(Ordering::Relaxed).to_string(),
            ),
            (
                "indexer_blocks_per_hour".to_string(),
                self.blocks_per_hour.load(Ordering::Acquire).to_string(),
            ),
            (
                "indexer_ibc_tokens".to_string(),
                self.denoms.len().to_string(),
            ),
            (
                "indexer_ibc_cache_misses".to_string(),
                self.denoms.miss_count().to_string(),
            ),
            (
                "indexer_pool_current_height".to_string(),
                self.current_height.load(Ordering::Acquire).to_string(),
            ),
            (
                "indexer_pool_sync_count".to_string(),
                self.sync_queue_len().to_string(),
            ),
        ])
    }

    pub(crate) fn sync_queue_len(&self) -> usize {
        self.sync_tx.max_capacity() - self.sync_tx.capacity()
    }

    pub(crate) fn count_error(&self) {
        self.err_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Timestamp of the latest observed block.
    pub fn current_time(&self) -> DateTime<Utc> {
        ns_to_datetime(self.current_time_ns.load(Ordering::Acquire))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::bare_indexer;
    use super::*;

    #[test]
    fn height_is_monotonic() {
        let indexer = bare_indexer(vec![], 100);
        let t0 = Utc::now();

        indexer.set_latest_block_height(10, t0);
        assert_eq!(indexer.current_height(), 10);

        // A lower height must not roll anything back.
        let stale = t0 - chrono::Duration::seconds(30);
        indexer.set_latest_block_height(5, stale);
        assert_eq!(indexer.current_height(), 10);
        assert_eq!(indexer.current_time(), t0);

        indexer.set_latest_block_height(11, t0 + chrono::Duration::seconds(5));
        assert_eq!(indexer.current_height(), 11);
    }

    #[test]
    fn height_is_monotonic_under_concurrency() {
        let indexer = Arc::new(bare_indexer(vec![], 100));
        let mut handles = Vec::new();

        for i in 0..8u64 {
            let indexer = indexer.clone();
            handles.push(std::thread::spawn(move || {
                for h in (i * 100)..(i * 100 + 100) {
                    indexer.set_latest_block_height(h, Utc::now());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(indexer.current_height(), 799);
    }

    #[test]
    fn average_block_time_defaults_to_five_seconds() {
        let indexer = bare_indexer(vec![], 100);
        assert_eq!(indexer.average_block_time(), chrono::Duration::seconds(5));
    }

    #[test]
    fn status_reports_counters() {
        let indexer = bare_indexer(vec![], 100);
        indexer.set_latest_block_height(42, Utc::now());

        let status = indexer.get_status();
        assert_eq!(status["indexer_pool_current_height"], "42");
        assert_eq!(status["indexer_errors"], "0");
        assert_eq!(
            status["indexer_blocks_per_hour"],
            DEFAULT_BLOCKS_PER_HOUR.to_string()
        );
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::db::models::DenomTrace;
use crate::indexer::Indexer;

/// Read-through cache of IBC denom traces keyed by their `ibc/<hex>` form.
pub(crate) struct DenomRegistry {
    traces: Mutex<FxHashMap<String, DenomTrace>>,
    misses: AtomicU64,
}

impl DenomRegistry {
    pub(crate) fn new() -> Self {
        Self {
            traces: Mutex::new(FxHashMap::default()),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, DenomTrace>> {
        match self.traces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn get(&self, ibc_denom: &str) -> Option<DenomTrace> {
        self.lock().get(ibc_denom).cloned()
    }

    pub(crate) fn insert(&self, trace: DenomTrace) {
        self.lock().insert(trace.ibc_denom.clone(), trace);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn count_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Indexer {
    /// Resolves an IBC denom, querying the chain on a cache miss.
    ///
    /// Resolved traces are cached for the lifetime of the process and
    /// persisted best-effort.
    pub async fn denom_trace(&self, ibc_denom: &str) -> anyhow::Result<DenomTrace> {
        if let Some(trace) = self.denoms.get(ibc_denom) {
            return Ok(trace);
        }

        let trace = self.query_denom_trace(ibc_denom).await?;

        self.denoms.insert(trace.clone());
        if let Err(e) = self.store.save_ibc_denom(&trace).await {
            warn!("Failed saving IBC denom {ibc_denom} to DB: {e:#}");
        }

        Ok(trace)
    }

    async fn query_denom_trace(&self, ibc_denom: &str) -> anyhow::Result<DenomTrace> {
        self.denoms.count_miss();
        match self.rpc.denom_trace(ibc_denom).await {
            Ok(trace) => Ok(trace),
            Err(e) => {
                self.count_error();
                Err(e)
            }
        }
    }

    async fn load_denom_trace_cache(&self) -> bool {
        let traces = match self.store.ibc_denom_all().await {
            Ok(traces) => traces,
            Err(e) => {
                warn!("Failed loading IBC denoms from DB: {e:#}");
                return false;
            }
        };
        if traces.is_empty() {
            return false;
        }

        let count = traces.len();
        for trace in traces {
            self.denoms.insert(trace);
        }
        info!("SYNC: IBC denoms loaded: {count}");

        true
    }

    /// Seeds the registry: from the store when it has anything, otherwise
    /// with a full paginated fetch from the chain.
    pub(crate) async fn preheat_denom_traces(&self) {
        if self.load_denom_trace_cache().await {
            return;
        }

        match self.rpc.denom_traces().await {
            Ok(traces) => {
                let count = traces.len();
                for trace in traces {
                    self.denoms.insert(trace);
                }
                info!("SYNC: IBC denoms fetched: {count}");
            }
            Err(e) => {
                self.count_error();
                warn!("Failed to fetch denom traces: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockStore;
    use crate::indexer::testing::with_services;
    use crate::rpc::MockChainRpc;

    fn atom_trace() -> DenomTrace {
        DenomTrace::from_path("transfer/channel-0", "uatom")
    }

    #[tokio::test]
    async fn lookup_queries_chain_once() {
        let trace = atom_trace();
        let key = trace.ibc_denom.clone();

        let mut rpc = MockChainRpc::new();
        let returned = trace.clone();
        rpc.expect_denom_trace()
            .times(1)
            .returning(move |_| Ok(returned.clone()));

        let mut store = MockStore::new();
        store.expect_save_ibc_denom().times(1).returning(|_| Ok(()));

        let indexer = with_services(store, rpc, vec![], 100);

        let got = indexer.denom_trace(&key).await.unwrap();
        assert_eq!(got, trace);

        // Served from the cache now; the mock would panic on a second call.
        let got = indexer.denom_trace(&key).await.unwrap();
        assert_eq!(got.base_denom, "uatom");

        let status = indexer.get_status();
        assert_eq!(status["indexer_ibc_tokens"], "1");
        assert_eq!(status["indexer_ibc_cache_misses"], "1");
    }

    #[tokio::test]
    async fn lookup_error_counts_and_caches_nothing() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_denom_trace()
            .times(2)
            .returning(|_| Err(anyhow::anyhow!("deadline exceeded")));

        let indexer = with_services(MockStore::new(), rpc, vec![], 100);

        assert!(indexer.denom_trace("ibc/DEADBEEF").await.is_err());
        assert!(indexer.denom_trace("ibc/DEADBEEF").await.is_err());

        let status = indexer.get_status();
        assert_eq!(status["indexer_errors"], "2");
        assert_eq!(status["indexer_ibc_tokens"], "0");
    }

    #[tokio::test]
    async fn preheat_prefers_store_over_chain() {
        let trace = atom_trace();

        let mut store = MockStore::new();
        let stored = trace.clone();
        store
            .expect_ibc_denom_all()
            .times(1)
            .returning(move || Ok(vec![stored.clone()]));

        // No denom_traces expectation: the chain must not be queried.
        let indexer = with_services(store, MockChainRpc::new(), vec![], 100);
        indexer.preheat_denom_traces().await;

        assert_eq!(indexer.denoms.len(), 1);
        assert!(indexer.denoms.get(&trace.ibc_denom).is_some());
    }

    #[tokio::test]
    async fn preheat_falls_back_to_chain() {
        let mut store = MockStore::new();
        store.expect_ibc_denom_all().returning(|| Ok(vec![]));

        let mut rpc = MockChainRpc::new();
        rpc.expect_denom_traces()
            .times(1)
            .returning(|| Ok(vec![atom_trace(), DenomTrace::from_path("transfer/channel-141", "uosmo")]));

        let indexer = with_services(store, rpc, vec![], 100);
        indexer.preheat_denom_traces().await;

        assert_eq!(indexer.denoms.len(), 2);
    }
}

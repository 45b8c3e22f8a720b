use async_trait::async_trait;

pub mod client;
pub mod subscription;
pub mod types;

pub use client::RpcClient;
pub use subscription::Subscriber;
pub use types::{BlockInfo, ChainEvent, PoolLiquidity, PoolVolume, Transaction};

use crate::db::models::DenomTrace;

/// Chain query capability the indexer depends on.
///
/// Historical queries take a height; `0` means the chain tip. Implementations
/// must bound every call with a deadline and, for `height > 0`, direct the
/// query at that height's state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn denom_trace(&self, ibc_denom: &str) -> anyhow::Result<DenomTrace>;
    async fn denom_traces(&self) -> anyhow::Result<Vec<DenomTrace>>;

    async fn block_at(&self, height: u64) -> anyhow::Result<BlockInfo>;
    async fn chain_id(&self) -> anyhow::Result<String>;
    async fn mempool(&self) -> anyhow::Result<Vec<Transaction>>;

    async fn pools_total_liquidity_at(
        &self,
        height: u64,
        ids: &[u64],
    ) -> anyhow::Result<Vec<PoolLiquidity>>;
    async fn pools_volume_at(&self, height: u64, ids: &[u64])
        -> anyhow::Result<Vec<PoolVolume>>;
}

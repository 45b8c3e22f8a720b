//! HTTP client for the consensus RPC and the typed LCD queries.
//!
//! Block, status and mempool queries go to the consensus RPC; denom traces
//! and per-pool liquidity/volume go to the LCD API. Historical queries
//! attach the block-height header so the node serves state at that height.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::RpcSettings;
use crate::db::models::{Coin, Coins, DenomTrace};
use crate::rpc::types::{BlockInfo, PoolLiquidity, PoolVolume, Transaction};
use crate::rpc::ChainRpc;

/// Deadline for single-pool historical queries.
const SINGLE_QUERY_TIMEOUT: Duration = Duration::from_secs(1);
/// Deadline for list queries (blocks, mempool, trace pages).
const LIST_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Header instructing the node to answer from state at a given height.
const BLOCK_HEIGHT_HEADER: &str = "x-cosmos-block-height";

const DENOM_TRACE_PAGE_LIMIT: u32 = 100;
const MEMPOOL_TX_LIMIT: u32 = 1000;

pub struct RpcClient {
    http: reqwest::Client,
    consensus_url: String,
    lcd_url: String,
    /// Hashes observed in the mempool on the previous poll.
    mempool_seen: Mutex<HashSet<String>>,
    err_counter: AtomicU64,
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct BlockResult {
    block_id: BlockId,
    block: RawBlock,
}

#[derive(Deserialize)]
struct BlockId {
    hash: String,
}

#[derive(Deserialize)]
struct RawBlock {
    header: RawHeader,
}

#[derive(Deserialize)]
struct RawHeader {
    chain_id: String,
    height: String,
    time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct UnconfirmedTxsResult {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct DenomTraceResponse {
    denom_trace: RawDenomTrace,
}

#[derive(Deserialize)]
struct DenomTracesResponse {
    denom_traces: Vec<RawDenomTrace>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct RawDenomTrace {
    path: String,
    base_denom: String,
}

#[derive(Deserialize)]
struct Pagination {
    next_key: Option<String>,
}

#[derive(Deserialize)]
struct TotalLiquidityResponse {
    liquidity: Vec<Coin>,
}

#[derive(Deserialize)]
struct TotalVolumeResponse {
    volume: Vec<Coin>,
}

impl RpcClient {
    pub fn new(settings: &RpcSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            consensus_url: settings.consensus_url.trim_end_matches('/').to_string(),
            lcd_url: settings.lcd_url.trim_end_matches('/').to_string(),
            mempool_seen: Mutex::new(HashSet::new()),
            err_counter: AtomicU64::new(0),
        })
    }

    pub fn error_count(&self) -> u64 {
        self.err_counter.load(Ordering::Relaxed)
    }

    fn count_error(&self) {
        self.err_counter.fetch_add(1, Ordering::Relaxed);
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        height: u64,
        timeout: Duration,
    ) -> anyhow::Result<T> {
        let mut req = self.http.get(&url).timeout(timeout);
        if height > 0 {
            req = req.header(BLOCK_HEIGHT_HEADER, height.to_string());
        }

        let resp = req.send().await.with_context(|| format!("GET {url}"))?;
        let resp = resp
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding {url}"))
    }
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn denom_trace(&self, ibc_denom: &str) -> anyhow::Result<DenomTrace> {
        let hash = ibc_denom.strip_prefix("ibc/").unwrap_or(ibc_denom);
        let url = format!("{}/ibc/apps/transfer/v1/denom_traces/{hash}", self.lcd_url);

        let resp: DenomTraceResponse = self
            .get_json(url, 0, SINGLE_QUERY_TIMEOUT)
            .await
            .inspect_err(|_| self.count_error())?;

        Ok(DenomTrace::new(
            format!("ibc/{}", hash.to_uppercase()),
            resp.denom_trace.path,
            resp.denom_trace.base_denom,
        ))
    }

    async fn denom_traces(&self) -> anyhow::Result<Vec<DenomTrace>> {
        let mut traces = Vec::new();
        let mut next_key: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/ibc/apps/transfer/v1/denom_traces?pagination.limit={DENOM_TRACE_PAGE_LIMIT}",
                self.lcd_url
            );
            if let Some(key) = &next_key {
                url.push_str("&pagination.key=");
                url.push_str(key);
            }

            let resp: DenomTracesResponse = self
                .get_json(url, 0, SINGLE_QUERY_TIMEOUT)
                .await
                .inspect_err(|_| self.count_error())?;

            traces.extend(
                resp.denom_traces
                    .into_iter()
                    .map(|t| DenomTrace::from_path(t.path, t.base_denom)),
            );

            next_key = resp.pagination.and_then(|p| p.next_key);
            if next_key.is_none() {
                break;
            }
        }

        Ok(traces)
    }

    async fn block_at(&self, height: u64) -> anyhow::Result<BlockInfo> {
        let url = if height == 0 {
            format!("{}/block", self.consensus_url)
        } else {
            format!("{}/block?height={height}", self.consensus_url)
        };

        let resp: RpcEnvelope<BlockResult> = self
            .get_json(url, 0, LIST_QUERY_TIMEOUT)
            .await
            .inspect_err(|_| self.count_error())?;

        Ok(BlockInfo {
            chain_id: resp.result.block.header.chain_id,
            height: resp.result.block.header.height.parse()?,
            time: resp.result.block.header.time,
            hash: resp.result.block_id.hash,
        })
    }

    async fn chain_id(&self) -> anyhow::Result<String> {
        Ok(self.block_at(0).await?.chain_id)
    }

    async fn mempool(&self) -> anyhow::Result<Vec<Transaction>> {
        let url = format!(
            "{}/unconfirmed_txs?limit={MEMPOOL_TX_LIMIT}",
            self.consensus_url
        );

        let resp: RpcEnvelope<UnconfirmedTxsResult> = self
            .get_json(url, 0, LIST_QUERY_TIMEOUT)
            .await
            .inspect_err(|_| self.count_error())?;

        let raw_txs = resp.result.txs.unwrap_or_default();
        let mut current = HashSet::with_capacity(raw_txs.len());
        let mut txs = Vec::new();

        let mut seen = match self.mempool_seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for raw in raw_txs {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&raw)
                .context("mempool tx is not valid base64")?;
            let digest = Sha256::digest(&bytes);
            let hash: String = digest.iter().map(|b| format!("{b:02X}")).collect();

            current.insert(hash.clone());
            if !seen.insert(hash.clone()) {
                continue;
            }

            debug!("Mempool: {hash}");
            txs.push(Transaction { tx_id: hash, raw });
        }

        // Forget hashes that left the mempool since the last poll.
        seen.retain(|h| current.contains(h));

        Ok(txs)
    }

    async fn pools_total_liquidity_at(
        &self,
        height: u64,
        ids: &[u64],
    ) -> anyhow::Result<Vec<PoolLiquidity>> {
        let mut pools = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!(
                "{}/osmosis/poolmanager/v1beta1/pools/{id}/total_pool_liquidity",
                self.lcd_url
            );
            let resp: TotalLiquidityResponse = self
                .get_json(url, height, SINGLE_QUERY_TIMEOUT)
                .await
                .inspect_err(|_| self.count_error())
                .with_context(|| format!("failed retrieving pool liquidity {id}"))?;

            pools.push(PoolLiquidity {
                pool_id: *id,
                liquidity: Coins::from_coins(resp.liquidity)?,
            });
        }

        Ok(pools)
    }

    async fn pools_volume_at(
        &self,
        height: u64,
        ids: &[u64],
    ) -> anyhow::Result<Vec<PoolVolume>> {
        let mut pools = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!(
                "{}/osmosis/poolmanager/v2/pools/{id}/total_volume",
                self.lcd_url
            );
            let resp: TotalVolumeResponse = self
                .get_json(url, height, SINGLE_QUERY_TIMEOUT)
                .await
                .inspect_err(|_| self.count_error())
                .with_context(|| format!("failed retrieving pool volume {id}"))?;

            pools.push(PoolVolume {
                pool_id: *id,
                volume: Coins::from_coins(resp.volume)?,
            });
        }

        Ok(pools)
    }
}

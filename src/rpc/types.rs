use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::Coins;

/// Header fields of a finalized block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub chain_id: String,
    pub height: u64,
    pub time: DateTime<Utc>,
    pub hash: String,
}

/// An unconfirmed transaction observed in the mempool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Uppercase hex SHA-256 of the raw bytes, the chain transaction hash.
    pub tx_id: String,
    /// Base64 transaction bytes as delivered by the consensus RPC.
    pub raw: String,
}

/// Total liquidity of one pool at the queried height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolLiquidity {
    pub pool_id: u64,
    pub liquidity: Coins,
}

/// Cumulative traded volume of one pool at the queried height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolVolume {
    pub pool_id: u64,
    pub volume: Coins,
}

/// Inbound event from the consensus WebSocket, matched by its kind tag.
///
/// Unknown kinds are surfaced rather than dropped silently so the
/// subscription can count them.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    NewBlock {
        height: u64,
        time: DateTime<Utc>,
    },
    Tx {
        height: u64,
        raw: String,
    },
    Unknown {
        kind: String,
    },
}

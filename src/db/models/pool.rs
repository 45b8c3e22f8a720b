use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Coins;

/// Immutable pool state observed at one block height (PostgreSQL).
///
/// Primary key: (height, pool_id). Snapshots are append-only: once a fetch
/// for a height completed, the row is never rewritten with different data.
/// `volume` is the cumulative traded amount since pool inception, so it is
/// nondecreasing per denom across heights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub height: u64,
    pub pool_id: u64,
    pub timestamp: DateTime<Utc>,
    pub liquidity: Coins,
    pub volume: Coins,
}

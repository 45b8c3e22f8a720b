use serde::Serialize;

use crate::db::models::Coins;

/// Volume of a pool observed at one reference height, with its USD
/// valuations filled in by [`crate::Indexer::calculate_volumes`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStatusVolumeAt {
    pub block_height: i64,
    pub volume: Coins,
    /// Per-coin USD value of the absolute volume at this height.
    pub volume_usd: Vec<f64>,
    /// USD value of the volume traded between this height and the newest
    /// height in the enclosing status.
    pub relative_volume_usd: Vec<f64>,
}

/// Enriched pool state handed to consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStatus {
    pub pool_id: u64,
    pub total_liquidity: Coins,
    #[serde(rename = "total_volume")]
    pub volumes: Vec<PoolStatusVolumeAt>,
}

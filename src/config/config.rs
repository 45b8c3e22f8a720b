use config::{Config, ConfigError, File};
use serde::Deserialize;

/// PostgreSQL connection configuration.
///
/// The store keeps the durable copies of pool snapshots, token prices and
/// IBC denom traces that preheat the in-memory caches on startup.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Readiness probes before startup fails; covers the window where the
    /// database container is still coming up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Base wait between probes; attempt N waits N times this.
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

fn default_pool_size() -> usize {
    16
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_backoff_ms() -> u64 {
    500
}

/// Upstream chain endpoints.
///
/// `consensus_url` serves blocks, mempool and WebSocket subscriptions;
/// `lcd_url` serves the typed queries (denom traces, pool liquidity and
/// volume at historical heights).
#[derive(Debug, Deserialize, Clone)]
pub struct RpcSettings {
    pub consensus_url: String,
    pub lcd_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

fn default_ws_url() -> String {
    "ws://localhost:26657/websocket".to_string()
}

/// Indexer behavior configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    /// Pools whose volume and liquidity are tracked every block.
    #[serde(default)]
    pub pool_ids: Vec<u64>,
    /// Number of recent blocks kept in the pool cache.
    #[serde(default = "default_blocks_to_index")]
    pub blocks_to_index: u64,
    #[serde(default)]
    pub verbose: bool,
}

fn default_blocks_to_index() -> u64 {
    17_000
}

/// Root application configuration, loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub rpc: RpcSettings,
    pub indexer: IndexerSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}

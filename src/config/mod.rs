mod config;

pub use config::{IndexerSettings, PostgresSettings, RpcSettings, Settings};

pub mod config;
pub mod db;
pub mod indexer;
pub mod rpc;
pub mod utils;

pub use config::Settings;
pub use db::Database;
pub use indexer::Indexer;
pub use rpc::{ChainRpc, RpcClient};

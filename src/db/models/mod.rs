pub mod coin;
pub mod denom_trace;
pub mod pool;
pub mod token_price;

pub use coin::{Coin, Coins};
pub use denom_trace::DenomTrace;
pub use pool::PoolSnapshot;
pub use token_price::TokenPrice;

//! Shared helpers for the indexer.
//!
//! - [`conversion`] - BigInt/f64 price math and nanosecond timestamps
//! - [`errors`] - multi-error joining for batch operations

mod conversion;
mod errors;

pub use conversion::{bigint_mul_f64, datetime_to_ns, ns_to_datetime};
pub use errors::join_errors;

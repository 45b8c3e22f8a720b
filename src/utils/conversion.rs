//! Numeric and time conversions.
//!
//! Coin amounts are arbitrary-precision integers while feed prices are f64.
//! Multiplication goes through BigDecimal and narrows to f64 only at the
//! end, so large volumes do not overflow a premature float conversion.

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

/// Multiply an integer amount by an f64 price.
///
/// Returns 0.0 when the price is not a finite number.
pub fn bigint_mul_f64(amount: &BigInt, price: f64) -> f64 {
    let Some(price) = BigDecimal::from_f64(price) else {
        return 0.0;
    };
    let value = BigDecimal::from(amount.clone()) * price;
    value.to_f64().unwrap_or(0.0)
}

/// Nanoseconds since epoch for a UTC instant.
pub fn datetime_to_ns(t: DateTime<Utc>) -> i64 {
    // Saturates outside the ±262-year nanosecond range.
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// UTC instant from nanoseconds since epoch.
pub fn ns_to_datetime(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

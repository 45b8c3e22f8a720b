use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation from the price feed (PostgreSQL).
///
/// Identity is (name, last_updated): a later observation with the same
/// timestamp overwrites the value. `name` is the micro-denom (`uosmo`),
/// `base` the quote currency (`USD`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    pub last_updated: DateTime<Utc>,
    pub name: String,
    pub base: String,
    pub value: f64,
}

impl TokenPrice {
    pub fn new(
        last_updated: DateTime<Utc>,
        name: impl Into<String>,
        base: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            last_updated,
            name: name.into(),
            base: base.into(),
            value,
        }
    }
}

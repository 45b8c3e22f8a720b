use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::db::models::TokenPrice;
use crate::indexer::{Indexer, DEFAULT_BLOCKS_PER_HOUR, NANOS_PER_HOUR};
use crate::utils::ns_to_datetime;

/// Per-denom price series sorted by observation time, behind one mutex.
pub struct PriceSeries {
    prices: Mutex<FxHashMap<String, Vec<TokenPrice>>>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(FxHashMap::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, Vec<TokenPrice>>> {
        match self.prices.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Inserts a price at its sorted position; a price with an already
    /// stored `last_updated` overwrites in place.
    ///
    /// Returns true only if the insert left the series unsorted. The ordered
    /// insert path always keeps the series sorted and returns false; the
    /// flag stays in the signature for callers that resort lazily.
    pub fn set(&self, price: TokenPrice) -> bool {
        let mut map = self.lock();
        let arr = map.entry(price.name.clone()).or_insert_with(|| {
            Vec::with_capacity((DEFAULT_BLOCKS_PER_HOUR * 12) as usize)
        });

        match arr.binary_search_by(|p| p.last_updated.cmp(&price.last_updated)) {
            Ok(i) => arr[i] = price,
            Err(i) => arr.insert(i, price),
        }

        false
    }

    /// The stored prices closest to `timestamp` for a denom.
    ///
    /// Returns one price on an exact hit or when the timestamp falls outside
    /// the stored range, the two enclosing prices when it falls strictly
    /// between observations, and nothing for an unknown denom.
    pub fn nearest(&self, timestamp: DateTime<Utc>, name: &str) -> Vec<TokenPrice> {
        let map = self.lock();
        let Some(arr) = map.get(name) else {
            return Vec::new();
        };
        if arr.is_empty() {
            return Vec::new();
        }

        match arr.binary_search_by(|p| p.last_updated.cmp(&timestamp)) {
            Ok(i) => vec![arr[i].clone()],
            Err(0) => vec![arr[0].clone()],
            Err(i) if i >= arr.len() => vec![arr[arr.len() - 1].clone()],
            Err(i) => vec![arr[i - 1].clone(), arr[i].clone()],
        }
    }

    /// Estimates the price of a denom at an arbitrary instant.
    ///
    /// Outside the stored range the closest endpoint is used and the error
    /// is the signed distance to it. Inside, the two enclosing observations
    /// are interpolated linearly and the error is the width of the gap. A
    /// denom with no data yields price 0 and a 48 hour sentinel error.
    pub fn estimate(&self, last_updated: DateTime<Utc>, denom: &str) -> (f64, Duration) {
        let prices = self.nearest(last_updated, denom);
        match prices.as_slice() {
            // 48 hour sentinel: no data at all for this denom.
            [] => (0.0, Duration::hours(48)),
            [p] => (p.value, last_updated - p.last_updated),
            [lo, hi, ..] => {
                let delta_t = hi.last_updated - lo.last_updated;
                if delta_t.is_zero() {
                    return (lo.value, delta_t);
                }
                let d = last_updated - lo.last_updated;
                let delta_p = hi.value - lo.value;
                let ratio = d.num_nanoseconds().unwrap_or(0) as f64
                    / delta_t.num_nanoseconds().unwrap_or(i64::MAX) as f64;
                (lo.value + ratio * delta_p, delta_t)
            }
        }
    }

    /// Drops prices strictly older than the cutoff; returns how many were
    /// removed. Estimation stays correct regardless, this only bounds memory.
    pub fn prune(&self, min_last_updated: DateTime<Utc>) -> usize {
        let mut map = self.lock();
        let mut counter = 0;
        for arr in map.values_mut() {
            let before = arr.len();
            arr.retain(|p| p.last_updated >= min_last_updated);
            counter += before - arr.len();
        }
        counter
    }

    /// Resorts every denom. Needed only after bulk loads that do not
    /// guarantee order.
    pub fn sort(&self) {
        let mut map = self.lock();
        for arr in map.values_mut() {
            arr.sort_by(|a, b| a.last_updated.cmp(&b.last_updated));
        }
    }

    pub fn sort_token(&self, denom: &str) {
        let mut map = self.lock();
        if let Some(arr) = map.get_mut(denom) {
            arr.sort_by(|a, b| a.last_updated.cmp(&b.last_updated));
        }
    }

    #[cfg(test)]
    pub(crate) fn series(&self, denom: &str) -> Vec<TokenPrice> {
        self.lock().get(denom).cloned().unwrap_or_default()
    }
}

impl Default for PriceSeries {
    fn default() -> Self {
        Self::new()
    }
}

/// Rescales a display-symbol quote to its micro-denom: the feed quotes whole
/// tokens while pool amounts are in millionths.
fn convert_to_micro_token(token: &str, value: f64) -> Option<(String, f64)> {
    match token {
        "OSMO" | "ATOM" => Some((format!("u{}", token.to_lowercase()), value * 1e-6)),
        _ => None,
    }
}

impl Indexer {
    /// Ingests one price-feed observation.
    ///
    /// A failed store write is logged and does not reject the observation;
    /// the in-memory series is already updated by then.
    pub async fn set_latest_price(
        &self,
        token: &str,
        base: &str,
        value: f64,
        last_updated: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let (token, value) = match convert_to_micro_token(token, value) {
            Some((micro, micro_value)) => {
                if self.verbose {
                    debug!("PRICE: Formatted {token}={value} to {micro}={micro_value}");
                }
                (micro, micro_value)
            }
            None => (token.to_string(), value),
        };

        let price = TokenPrice::new(last_updated, token.clone(), base, value);
        let need_sort = self.prices.set(price.clone());
        if let Err(e) = self.store.save_token_price(&price).await {
            warn!("Failed saving token price to DB: {e:#}");
        }

        if need_sort {
            self.prices.sort_token(&token);
        }

        Ok(())
    }

    /// Loads the price window matching the tracked block window from the
    /// store, then sorts since range order is not guaranteed.
    pub(crate) async fn preheat_prices(&self) {
        let bph = self.blocks_per_hour.load(Ordering::Acquire).max(1);
        let span = Duration::nanoseconds((self.window as i64).saturating_mul(NANOS_PER_HOUR) / bph);
        let max = Utc::now();
        let min = max - span;

        let prices = match self.store.token_prices_range(min, max, "").await {
            Ok(prices) => prices,
            Err(e) => {
                warn!("Failed fetching prices from {min} till {max}: {e:#}");
                return;
            }
        };

        let count = prices.len();
        let mut first_seen = max;
        let mut last_seen = min;
        for price in prices {
            if price.last_updated < first_seen {
                first_seen = price.last_updated;
            }
            if price.last_updated > last_seen {
                last_seen = price.last_updated;
            }
            self.prices.set(price);
        }

        info!(
            "SYNC: Prices loaded: {count} for min_last_updated={min} and max_last_updated={max}; \
             first_last_updated={first_seen} last_last_updated={last_seen}"
        );

        self.prices.sort();
    }

    /// Prunes prices older than the instant matching `min_height` on the
    /// block clock, in memory and in the store.
    pub(crate) async fn prices_prune(&self, min_height: u64) {
        let current = self.current_height.load(Ordering::Acquire);
        let delta = current.saturating_sub(min_height) as i64;
        let bph = self.blocks_per_hour.load(Ordering::Acquire).max(1);
        let min_last_updated = ns_to_datetime(
            self.last_timestamp_ns.load(Ordering::Acquire)
                - delta.saturating_mul(NANOS_PER_HOUR) / bph,
        );

        self.prices.prune(min_last_updated);

        if let Err(e) = self.store.prune_token_prices(min_last_updated).await {
            warn!("Failed pruning token prices before {min_last_updated}: {e:#}");
        }
    }
}

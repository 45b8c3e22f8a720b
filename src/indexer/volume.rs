//! USD valuation of pool volumes.
//!
//! Absolute volumes are cumulative since pool inception. The quantity
//! consumers care about is the USD value of what was traded *between* two
//! reference heights, which is the integral of price over the volume delta.
//! The walk below approximates it per adjacent height pair with the
//! trapezoid rule, accumulating from the newest height downwards.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use num_bigint::BigInt;
use rustc_hash::FxHashMap;

use crate::db::models::Coins;
use crate::indexer::status::{PoolStatus, PoolStatusVolumeAt};
use crate::indexer::{Indexer, DEFAULT_BLOCKS_PER_HOUR, NANOS_PER_HOUR};
use crate::utils::{bigint_mul_f64, join_errors, ns_to_datetime};

/// Pool volumes are assumed to be quoted in this denom.
pub const BASE_VOLUME_DENOM: &str = "uosmo";

/// Volume and estimated price of one pool at one height.
#[derive(Debug, Clone, PartialEq)]
struct PriceAt {
    height: u64,
    volume: BigInt,
    price: f64,
}

impl Indexer {
    /// Fills in the USD valuations of every status in place.
    pub fn calculate_volumes(&self, pools: &mut [PoolStatus]) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        for pool in pools.iter_mut() {
            if let Err(e) = self.calculate_pool_volumes(pool) {
                errors.push(e);
            }
        }
        join_errors(errors)
    }

    fn calculate_pool_volumes(&self, pool: &mut PoolStatus) -> anyhow::Result<()> {
        if pool.volumes.is_empty() {
            return Ok(());
        }

        for v in pool.volumes.iter_mut() {
            v.volume_usd = self.calculate_volume_value_at(v.block_height, &v.volume);
        }

        self.calculate_relative_volume_value(pool.pool_id, &mut pool.volumes);

        Ok(())
    }

    /// Per-coin USD value of an absolute volume at one height, using the
    /// price estimated around the time that block was produced.
    ///
    /// Coins whose estimate crosses more than a day of missing data keep a
    /// zero value.
    fn calculate_volume_value_at(&self, height: i64, coins: &Coins) -> Vec<f64> {
        let timestamp = self.block_to_timestamp(height as u64);

        let mut values = vec![0.0; coins.len()];
        for (i, coin) in coins.iter().enumerate() {
            let (value, duration_error) = self.prices.estimate(timestamp, &coin.denom);
            if duration_error.abs() > Duration::hours(24) {
                debug!(
                    "VOLUME: duration error too large denom={} timestamp={timestamp} duration={duration_error}",
                    coin.denom
                );
                continue;
            }

            values[i] = bigint_mul_f64(&coin.amount, value);
        }
        values
    }

    /// Computes the USD volume deltas relative to the newest height present
    /// in `volumes`, writing `relative_volume_usd` per entry.
    fn calculate_relative_volume_value(&self, pool_id: u64, volumes: &mut [PoolStatusVolumeAt]) {
        let mut min = self.current_height.load(Ordering::Acquire) + 10;
        let mut max = 0u64;
        for v in volumes.iter() {
            let height = v.block_height as u64;
            if height > max {
                max = height;
            }
            if height < min {
                min = height;
            }
        }

        if max < min {
            return;
        }

        let mut per_denom = self.fetch_volume_values_per_block_range(min, max, pool_id);

        // Pool volumes are assumed to be quoted in the base denom only;
        // technically a pool may carry others, those are ignored here.
        let Some(mut base_prices) = per_denom.remove(BASE_VOLUME_DENOM) else {
            warn!(
                "VOLUME: No prices were found denom={BASE_VOLUME_DENOM} keys={:?}",
                per_denom.keys().collect::<Vec<_>>()
            );
            return;
        };
        if base_prices.is_empty() {
            warn!("VOLUME: No prices were found denom={BASE_VOLUME_DENOM}");
            return;
        }

        base_prices.sort_by(|a, b| b.height.cmp(&a.height));
        // Should already be newest-first, but make sure anyway.
        volumes.sort_by(|a, b| b.block_height.cmp(&a.block_height));

        accumulate_relative_volume(&base_prices, volumes);
    }

    /// Scans the cached heights of `[min, max]` and pairs each present
    /// volume coin with its estimated price at that block's time. Points
    /// with more than a day of price-data error are dropped.
    fn fetch_volume_values_per_block_range(
        &self,
        min: u64,
        max: u64,
        pool_id: u64,
    ) -> FxHashMap<String, Vec<PriceAt>> {
        debug!(
            "VOLUME: fetch_volume_values_per_block_range pool_id={pool_id} min={min} max={max} range={}",
            max - min
        );

        let mut per_denom: FxHashMap<String, Vec<PriceAt>> = FxHashMap::default();
        for height in min..=max {
            let Some(pool) = self.pools.get(height, pool_id) else {
                continue;
            };
            let block_time = self.block_to_timestamp(height);

            for coin in &pool.volume {
                let (price, duration_error) = self.prices.estimate(block_time, &coin.denom);
                if duration_error > Duration::hours(24) {
                    debug!(
                        "VOLUME: duration error too large denom={} block_time={block_time} duration={duration_error}",
                        coin.denom
                    );
                    continue;
                }

                per_denom
                    .entry(coin.denom.clone())
                    .or_insert_with(|| Vec::with_capacity((max - min) as usize + 1))
                    .push(PriceAt {
                        height,
                        volume: coin.amount.clone(),
                        price,
                    });
            }
        }

        per_denom
    }

    /// Wall-clock instant a height corresponds to, extrapolated linearly
    /// from the latest block and the block production rate.
    ///
    /// An approximation: recording observed per-block timestamps and
    /// interpolating between them would be exact.
    pub fn block_to_timestamp(&self, height: u64) -> DateTime<Utc> {
        let mut bph = self.blocks_per_hour.load(Ordering::Acquire);
        if bph == 0 {
            // Should not happen
            bph = DEFAULT_BLOCKS_PER_HOUR;
            warn!("VOLUME: BlockToTimestamp blocks per hour = 0!");
        }

        let current = self.current_height.load(Ordering::Acquire);
        let now = ns_to_datetime(self.current_time_ns.load(Ordering::Acquire));

        if current < height {
            let delta = (height - current) as i64;
            now + Duration::nanoseconds(delta.saturating_mul(NANOS_PER_HOUR) / bph)
        } else {
            let delta = (current - height) as i64;
            now - Duration::nanoseconds(delta.saturating_mul(NANOS_PER_HOUR) / bph)
        }
    }
}

/// Accumulates USD price differences of adjacent total-volume points.
///
/// Both slices must be sorted descending by height. Walking from the newest
/// point down, each step contributes `(prev_volume - volume) * avg_price`;
/// whenever the walk passes a height referenced in `volumes`, the running
/// sum is recorded there. Heights absent from either slice are implicitly
/// skipped, and a trailing reference height receives the final sum.
fn accumulate_relative_volume(volume_prices: &[PriceAt], volumes: &mut [PoolStatusVolumeAt]) {
    let Some(first) = volume_prices.first() else {
        return;
    };

    let mut prev_price = first.price;
    let mut prev_volume = first.volume.clone();
    let mut price_sum = 0.0;
    let mut range_index = 0;

    for point in volume_prices {
        if range_index >= volumes.len() {
            return;
        }

        let delta_volume = &prev_volume - &point.volume;
        let avg_price = (prev_price + point.price) / 2.0;
        price_sum += bigint_mul_f64(&delta_volume, avg_price);

        if point.height as i64 <= volumes[range_index].block_height {
            volumes[range_index].relative_volume_usd = vec![price_sum];
            range_index += 1;
        }

        prev_volume = point.volume.clone();
        prev_price = point.price;
    }

    if range_index < volumes.len() {
        volumes[range_index].relative_volume_usd = vec![price_sum];
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::models::{PoolSnapshot, TokenPrice};
    use crate::indexer::testing::bare_indexer;

    fn price_at(height: u64, volume: i64, price: f64) -> PriceAt {
        PriceAt {
            height,
            volume: BigInt::from(volume),
            price,
        }
    }

    fn volume_at(height: i64, coins: &str) -> PoolStatusVolumeAt {
        PoolStatusVolumeAt {
            block_height: height,
            volume: coins.parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn block_to_timestamp_at_tip_and_before() {
        let now = Utc::now();
        let indexer = bare_indexer(vec![], 100);
        indexer.force_clock(100, now, 1);

        assert_eq!(indexer.block_to_timestamp(100), now);
        assert_eq!(
            indexer.block_to_timestamp(10),
            now - Duration::hours(90)
        );
        assert_eq!(
            indexer.block_to_timestamp(101),
            now + Duration::hours(1)
        );
    }

    #[test]
    fn block_to_timestamp_is_monotonic() {
        let indexer = bare_indexer(vec![], 100);
        indexer.force_clock(1000, Utc::now(), 720);

        let mut prev = indexer.block_to_timestamp(0);
        for height in (100..=2000).step_by(97) {
            let t = indexer.block_to_timestamp(height);
            assert!(t >= prev, "timestamp regressed at height {height}");
            prev = t;
        }
    }

    #[test]
    fn fetch_range_pairs_volumes_with_prices() {
        let now = Utc::now();
        let indexer = bare_indexer(vec![], 100);
        indexer.force_clock(12, now, 1000);

        for (offset_blocks, value) in [(2i64, 4.0), (1, 3.0), (0, 2.0)] {
            indexer.prices.set(TokenPrice::new(
                now - Duration::nanoseconds(offset_blocks * NANOS_PER_HOUR / 1000),
                "uatom",
                "USD",
                value,
            ));
        }

        for (height, amount) in [(10u64, 3i64), (11, 4), (12, 5)] {
            indexer.pools.set(PoolSnapshot {
                height,
                pool_id: 13,
                timestamp: now,
                liquidity: Coins::new(),
                volume: format!("{amount}uatom").parse().unwrap(),
            });
        }

        let got = indexer.fetch_volume_values_per_block_range(10, 12, 13);
        let uatom = got.get("uatom").unwrap();
        assert_eq!(
            uatom,
            &vec![price_at(10, 3, 4.0), price_at(11, 4, 3.0), price_at(12, 5, 2.0)]
        );
    }

    #[test]
    fn cumulative_walk_matches_trapezoid_sum() {
        let volume_prices = vec![
            price_at(12, 1230, 2.0),
            price_at(11, 500, 3.0),
            price_at(10, 123, 4.0),
        ];
        let mut volumes = vec![volume_at(12, "1230uosmo"), volume_at(10, "123uosmo")];

        accumulate_relative_volume(&volume_prices, &mut volumes);

        assert_eq!(volumes[0].relative_volume_usd, vec![0.0]);
        let want = (1230.0 - 500.0) * (2.0 + 3.0) / 2.0 + (500.0 - 123.0) * (3.0 + 4.0) / 2.0;
        assert_eq!(volumes[1].relative_volume_usd.len(), 1);
        assert!((volumes[1].relative_volume_usd[0] - want).abs() < 1e-12);
        assert!((want - 3144.5).abs() < 1e-12);
    }

    #[test]
    fn cumulative_walk_total_equals_sum_of_contributions() {
        // With no dropped points the final assigned value must equal the
        // full trapezoid integral over the range.
        let volume_prices: Vec<PriceAt> = (0..20)
            .map(|i| price_at(100 - i, (1000 - i * 17) as i64, 1.0 + i as f64 * 0.1))
            .collect();
        let mut volumes = vec![volume_at(100, "1000uosmo"), volume_at(81, "677uosmo")];

        let mut want = 0.0;
        for pair in volume_prices.windows(2) {
            let dv = (pair[0].volume.clone() - pair[1].volume.clone()).to_string();
            let dv: f64 = dv.parse().unwrap();
            want += dv * (pair[0].price + pair[1].price) / 2.0;
        }

        accumulate_relative_volume(&volume_prices, &mut volumes);

        assert!((volumes[1].relative_volume_usd[0] - want).abs() < 1e-9);
    }

    #[test]
    fn cumulative_walk_empty_prices_is_a_noop() {
        let mut volumes = vec![volume_at(12, "1230uosmo")];
        accumulate_relative_volume(&[], &mut volumes);
        assert!(volumes[0].relative_volume_usd.is_empty());
    }

    #[test]
    fn volume_value_at_skips_stale_and_unknown_denoms() {
        let now = Utc::now();
        let indexer = bare_indexer(vec![], 100);
        indexer.force_clock(2, now, 1);

        for (offset_hours, uatom, uosmo) in [(-1i64, 2.0, 10.0), (0, 200.0, 1000.0), (1, 32.0, 54.0)]
        {
            let at = now + Duration::hours(offset_hours);
            indexer.prices.set(TokenPrice::new(at, "uatom", "USD", uatom));
            indexer.prices.set(TokenPrice::new(at, "uosmo", "USD", uosmo));
        }

        // Height 1 is one hour before the tip with a 1 block/hour clock.
        let coins: Coins = "123uatom,345none,3uosmo".parse().unwrap();
        let got = indexer.calculate_volume_value_at(1, &coins);

        // Sorted denoms: none has no price data (sentinel 48h, skipped),
        // uatom and uosmo hit exact observations.
        assert_eq!(got, vec![0.0, 123.0 * 2.0, 3.0 * 10.0]);
    }

    #[test]
    fn calculate_volumes_fills_both_valuations() {
        let now = Utc::now();
        let indexer = bare_indexer(vec![], 100);
        indexer.force_clock(12, now, 1000);

        for offset in 0..6i64 {
            indexer.prices.set(TokenPrice::new(
                now - Duration::nanoseconds(offset * NANOS_PER_HOUR / 1000),
                "uosmo",
                "USD",
                2.0,
            ));
        }
        for (height, amount) in [(10u64, 123i64), (11, 500), (12, 1230)] {
            indexer.pools.set(PoolSnapshot {
                height,
                pool_id: 7,
                timestamp: now,
                liquidity: Coins::new(),
                volume: format!("{amount}uosmo").parse().unwrap(),
            });
        }

        let mut statuses = vec![PoolStatus {
            pool_id: 7,
            total_liquidity: Coins::new(),
            volumes: vec![volume_at(12, "1230uosmo"), volume_at(10, "123uosmo")],
        }];

        indexer.calculate_volumes(&mut statuses).unwrap();

        let volumes = &statuses[0].volumes;
        assert_eq!(volumes[0].volume_usd, vec![1230.0 * 2.0]);
        assert_eq!(volumes[1].volume_usd, vec![123.0 * 2.0]);
        assert_eq!(volumes[0].relative_volume_usd, vec![0.0]);
        // Constant price of 2.0: the delta is (1230 - 123) * 2.
        assert!((volumes[1].relative_volume_usd[0] - (1230.0 - 123.0) * 2.0).abs() < 1e-9);
    }
}

//! Bucketed, recency-weighted volume density over a trailing candle window.

use crate::models::Candle;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VolumeLevel {
    pub price: f64,
    pub vol: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VolumeProfile {
    pub time: i64,
    pub profile: Vec<VolumeLevel>,
    pub width: usize,
}

/// Builds a volume profile over the last `window_size` candles.
///
/// Returns `None` when the window's price range is non-positive (flat or insufficient
/// data) or when fewer than two buckets would result.
pub fn build_volume_profile_from_candles(
    candles: &[Candle],
    time: i64,
    width: usize,
    num_buckets: usize,
    window_size: usize,
) -> Option<VolumeProfile> {
    if candles.is_empty() || num_buckets == 0 {
        return None;
    }
    let start = candles.len().saturating_sub(window_size);
    let window = &candles[start..];

    let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let range = high - low;
    if range <= 0.0 {
        return None;
    }
    let bucket_size = range / num_buckets as f64;

    let mut buckets = vec![0.0f64; num_buckets];
    let n = window.len();
    for (i, c) in window.iter().enumerate() {
        let position_from_newest = n - 1 - i;
        let weight = (window_size as f64 - position_from_newest as f64) / window_size as f64;

        let c_low = c.low.clamp(low, high);
        let c_high = c.high.clamp(low, high);
        let mut start_idx = ((c_low - low) / bucket_size) as isize;
        let mut end_idx = ((c_high - low) / bucket_size) as isize;
        start_idx = start_idx.clamp(0, num_buckets as isize - 1);
        end_idx = end_idx.clamp(0, num_buckets as isize - 1);
        if end_idx < start_idx {
            std::mem::swap(&mut start_idx, &mut end_idx);
        }
        let levels_touched = (end_idx - start_idx + 1) as f64;
        let vol_per_level = (c.volume / levels_touched) * weight;
        for idx in start_idx..=end_idx {
            buckets[idx as usize] += vol_per_level;
        }
    }

    let mut profile: Vec<VolumeLevel> = (0..num_buckets)
        .map(|idx| VolumeLevel {
            price: low + (idx as f64 + 0.5) * bucket_size,
            vol: buckets[idx],
        })
        .collect();

    if profile.len() < 2 {
        return None;
    }
    // Output order is descending by price; buckets were built ascending by index/price.
    profile.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap());

    Some(VolumeProfile { time, profile, width })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time_ms: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Candle {
        Candle { time_ms, open: o, high: h, low: l, close: c, volume: v }
    }

    #[test]
    fn flat_range_returns_none() {
        let candles = vec![candle(0, 1.0, 1.0, 1.0, 1.0, 10.0); 5];
        assert!(build_volume_profile_from_candles(&candles, 0, 6, 10, 2000).is_none());
    }

    #[test]
    fn profile_is_strictly_descending_by_price_and_sized_to_buckets() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| candle(i, 100.0 + i as f64, 105.0 + i as f64, 95.0 + i as f64, 102.0 + i as f64, 1000.0))
            .collect();
        let p = build_volume_profile_from_candles(&candles, 0, 6, 20, 2000).unwrap();
        assert_eq!(p.profile.len(), 20);
        for w in p.profile.windows(2) {
            assert!(w[0].price > w[1].price);
        }
    }

    #[test]
    fn total_volume_is_conserved_modulo_weighting() {
        // with window_size >> candles.len(), every candle gets weight close to 1, not exactly,
        // so we only check the profile is non-degenerate and every bucket is non-negative.
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle(i, 100.0, 110.0, 90.0, 100.0, 50.0))
            .collect();
        let p = build_volume_profile_from_candles(&candles, 0, 6, 10, 2000).unwrap();
        assert!(p.profile.iter().all(|l| l.vol >= 0.0));
        assert!(p.profile.iter().map(|l| l.vol).sum::<f64>() > 0.0);
    }
}

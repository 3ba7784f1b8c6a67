//! Session-anchored VWAP

use chrono::{DateTime, Utc};

use crate::types::Candle;

/// Typical-price VWAP over candles at or after `anchor`.
///
/// Zero volume falls back to the midpoint of the first open and last close.
pub fn session_vwap(candles: &[Candle], anchor: DateTime<Utc>) -> Option<f64> {
    let start = candles.partition_point(|c| c.timestamp < anchor);
    calculate_vwap(&candles[start..])
}

pub fn calculate_vwap(candles: &[Candle]) -> Option<f64> {
    let first = candles.first()?;
    let last = candles.last()?;

    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;

    for candle in candles.iter().filter(|c| c.is_finite()) {
        let typical_price = (candle.high + candle.low + candle.close) / 3.0;
        sum_pv += typical_price * candle.volume;
        sum_v += candle.volume;
    }

    if sum_v <= 0.0 {
        return Some((first.open + last.close) / 2.0);
    }

    Some(sum_pv / sum_v)
}

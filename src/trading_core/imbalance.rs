//! Price inefficiency detection
//!
//! Two scans feed one zone set:
//! - Fair value gaps: c1.high < c3.low (bullish) or c1.low > c3.high (bearish)
//! - Volume voids: runs of candles trading at under half the normal volume
//!
//! Overlapping same-direction findings are merged, stale zones pruned.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Candle, Direction};

/// Volume void: window mean below this share of the overall mean
const VOID_VOLUME_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImbalanceConfig {
    /// Smallest gap, relative to the gap's reference price (default: 0.1%)
    pub min_gap_size_pct: f64,
    /// Largest gap (default: 1%)
    pub max_gap_size_pct: f64,
    /// Candles per volume-void window (default: 3)
    pub min_candle_count: usize,
    /// Zones older than this, measured from the latest candle, are dropped (default: 240)
    pub max_zone_age_minutes: i64,
}

impl Default for ImbalanceConfig {
    fn default() -> Self {
        Self {
            min_gap_size_pct: 0.001,
            max_gap_size_pct: 0.01,
            min_candle_count: 3,
            max_zone_age_minutes: 240,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneDirection {
    Bullish,
    Bearish,
}

impl ZoneDirection {
    pub fn trade_direction(self) -> Direction {
        match self {
            ZoneDirection::Bullish => Direction::Long,
            ZoneDirection::Bearish => Direction::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSource {
    FairValueGap,
    VolumeVoid,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceZone {
    pub upper: f64,
    pub lower: f64,
    pub midpoint: f64,
    pub direction: ZoneDirection,
    pub strength: f64,
    pub created_at: DateTime<Utc>,
    pub source: ZoneSource,
}

impl ImbalanceZone {
    fn new(
        lower: f64,
        upper: f64,
        direction: ZoneDirection,
        strength: f64,
        created_at: DateTime<Utc>,
        source: ZoneSource,
    ) -> Self {
        Self {
            upper,
            lower,
            midpoint: (upper + lower) / 2.0,
            direction,
            strength: strength.clamp(0.0, 1.0),
            created_at,
            source,
        }
    }

    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.lower && price <= self.upper
    }
}

pub struct ImbalanceDetector {
    config: ImbalanceConfig,
    zones: Vec<ImbalanceZone>,
}

impl ImbalanceDetector {
    pub fn new(config: ImbalanceConfig) -> Self {
        Self {
            config,
            zones: Vec::new(),
        }
    }

    /// Rescan `candles` and replace the zone set
    pub fn detect(&mut self, candles: &[Candle]) -> &[ImbalanceZone] {
        let usable: Vec<Candle> = candles.iter().filter(|c| c.is_finite()).cloned().collect();

        let mut zones = self.scan_gaps(&usable);
        zones.extend(self.scan_volume_voids(&usable));
        let mut zones = merge_zones(zones);

        if let Some(latest) = usable.last().map(|c| c.timestamp) {
            let max_age = Duration::minutes(self.config.max_zone_age_minutes);
            zones.retain(|z| latest - z.created_at <= max_age);
        }

        debug!("Imbalance scan: {} zones from {} candles", zones.len(), usable.len());
        self.zones = zones;
        &self.zones
    }

    fn scan_gaps(&self, candles: &[Candle]) -> Vec<ImbalanceZone> {
        let mut zones = Vec::new();
        for w in candles.windows(3) {
            let (c1, c3) = (&w[0], &w[2]);

            if c1.high < c3.low && c1.high > 0.0 {
                let gap = (c3.low - c1.high) / c1.high;
                if self.gap_in_bounds(gap) {
                    zones.push(ImbalanceZone::new(
                        c1.high,
                        c3.low,
                        ZoneDirection::Bullish,
                        gap / self.config.max_gap_size_pct,
                        c3.timestamp,
                        ZoneSource::FairValueGap,
                    ));
                }
            } else if c1.low > c3.high && c1.low > 0.0 {
                let gap = (c1.low - c3.high) / c1.low;
                if self.gap_in_bounds(gap) {
                    zones.push(ImbalanceZone::new(
                        c3.high,
                        c1.low,
                        ZoneDirection::Bearish,
                        gap / self.config.max_gap_size_pct,
                        c3.timestamp,
                        ZoneSource::FairValueGap,
                    ));
                }
            }
        }
        zones
    }

    fn gap_in_bounds(&self, gap: f64) -> bool {
        gap >= self.config.min_gap_size_pct && gap <= self.config.max_gap_size_pct
    }

    fn scan_volume_voids(&self, candles: &[Candle]) -> Vec<ImbalanceZone> {
        let window = self.config.min_candle_count;
        if window == 0 || candles.len() < window {
            return Vec::new();
        }

        let overall = candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64;
        if overall <= 0.0 {
            return Vec::new();
        }
        let threshold = overall * VOID_VOLUME_RATIO;

        let mut zones = Vec::new();
        for w in candles.windows(window) {
            let mean = w.iter().map(|c| c.volume).sum::<f64>() / window as f64;
            if mean >= threshold {
                continue;
            }
            let (first, last) = (&w[0], &w[window - 1]);
            let direction = if last.close > first.close {
                ZoneDirection::Bullish
            } else if last.close < first.close {
                ZoneDirection::Bearish
            } else {
                continue;
            };
            let high = w.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let low = w.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            if high <= low {
                continue;
            }
            zones.push(ImbalanceZone::new(
                low,
                high,
                direction,
                1.0 - mean / threshold,
                last.timestamp,
                ZoneSource::VolumeVoid,
            ));
        }
        zones
    }

    pub fn zones(&self) -> &[ImbalanceZone] {
        &self.zones
    }

    /// Zone whose midpoint is closest to `price`
    pub fn nearest(&self, price: f64) -> Option<&ImbalanceZone> {
        self.zones
            .iter()
            .min_by(|a, b| (a.midpoint - price).abs().total_cmp(&(b.midpoint - price).abs()))
    }

    /// Zones containing `price`
    pub fn containing(&self, price: f64) -> impl Iterator<Item = &ImbalanceZone> {
        self.zones.iter().filter(move |z| z.contains(price))
    }

    /// Closest zone (by midpoint) among those containing `price`
    pub fn nearest_containing(&self, price: f64) -> Option<&ImbalanceZone> {
        self.containing(price)
            .min_by(|a, b| (a.midpoint - price).abs().total_cmp(&(b.midpoint - price).abs()))
    }

    /// Zones whose nearest edge is within `pct` of `price`
    pub fn within(&self, price: f64, pct: f64) -> impl Iterator<Item = &ImbalanceZone> {
        let reach = price.abs() * pct;
        self.zones.iter().filter(move |z| {
            let distance = if z.contains(price) {
                0.0
            } else {
                (z.lower - price).abs().min((z.upper - price).abs())
            };
            distance <= reach
        })
    }
}

/// Sort by midpoint and fold adjacent same-direction zones together when
/// their centers sit within half of the larger zone's range
fn merge_zones(mut zones: Vec<ImbalanceZone>) -> Vec<ImbalanceZone> {
    zones.sort_by(|a, b| a.midpoint.total_cmp(&b.midpoint));

    let mut merged: Vec<ImbalanceZone> = Vec::with_capacity(zones.len());
    for zone in zones {
        if let Some(current) = merged.last_mut() {
            let span = current.range().max(zone.range());
            if current.direction == zone.direction
                && (zone.midpoint - current.midpoint).abs() < span / 2.0
            {
                let lower = current.lower.min(zone.lower);
                let upper = current.upper.max(zone.upper);
                *current = ImbalanceZone::new(
                    lower,
                    upper,
                    current.direction,
                    current.strength.max(zone.strength),
                    current.created_at.max(zone.created_at),
                    ZoneSource::Merged,
                );
                continue;
            }
        }
        merged.push(zone);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::{candle, flat_series, ts};

    #[test]
    fn test_bullish_fair_value_gap() {
        let candles = vec![
            candle(0, 99.5, 100.0, 99.4, 99.9, 100.0),
            candle(60, 99.9, 100.7, 99.8, 100.6, 100.0),
            candle(120, 100.6, 101.0, 100.5, 100.9, 100.0),
        ];
        let mut detector = ImbalanceDetector::new(ImbalanceConfig::default());
        let zones = detector.detect(&candles);

        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.direction, ZoneDirection::Bullish);
        assert_eq!(zone.lower, 100.0);
        assert_eq!(zone.upper, 100.5);
        assert_eq!(zone.midpoint, 100.25);
        assert_eq!(zone.source, ZoneSource::FairValueGap);
        assert!((zone.strength - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bearish_fair_value_gap() {
        let candles = vec![
            candle(0, 100.5, 100.6, 100.0, 100.1, 100.0),
            candle(60, 100.1, 100.2, 99.3, 99.4, 100.0),
            candle(120, 99.4, 99.6, 99.0, 99.1, 100.0),
        ];
        let mut detector = ImbalanceDetector::new(ImbalanceConfig::default());
        let zones = detector.detect(&candles);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].direction, ZoneDirection::Bearish);
        assert_eq!(zones[0].lower, 99.6);
        assert_eq!(zones[0].upper, 100.0);
    }

    #[test]
    fn test_gap_size_bounds() {
        let mut detector = ImbalanceDetector::new(ImbalanceConfig::default());
        // 0.05% gap: too small
        let tiny = vec![
            candle(0, 99.9, 100.0, 99.8, 99.95, 100.0),
            candle(60, 100.0, 100.1, 99.95, 100.05, 100.0),
            candle(120, 100.05, 100.2, 100.05, 100.1, 100.0),
        ];
        assert!(detector.detect(&tiny).is_empty());

        // 3% gap: too large
        let huge = vec![
            candle(0, 99.9, 100.0, 99.8, 99.95, 100.0),
            candle(60, 100.0, 103.5, 99.95, 103.0, 100.0),
            candle(120, 103.0, 104.0, 103.0, 103.5, 100.0),
        ];
        assert!(detector.detect(&huge).is_empty());
    }

    #[test]
    fn test_volume_void_zone() {
        let mut candles = flat_series(0, 10, 100.0, 1_000.0);
        for i in 0..3 {
            let base = 100.0 + i as f64 * 0.02;
            candles.push(candle(600 + i * 60, base, base + 0.03, base - 0.01, base + 0.02, 10.0));
        }
        let config = ImbalanceConfig {
            // Disable the gap scan for this test
            min_gap_size_pct: 1.0,
            ..Default::default()
        };
        let mut detector = ImbalanceDetector::new(config);
        let zones = detector.detect(&candles);

        assert!(!zones.is_empty());
        assert!(zones.iter().all(|z| z.source != ZoneSource::FairValueGap));
        assert!(zones.iter().any(|z| z.direction == ZoneDirection::Bullish && z.contains(100.03)));
    }

    #[test]
    fn test_merge_same_direction() {
        let a = ImbalanceZone::new(100.0, 101.0, ZoneDirection::Bullish, 0.3, ts(0), ZoneSource::FairValueGap);
        let b = ImbalanceZone::new(100.2, 101.2, ZoneDirection::Bullish, 0.7, ts(60), ZoneSource::FairValueGap);
        let c = ImbalanceZone::new(100.3, 100.9, ZoneDirection::Bearish, 0.9, ts(60), ZoneSource::FairValueGap);
        let far = ImbalanceZone::new(105.0, 106.0, ZoneDirection::Bullish, 0.1, ts(60), ZoneSource::FairValueGap);

        let merged = merge_zones(vec![b.clone(), a.clone(), far.clone()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].lower, 100.0);
        assert_eq!(merged[0].upper, 101.2);
        assert_eq!(merged[0].strength, 0.7);
        assert_eq!(merged[0].source, ZoneSource::Merged);
        assert_eq!(merged[1], far);

        // An opposite-direction zone between them blocks the merge
        let merged = merge_zones(vec![a, c, b]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_lookups() {
        let mut detector = ImbalanceDetector::new(ImbalanceConfig::default());
        detector.zones = vec![
            ImbalanceZone::new(100.0, 100.5, ZoneDirection::Bullish, 0.5, ts(0), ZoneSource::FairValueGap),
            ImbalanceZone::new(100.3, 101.5, ZoneDirection::Bearish, 0.5, ts(0), ZoneSource::VolumeVoid),
        ];

        assert_eq!(detector.nearest(100.2).map(|z| z.lower), Some(100.0));
        assert_eq!(detector.containing(100.4).count(), 2);
        assert_eq!(detector.nearest_containing(100.4).map(|z| z.lower), Some(100.0));
        assert_eq!(detector.nearest_containing(101.4).map(|z| z.lower), Some(100.3));
        assert!(detector.nearest_containing(99.0).is_none());
        assert_eq!(detector.within(99.95, 0.001).count(), 1);
    }

    #[test]
    fn test_old_zones_pruned() {
        let mut candles = vec![
            candle(0, 99.5, 100.0, 99.4, 99.9, 100.0),
            candle(60, 99.9, 100.7, 99.8, 100.6, 100.0),
            candle(120, 100.6, 101.0, 100.5, 100.9, 100.0),
        ];
        // Five hours of flat trading afterwards
        candles.extend(flat_series(180, 300, 100.9, 100.0));
        let mut detector = ImbalanceDetector::new(ImbalanceConfig::default());
        assert!(detector
            .detect(&candles)
            .iter()
            .all(|z| z.source != ZoneSource::FairValueGap));
    }
}

//! Expected daily move estimation
//!
//! The zone map needs a volatility fraction of the open. `RealizedVolatility`
//! derives it from close-to-close log returns; `CalibrationCache` keeps one
//! estimate per (symbol, timeframe, day) so a session is calibrated once.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityConfig {
    /// Lower clamp on the estimate (default: 1%)
    pub min_fraction: f64,
    /// Upper clamp on the estimate (default: 10%)
    pub max_fraction: f64,
    /// Sampling periods per trading day, 390 for one-minute RTH candles
    pub periods_per_day: f64,
    /// How long a cached estimate stays valid (default: 6h)
    pub cache_ttl_minutes: i64,
    /// Max cached estimates before eviction (default: 256)
    pub cache_capacity: usize,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            min_fraction: 0.01,
            max_fraction: 0.10,
            periods_per_day: 390.0,
            cache_ttl_minutes: 360,
            cache_capacity: 256,
        }
    }
}

pub trait VolatilityEstimator: Send + Sync {
    /// Expected daily move as a fraction of price, always within the
    /// estimator's documented clamp
    fn estimate(&self, prices: &[f64]) -> f64;
}

pub struct RealizedVolatility {
    config: VolatilityConfig,
}

impl RealizedVolatility {
    pub fn new(config: VolatilityConfig) -> Self {
        Self { config }
    }
}

impl VolatilityEstimator for RealizedVolatility {
    fn estimate(&self, prices: &[f64]) -> f64 {
        let floor = self.config.min_fraction;
        let returns: Vec<f64> = prices
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0 && w[0].is_finite() && w[1].is_finite())
            .map(|w| (w[1] / w[0]).ln())
            .collect();

        if returns.is_empty() {
            return floor;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let daily = variance.sqrt() * self.config.periods_per_day.max(1.0).sqrt();

        if !daily.is_finite() {
            return floor;
        }
        daily.clamp(floor, self.config.max_fraction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CalibrationKey {
    pub symbol: String,
    pub timeframe: String,
    pub day: NaiveDate,
}

impl CalibrationKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            day,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedEstimate {
    value: f64,
    inserted_at: DateTime<Utc>,
}

/// Bounded TTL cache of volatility estimates
pub struct CalibrationCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<CalibrationKey, CachedEstimate>,
}

impl CalibrationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn from_config(config: &VolatilityConfig) -> Self {
        Self::new(Duration::minutes(config.cache_ttl_minutes), config.cache_capacity)
    }

    pub fn get(&self, key: &CalibrationKey, now: DateTime<Utc>) -> Option<f64> {
        self.entries
            .get(key)
            .filter(|entry| now - entry.inserted_at < self.ttl)
            .map(|entry| entry.value)
    }

    pub fn insert(&mut self, key: CalibrationKey, value: f64, now: DateTime<Utc>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict(now);
        }
        self.entries.insert(key, CachedEstimate { value, inserted_at: now });
    }

    /// Cached value if still fresh, otherwise estimate and remember
    pub fn get_or_estimate(
        &mut self,
        key: CalibrationKey,
        now: DateTime<Utc>,
        prices: &[f64],
        estimator: &dyn VolatilityEstimator,
    ) -> f64 {
        if let Some(value) = self.get(&key, now) {
            debug!("Calibration cache hit for {} {} {}", key.symbol, key.timeframe, key.day);
            return value;
        }
        let value = estimator.estimate(prices);
        debug!(
            "Calibrated {} {} {}: vol={:.4}",
            key.symbol, key.timeframe, key.day, value
        );
        self.insert(key, value, now);
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries; if still full, drop the oldest insert
    fn evict(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.inserted_at < ttl);
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

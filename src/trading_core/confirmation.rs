//! Order-book / tape confirmation
//!
//! With depth: resting liquidity on the directionally relevant side of a
//! level (bids at/below for support, asks at/above for resistance) must
//! clear a notional wall threshold.
//!
//! Without depth: a reduced-confidence read from recent candle volume and
//! candle direction.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{pct_distance, Bias, BookLevel, Candle, DepthSnapshot, Direction};

/// Neutral bias still confirms when at least this confident
const NEUTRAL_CONFIRM_CONFIDENCE: f64 = 0.3;

/// Candles used for the surge / direction read
const RECENT_CANDLES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Band around the level that counts as "at the level", in basis points (default: 5)
    pub wall_proximity_bps: f64,
    /// Minimum resting notional for a wall (default: 50,000)
    pub min_wall_notional: f64,
    /// Recent volume / window volume ratio that counts as a surge (default: 2.0)
    pub volume_surge_multiplier: f64,
    /// Minimum confidence with depth data (default: 0.3)
    pub min_confidence: f64,
    /// Minimum confidence in fallback mode (default: 0.2)
    pub fallback_min_confidence: f64,
    /// Cap on fallback confidence (default: 0.4)
    pub fallback_max_confidence: f64,
    /// Price further than this from the level halves confidence (default: 0.5%)
    pub far_from_level_pct: f64,
    /// Candles kept for the fallback read (default: 20)
    pub candle_window: usize,
    /// Wall must retain this share of its previous notional to count as absorbing (default: 0.8)
    pub absorption_retention: f64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            wall_proximity_bps: 5.0,
            min_wall_notional: 50_000.0,
            volume_surge_multiplier: 2.0,
            min_confidence: 0.3,
            fallback_min_confidence: 0.2,
            fallback_max_confidence: 0.4,
            far_from_level_pct: 0.005,
            candle_window: 20,
            absorption_retention: 0.8,
        }
    }
}

/// Diagnostic flags attached to every confirmation read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationFlags {
    pub wall_detected: bool,
    pub far_from_level: bool,
    pub absorption: bool,
    pub volume_surge: bool,
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub bias: Bias,
    pub confidence: f64,
    pub bid_notional: f64,
    pub ask_notional: f64,
    pub flags: ConfirmationFlags,
}

impl ConfirmationResult {
    fn neutral(flags: ConfirmationFlags) -> Self {
        Self {
            bias: Bias::Neutral,
            confidence: 0.0,
            bid_notional: 0.0,
            ask_notional: 0.0,
            flags,
        }
    }
}

pub struct ConfirmationLayer {
    config: ConfirmationConfig,
    candles: Vec<Candle>,
    snapshot: Option<DepthSnapshot>,
    previous_snapshot: Option<DepthSnapshot>,
}

impl ConfirmationLayer {
    pub fn new(config: ConfirmationConfig) -> Self {
        Self {
            config,
            candles: Vec::new(),
            snapshot: None,
            previous_snapshot: None,
        }
    }

    /// Keep the most recent `candle_window` candles
    pub fn update_candles(&mut self, candles: &[Candle]) {
        let start = candles.len().saturating_sub(self.config.candle_window.max(RECENT_CANDLES));
        self.candles.clear();
        self.candles.extend_from_slice(&candles[start..]);
    }

    /// Install the latest depth view; `None` means no order-book data this tick.
    /// The last real snapshot moves into the previous slot for absorption checks.
    pub fn update_snapshot(&mut self, snapshot: Option<DepthSnapshot>) {
        if let Some(next) = snapshot {
            if self.snapshot.as_ref().map(|s| s.timestamp) == Some(next.timestamp) {
                self.snapshot = Some(next);
                return;
            }
            self.previous_snapshot = self.snapshot.take();
            self.snapshot = Some(next);
        } else {
            self.snapshot = None;
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Read the book (or the tape) for a trade at `level` in direction `side`
    pub fn confirm(&self, level: f64, current_price: f64, side: Direction) -> ConfirmationResult {
        match self.snapshot.as_ref() {
            Some(snapshot) => self.confirm_with_depth(snapshot, level, current_price, side),
            None => self.confirm_from_candles(),
        }
    }

    /// Does `result` support a trade in direction `side`?
    pub fn confirms(&self, result: &ConfirmationResult, side: Direction) -> bool {
        let threshold = if result.flags.fallback {
            self.config.fallback_min_confidence
        } else {
            self.config.min_confidence
        };
        if result.confidence < threshold {
            return false;
        }
        result.bias.agrees_with(side)
            || (result.bias.is_neutral() && result.confidence >= NEUTRAL_CONFIRM_CONFIDENCE)
    }

    fn confirm_with_depth(
        &self,
        snapshot: &DepthSnapshot,
        level: f64,
        current_price: f64,
        side: Direction,
    ) -> ConfirmationResult {
        let (bid_notional, ask_notional) = self.wall_notional(snapshot, level);
        let mut flags = ConfirmationFlags::default();

        let (relevant, opposing) = match side {
            Direction::Long => (bid_notional, ask_notional),
            Direction::Short => (ask_notional, bid_notional),
        };
        let min_wall = self.config.min_wall_notional;
        let scale = |notional: f64| (notional / (2.0 * min_wall)).min(1.0);

        let (bias, mut confidence) = if relevant > min_wall {
            flags.wall_detected = true;
            (Bias::from(side), scale(relevant))
        } else if opposing > min_wall {
            flags.wall_detected = true;
            (Bias::from(side.opposite()), scale(opposing))
        } else {
            (Bias::Neutral, scale(relevant))
        };

        if pct_distance(current_price, level) > self.config.far_from_level_pct {
            flags.far_from_level = true;
            confidence *= 0.5;
        }

        if flags.wall_detected {
            flags.absorption = self.is_absorbing(level, current_price, side, relevant);
        }

        debug!(
            "Depth confirmation @ {:.2} for {}: bids={:.0} asks={:.0} -> {} ({:.2})",
            level, side, bid_notional, ask_notional, bias, confidence
        );

        ConfirmationResult {
            bias,
            confidence,
            bid_notional,
            ask_notional,
            flags,
        }
    }

    /// Wall held through consecutive snapshots while price sat on the level
    fn is_absorbing(&self, level: f64, current_price: f64, side: Direction, relevant: f64) -> bool {
        let Some(previous) = self.previous_snapshot.as_ref() else {
            return false;
        };
        let band = level * self.config.wall_proximity_bps / 10_000.0;
        if (current_price - level).abs() > band {
            return false;
        }
        let (prev_bids, prev_asks) = self.wall_notional(previous, level);
        let prev_relevant = match side {
            Direction::Long => prev_bids,
            Direction::Short => prev_asks,
        };
        prev_relevant > self.config.min_wall_notional
            && relevant >= prev_relevant * self.config.absorption_retention
    }

    /// (bid notional at/below level, ask notional at/above level) inside the band
    fn wall_notional(&self, snapshot: &DepthSnapshot, level: f64) -> (f64, f64) {
        let band = level * self.config.wall_proximity_bps / 10_000.0;
        let bids = side_notional(&snapshot.bids, |p| p <= level && level - p <= band);
        let asks = side_notional(&snapshot.asks, |p| p >= level && p - level <= band);
        (bids, asks)
    }

    fn confirm_from_candles(&self) -> ConfirmationResult {
        let mut flags = ConfirmationFlags {
            fallback: true,
            ..Default::default()
        };

        if self.candles.len() < RECENT_CANDLES {
            return ConfirmationResult::neutral(flags);
        }

        let recent = &self.candles[self.candles.len() - RECENT_CANDLES..];
        let window_avg = mean_volume(&self.candles);
        let recent_avg = mean_volume(recent);
        flags.volume_surge =
            window_avg > 0.0 && recent_avg >= self.config.volume_surge_multiplier * window_avg;

        let bullish = recent.iter().filter(|c| c.is_bullish()).count();
        let bearish = recent.iter().filter(|c| c.is_bearish()).count();

        let (bias, agreeing) = if bullish >= 2 && bullish > bearish {
            (Bias::Long, bullish)
        } else if bearish >= 2 && bearish > bullish {
            (Bias::Short, bearish)
        } else {
            (Bias::Neutral, 0)
        };

        let mut confidence: f64 = match bias {
            Bias::Neutral => 0.0,
            _ => 0.2,
        };
        if flags.volume_surge {
            confidence += 0.15;
        }
        if agreeing == RECENT_CANDLES {
            confidence += 0.05;
        }
        let confidence = confidence.min(self.config.fallback_max_confidence);

        debug!(
            "Fallback confirmation: {} bullish / {} bearish, surge={} -> {} ({:.2})",
            bullish, bearish, flags.volume_surge, bias, confidence
        );

        ConfirmationResult {
            bias,
            confidence,
            bid_notional: 0.0,
            ask_notional: 0.0,
            flags,
        }
    }

    pub fn config(&self) -> &ConfirmationConfig {
        &self.config
    }
}

fn side_notional(levels: &[BookLevel], keep: impl Fn(f64) -> bool) -> f64 {
    levels
        .iter()
        .filter(|l| l.price.is_finite() && l.size.is_finite() && keep(l.price))
        .map(BookLevel::notional)
        .sum()
}

fn mean_volume(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64
}

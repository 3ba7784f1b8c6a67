//! Opening Range Breakout tracker
//!
//! States per session:
//! 1. TRACKING - inside the opening window, high/low keep extending
//! 2. CLOSED - window over, waiting for price to leave the range
//! 3. BROKEN_UP / BROKEN_DOWN - terminal, breakout level fixed
//!
//! A breakout is only tradable once it has held for `hold_duration_ms` and
//! price still clears the level by `breakout_confirmation_pct`. The first
//! tick meeting both latches the confirmation for the rest of the session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Bias, Candle, Direction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpeningRangeConfig {
    /// Length of the opening window after session start (default: 15)
    pub window_minutes: i64,
    /// Time a breakout must hold before it is confirmed (default: 30s)
    pub hold_duration_ms: i64,
    /// Distance beyond the level price must keep to confirm (default: 0.1%)
    pub breakout_confirmation_pct: f64,
}

impl Default for OpeningRangeConfig {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            hold_duration_ms: 30_000,
            breakout_confirmation_pct: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeState {
    Tracking,
    Closed,
    BrokenUp,
    BrokenDown,
}

impl std::fmt::Display for RangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeState::Tracking => write!(f, "TRACKING"),
            RangeState::Closed => write!(f, "CLOSED"),
            RangeState::BrokenUp => write!(f, "BROKEN_UP"),
            RangeState::BrokenDown => write!(f, "BROKEN_DOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningRangeState {
    pub opening_high: f64,
    pub opening_low: f64,
    pub session_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub state: RangeState,
    pub breakout_level: Option<f64>,
    pub breakout_timestamp: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl OpeningRangeState {
    /// False until at least one candle fell inside the window
    pub fn has_range(&self) -> bool {
        self.opening_high.is_finite() && self.opening_low.is_finite()
    }
}

/// Breakout as seen at a particular tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub direction: Direction,
    pub level: f64,
    pub breakout_timestamp: DateTime<Utc>,
    pub confirmed: bool,
}

pub struct OpeningRangeTracker {
    config: OpeningRangeConfig,
    state: Option<OpeningRangeState>,
}

impl OpeningRangeTracker {
    pub fn new(config: OpeningRangeConfig) -> Self {
        Self { config, state: None }
    }

    /// Seed the range from the candle history
    pub fn initialize(&mut self, session_start: DateTime<Utc>, candles: &[Candle]) {
        let window_end = session_start + Duration::minutes(self.config.window_minutes);
        let mut state = OpeningRangeState {
            opening_high: f64::NEG_INFINITY,
            opening_low: f64::INFINITY,
            session_start,
            window_end,
            state: RangeState::Tracking,
            breakout_level: None,
            breakout_timestamp: None,
            confirmed_at: None,
        };
        extend_range(&mut state, candles);
        self.state = Some(state);
    }

    /// Advance the state machine with the latest tick
    pub fn update(&mut self, price: f64, timestamp: DateTime<Utc>, candles: &[Candle]) {
        let config = &self.config;
        let Some(state) = self.state.as_mut() else {
            return;
        };

        if state.state == RangeState::Tracking {
            extend_range(state, candles);
            if timestamp < state.window_end {
                return;
            }
            state.state = RangeState::Closed;
            if state.has_range() {
                info!(
                    "Opening range closed: high={:.2} low={:.2}",
                    state.opening_high, state.opening_low
                );
            } else {
                info!("Opening range closed with no candles in window");
            }
        }

        if state.state == RangeState::Closed && state.has_range() {
            break_out(state, price, timestamp);
        }

        if state.confirmed_at.is_none() && holds_and_clears(config, state, price, timestamp) {
            state.confirmed_at = Some(timestamp);
            info!("Opening range breakout CONFIRMED at {:.2}", price);
        }
    }

    /// Current breakout. Confirmed once latched, otherwise evaluated at
    /// (`price`, `timestamp`).
    pub fn breakout(&self, price: f64, timestamp: DateTime<Utc>) -> Option<BreakoutSignal> {
        let state = self.state.as_ref()?;
        let direction = breakout_direction(state.state)?;
        let level = state.breakout_level?;
        let breakout_timestamp = state.breakout_timestamp?;

        Some(BreakoutSignal {
            direction,
            level,
            breakout_timestamp,
            confirmed: state.confirmed_at.is_some() || holds_and_clears(&self.config, state, price, timestamp),
        })
    }

    /// Long/short on a confirmed breakout, neutral otherwise
    pub fn session_bias(&self, price: f64, timestamp: DateTime<Utc>) -> Bias {
        match self.breakout(price, timestamp) {
            Some(signal) if signal.confirmed => signal.direction.into(),
            _ => Bias::Neutral,
        }
    }

    pub fn state(&self) -> Option<&OpeningRangeState> {
        self.state.as_ref()
    }

    pub fn config(&self) -> &OpeningRangeConfig {
        &self.config
    }
}

/// Leave the closed range on a trade through either extreme
fn break_out(state: &mut OpeningRangeState, price: f64, timestamp: DateTime<Utc>) {
    if price > state.opening_high {
        state.state = RangeState::BrokenUp;
        state.breakout_level = Some(state.opening_high);
        state.breakout_timestamp = Some(timestamp);
        info!("Opening range BROKEN UP at {:.2} (level {:.2})", price, state.opening_high);
    } else if price < state.opening_low {
        state.state = RangeState::BrokenDown;
        state.breakout_level = Some(state.opening_low);
        state.breakout_timestamp = Some(timestamp);
        info!("Opening range BROKEN DOWN at {:.2} (level {:.2})", price, state.opening_low);
    }
}

fn breakout_direction(state: RangeState) -> Option<Direction> {
    match state {
        RangeState::BrokenUp => Some(Direction::Long),
        RangeState::BrokenDown => Some(Direction::Short),
        _ => None,
    }
}

/// Breakout has held long enough and price still clears the buffer
fn holds_and_clears(
    config: &OpeningRangeConfig,
    state: &OpeningRangeState,
    price: f64,
    timestamp: DateTime<Utc>,
) -> bool {
    let (Some(direction), Some(level), Some(since)) = (
        breakout_direction(state.state),
        state.breakout_level,
        state.breakout_timestamp,
    ) else {
        return false;
    };
    let held = timestamp - since >= Duration::milliseconds(config.hold_duration_ms);
    let clears = match direction {
        Direction::Long => price >= level * (1.0 + config.breakout_confirmation_pct),
        Direction::Short => price <= level * (1.0 - config.breakout_confirmation_pct),
    };
    held && clears
}

/// Fold every in-window candle into the range. Only ever widens it.
fn extend_range(state: &mut OpeningRangeState, candles: &[Candle]) {
    for candle in candles {
        if candle.timestamp < state.session_start || candle.timestamp >= state.window_end {
            continue;
        }
        if !candle.is_finite() {
            continue;
        }
        state.opening_high = state.opening_high.max(candle.high);
        state.opening_low = state.opening_low.min(candle.low);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candle as delivered by the market-data feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }
}

/// One price level of an order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// Point-in-time order book view.
/// Bids are sorted descending by price, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1.0 for long, -1.0 for short
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "Long"),
            Direction::Short => write!(f, "Short"),
        }
    }
}

/// Directional lean, used for both session bias and confirmation bias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Long,
    Short,
    #[default]
    Neutral,
}

impl Bias {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Bias::Long => Some(Direction::Long),
            Bias::Short => Some(Direction::Short),
            Bias::Neutral => None,
        }
    }

    pub fn is_neutral(self) -> bool {
        self == Bias::Neutral
    }

    pub fn agrees_with(self, side: Direction) -> bool {
        self.direction() == Some(side)
    }
}

impl From<Direction> for Bias {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => Bias::Long,
            Direction::Short => Bias::Short,
        }
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Long => write!(f, "long"),
            Bias::Short => write!(f, "short"),
            Bias::Neutral => write!(f, "neutral"),
        }
    }
}

/// Relative distance between two prices as a fraction of `reference`
pub fn pct_distance(price: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        return f64::INFINITY;
    }
    (price - reference).abs() / reference.abs()
}

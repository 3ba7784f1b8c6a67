//! Fatal engine errors
//!
//! Only precondition and configuration defects are errors. Everything the
//! engine meets during normal trading (no breakout, gate veto, missing depth)
//! is reported through the signal reason and tracing instead.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("session cannot be initialized without candle history")]
    EmptyHistory,

    #[error("invalid zone inputs: daily_open={daily_open}, volatility_fraction={volatility_fraction}")]
    InvalidZoneInputs {
        daily_open: f64,
        volatility_fraction: f64,
    },

    #[error("zone boundaries out of order: {0:?}")]
    BoundaryOrder([f64; 5]),

    #[error("volume profile has no buckets (bucket_size_pct={0})")]
    EmptyProfile(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

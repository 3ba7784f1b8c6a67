//! Trading Core - session signal engine shared by replay and live feeds
//!
//! This module contains the core components:
//! - Opening range breakout tracking
//! - Volatility zone map
//! - Volume profile (HVN/LVN) classification
//! - Order-book / tape confirmation
//! - Imbalance (fair value gap, volume void) detection
//! - Five-rule gate and signal orchestration
//! - Session runner and recorded-session loading

pub mod opening_range;
pub mod zones;
pub mod profile;
pub mod confirmation;
pub mod imbalance;
pub mod gate;
pub mod orchestrator;
pub mod vwap;
pub mod volatility;
pub mod depth;
pub mod trader;
pub mod cache;

// Re-export commonly used types
pub use opening_range::{BreakoutSignal, OpeningRangeConfig, OpeningRangeState, OpeningRangeTracker, RangeState};
pub use zones::{Boundary, Quadrant, ZoneConfig, ZoneLevels, ZoneMap};
pub use profile::{NodeKind, ProfileClassifier, ProfileConfig, ProfileContext, VolumeProfileNode};
pub use confirmation::{ConfirmationConfig, ConfirmationFlags, ConfirmationLayer, ConfirmationResult};
pub use imbalance::{ImbalanceConfig, ImbalanceDetector, ImbalanceZone, ZoneDirection, ZoneSource};
pub use gate::{GateRule, LevelKind, SetupType};
pub use orchestrator::{Orchestrator, OrchestratorConfig, SignalContext, TradeSignal, ZoneContext};
pub use volatility::{CalibrationCache, CalibrationKey, RealizedVolatility, VolatilityConfig, VolatilityEstimator};
pub use depth::{DepthProvider, NoDepth, RecordedDepth};
pub use trader::{SessionConfig, SessionSummary, SessionTrader};
pub use cache::SessionData;

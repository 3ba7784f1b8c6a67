// Library crate - exports the signal engine and its shared types

pub mod types;
pub mod error;
pub mod config;
pub mod trading_core;

// Re-export commonly used types
pub use types::*;
pub use error::{EngineError, EngineResult};
pub use config::EngineConfig;
pub use trading_core::{Orchestrator, SessionTrader, TradeSignal};

//! Session Runner
//!
//! Binds one orchestrator to a depth source and a feed of ticks. Used by both
//! replay (recorded sessions) and any live feed that can hand over candles.
//!
//! The depth lookup is the only async step. It runs under a timeout and any
//! failure degrades to the candle-based confirmation path.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::SessionData;
use super::depth::{DepthProvider, RecordedDepth};
use super::gate::SetupType;
use super::orchestrator::{Orchestrator, TradeSignal};
use super::volatility::{CalibrationCache, CalibrationKey, VolatilityEstimator};
use super::vwap::session_vwap;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::types::Candle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Symbol used for depth lookups and calibration (e.g., "NQ")
    pub symbol: String,
    /// Candle timeframe label for calibration keys
    pub timeframe: String,
    /// Max wait for a depth snapshot before falling back (default: 2s)
    pub depth_timeout_ms: u64,
    /// Feed the session VWAP into bias resolution
    pub use_vwap_bias: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "NQ".to_string(),
            timeframe: "1m".to_string(),
            depth_timeout_ms: 2_000,
            use_vwap_bias: true,
        }
    }
}

/// Per-session counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub ticks: u64,
    pub signals: u64,
    pub depth_timeouts: u64,
    pub depth_errors: u64,
    pub signals_by_setup: BTreeMap<SetupType, u64>,
}

pub struct SessionTrader {
    config: SessionConfig,
    orchestrator: Orchestrator,
    depth: Arc<dyn DepthProvider>,
    session_start: Option<DateTime<Utc>>,
    summary: SessionSummary,
}

impl SessionTrader {
    pub fn new(engine: &EngineConfig, depth: Arc<dyn DepthProvider>) -> EngineResult<Self> {
        Ok(Self {
            config: engine.session.clone(),
            orchestrator: Orchestrator::new(engine)?,
            depth,
            session_start: None,
            summary: SessionSummary::default(),
        })
    }

    pub fn start(
        &mut self,
        daily_open: f64,
        volatility_fraction: f64,
        session_start: DateTime<Utc>,
        candles: &[Candle],
    ) -> EngineResult<()> {
        self.orchestrator
            .initialize(daily_open, volatility_fraction, session_start, candles)?;
        self.session_start = Some(session_start);
        self.summary = SessionSummary::default();
        Ok(())
    }

    pub async fn on_tick(&mut self, price: f64, timestamp: DateTime<Utc>, candles: &[Candle]) -> Option<TradeSignal> {
        self.summary.ticks += 1;

        let timeout = Duration::from_millis(self.config.depth_timeout_ms);
        let lookup = self.depth.snapshot(&self.config.symbol, timestamp);
        let snapshot = match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                self.summary.depth_errors += 1;
                warn!("Depth lookup failed at {}: {:#}", timestamp, e);
                None
            }
            Err(_) => {
                self.summary.depth_timeouts += 1;
                warn!("Depth lookup timed out after {}ms at {}", self.config.depth_timeout_ms, timestamp);
                None
            }
        };
        self.orchestrator.update_depth(snapshot);

        let vwap = match (self.config.use_vwap_bias, self.session_start) {
            (true, Some(start)) => session_vwap(candles, start),
            _ => None,
        };

        let signal = self.orchestrator.evaluate(price, timestamp, candles, vwap);
        if let Some(signal) = &signal {
            self.summary.signals += 1;
            *self.summary.signals_by_setup.entry(signal.setup).or_default() += 1;
        }
        signal
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

/// Volatility from the closes before the session opened
pub fn calibrate(
    data: &SessionData,
    timeframe: &str,
    cache: &mut CalibrationCache,
    estimator: &dyn VolatilityEstimator,
) -> f64 {
    let prices: Vec<f64> = data.candles[..data.session_start_index()]
        .iter()
        .map(|c| c.close)
        .collect();
    let key = CalibrationKey::new(data.symbol.clone(), timeframe, data.session_start.date_naive());
    cache.get_or_estimate(key, data.session_start, &prices, estimator)
}

/// Replay a recorded session candle by candle, one tick per candle close
pub async fn replay_session(
    engine: &EngineConfig,
    data: &SessionData,
    volatility_fraction: f64,
) -> Result<(Vec<TradeSignal>, SessionSummary)> {
    let Some(daily_open) = data.daily_open() else {
        anyhow::bail!("Session {} has no candles", data.date);
    };

    let depth = Arc::new(RecordedDepth::new(data.depth.clone()));
    let mut trader = SessionTrader::new(engine, depth)?;

    // Pre-session candles seed the engine; with none, the first candle does
    let split = data.session_start_index();
    let history_end = split.max(1).min(data.candles.len());
    trader.start(daily_open, volatility_fraction, data.session_start, &data.candles[..history_end])?;

    info!(
        "[{}] Replaying {} {} candles (open={:.2} vol={:.4})",
        data.date,
        data.candles.len() - split,
        data.symbol,
        daily_open,
        volatility_fraction
    );

    let mut signals = Vec::new();
    for i in split..data.candles.len() {
        let candle = &data.candles[i];
        if let Some(signal) = trader.on_tick(candle.close, candle.timestamp, &data.candles[..=i]).await {
            signals.push(signal);
        }
    }

    debug!("[{}] Replay finished: {:?}", data.date, trader.summary());
    Ok((signals, trader.summary().clone()))
}

//! Signal Orchestrator
//!
//! Owns the five analysis components and turns one tick into at most one
//! trade signal. Candidate levels are tried in hierarchy order:
//! 1. Confirmed opening-range breakout
//! 2. Touched zone boundaries (ascending)
//! 3. The nearest imbalance containing price
//!
//! The first candidate that clears the gate and the confidence floor wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::iter;
use tracing::{debug, info, warn};

use super::confirmation::{ConfirmationLayer, ConfirmationResult};
use super::gate::{calculate_confidence, targets, Candidate, LevelKind, SetupType, SignalGate, Tick};
use super::imbalance::{ImbalanceDetector, ImbalanceZone};
use super::opening_range::{OpeningRangeState, OpeningRangeTracker};
use super::profile::{NodeKind, ProfileClassifier, ProfileContext};
use super::zones::{Boundary, Quadrant, ZoneConfig, ZoneLevels, ZoneMap};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{Bias, Candle, DepthSnapshot, Direction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Max distance from the opening-range confirmation price (default: 0.1%)
    pub orb_proximity_pct: f64,
    /// Max distance from any other level (default: 0.2%)
    pub level_proximity_pct: f64,
    /// Break-and-hold / wick tolerance around the level (default: 0.1%)
    pub trigger_hold_pct: f64,
    /// Signals below this confidence are discarded (default: 0.4)
    pub min_signal_confidence: f64,
    /// Take-profit distance when no boundary is available (default: 1%)
    pub take_profit_fallback_pct: f64,
    /// Stop-loss distance when no boundary is available (default: 0.5%)
    pub stop_loss_fallback_pct: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orb_proximity_pct: 0.001,
            level_proximity_pct: 0.002,
            trigger_hold_pct: 0.001,
            min_signal_confidence: 0.4,
            take_profit_fallback_pct: 0.01,
            stop_loss_fallback_pct: 0.005,
        }
    }
}

/// Zone-map view at signal time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneContext {
    pub quadrant: Option<Quadrant>,
    pub nearest_boundary: Option<Boundary>,
    pub levels: Option<ZoneLevels>,
}

/// Everything the gate saw when it let a signal through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalContext {
    pub session_bias: Bias,
    pub level: f64,
    pub level_kind: LevelKind,
    pub profile: ProfileContext,
    pub confirmation: ConfirmationResult,
    pub zone: ZoneContext,
    pub nearest_imbalance: Option<ImbalanceZone>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub setup: SetupType,
    pub side: Direction,
    pub entry: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub context: SignalContext,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    zone_config: ZoneConfig,
    opening_range: OpeningRangeTracker,
    zones: ZoneMap,
    profile: ProfileClassifier,
    confirmation: ConfirmationLayer,
    imbalance: ImbalanceDetector,
    session_bias: Bias,
    last_signal: Option<TradeSignal>,
    initialized: bool,
}

impl Orchestrator {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config: config.orchestrator.clone(),
            zone_config: config.zones.clone(),
            opening_range: OpeningRangeTracker::new(config.opening_range.clone()),
            zones: ZoneMap::new(),
            profile: ProfileClassifier::new(config.profile.clone()),
            confirmation: ConfirmationLayer::new(config.confirmation.clone()),
            imbalance: ImbalanceDetector::new(config.imbalance.clone()),
            session_bias: Bias::Neutral,
            last_signal: None,
            initialized: false,
        })
    }

    /// Start a session. Zones come from the open and the expected daily move,
    /// the profile is built across the full zone span.
    pub fn initialize(
        &mut self,
        daily_open: f64,
        volatility_fraction: f64,
        session_start: DateTime<Utc>,
        candles: &[Candle],
    ) -> EngineResult<()> {
        self.initialized = false;
        if candles.is_empty() {
            return Err(EngineError::EmptyHistory);
        }

        let levels = self.zones.initialize(daily_open, volatility_fraction)?;
        self.opening_range.initialize(session_start, candles);
        self.profile.build(candles, Some((levels.lower_range, levels.upper_range)))?;
        let imbalances = self.imbalance.detect(candles).len();
        self.confirmation.update_candles(candles);
        self.session_bias = Bias::Neutral;
        self.last_signal = None;
        self.initialized = true;

        info!(
            "Session initialized: open={:.2} vol={:.4} start={} candles={} imbalances={}",
            daily_open,
            volatility_fraction,
            session_start,
            candles.len(),
            imbalances
        );
        Ok(())
    }

    /// Install the latest order-book snapshot (or its absence)
    pub fn update_depth(&mut self, snapshot: Option<DepthSnapshot>) {
        self.confirmation.update_snapshot(snapshot);
    }

    /// Evaluate one tick. Returns a signal only if a candidate cleared every
    /// gate rule and the confidence floor.
    pub fn evaluate(
        &mut self,
        price: f64,
        timestamp: DateTime<Utc>,
        candles: &[Candle],
        vwap: Option<f64>,
    ) -> Option<TradeSignal> {
        if !self.initialized {
            debug!("Evaluate called before initialize");
            return None;
        }
        if !price.is_finite() || candles.is_empty() {
            warn!("Rejected tick: price={} candles={}", price, candles.len());
            return None;
        }

        self.confirmation.update_candles(candles);
        self.opening_range.update(price, timestamp, candles);

        let bias = self.resolve_bias(price, timestamp, vwap);
        if bias != self.session_bias {
            info!("Session bias {} -> {}", self.session_bias, bias);
            self.session_bias = bias;
        }

        self.imbalance.detect(candles);

        let tick = Tick {
            price,
            timestamp,
            candles,
        };

        let signal = iter::once_with(|| self.opening_range_candidate(&tick))
            .flatten()
            .chain(iter::once_with(|| self.zone_candidates(&tick, bias)).flatten())
            .chain(iter::once_with(|| self.imbalance_candidate(&tick, bias)).flatten())
            .find_map(|candidate| self.try_candidate(&candidate, &tick, bias));

        if let Some(signal) = &signal {
            info!(
                "SIGNAL {} {} @ {:.2} TP={:.2} SL={:.2} conf={:.2}",
                signal.setup, signal.side, signal.entry, signal.take_profit, signal.stop_loss, signal.confidence
            );
            self.last_signal = Some(signal.clone());
        }
        signal
    }

    pub fn session_bias(&self) -> Bias {
        self.session_bias
    }

    pub fn last_signal(&self) -> Option<&TradeSignal> {
        self.last_signal.as_ref()
    }

    pub fn opening_range(&self) -> Option<&OpeningRangeState> {
        self.opening_range.state()
    }

    pub fn zone_levels(&self) -> Option<&ZoneLevels> {
        self.zones.levels()
    }

    pub fn imbalances(&self) -> &[ImbalanceZone] {
        self.imbalance.zones()
    }

    pub fn profile(&self) -> &ProfileClassifier {
        &self.profile
    }

    /// Confirmed breakout wins, then VWAP; without either the bias holds
    fn resolve_bias(&self, price: f64, timestamp: DateTime<Utc>, vwap: Option<f64>) -> Bias {
        let breakout = self.opening_range.session_bias(price, timestamp);
        if !breakout.is_neutral() {
            return breakout;
        }
        match vwap {
            Some(vwap) if vwap.is_finite() => {
                if price > vwap {
                    Bias::Long
                } else if price < vwap {
                    Bias::Short
                } else {
                    Bias::Neutral
                }
            }
            _ => self.session_bias,
        }
    }

    fn opening_range_candidate(&self, tick: &Tick<'_>) -> Option<Candidate> {
        let breakout = self.opening_range.breakout(tick.price, tick.timestamp)?;
        if !breakout.confirmed {
            return None;
        }
        let buffer = self.opening_range.config().breakout_confirmation_pct;
        Some(Candidate {
            setup: SetupType::OpeningRangeBreakout,
            side: breakout.direction,
            level: breakout.level,
            proximity_anchor: breakout.level * (1.0 + breakout.direction.sign() * buffer),
            level_kind: LevelKind::OpeningRange,
            extreme_override: false,
            imbalance: None,
        })
    }

    fn zone_candidates(&self, tick: &Tick<'_>, bias: Bias) -> Vec<Candidate> {
        self.zones
            .touched_boundaries(tick.price, self.zone_config.boundary_touch_pct)
            .into_iter()
            .filter_map(|(boundary, level)| {
                // Range extremes always fade back toward the open
                if boundary.is_extreme() {
                    let side = match boundary {
                        Boundary::UpperRange => Direction::Short,
                        _ => Direction::Long,
                    };
                    return Some(Candidate {
                        setup: SetupType::ZoneRejection,
                        side,
                        level,
                        proximity_anchor: level,
                        level_kind: LevelKind::Zone(boundary),
                        extreme_override: true,
                        imbalance: None,
                    });
                }

                let side = if tick.price > level {
                    Direction::Long
                } else if tick.price < level {
                    Direction::Short
                } else {
                    bias.direction()?
                };
                let setup = match self.profile.context_at(level).kind {
                    NodeKind::Hvn => SetupType::ZoneRejection,
                    NodeKind::Lvn => SetupType::ZoneBreakout,
                    NodeKind::Neutral if bias.agrees_with(side) => SetupType::ZoneBreakout,
                    NodeKind::Neutral => SetupType::ZoneRejection,
                };
                Some(Candidate {
                    setup,
                    side,
                    level,
                    proximity_anchor: level,
                    level_kind: LevelKind::Zone(boundary),
                    extreme_override: false,
                    imbalance: None,
                })
            })
            .collect()
    }

    fn imbalance_candidate(&self, tick: &Tick<'_>, bias: Bias) -> Option<Candidate> {
        let zone = self.imbalance.nearest_containing(tick.price)?;
        let side = zone.direction.trade_direction();

        // Price is inside now; any recent close outside means it just came back in
        let crossed_in = tick.candles.iter().rev().take(2).any(|c| !zone.contains(c.close));
        let setup = if crossed_in {
            SetupType::ImbalanceRetest
        } else if bias.agrees_with(side) {
            SetupType::ImbalanceContinuation
        } else {
            return None;
        };

        Some(Candidate {
            setup,
            side,
            level: zone.midpoint,
            proximity_anchor: zone.midpoint,
            level_kind: LevelKind::Imbalance,
            extreme_override: false,
            imbalance: Some(zone.clone()),
        })
    }

    fn try_candidate(&self, candidate: &Candidate, tick: &Tick<'_>, bias: Bias) -> Option<TradeSignal> {
        let gate = SignalGate {
            config: &self.config,
            profile: &self.profile,
            confirmation: &self.confirmation,
        };
        let pass = match gate.validate(candidate, tick, bias) {
            Ok(pass) => pass,
            Err(rule) => {
                debug!(
                    "{} {} at {:.2} ({}) vetoed: {}",
                    candidate.setup, candidate.side, candidate.level, candidate.level_kind, rule
                );
                return None;
            }
        };

        let respects_hierarchy = match self.opening_range.breakout(tick.price, tick.timestamp) {
            Some(breakout) if breakout.confirmed => breakout.direction == candidate.side,
            _ => true,
        };
        let confidence = calculate_confidence(
            pass.confirmation.confidence,
            &pass.profile,
            bias,
            respects_hierarchy,
            candidate.setup,
        );
        if confidence < self.config.min_signal_confidence {
            debug!(
                "{} {} at {:.2} below confidence floor ({:.2} < {:.2})",
                candidate.setup, candidate.side, candidate.level, confidence, self.config.min_signal_confidence
            );
            return None;
        }

        let boundaries = self.zones.levels().map(ZoneLevels::boundaries);
        let (take_profit, stop_loss) = targets(
            tick.price,
            candidate.side,
            boundaries.as_ref(),
            self.zone_config.boundary_touch_pct,
            candidate.imbalance.as_ref(),
            &self.config,
        );

        let zone = ZoneContext {
            quadrant: self.zones.current_zone(tick.price),
            nearest_boundary: self.zones.nearest_boundary(tick.price).map(|(b, _)| b),
            levels: self.zones.levels().copied(),
        };
        let reason = format!(
            "{} {} at {:.2} ({}): bias={}, profile={} ({:.2}), confirmation={} ({:.2}{})",
            candidate.setup,
            candidate.side,
            candidate.level,
            candidate.level_kind,
            bias,
            pass.profile.kind,
            pass.profile.confidence,
            pass.confirmation.bias,
            pass.confirmation.confidence,
            if pass.confirmation.flags.fallback { ", candles" } else { "" }
        );

        Some(TradeSignal {
            setup: candidate.setup,
            side: candidate.side,
            entry: tick.price,
            take_profit,
            stop_loss,
            confidence,
            timestamp: tick.timestamp,
            context: SignalContext {
                session_bias: bias,
                level: candidate.level,
                level_kind: candidate.level_kind,
                profile: pass.profile,
                confirmation: pass.confirmation,
                zone,
                nearest_imbalance: self.imbalance.nearest(tick.price).cloned(),
                reason,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::gate::GateRule;
    use crate::trading_core::imbalance::ZoneSource;
    use crate::trading_core::opening_range::{OpeningRangeConfig, RangeState};
    use crate::trading_core::profile::ProfileConfig;
    use crate::types::test_support::{candle, ts};
    use crate::types::BookLevel;

    /// Five-minute opening window, profile proximity too tight to reach nodes off the level
    fn test_config() -> EngineConfig {
        EngineConfig {
            opening_range: OpeningRangeConfig {
                window_minutes: 5,
                ..Default::default()
            },
            profile: ProfileConfig {
                proximity_threshold_pct: 1e-6,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn opening_candles() -> Vec<Candle> {
        vec![
            candle(0, 100.0, 100.3, 99.8, 100.25, 50.0),
            candle(60, 100.2, 100.5, 100.1, 100.4, 50.0),
            candle(120, 100.4, 100.45, 99.9, 100.0, 50.0),
            candle(180, 100.0, 100.3, 99.9, 100.25, 50.0),
            candle(240, 100.2, 100.4, 100.1, 100.3, 50.0),
        ]
    }

    fn book(secs: i64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> DepthSnapshot {
        let levels = |side: &[(f64, f64)]| {
            side.iter()
                .map(|&(price, size)| BookLevel { price, size })
                .collect::<Vec<_>>()
        };
        DepthSnapshot {
            timestamp: ts(secs),
            bids: levels(bids),
            asks: levels(asks),
        }
    }

    fn orb_session() -> (Orchestrator, Vec<Candle>) {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let mut candles = opening_candles();
        orchestrator.initialize(100.0, 0.02, ts(0), &candles).unwrap();

        candles.push(candle(300, 100.3, 100.62, 100.28, 100.6, 80.0));
        let first = orchestrator.evaluate(100.6, ts(300), &candles, None);
        assert!(first.is_none());
        assert_eq!(orchestrator.opening_range().unwrap().state, RangeState::BrokenUp);
        assert_eq!(orchestrator.session_bias(), Bias::Neutral);

        candles.push(candle(360, 100.6, 100.7, 100.56, 100.66, 80.0));
        orchestrator.update_depth(Some(book(360, &[(100.48, 1_000.0)], &[(101.5, 10.0)])));
        (orchestrator, candles)
    }

    #[test]
    fn test_initialize_requires_candles() {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let err = orchestrator.initialize(100.0, 0.02, ts(0), &[]).unwrap_err();
        assert_eq!(err, EngineError::EmptyHistory);
        assert!(orchestrator.evaluate(100.0, ts(10), &opening_candles(), None).is_none());
    }

    #[test]
    fn test_invalid_zone_inputs_are_fatal() {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let result = orchestrator.initialize(100.0, 0.0, ts(0), &opening_candles());
        assert!(matches!(result, Err(EngineError::InvalidZoneInputs { .. })));
    }

    #[test]
    fn test_bad_ticks_produce_nothing() {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let candles = opening_candles();
        orchestrator.initialize(100.0, 0.02, ts(0), &candles).unwrap();
        assert!(orchestrator.evaluate(f64::NAN, ts(60), &candles, None).is_none());
        assert!(orchestrator.evaluate(f64::INFINITY, ts(60), &candles, None).is_none());
        assert!(orchestrator.evaluate(100.0, ts(60), &[], None).is_none());
    }

    #[test]
    fn test_vwap_bias_and_hold() {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let candles = opening_candles();
        orchestrator.initialize(100.0, 0.02, ts(0), &candles).unwrap();
        assert_eq!(orchestrator.session_bias(), Bias::Neutral);

        orchestrator.evaluate(100.3, ts(250), &candles, Some(100.1));
        assert_eq!(orchestrator.session_bias(), Bias::Long);

        // No VWAP and no breakout: unchanged
        orchestrator.evaluate(100.3, ts(260), &candles, None);
        assert_eq!(orchestrator.session_bias(), Bias::Long);

        orchestrator.evaluate(100.0, ts(270), &candles, Some(100.1));
        assert_eq!(orchestrator.session_bias(), Bias::Short);

        orchestrator.evaluate(100.1, ts(280), &candles, Some(100.1));
        assert_eq!(orchestrator.session_bias(), Bias::Neutral);
    }

    #[test]
    fn test_opening_range_breakout_signal() {
        let (mut orchestrator, candles) = orb_session();
        let signal = orchestrator.evaluate(100.66, ts(360), &candles, None).unwrap();

        assert_eq!(orchestrator.session_bias(), Bias::Long);
        assert_eq!(signal.setup, SetupType::OpeningRangeBreakout);
        assert_eq!(signal.side, Direction::Long);
        assert_eq!(signal.entry, 100.66);
        assert_eq!(signal.take_profit, 101.0);
        assert_eq!(signal.stop_loss, 100.0);
        assert_eq!(signal.confidence, 1.0);
        assert_eq!(signal.context.level, 100.5);
        assert_eq!(signal.context.level_kind, LevelKind::OpeningRange);
        assert_eq!(signal.context.confirmation.bias, Bias::Long);
        assert_eq!(signal.context.zone.quadrant, Some(Quadrant::UpperInner));
        assert_eq!(orchestrator.last_signal(), Some(&signal));
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let (mut orchestrator, candles) = orb_session();
        let first = orchestrator.evaluate(100.66, ts(360), &candles, None);
        let second = orchestrator.evaluate(100.66, ts(360), &candles, None);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_unconfirmed_breakout_waits() {
        let (mut orchestrator, candles) = orb_session();
        // Hold not yet satisfied at t+20s
        assert!(orchestrator.evaluate(100.66, ts(320), &candles, None).is_none());
        assert_eq!(orchestrator.session_bias(), Bias::Neutral);
    }

    #[test]
    fn test_breakout_without_book_support_is_vetoed() {
        let (mut orchestrator, candles) = orb_session();
        // Offers stacked right above the level, nothing on the bid
        orchestrator.update_depth(Some(book(361, &[], &[(100.52, 1_000.0)])));
        assert!(orchestrator.evaluate(100.66, ts(360), &candles, None).is_none());
        assert!(orchestrator.last_signal().is_none());
    }

    /// Price pressing into the upper range inside the opening window
    fn upper_range_session() -> (Orchestrator, Vec<Candle>) {
        let config = EngineConfig::default();
        let mut orchestrator = Orchestrator::new(&config).unwrap();
        let candles = vec![
            candle(0, 101.5, 101.7, 101.4, 101.6, 100.0),
            candle(60, 101.6, 101.9, 101.5, 101.8, 100.0),
            // Upper wick through 102, closes back below
            candle(120, 101.8, 102.05, 101.75, 101.85, 100.0),
            candle(180, 101.85, 101.9, 101.7, 101.75, 100.0),
        ];
        orchestrator.initialize(100.0, 0.02, ts(0), &candles).unwrap();
        (orchestrator, candles)
    }

    #[test]
    fn test_upper_range_forces_short_rejection() {
        let (mut orchestrator, candles) = upper_range_session();
        orchestrator.update_depth(Some(book(200, &[(101.7, 5.0)], &[(102.03, 1_000.0)])));

        let signal = orchestrator.evaluate(101.8, ts(200), &candles, Some(101.9)).unwrap();
        assert_eq!(signal.setup, SetupType::ZoneRejection);
        assert_eq!(signal.side, Direction::Short);
        assert_eq!(signal.context.level_kind, LevelKind::Zone(Boundary::UpperRange));
        assert_eq!(signal.take_profit, 101.0);
        assert!((signal.stop_loss - 101.8 * 1.005).abs() < 1e-9);
        assert!(signal.stop_loss > signal.entry && signal.take_profit < signal.entry);
        assert!(signal.confidence >= 0.4 && signal.confidence <= 1.0);
    }

    #[test]
    fn test_neutral_bias_vetoes_everything() {
        let (mut orchestrator, candles) = upper_range_session();
        orchestrator.update_depth(Some(book(200, &[], &[(102.03, 1_000.0)])));
        assert!(orchestrator.evaluate(101.8, ts(200), &candles, None).is_none());
        assert_eq!(orchestrator.session_bias(), Bias::Neutral);
    }

    #[test]
    fn test_tape_disagreement_vetoes_without_book() {
        let (mut orchestrator, candles) = upper_range_session();
        // Last three candles lean bullish, so the candle fallback cannot back a short
        assert!(orchestrator.evaluate(101.8, ts(200), &candles, Some(101.9)).is_none());
        assert_eq!(orchestrator.session_bias(), Bias::Short);
    }

    #[test]
    fn test_confirmed_breakout_holds_bias_on_retest() {
        let (mut orchestrator, mut candles) = orb_session();
        assert!(orchestrator.evaluate(100.66, ts(360), &candles, None).is_some());
        assert_eq!(orchestrator.opening_range().unwrap().confirmed_at, Some(ts(360)));

        // Back inside the confirmation buffer with VWAP overhead
        candles.push(candle(420, 100.66, 100.68, 100.52, 100.55, 80.0));
        orchestrator.evaluate(100.55, ts(420), &candles, Some(100.6));
        assert_eq!(orchestrator.session_bias(), Bias::Long);
        assert_eq!(orchestrator.opening_range().unwrap().state, RangeState::BrokenUp);
        assert_eq!(orchestrator.opening_range().unwrap().confirmed_at, Some(ts(360)));
    }

    #[test]
    fn test_breakout_outranks_touched_boundary() {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let mut candles = vec![
            candle(0, 100.5, 100.7, 100.4, 100.6, 50.0),
            candle(60, 100.6, 100.95, 100.55, 100.8, 50.0),
            candle(120, 100.8, 100.85, 100.6, 100.7, 50.0),
            candle(180, 100.7, 100.88, 100.65, 100.8, 50.0),
            candle(240, 100.8, 100.85, 100.7, 100.82, 50.0),
        ];
        orchestrator.initialize(100.0, 0.02, ts(0), &candles).unwrap();

        candles.push(candle(300, 100.82, 101.02, 100.8, 101.0, 50.0));
        assert!(orchestrator.evaluate(101.0, ts(300), &candles, None).is_none());

        // Bids under both the 100.95 opening high and Q1
        candles.push(candle(360, 101.0, 101.15, 100.96, 101.12, 50.0));
        orchestrator.update_depth(Some(book(360, &[(100.93, 1_000.0), (100.98, 1_000.0)], &[])));
        let signal = orchestrator.evaluate(101.12, ts(360), &candles, None).unwrap();

        assert_eq!(signal.setup, SetupType::OpeningRangeBreakout);
        assert_eq!(signal.context.level, 100.95);
        assert_eq!(signal.context.zone.nearest_boundary, Some(Boundary::Q1));
        assert!((signal.take_profit - 102.0).abs() < 1e-9);
        assert!((signal.stop_loss - 100.0).abs() < 1e-9);

        // Q1 would have produced its own signal on the same tick
        let tick = Tick {
            price: 101.12,
            timestamp: ts(360),
            candles: &candles,
        };
        let zone = orchestrator.zone_candidates(&tick, Bias::Long);
        assert_eq!(zone.len(), 1);
        assert_eq!(zone[0].setup, SetupType::ZoneBreakout);
        assert!(orchestrator.try_candidate(&zone[0], &tick, Bias::Long).is_some());
    }

    /// Overnight trade stacked at 101.04-101.20, thin at 100.80 and 101.20.
    /// Buckets are 0.08 wide from 98.0 under the default profile config.
    fn overnight_candles() -> Vec<Candle> {
        let buckets = [(100.80, 1), (100.88, 3), (100.96, 4), (101.04, 20), (101.12, 5), (101.20, 2)];
        let mut candles = Vec::new();
        let mut secs = -60 * 35;
        for (low, count) in buckets {
            for _ in 0..count {
                candles.push(candle(secs, low + 0.03, low + 0.07, low + 0.01, low + 0.05, 50.0));
                secs += 60;
            }
        }
        candles
    }

    fn overnight_session() -> Orchestrator {
        let mut orchestrator = Orchestrator::new(&EngineConfig::default()).unwrap();
        orchestrator.initialize(100.0, 0.02, ts(0), &overnight_candles()).unwrap();
        orchestrator
    }

    /// Dip to Q1 that wicks under 101.0 and closes back above
    fn q1_retest_candles() -> Vec<Candle> {
        let mut candles = overnight_candles();
        candles.push(candle(0, 101.25, 101.26, 101.10, 101.12, 50.0));
        candles.push(candle(60, 101.12, 101.14, 100.99, 101.10, 50.0));
        candles.push(candle(120, 101.10, 101.18, 101.08, 101.16, 50.0));
        candles
    }

    #[test]
    fn test_hvn_boundary_rejection() {
        let mut orchestrator = overnight_session();
        assert!(orchestrator.profile().hvns().any(|n| (n.price - 101.08).abs() < 1e-9));

        let candles = q1_retest_candles();
        orchestrator.update_depth(Some(book(150, &[(100.98, 1_000.0)], &[])));
        let signal = orchestrator.evaluate(101.16, ts(150), &candles, Some(101.0)).unwrap();

        assert_eq!(signal.setup, SetupType::ZoneRejection);
        assert_eq!(signal.side, Direction::Long);
        assert_eq!(signal.context.level_kind, LevelKind::Zone(Boundary::Q1));
        assert_eq!(signal.context.profile.kind, NodeKind::Hvn);
        assert!(signal.context.profile.confidence > 0.8);
        assert_eq!(signal.confidence, 1.0);
        assert!((signal.take_profit - 102.0).abs() < 1e-9);
        assert!((signal.stop_loss - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_hvn_vetoes_rejection_below_node() {
        let mut orchestrator = overnight_session();
        let candles = q1_retest_candles();
        orchestrator.update_depth(Some(book(150, &[(100.98, 1_000.0)], &[])));

        // Above Q1 but still under the 101.08 node
        assert!(orchestrator.evaluate(101.05, ts(150), &candles, Some(101.0)).is_none());
        assert_eq!(orchestrator.session_bias(), Bias::Long);

        let tick = Tick {
            price: 101.05,
            timestamp: ts(150),
            candles: &candles,
        };
        let candidates = orchestrator.zone_candidates(&tick, Bias::Long);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].setup, SetupType::ZoneRejection);

        let gate = SignalGate {
            config: &orchestrator.config,
            profile: &orchestrator.profile,
            confirmation: &orchestrator.confirmation,
        };
        assert_eq!(
            gate.validate(&candidates[0], &tick, Bias::Long).unwrap_err(),
            GateRule::ProfilePlausibility
        );
    }

    #[test]
    fn test_lvn_boundary_breakout() {
        let mut orchestrator = overnight_session();
        let mut candles = overnight_candles();
        candles.push(candle(0, 101.25, 101.26, 100.8, 100.85, 50.0));
        candles.push(candle(60, 100.85, 100.9, 100.35, 100.4, 50.0));
        candles.push(candle(120, 100.4, 100.45, 100.0, 100.05, 50.0));
        candles.push(candle(180, 100.05, 100.08, 99.8, 99.85, 50.0));

        // Nothing traded around the open, offers sitting just above it
        orchestrator.update_depth(Some(book(240, &[], &[(100.02, 1_000.0)])));
        let signal = orchestrator.evaluate(99.85, ts(240), &candles, Some(100.2)).unwrap();

        assert_eq!(signal.setup, SetupType::ZoneBreakout);
        assert_eq!(signal.side, Direction::Short);
        assert_eq!(signal.context.level_kind, LevelKind::Zone(Boundary::DailyOpen));
        assert_eq!(signal.context.profile.kind, NodeKind::Lvn);
        assert_eq!(signal.confidence, 1.0);
        assert!((signal.take_profit - 99.0).abs() < 1e-9);
        assert!((signal.stop_loss - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_imbalance_retest_uses_gap_edges() {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let mut candles = vec![
            candle(-180, 100.1, 100.2, 100.05, 100.15, 50.0),
            candle(-120, 100.15, 100.2, 100.1, 100.18, 50.0),
            candle(-60, 100.18, 100.65, 100.15, 100.6, 50.0),
        ];
        orchestrator.initialize(100.0, 0.02, ts(0), &candles).unwrap();

        // Gap 100.20-100.45 left behind the impulse, then a drift back down
        candles.push(candle(0, 100.6, 100.75, 100.45, 100.7, 50.0));
        candles.push(candle(60, 100.7, 100.72, 100.48, 100.5, 50.0));
        candles.push(candle(120, 100.5, 100.58, 100.46, 100.55, 50.0));
        candles.push(candle(180, 100.55, 100.64, 100.52, 100.6, 50.0));
        orchestrator.update_depth(Some(book(200, &[(100.3, 1_000.0)], &[])));

        let signal = orchestrator.evaluate(100.4, ts(200), &candles, Some(100.3)).unwrap();
        assert_eq!(signal.setup, SetupType::ImbalanceRetest);
        assert_eq!(signal.side, Direction::Long);
        assert_eq!(signal.context.level_kind, LevelKind::Imbalance);
        assert!((signal.context.level - 100.325).abs() < 1e-9);
        assert_eq!(signal.take_profit, 100.45);
        assert_eq!(signal.stop_loss, 100.2);
        assert_eq!(signal.confidence, 1.0);

        let zone = signal.context.nearest_imbalance.unwrap();
        assert_eq!(zone.source, ZoneSource::FairValueGap);
        assert_eq!((zone.lower, zone.upper), (100.2, 100.45));
    }

    #[test]
    fn test_imbalance_continuation_short() {
        let mut orchestrator = Orchestrator::new(&test_config()).unwrap();
        let mut candles = vec![
            candle(-240, 100.85, 100.9, 100.75, 100.78, 50.0),
            candle(-180, 100.78, 100.8, 100.25, 100.3, 50.0),
            candle(-120, 100.3, 100.3, 100.1, 100.15, 50.0),
            candle(-60, 100.15, 100.4, 100.1, 100.2, 50.0),
        ];
        orchestrator.initialize(100.0, 0.02, ts(0), &candles).unwrap();

        // Bounce back into the 100.30-100.75 gap, then sellers inside it
        candles.push(candle(0, 100.2, 100.55, 100.18, 100.5, 50.0));
        candles.push(candle(60, 100.5, 100.7, 100.38, 100.65, 50.0));
        candles.push(candle(120, 100.65, 100.68, 100.5, 100.55, 50.0));
        candles.push(candle(180, 100.55, 100.58, 100.4, 100.45, 50.0));
        orchestrator.update_depth(Some(book(200, &[], &[(100.55, 1_000.0)])));

        let signal = orchestrator.evaluate(100.42, ts(200), &candles, Some(100.6)).unwrap();
        assert_eq!(signal.setup, SetupType::ImbalanceContinuation);
        assert_eq!(signal.side, Direction::Short);
        assert_eq!(signal.take_profit, 100.3);
        assert_eq!(signal.stop_loss, 100.75);
        assert_eq!(orchestrator.imbalances().len(), 1);

        // Without the bearish bias a continuation has nothing to follow
        assert!(orchestrator.evaluate(100.42, ts(200), &candles, Some(100.3)).is_none());
    }
}

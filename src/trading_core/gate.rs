//! Five-rule validation gate
//!
//! Every candidate level runs the same checks in order; the first failing
//! rule vetoes the candidate:
//! 1. Level proximity
//! 2. Bias alignment
//! 3. Profile plausibility
//! 4. Order-book / tape confirmation
//! 5. Clean trigger on the recent candles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::confirmation::{ConfirmationLayer, ConfirmationResult};
use super::imbalance::ImbalanceZone;
use super::orchestrator::OrchestratorConfig;
use super::profile::{NodeKind, ProfileClassifier, ProfileContext};
use super::zones::Boundary;
use crate::types::{pct_distance, Bias, Candle, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupType {
    OpeningRangeBreakout,
    ZoneRejection,
    ZoneBreakout,
    ImbalanceRetest,
    ImbalanceContinuation,
}

impl SetupType {
    /// Fades a level rather than trading through it
    pub fn is_reversal(self) -> bool {
        matches!(self, SetupType::ZoneRejection | SetupType::ImbalanceRetest)
    }

    pub fn is_breakout(self) -> bool {
        !self.is_reversal()
    }

    pub fn is_imbalance(self) -> bool {
        matches!(self, SetupType::ImbalanceRetest | SetupType::ImbalanceContinuation)
    }
}

impl std::fmt::Display for SetupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupType::OpeningRangeBreakout => write!(f, "ORB breakout"),
            SetupType::ZoneRejection => write!(f, "Zone rejection"),
            SetupType::ZoneBreakout => write!(f, "Zone breakout"),
            SetupType::ImbalanceRetest => write!(f, "Imbalance retest"),
            SetupType::ImbalanceContinuation => write!(f, "Imbalance continuation"),
        }
    }
}

/// Where a candidate level came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    OpeningRange,
    Zone(Boundary),
    Imbalance,
}

impl std::fmt::Display for LevelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelKind::OpeningRange => write!(f, "opening range"),
            LevelKind::Zone(b) => write!(f, "zone {}", b),
            LevelKind::Imbalance => write!(f, "imbalance"),
        }
    }
}

/// A level the hierarchy wants to trade, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub setup: SetupType,
    pub side: Direction,
    pub level: f64,
    /// Price the proximity rule measures against. The opening-range
    /// candidate uses its confirmation price, everything else the level.
    pub proximity_anchor: f64,
    pub level_kind: LevelKind,
    /// Extreme-boundary reversals skip the profile plausibility rule
    pub extreme_override: bool,
    pub imbalance: Option<ImbalanceZone>,
}

/// Gate rule that vetoed a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateRule {
    LevelProximity,
    BiasAlignment,
    ProfilePlausibility,
    Confirmation,
    CleanTrigger,
}

impl std::fmt::Display for GateRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRule::LevelProximity => write!(f, "level proximity"),
            GateRule::BiasAlignment => write!(f, "bias alignment"),
            GateRule::ProfilePlausibility => write!(f, "profile plausibility"),
            GateRule::Confirmation => write!(f, "confirmation"),
            GateRule::CleanTrigger => write!(f, "clean trigger"),
        }
    }
}

/// Evidence gathered while a candidate passed the gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatePass {
    pub profile: ProfileContext,
    pub confirmation: ConfirmationResult,
}

/// One tick's market view
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub candles: &'a [Candle],
}

pub struct SignalGate<'a> {
    pub config: &'a OrchestratorConfig,
    pub profile: &'a ProfileClassifier,
    pub confirmation: &'a ConfirmationLayer,
}

impl<'a> SignalGate<'a> {
    pub fn validate(&self, candidate: &Candidate, tick: &Tick<'_>, bias: Bias) -> Result<GatePass, GateRule> {
        // 1. Level proximity
        let max_distance = match candidate.level_kind {
            LevelKind::OpeningRange => self.config.orb_proximity_pct,
            _ => self.config.level_proximity_pct,
        };
        if pct_distance(tick.price, candidate.proximity_anchor) > max_distance {
            return Err(GateRule::LevelProximity);
        }

        // 2. Bias alignment - neutral never aligns
        if !bias.agrees_with(candidate.side) {
            return Err(GateRule::BiasAlignment);
        }

        // 3. Profile plausibility
        let profile = self.profile.context_at(candidate.level);
        if !candidate.extreme_override && !profile_plausible(candidate, &profile, tick.price) {
            return Err(GateRule::ProfilePlausibility);
        }

        // 4. Confirmation
        let confirmation = self.confirmation.confirm(candidate.level, tick.price, candidate.side);
        if !self.confirmation.confirms(&confirmation, candidate.side) {
            return Err(GateRule::Confirmation);
        }

        // 5. Clean trigger
        let clean = if candidate.setup.is_imbalance() {
            momentum_trigger(tick.candles, candidate.side)
        } else if candidate.setup.is_reversal() {
            rejection_trigger(tick.candles, candidate.level, candidate.side, self.config.trigger_hold_pct)
        } else {
            break_and_hold(tick.candles, candidate.level, candidate.side, self.config.trigger_hold_pct)
        };
        if !clean {
            return Err(GateRule::CleanTrigger);
        }

        Ok(GatePass { profile, confirmation })
    }
}

/// HVN only admits reversals, LVN only breakouts; either way price must sit
/// on the side of the node the trade is leaving from
fn profile_plausible(candidate: &Candidate, profile: &ProfileContext, price: f64) -> bool {
    let Some(node) = profile.node_price else {
        return true;
    };
    let positioned = match candidate.side {
        Direction::Long => price >= node,
        Direction::Short => price <= node,
    };
    match profile.kind {
        NodeKind::Hvn => candidate.setup.is_reversal() && positioned,
        NodeKind::Lvn => candidate.setup.is_breakout() && positioned,
        NodeKind::Neutral => true,
    }
}

/// Last close beyond the level by `hold_pct`, and the candle never fell
/// back through the level by more than `hold_pct`
pub fn break_and_hold(candles: &[Candle], level: f64, side: Direction, hold_pct: f64) -> bool {
    let Some(last) = candles.last() else {
        return false;
    };
    match side {
        Direction::Long => last.close >= level * (1.0 + hold_pct) && last.low >= level * (1.0 - hold_pct),
        Direction::Short => last.close <= level * (1.0 - hold_pct) && last.high <= level * (1.0 + hold_pct),
    }
}

/// A wick into the level that closed back on the trade side, followed by a
/// close further in the trade direction
pub fn rejection_trigger(candles: &[Candle], level: f64, side: Direction, hold_pct: f64) -> bool {
    if candles.len() < 2 {
        return false;
    }
    let last = &candles[candles.len() - 1];
    let start = candles.len().saturating_sub(4);
    let prior = &candles[start..candles.len() - 1];

    prior.iter().any(|wick| {
        let body = (wick.close - wick.open).abs();
        match side {
            Direction::Long => {
                let lower_wick = wick.open.min(wick.close) - wick.low;
                wick.low <= level * (1.0 + hold_pct)
                    && wick.close > level
                    && lower_wick > 0.0
                    && lower_wick >= body
                    && last.close > wick.close
            }
            Direction::Short => {
                let upper_wick = wick.high - wick.open.max(wick.close);
                wick.high >= level * (1.0 - hold_pct)
                    && wick.close < level
                    && upper_wick > 0.0
                    && upper_wick >= body
                    && last.close < wick.close
            }
        }
    })
}

/// At least 2 of the last 3 close-to-close moves go the trade's way
pub fn momentum_trigger(candles: &[Candle], side: Direction) -> bool {
    if candles.len() < 4 {
        return false;
    }
    let tail = &candles[candles.len() - 4..];
    let agreeing = tail
        .windows(2)
        .filter(|w| (w[1].close - w[0].close) * side.sign() > 0.0)
        .count();
    agreeing >= 2
}

/// 0.5 base, plus confirmation, profile, bias and opening-range components,
/// clamped to [0, 1]
pub fn calculate_confidence(
    confirmation_confidence: f64,
    profile: &ProfileContext,
    bias: Bias,
    respects_hierarchy: bool,
    setup: SetupType,
) -> f64 {
    let mut confidence = 0.5 + 0.4 * confirmation_confidence.clamp(0.0, 1.0);
    if profile.kind != NodeKind::Neutral {
        confidence += 0.3 * profile.confidence.clamp(0.0, 1.0);
    }
    if !bias.is_neutral() && respects_hierarchy {
        confidence += 0.2;
    }
    if setup == SetupType::OpeningRangeBreakout {
        confidence += 0.1;
    }
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

/// Take-profit and stop-loss for an entry.
///
/// At a boundary: one boundary step each way. Between boundaries: the
/// bracketing boundaries. Imbalance setups away from any boundary use the
/// zone edges. Missing steps fall back to fixed percentages.
pub fn targets(
    entry: f64,
    side: Direction,
    boundaries: Option<&[f64; 5]>,
    tolerance_pct: f64,
    imbalance: Option<&ImbalanceZone>,
    config: &OrchestratorConfig,
) -> (f64, f64) {
    let fallback_tp = entry * (1.0 + side.sign() * config.take_profit_fallback_pct);
    let fallback_sl = entry * (1.0 - side.sign() * config.stop_loss_fallback_pct);

    let at_boundary = boundaries.and_then(|b| {
        b.iter()
            .enumerate()
            .filter(|&(_, &level)| (entry - level).abs() <= level * tolerance_pct)
            .min_by(|&(_, &x), &(_, &y)| (entry - x).abs().total_cmp(&(entry - y).abs()))
            .map(|(idx, _)| idx)
    });

    if let (Some(sorted), Some(idx)) = (boundaries, at_boundary) {
        let up = sorted.get(idx + 1).copied();
        let down = idx.checked_sub(1).and_then(|i| sorted.get(i)).copied();
        return match side {
            Direction::Long => (up.unwrap_or(fallback_tp), down.unwrap_or(fallback_sl)),
            Direction::Short => (down.unwrap_or(fallback_tp), up.unwrap_or(fallback_sl)),
        };
    }

    if let Some(zone) = imbalance {
        let (tp, sl) = match side {
            Direction::Long => (zone.upper, zone.lower),
            Direction::Short => (zone.lower, zone.upper),
        };
        let tp = if (tp - entry) * side.sign() > 0.0 { tp } else { fallback_tp };
        let sl = if (entry - sl) * side.sign() > 0.0 { sl } else { fallback_sl };
        return (tp, sl);
    }

    let Some(sorted) = boundaries else {
        return (fallback_tp, fallback_sl);
    };
    let above = sorted.iter().copied().find(|&b| b > entry);
    let below = sorted.iter().rev().copied().find(|&b| b < entry);
    match side {
        Direction::Long => (above.unwrap_or(fallback_tp), below.unwrap_or(fallback_sl)),
        Direction::Short => (below.unwrap_or(fallback_tp), above.unwrap_or(fallback_sl)),
    }
}

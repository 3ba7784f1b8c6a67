//! Engine configuration
//!
//! Every component carries its own config with documented defaults. A JSON
//! file only needs the fields it overrides:
//!
//! ```json
//! { "opening_range": { "window_minutes": 30 }, "session": { "symbol": "ES" } }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::trading_core::confirmation::ConfirmationConfig;
use crate::trading_core::imbalance::ImbalanceConfig;
use crate::trading_core::opening_range::OpeningRangeConfig;
use crate::trading_core::orchestrator::OrchestratorConfig;
use crate::trading_core::profile::{bucket_count, ProfileConfig};
use crate::trading_core::trader::SessionConfig;
use crate::trading_core::volatility::VolatilityConfig;
use crate::trading_core::zones::ZoneConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub opening_range: OpeningRangeConfig,
    pub zones: ZoneConfig,
    pub profile: ProfileConfig,
    pub confirmation: ConfirmationConfig,
    pub imbalance: ImbalanceConfig,
    pub orchestrator: OrchestratorConfig,
    pub volatility: VolatilityConfig,
    pub session: SessionConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Reading config {}", path.display()))?;
        let config: EngineConfig =
            serde_json::from_str(&raw).with_context(|| format!("Parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let orb = &self.opening_range;
        require(orb.window_minutes > 0, "opening_range.window_minutes must be positive")?;
        require(orb.hold_duration_ms >= 0, "opening_range.hold_duration_ms must not be negative")?;
        non_negative(orb.breakout_confirmation_pct, "opening_range.breakout_confirmation_pct")?;

        positive(self.zones.boundary_touch_pct, "zones.boundary_touch_pct")?;

        let profile = &self.profile;
        if profile.bucket_size_pct > 1.0 {
            return Err(EngineError::EmptyProfile(profile.bucket_size_pct));
        }
        bucket_count(profile.bucket_size_pct)?;
        require(
            (0.0..=100.0).contains(&profile.lvn_percentile) && (0.0..=100.0).contains(&profile.hvn_percentile),
            "profile percentiles must be within [0, 100]",
        )?;
        require(
            profile.hvn_percentile > profile.lvn_percentile,
            "profile.hvn_percentile must be above profile.lvn_percentile",
        )?;
        positive(profile.proximity_threshold_pct, "profile.proximity_threshold_pct")?;

        let confirmation = &self.confirmation;
        positive(confirmation.wall_proximity_bps, "confirmation.wall_proximity_bps")?;
        positive(confirmation.min_wall_notional, "confirmation.min_wall_notional")?;
        positive(confirmation.volume_surge_multiplier, "confirmation.volume_surge_multiplier")?;
        unit(confirmation.min_confidence, "confirmation.min_confidence")?;
        unit(confirmation.fallback_min_confidence, "confirmation.fallback_min_confidence")?;
        unit(confirmation.fallback_max_confidence, "confirmation.fallback_max_confidence")?;
        require(
            confirmation.fallback_min_confidence <= confirmation.fallback_max_confidence,
            "confirmation fallback confidence range is inverted",
        )?;
        positive(confirmation.far_from_level_pct, "confirmation.far_from_level_pct")?;
        unit(confirmation.absorption_retention, "confirmation.absorption_retention")?;

        let imbalance = &self.imbalance;
        positive(imbalance.min_gap_size_pct, "imbalance.min_gap_size_pct")?;
        positive(imbalance.max_gap_size_pct, "imbalance.max_gap_size_pct")?;
        require(
            imbalance.min_gap_size_pct <= imbalance.max_gap_size_pct,
            "imbalance gap size range is inverted",
        )?;
        require(imbalance.min_candle_count > 0, "imbalance.min_candle_count must be positive")?;
        require(imbalance.max_zone_age_minutes > 0, "imbalance.max_zone_age_minutes must be positive")?;

        let orchestrator = &self.orchestrator;
        positive(orchestrator.orb_proximity_pct, "orchestrator.orb_proximity_pct")?;
        positive(orchestrator.level_proximity_pct, "orchestrator.level_proximity_pct")?;
        non_negative(orchestrator.trigger_hold_pct, "orchestrator.trigger_hold_pct")?;
        unit(orchestrator.min_signal_confidence, "orchestrator.min_signal_confidence")?;
        positive(orchestrator.take_profit_fallback_pct, "orchestrator.take_profit_fallback_pct")?;
        positive(orchestrator.stop_loss_fallback_pct, "orchestrator.stop_loss_fallback_pct")?;

        let volatility = &self.volatility;
        positive(volatility.min_fraction, "volatility.min_fraction")?;
        require(
            volatility.max_fraction.is_finite()
                && volatility.max_fraction >= volatility.min_fraction
                && volatility.max_fraction < 1.0,
            "volatility.max_fraction must be in [min_fraction, 1)",
        )?;
        positive(volatility.periods_per_day, "volatility.periods_per_day")?;

        require(self.session.depth_timeout_ms > 0, "session.depth_timeout_ms must be positive")?;
        Ok(())
    }
}

fn require(ok: bool, message: &str) -> EngineResult<()> {
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(message.to_string()))
    }
}

fn positive(value: f64, name: &str) -> EngineResult<()> {
    require(value.is_finite() && value > 0.0, &format!("{} must be positive, got {}", name, value))
}

fn non_negative(value: f64, name: &str) -> EngineResult<()> {
    require(value.is_finite() && value >= 0.0, &format!("{} must not be negative, got {}", name, value))
}

fn unit(value: f64, name: &str) -> EngineResult<()> {
    require((0.0..=1.0).contains(&value), &format!("{} must be within [0, 1], got {}", name, value))
}

//! Volatility Zone Map
//!
//! Splits the expected daily move around the session open into five ordered
//! boundaries and four quadrants:
//!
//! ```text
//! Q-2 (lower range) | Q-1 | daily open | Q1 | Q2 (upper range)
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// Named zone boundary, in ascending price order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Boundary {
    LowerRange,
    QMinus1,
    DailyOpen,
    Q1,
    UpperRange,
}

impl Boundary {
    pub const ALL: [Boundary; 5] = [
        Boundary::LowerRange,
        Boundary::QMinus1,
        Boundary::DailyOpen,
        Boundary::Q1,
        Boundary::UpperRange,
    ];

    /// Upper and lower range are the extremes of the expected daily move
    pub fn is_extreme(self) -> bool {
        matches!(self, Boundary::LowerRange | Boundary::UpperRange)
    }
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boundary::LowerRange => write!(f, "Q-2"),
            Boundary::QMinus1 => write!(f, "Q-1"),
            Boundary::DailyOpen => write!(f, "Open"),
            Boundary::Q1 => write!(f, "Q1"),
            Boundary::UpperRange => write!(f, "Q2"),
        }
    }
}

/// Price band between two adjacent boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quadrant {
    /// [Q-2, Q-1), also everything below the lower range
    LowerOuter,
    /// [Q-1, open)
    LowerInner,
    /// [open, Q1)
    UpperInner,
    /// [Q1, Q2], also everything above the upper range
    UpperOuter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneLevels {
    pub daily_open: f64,
    pub upper_range: f64,
    pub lower_range: f64,
    pub q1: f64,
    pub q2: f64,
    pub q_minus1: f64,
    pub q_minus2: f64,
    pub volatility_fraction: f64,
}

impl ZoneLevels {
    /// Compute boundaries from the session open and the expected daily move
    pub fn compute(daily_open: f64, volatility_fraction: f64) -> EngineResult<Self> {
        if !daily_open.is_finite()
            || daily_open <= 0.0
            || !volatility_fraction.is_finite()
            || volatility_fraction <= 0.0
            || volatility_fraction >= 1.0
        {
            return Err(EngineError::InvalidZoneInputs {
                daily_open,
                volatility_fraction,
            });
        }

        let upper_range = daily_open * (1.0 + volatility_fraction);
        let lower_range = daily_open * (1.0 - volatility_fraction);
        let levels = Self {
            daily_open,
            upper_range,
            lower_range,
            q1: (daily_open + upper_range) / 2.0,
            q2: upper_range,
            q_minus1: (daily_open + lower_range) / 2.0,
            q_minus2: lower_range,
            volatility_fraction,
        };

        let sorted = levels.boundaries();
        if sorted.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::BoundaryOrder(sorted));
        }

        Ok(levels)
    }

    /// The five boundaries sorted ascending
    pub fn boundaries(&self) -> [f64; 5] {
        [
            self.q_minus2,
            self.q_minus1,
            self.daily_open,
            self.q1,
            self.q2,
        ]
    }

    pub fn price_of(&self, boundary: Boundary) -> f64 {
        match boundary {
            Boundary::LowerRange => self.q_minus2,
            Boundary::QMinus1 => self.q_minus1,
            Boundary::DailyOpen => self.daily_open,
            Boundary::Q1 => self.q1,
            Boundary::UpperRange => self.q2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// A boundary counts as touched within this distance (default: 0.2%)
    pub boundary_touch_pct: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            boundary_touch_pct: 0.002,
        }
    }
}

/// Read-only zone map for one session
#[derive(Debug, Clone, Default)]
pub struct ZoneMap {
    levels: Option<ZoneLevels>,
}

impl ZoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, daily_open: f64, volatility_fraction: f64) -> EngineResult<ZoneLevels> {
        let levels = ZoneLevels::compute(daily_open, volatility_fraction)?;
        info!(
            "Zones: Q-2={:.2} Q-1={:.2} open={:.2} Q1={:.2} Q2={:.2} (vol={:.4})",
            levels.q_minus2, levels.q_minus1, levels.daily_open, levels.q1, levels.q2, volatility_fraction
        );
        self.levels = Some(levels);
        Ok(levels)
    }

    pub fn levels(&self) -> Option<&ZoneLevels> {
        self.levels.as_ref()
    }

    /// Quadrant containing `price`
    pub fn current_zone(&self, price: f64) -> Option<Quadrant> {
        let levels = self.levels.as_ref()?;
        let quadrant = if price < levels.q_minus1 {
            Quadrant::LowerOuter
        } else if price < levels.daily_open {
            Quadrant::LowerInner
        } else if price < levels.q1 {
            Quadrant::UpperInner
        } else {
            Quadrant::UpperOuter
        };
        Some(quadrant)
    }

    /// True iff `|price - boundary| <= boundary * tolerance_pct`
    pub fn boundary_touched(price: f64, boundary: f64, tolerance_pct: f64) -> bool {
        (price - boundary).abs() <= boundary * tolerance_pct
    }

    /// All boundaries touched by `price`, in ascending boundary order
    pub fn touched_boundaries(&self, price: f64, tolerance_pct: f64) -> Vec<(Boundary, f64)> {
        let Some(levels) = self.levels.as_ref() else {
            return Vec::new();
        };
        Boundary::ALL
            .iter()
            .map(|&b| (b, levels.price_of(b)))
            .filter(|&(_, level)| Self::boundary_touched(price, level, tolerance_pct))
            .collect()
    }

    /// Nearest boundary to `price` (linear scan over five levels)
    pub fn nearest_boundary(&self, price: f64) -> Option<(Boundary, f64)> {
        let levels = self.levels.as_ref()?;
        let mut best: Option<(Boundary, f64)> = None;
        for b in Boundary::ALL {
            let level = levels.price_of(b);
            match best {
                Some((_, p)) if (price - p).abs() <= (price - level).abs() => {}
                _ => best = Some((b, level)),
            }
        }
        best
    }
}

//! Volume Profile classifier
//!
//! Builds a volume-at-price histogram over a candle window and splits the
//! buckets into high-volume nodes (HVN, acceptance, expect rejection) and
//! low-volume nodes (LVN, thin liquidity, expect price to travel through).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::Candle;

/// Upper bound on buckets per profile
pub const MAX_BUCKETS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Bucket width as a fraction of the profiled range (default: 2%)
    pub bucket_size_pct: f64,
    /// Percentile at/above which a bucket is an HVN (default: 75)
    pub hvn_percentile: f64,
    /// Percentile at/below which a bucket is an LVN (default: 25)
    pub lvn_percentile: f64,
    /// Max distance from a level to a node, as a fraction of the level (default: 0.5%)
    pub proximity_threshold_pct: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            bucket_size_pct: 0.02,
            hvn_percentile: 75.0,
            lvn_percentile: 25.0,
            proximity_threshold_pct: 0.005,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Hvn,
    Lvn,
    Neutral,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Hvn => write!(f, "HVN"),
            NodeKind::Lvn => write!(f, "LVN"),
            NodeKind::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfileNode {
    /// Bucket center
    pub price: f64,
    pub volume: f64,
    /// Number of candles that traded through the bucket
    pub touches: u32,
    pub kind: NodeKind,
}

/// Profile classification around one price level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileContext {
    pub kind: NodeKind,
    pub node_price: Option<f64>,
    pub confidence: f64,
}

impl ProfileContext {
    pub fn neutral() -> Self {
        Self {
            kind: NodeKind::Neutral,
            node_price: None,
            confidence: 0.0,
        }
    }
}

pub struct ProfileClassifier {
    config: ProfileConfig,
    nodes: Vec<VolumeProfileNode>,
    hvn_threshold: f64,
    lvn_threshold: f64,
}

impl ProfileClassifier {
    pub fn new(config: ProfileConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            hvn_threshold: 0.0,
            lvn_threshold: 0.0,
        }
    }

    /// Rebuild the profile from scratch.
    ///
    /// `price_range` overrides the candle extremes; volume outside it is
    /// dropped except for zero-range candles, which snap to the nearest bucket.
    pub fn build(&mut self, candles: &[Candle], price_range: Option<(f64, f64)>) -> EngineResult<()> {
        let bucket_count = bucket_count(self.config.bucket_size_pct)?;
        self.nodes.clear();

        let usable: Vec<&Candle> = candles.iter().filter(|c| c.is_finite()).collect();
        let (min, max) = match price_range {
            Some((lo, hi)) if lo.is_finite() && hi.is_finite() && hi >= lo => (lo, hi),
            _ => {
                if usable.is_empty() {
                    return Ok(());
                }
                let lo = usable.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
                let hi = usable.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
                (lo, hi)
            }
        };

        let range = max - min;
        // A zero-width range collapses into one bucket
        let (bucket_count, width) = if range > 0.0 {
            (bucket_count, range * self.config.bucket_size_pct)
        } else {
            (1, 0.0)
        };

        let mut volumes = vec![0.0; bucket_count];
        let mut touches = vec![0u32; bucket_count];

        for candle in &usable {
            if candle.high <= candle.low || width == 0.0 {
                let idx = nearest_bucket(candle.close, min, width, bucket_count);
                volumes[idx] += candle.volume;
                touches[idx] += 1;
                continue;
            }

            let span = candle.high - candle.low;
            for idx in 0..bucket_count {
                let lower = min + idx as f64 * width;
                let upper = if idx + 1 == bucket_count { max } else { lower + width };
                let overlap = candle.high.min(upper) - candle.low.max(lower);
                if overlap > 0.0 {
                    volumes[idx] += candle.volume * overlap / span;
                    touches[idx] += 1;
                }
            }
        }

        // Thresholds come from buckets that traded; untraded buckets fall
        // below the LVN threshold on their own
        let traded: Vec<f64> = volumes.iter().copied().filter(|&v| v > 0.0).collect();
        self.hvn_threshold = percentile(&traded, self.config.hvn_percentile);
        self.lvn_threshold = percentile(&traded, self.config.lvn_percentile);
        // A flat profile has no structure to trade
        let degenerate = traded.is_empty() || self.hvn_threshold <= self.lvn_threshold;

        self.nodes = volumes
            .iter()
            .zip(touches.iter())
            .enumerate()
            .map(|(idx, (&volume, &touches))| {
                let kind = if degenerate {
                    NodeKind::Neutral
                } else if volume >= self.hvn_threshold {
                    NodeKind::Hvn
                } else if volume <= self.lvn_threshold {
                    NodeKind::Lvn
                } else {
                    NodeKind::Neutral
                };
                VolumeProfileNode {
                    price: min + (idx as f64 + 0.5) * width,
                    volume,
                    touches,
                    kind,
                }
            })
            .collect();

        debug!(
            "Profile built: {} buckets over [{:.2}, {:.2}], HVN>={:.2} LVN<={:.2}, {} HVN / {} LVN",
            self.nodes.len(),
            min,
            max,
            self.hvn_threshold,
            self.lvn_threshold,
            self.hvns().count(),
            self.lvns().count()
        );

        Ok(())
    }

    /// Classify `level` by the closest HVN/LVN within the proximity threshold
    pub fn context_at(&self, level: f64) -> ProfileContext {
        let proximity = level.abs() * self.config.proximity_threshold_pct;
        if proximity <= 0.0 {
            return ProfileContext::neutral();
        }

        let nearest = |kind: NodeKind| {
            self.nodes
                .iter()
                .filter(|n| n.kind == kind)
                .map(|n| (n.price, (n.price - level).abs()))
                .filter(|&(_, d)| d <= proximity)
                .min_by(|a, b| a.1.total_cmp(&b.1))
        };

        let chosen = match (nearest(NodeKind::Hvn), nearest(NodeKind::Lvn)) {
            (Some(h), Some(l)) => {
                if h.1 <= l.1 {
                    Some((NodeKind::Hvn, h))
                } else {
                    Some((NodeKind::Lvn, l))
                }
            }
            (Some(h), None) => Some((NodeKind::Hvn, h)),
            (None, Some(l)) => Some((NodeKind::Lvn, l)),
            (None, None) => None,
        };

        match chosen {
            Some((kind, (price, distance))) => ProfileContext {
                kind,
                node_price: Some(price),
                confidence: (1.0 - distance / proximity).clamp(0.0, 1.0),
            },
            None => ProfileContext::neutral(),
        }
    }

    pub fn nodes(&self) -> &[VolumeProfileNode] {
        &self.nodes
    }

    pub fn hvns(&self) -> impl Iterator<Item = &VolumeProfileNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Hvn)
    }

    pub fn lvns(&self) -> impl Iterator<Item = &VolumeProfileNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Lvn)
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.hvn_threshold, self.lvn_threshold)
    }
}

/// Bucket count for a bucket width, rejecting zero and runaway counts
pub(crate) fn bucket_count(bucket_size_pct: f64) -> EngineResult<usize> {
    if !bucket_size_pct.is_finite() || bucket_size_pct <= 0.0 {
        return Err(EngineError::EmptyProfile(bucket_size_pct));
    }
    let count = (1.0 / bucket_size_pct).ceil();
    if !(1.0..=MAX_BUCKETS as f64).contains(&count) {
        return Err(EngineError::EmptyProfile(bucket_size_pct));
    }
    Ok(count as usize)
}

fn nearest_bucket(price: f64, min: f64, width: f64, count: usize) -> usize {
    if width <= 0.0 {
        return 0;
    }
    let idx = ((price - min) / width).floor();
    if idx < 0.0 {
        0
    } else {
        (idx as usize).min(count - 1)
    }
}

/// Linear-interpolated percentile (`p` in 0..=100)
fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::candle;

    fn ten_bucket_classifier() -> ProfileClassifier {
        ProfileClassifier::new(ProfileConfig {
            bucket_size_pct: 0.1,
            proximity_threshold_pct: 0.01,
            ..Default::default()
        })
    }

    /// Heavy volume around 102-106, thin at both edges of 100-110
    fn shaped_candles() -> Vec<Candle> {
        vec![
            candle(0, 100.0, 110.0, 100.0, 105.0, 100.0),
            candle(60, 104.0, 105.0, 104.0, 104.5, 1_000.0),
            candle(120, 104.5, 106.0, 104.0, 105.0, 800.0),
            candle(180, 103.0, 104.0, 102.0, 103.5, 200.0),
            candle(240, 106.0, 108.0, 106.0, 107.0, 100.0),
        ]
    }

    #[test]
    fn test_percentile_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 75.0), 4.0);
        assert!((percentile(&[0.0, 10.0], 25.0) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_volume_is_conserved() {
        let mut profile = ten_bucket_classifier();
        let candles = shaped_candles();
        profile.build(&candles, None).unwrap();

        assert_eq!(profile.nodes().len(), 10);
        let total: f64 = profile.nodes().iter().map(|n| n.volume).sum();
        let expected: f64 = candles.iter().map(|c| c.volume).sum();
        assert!((total - expected).abs() < 1e-6);
    }

    #[test]
    fn test_zero_range_candle_credits_single_bucket() {
        let mut profile = ten_bucket_classifier();
        let candles = vec![
            candle(0, 100.0, 110.0, 100.0, 105.0, 10.0),
            candle(60, 102.5, 102.5, 102.5, 102.5, 500.0),
        ];
        profile.build(&candles, None).unwrap();
        // Bucket 2 spans [102, 103)
        let node = &profile.nodes()[2];
        assert!((node.volume - 501.0).abs() < 1e-9);
        assert_eq!(node.touches, 2);
    }

    #[test]
    fn test_hvn_and_lvn_classification() {
        let mut profile = ten_bucket_classifier();
        profile.build(&shaped_candles(), None).unwrap();

        let hvn_prices: Vec<f64> = profile.hvns().map(|n| n.price).collect();
        assert!(hvn_prices.contains(&104.5));
        assert!(profile.lvns().any(|n| n.price == 100.5));
        assert!(profile.lvns().all(|n| n.price < 104.0 || n.price > 106.0));
    }

    #[test]
    fn test_context_prefers_closer_node() {
        let mut profile = ten_bucket_classifier();
        profile.build(&shaped_candles(), None).unwrap();

        let ctx = profile.context_at(104.5);
        assert_eq!(ctx.kind, NodeKind::Hvn);
        assert!((ctx.confidence - 1.0).abs() < 1e-9);

        let ctx = profile.context_at(100.6);
        assert_eq!(ctx.kind, NodeKind::Lvn);
        assert!(ctx.confidence > 0.0 && ctx.confidence < 1.0);
    }

    #[test]
    fn test_context_neutral_out_of_range() {
        let mut profile = ten_bucket_classifier();
        profile.build(&shaped_candles(), None).unwrap();
        assert_eq!(profile.context_at(500.0), ProfileContext::neutral());
    }

    #[test]
    fn test_zero_bucket_configuration_is_fatal() {
        let mut profile = ProfileClassifier::new(ProfileConfig {
            bucket_size_pct: 0.0,
            ..Default::default()
        });
        assert_eq!(
            profile.build(&shaped_candles(), None),
            Err(EngineError::EmptyProfile(0.0))
        );
    }

    #[test]
    fn test_runaway_bucket_count_is_fatal() {
        let mut profile = ProfileClassifier::new(ProfileConfig {
            bucket_size_pct: 1e-20,
            ..Default::default()
        });
        assert_eq!(
            profile.build(&shaped_candles(), None),
            Err(EngineError::EmptyProfile(1e-20))
        );
        assert!(bucket_count(1e-5).is_err());
        assert!(bucket_count(0.001).is_ok());
    }

    #[test]
    fn test_wide_range_keeps_structure() {
        // An hour of trade over ~0.6% of price, profiled across a 4% zone span
        let mut candles = Vec::new();
        for i in 0..40 {
            candles.push(candle(i * 60, 100.1, 100.2, 100.0, 100.15, 500.0));
        }
        for i in 40..60 {
            candles.push(candle(i * 60, 100.3, 100.6, 100.2, 100.5, 100.0));
        }
        let mut profile = ProfileClassifier::new(ProfileConfig::default());
        profile.build(&candles, Some((98.0, 102.0))).unwrap();

        assert_eq!(profile.nodes().len(), 50);
        let (hvn, lvn) = profile.thresholds();
        assert!(hvn > lvn && lvn > 0.0);

        let heaviest = profile
            .nodes()
            .iter()
            .max_by(|a, b| a.volume.total_cmp(&b.volume))
            .unwrap();
        assert_eq!(heaviest.kind, NodeKind::Hvn);
        assert!(profile
            .nodes()
            .iter()
            .filter(|n| n.volume == 0.0)
            .all(|n| n.kind == NodeKind::Lvn));

        let ctx = profile.context_at(100.1);
        assert_eq!(ctx.kind, NodeKind::Hvn);
        assert!(ctx.confidence > 0.0);
        assert_eq!(profile.context_at(98.5).kind, NodeKind::Lvn);
    }

    #[test]
    fn test_flat_profile_is_neutral() {
        let mut profile = ten_bucket_classifier();
        let candles = vec![candle(0, 100.0, 110.0, 100.0, 105.0, 100.0)];
        profile.build(&candles, None).unwrap();
        assert!(profile.nodes().iter().all(|n| n.kind == NodeKind::Neutral));
    }
}

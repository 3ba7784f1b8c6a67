//! Order-book depth sources
//!
//! A missing snapshot is a normal condition and comes back as `Ok(None)`.
//! Errors are reserved for a source that failed outright.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::DepthSnapshot;

#[async_trait]
pub trait DepthProvider: Send + Sync {
    /// Latest snapshot as of `timestamp`
    async fn snapshot(&self, symbol: &str, timestamp: DateTime<Utc>) -> Result<Option<DepthSnapshot>>;
}

/// No order-book data at all; confirmation runs on candles only
pub struct NoDepth;

#[async_trait]
impl DepthProvider for NoDepth {
    async fn snapshot(&self, _symbol: &str, _timestamp: DateTime<Utc>) -> Result<Option<DepthSnapshot>> {
        Ok(None)
    }
}

/// Replays recorded snapshots
pub struct RecordedDepth {
    snapshots: Vec<DepthSnapshot>,
}

impl RecordedDepth {
    pub fn new(mut snapshots: Vec<DepthSnapshot>) -> Self {
        snapshots.sort_by_key(|s| s.timestamp);
        Self { snapshots }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl DepthProvider for RecordedDepth {
    async fn snapshot(&self, _symbol: &str, timestamp: DateTime<Utc>) -> Result<Option<DepthSnapshot>> {
        let idx = self.snapshots.partition_point(|s| s.timestamp <= timestamp);
        Ok(idx.checked_sub(1).map(|i| self.snapshots[i].clone()))
    }
}

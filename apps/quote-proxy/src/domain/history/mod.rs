//! Hour-Bucketed History
//!
//! A rolling time series that keeps at most one point per calendar hour
//! and at most a fixed number of points overall.
//!
//! # Invariants (after every mutation)
//!
//! - Points are sorted ascending by timestamp.
//! - No two points share an hour bucket; a later write for a bucket
//!   replaces the earlier one.
//! - The series never exceeds its point cap; the oldest points go first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 3_600_000;

/// Default point cap: one week of hourly points.
pub const DEFAULT_MAX_POINTS: usize = 24 * 7;

/// Key namespace for history series.
pub const HISTORY_NAMESPACE: &str = "history";

/// Index of the hour a millisecond timestamp falls into.
///
/// A timestamp exactly on a boundary belongs to the bucket starting there.
#[must_use]
pub const fn hour_bucket(timestamp_ms: i64) -> i64 {
    timestamp_ms.div_euclid(HOUR_MS)
}

/// Cache key of the series tracking `subject`.
#[must_use]
pub fn history_key(subject: &str) -> String {
    format!("{HISTORY_NAMESPACE}:{subject}")
}

/// One observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Snapshot payload.
    pub value: Value,
}

impl HistoryPoint {
    /// Create a point.
    #[must_use]
    pub const fn new(timestamp: i64, value: Value) -> Self {
        Self { timestamp, value }
    }

    /// Hour bucket of this point.
    #[must_use]
    pub const fn bucket(&self) -> i64 {
        hour_bucket(self.timestamp)
    }
}

/// Ordered, capped series of hourly points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySeries {
    points: Vec<HistoryPoint>,
}

impl HistorySeries {
    /// Create an empty series.
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Record `point`, replacing any point in the same hour bucket and
    /// trimming to the most recent `max_points`.
    pub fn record(&mut self, point: HistoryPoint, max_points: usize) {
        let bucket = point.bucket();
        self.points.retain(|existing| existing.bucket() != bucket);

        let position = self
            .points
            .partition_point(|existing| existing.timestamp <= point.timestamp);
        self.points.insert(position, point);

        if self.points.len() > max_points {
            let excess = self.points.len() - max_points;
            self.points.drain(..excess);
        }
    }

    /// Points in ascending timestamp order.
    #[must_use]
    pub fn points(&self) -> &[HistoryPoint] {
        &self.points
    }

    /// Consume the series, yielding its points.
    #[must_use]
    pub fn into_points(self) -> Vec<HistoryPoint> {
        self.points
    }

    /// Most recent point.
    #[must_use]
    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.last()
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Merge in-memory and persisted points, deduplicating by exact timestamp.
///
/// Persisted values win on conflict. The result is sorted ascending.
#[must_use]
pub fn merge_points(memory: Vec<HistoryPoint>, persisted: Vec<HistoryPoint>) -> Vec<HistoryPoint> {
    let mut merged: BTreeMap<i64, Value> = memory
        .into_iter()
        .map(|point| (point.timestamp, point.value))
        .collect();
    merged.extend(
        persisted
            .into_iter()
            .map(|point| (point.timestamp, point.value)),
    );
    merged
        .into_iter()
        .map(|(timestamp, value)| HistoryPoint { timestamp, value })
        .collect()
}

/// Keep points within `[start, end]` (either bound optional), sorted ascending.
#[must_use]
pub fn filter_range(
    mut points: Vec<HistoryPoint>,
    start: Option<i64>,
    end: Option<i64>,
) -> Vec<HistoryPoint> {
    points.retain(|point| {
        start.is_none_or(|start| point.timestamp >= start)
            && end.is_none_or(|end| point.timestamp <= end)
    });
    points.sort_by_key(|point| point.timestamp);
    points
}

// =============================================================================
// Tests
// =============================================================================

//! History Ledger
//!
//! Maintains one hour-bucketed series per tracked subject in a dedicated
//! cache store, and mirrors new points into the optional history store.
//!
//! Series are written without a TTL; their length is governed by the point
//! cap alone. Appends for the same subject are serialized by the store's
//! read-modify-write, so concurrent appends never lose a point.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::ports::{HistoryStorePort, NoOpHistoryStore};
use crate::domain::cache::CacheStore;
use crate::domain::history::{
    DEFAULT_MAX_POINTS, HistoryPoint, HistorySeries, filter_range, history_key, merge_points,
};
use crate::infrastructure::metrics::{self, StoreKind};

/// Rolling per-subject history.
#[derive(Clone)]
pub struct HistoryLedger {
    series: CacheStore<HistorySeries>,
    max_points: usize,
    store: Arc<dyn HistoryStorePort>,
}

impl std::fmt::Debug for HistoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLedger")
            .field("subjects", &self.series.len())
            .field("max_points", &self.max_points)
            .field("write_behind", &self.store.is_enabled())
            .finish()
    }
}

impl HistoryLedger {
    /// Create a ledger over `series`, keeping at most `max_points` per subject.
    #[must_use]
    pub fn new(
        series: CacheStore<HistorySeries>,
        max_points: usize,
        store: Arc<dyn HistoryStorePort>,
    ) -> Self {
        Self {
            series,
            max_points: max_points.max(1),
            store,
        }
    }

    /// In-memory ledger with default limits and no write-behind.
    #[must_use]
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(
            CacheStore::new(capacity, std::time::Duration::ZERO),
            DEFAULT_MAX_POINTS,
            Arc::new(NoOpHistoryStore),
        )
    }

    /// Point cap per series.
    #[must_use]
    pub const fn max_points(&self) -> usize {
        self.max_points
    }

    /// Underlying series store.
    #[must_use]
    pub const fn series_store(&self) -> &CacheStore<HistorySeries> {
        &self.series
    }

    /// Record `point` for `subject`.
    ///
    /// A point in an already-present hour replaces that hour's point; the
    /// series is then trimmed to the most recent `max_points`. When a history
    /// store is configured the point is forwarded in the background and any
    /// failure is logged.
    pub fn append_point(&self, subject: &str, point: HistoryPoint) {
        let key = history_key(subject);
        let max_points = self.max_points;
        let forwarded = point.clone();

        let evicted = self.series.upsert(&key, None, |existing| {
            let mut series = existing.cloned().unwrap_or_default();
            series.record(point, max_points);
            series
        });

        if let Some(evicted) = evicted {
            metrics::record_cache_eviction(StoreKind::History);
            debug!(subject, evicted = %evicted, "History store full, evicted oldest series");
        }
        metrics::record_history_append();
        metrics::set_cache_entries(StoreKind::History, self.series.len());

        if self.store.is_enabled() {
            self.forward(subject.to_string(), forwarded);
        }
    }

    /// Points for `subject` within the optional inclusive bounds, ascending.
    ///
    /// With a history store configured, persisted points are merged in
    /// (persisted values win on equal timestamps). A failed query degrades
    /// to the in-memory series.
    pub async fn get_history(
        &self,
        subject: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Vec<HistoryPoint> {
        let memory = self
            .series
            .get(&history_key(subject), None)
            .map(HistorySeries::into_points)
            .unwrap_or_default();

        if !self.store.is_enabled() {
            return filter_range(memory, start_ms, end_ms);
        }

        match self.store.query(subject, start_ms, end_ms).await {
            Ok(persisted) => filter_range(merge_points(memory, persisted), start_ms, end_ms),
            Err(e) => {
                metrics::record_persistence_failure("query");
                warn!(subject, error = %e, "History query failed, serving in-memory series");
                filter_range(memory, start_ms, end_ms)
            }
        }
    }

    /// Subjects with a series in memory.
    #[must_use]
    pub fn subjects(&self) -> Vec<String> {
        self.series
            .keys()
            .into_iter()
            .filter_map(|key| {
                key.split_once(':')
                    .map(|(_, subject)| subject.to_string())
            })
            .collect()
    }

    fn forward(&self, subject: String, point: HistoryPoint) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(subject = %subject, "No runtime available, history point not persisted");
            return;
        };
        let store = Arc::clone(&self.store);

        runtime.spawn(async move {
            if let Err(e) = store.append(&subject, point.timestamp, &point.value).await {
                metrics::record_persistence_failure("append");
                warn!(subject = %subject, error = %e, "History write-behind failed");
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

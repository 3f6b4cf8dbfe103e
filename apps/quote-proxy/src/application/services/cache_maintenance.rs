//! Cache Maintenance
//!
//! Background sweep that calls [`CacheStore::cleanup`] on a fixed interval,
//! reclaiming entries that were written without a TTL timer and never read
//! again.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::cache::CacheStore;
use crate::infrastructure::metrics::{self, StoreKind};

/// Periodic cleanup of one cache store.
pub struct CacheSweeper<V> {
    cache: CacheStore<V>,
    store: StoreKind,
    interval: Duration,
    cancel: CancellationToken,
}

impl<V: Clone + Send + 'static> CacheSweeper<V> {
    /// Create a sweeper running every `interval` until `cancel` fires.
    #[must_use]
    pub const fn new(
        cache: CacheStore<V>,
        store: StoreKind,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            store,
            interval,
            cancel,
        }
    }

    /// Run the sweep loop until cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Cache sweeper cancelled");
                    break;
                }
                _ = interval.tick() => self.sweep(),
            }
        }
    }

    fn sweep(&self) {
        let removed = self.cache.cleanup(None);
        metrics::set_cache_entries(self.store, self.cache.len());
        if removed > 0 {
            metrics::record_cleanup_removed(removed);
            tracing::debug!(removed, remaining = self.cache.len(), "Swept expired cache entries");
        }
    }
}

//! Bounded key/value store with lazy and proactive expiry.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::Instant;

// =============================================================================
// Entries
// =============================================================================

/// Entries live while their age is at most the TTL; timers fire this far
/// past the deadline so both expiry paths agree.
const EXPIRY_GRACE: Duration = Duration::from_millis(1);

struct CacheEntry<V> {
    value: V,
    written_at: Instant,
    /// Write generation, used to match expiry timers to the write that armed them.
    generation: u64,
    expiry: Option<AbortHandle>,
}

impl<V> CacheEntry<V> {
    /// A zero TTL never expires.
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        !ttl.is_zero() && now.saturating_duration_since(self.written_at) > ttl
    }

    fn cancel_expiry(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}

struct StoreState<V> {
    entries: IndexMap<String, CacheEntry<V>>,
    next_generation: u64,
}

impl<V> StoreState<V> {
    fn remove(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some_and(|mut entry| {
            entry.cancel_expiry();
            true
        })
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Point-in-time store occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of live entries.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// `size / capacity * 100`, formatted with two decimals.
    pub usage_percent: String,
}

// =============================================================================
// Store
// =============================================================================

/// Insertion-ordered cache with a hard capacity bound.
///
/// Cloning yields another handle to the same underlying store. When the
/// store is full, inserting a new key evicts the oldest-inserted key (this
/// is not an LRU: reads never change eviction order, and overwriting a key
/// keeps its original position).
pub struct CacheStore<V> {
    state: Arc<Mutex<StoreState<V>>>,
    capacity: usize,
    default_ttl: Duration,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            capacity: self.capacity,
            default_ttl: self.default_ttl,
        }
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("size", &self.state.lock().entries.len())
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl<V: Clone + Send + 'static> CacheStore<V> {
    /// Create a store holding at most `capacity` entries.
    ///
    /// `default_ttl` applies to reads that do not pass their own TTL; a zero
    /// duration disables age-based expiry. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                entries: IndexMap::with_capacity(capacity.min(4096)),
                next_generation: 0,
            })),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// TTL used by reads that do not supply one.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Write `value` under `key`, stamping it with the current time.
    ///
    /// With a non-zero `ttl` the entry is additionally scheduled for removal
    /// once the TTL elapses. Returns the key evicted to make room, if any.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Option<String> {
        let mut state = self.state.lock();
        self.insert_locked(&mut state, key.into(), value, ttl)
    }

    /// Read `key`, deleting it first if it is older than the effective TTL.
    #[must_use]
    pub fn get(&self, key: &str, ttl: Option<Duration>) -> Option<V> {
        let ttl = self.effective_ttl(ttl);
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = state.entries.get(key)?.is_expired(ttl, now);
        if expired {
            state.remove(key);
            return None;
        }

        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether `get(key, ttl)` would return a value.
    #[must_use]
    pub fn has(&self, key: &str, ttl: Option<Duration>) -> bool {
        self.get(key, ttl).is_some()
    }

    /// Remove `key`. Returns `true` if an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for (_, entry) in &mut state.entries {
            entry.cancel_expiry();
        }
        state.entries.clear();
    }

    /// Delete every entry older than the effective TTL.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&self, ttl: Option<Duration>) -> usize {
        let ttl = self.effective_ttl(ttl);
        if ttl.is_zero() {
            return 0;
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| {
            if entry.is_expired(ttl, now) {
                entry.cancel_expiry();
                false
            } else {
                true
            }
        });
        before - state.entries.len()
    }

    /// Read-modify-write `key` under the store lock.
    ///
    /// `update` receives the current (unexpired) value, if any, and returns
    /// the value to store. Concurrent upserts on the same store are
    /// serialized, so no caller observes a stale read of another's write.
    pub fn upsert<F>(&self, key: &str, ttl: Option<Duration>, update: F) -> Option<String>
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let now = Instant::now();
        let mut state = self.state.lock();

        let value = {
            let current = state
                .entries
                .get(key)
                .filter(|entry| !entry.is_expired(self.default_ttl, now))
                .map(|entry| &entry.value);
            update(current)
        };

        self.insert_locked(&mut state, key.to_string(), value, ttl)
    }

    /// Number of entries currently held (expired-but-unread entries included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        #[allow(clippy::cast_precision_loss)]
        let usage = size as f64 / self.capacity as f64 * 100.0;
        CacheStats {
            size,
            capacity: self.capacity,
            usage_percent: format!("{usage:.2}"),
        }
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.default_ttl)
    }

    fn insert_locked(
        &self,
        state: &mut StoreState<V>,
        key: String,
        value: V,
        ttl: Option<Duration>,
    ) -> Option<String> {
        let mut evicted = None;
        if !state.entries.contains_key(&key) {
            while state.entries.len() >= self.capacity {
                let Some((oldest, mut entry)) = state.entries.shift_remove_index(0) else {
                    break;
                };
                entry.cancel_expiry();
                tracing::debug!(evicted = %oldest, "Cache full, evicted oldest entry");
                evicted = Some(oldest);
            }
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let written_at = Instant::now();
        let expiry = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| self.schedule_expiry(key.clone(), generation, written_at + ttl));

        let entry = CacheEntry {
            value,
            written_at,
            generation,
            expiry,
        };

        if let Some(mut previous) = state.entries.insert(key, entry) {
            previous.cancel_expiry();
        }

        evicted
    }

    /// Arm a one-shot removal timer firing just past `deadline`, the first
    /// instant a read would also see the entry as expired. Without a runtime
    /// only lazy expiry applies.
    fn schedule_expiry(
        &self,
        key: String,
        generation: u64,
        deadline: Instant,
    ) -> Option<AbortHandle> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let state = Arc::downgrade(&self.state);

        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline + EXPIRY_GRACE).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock();
            let current = state
                .entries
                .get(&key)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                // The entry owns this task's abort handle; drop it without aborting.
                if let Some(mut entry) = state.entries.shift_remove(&key) {
                    entry.expiry = None;
                }
                tracing::trace!(key = %key, "Cache entry expired");
            }
        });

        Some(task.abort_handle())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> CacheStore<String> {
        CacheStore::new(capacity, Duration::ZERO)
    }

    #[test]
    fn capacity_evicts_first_inserted() {
        let cache = store(3);
        for i in 0..4 {
            cache.set(format!("k{i}"), format!("v{i}"), None);
        }

        assert_eq!(cache.len(), 3);
        assert!(!cache.has("k0", None));
        assert!(cache.has("k1", None));
        assert!(cache.has("k2", None));
        assert!(cache.has("k3", None));
    }

    #[test]
    fn set_reports_evicted_key() {
        let cache = store(1);
        assert_eq!(cache.set("a", "1".to_string(), None), None);
        assert_eq!(cache.set("b", "2".to_string(), None), Some("a".to_string()));
    }

    #[test]
    fn reads_do_not_change_eviction_order() {
        let cache = store(2);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        let _ = cache.get("a", None);
        cache.set("c", "3".to_string(), None);

        assert!(!cache.has("a", None));
        assert!(cache.has("b", None));
    }

    #[test]
    fn overwrite_keeps_position_and_does_not_evict() {
        let cache = store(2);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        assert_eq!(cache.set("a", "updated".to_string(), None), None);

        assert_eq!(cache.get("a", None).as_deref(), Some("updated"));
        assert_eq!(cache.keys(), vec!["a".to_string(), "b".to_string()]);

        cache.set("c", "3".to_string(), None);
        assert!(!cache.has("a", None));
    }

    #[test]
    fn delete_and_clear() {
        let cache = store(4);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn stats_format_two_decimals() {
        let cache = store(3);
        cache.set("a", "1".to_string(), None);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.usage_percent, "33.33");

        assert_eq!(store(4).stats().usage_percent, "0.00");
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let cache = store(0);
        assert_eq!(cache.capacity(), 1);
        cache.set("a", "1".to_string(), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_on_read() {
        let cache = store(4);
        cache.set("k", "v".to_string(), Some(Duration::from_millis(100)));
        assert_eq!(
            cache.get("k", Some(Duration::from_millis(100))).as_deref(),
            Some("v")
        );

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("k", Some(Duration::from_millis(100))), None);
        assert!(!cache.has("k", Some(Duration::from_millis(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn lazy_expiry_without_timer() {
        let cache = store(4);
        cache.set("k", "v".to_string(), None);

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k", Some(Duration::from_millis(100))), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn proactive_timer_removes_unread_entry() {
        let cache = store(4);
        cache.set("k", "v".to_string(), Some(Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_aged_exactly_ttl_is_still_live() {
        let cache = store(4);
        let ttl = Duration::from_millis(100);
        cache.set("k", "v".to_string(), Some(ttl));

        tokio::time::advance(ttl).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k", Some(ttl)).as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_cancels_previous_timer() {
        let cache = store(4);
        cache.set("k", "old".to_string(), Some(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.set("k", "new".to_string(), None);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.get("k", None).as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_and_lazy_expiry_coexist() {
        let cache = store(4);
        cache.set("k", "v".to_string(), Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(101)).await;
        // Lazy path may win the race; the timer must then be a no-op.
        assert_eq!(cache.get("k", Some(Duration::from_millis(100))), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        cache.set("k", "fresh".to_string(), None);
        assert_eq!(cache.get("k", None).as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_only_expired() {
        let cache = store(8);
        for key in ["a", "b", "c"] {
            cache.set(key, key.to_string(), None);
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        cache.set("fresh", "f".to_string(), None);

        let removed = cache.cleanup(Some(Duration::from_millis(100)));

        assert_eq!(removed, 3);
        assert_eq!(cache.keys(), vec!["fresh".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_with_all_entries_aged() {
        let cache = store(8);
        for key in ["a", "b", "c"] {
            cache.set(key, key.to_string(), None);
        }
        tokio::time::advance(Duration::from_millis(200)).await;

        assert_eq!(cache.cleanup(Some(Duration::from_millis(100))), 3);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn cleanup_with_zero_ttl_is_noop() {
        let cache = store(2);
        cache.set("a", "1".to_string(), None);
        assert_eq!(cache.cleanup(None), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn upsert_sees_current_value() {
        let cache: CacheStore<Vec<u32>> = CacheStore::new(2, Duration::ZERO);
        for i in 0..3 {
            cache.upsert("series", None, |current| {
                let mut next = current.cloned().unwrap_or_default();
                next.push(i);
                next
            });
        }

        assert_eq!(cache.get("series", None), Some(vec![0, 1, 2]));
    }

    #[test]
    fn default_ttl_applies_when_read_ttl_absent() {
        let cache: CacheStore<u8> = CacheStore::new(2, Duration::from_secs(300));
        assert_eq!(cache.default_ttl(), Duration::from_secs(300));
        cache.set("a", 1, None);
        assert_eq!(cache.get("a", None), Some(1));
    }
}

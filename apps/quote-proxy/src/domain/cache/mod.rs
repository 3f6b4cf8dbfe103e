//! Cache Store
//!
//! A single process-wide key/value store with per-entry write timestamps,
//! a hard capacity bound and insertion-order eviction.
//!
//! # Expiry
//!
//! Two independent mechanisms remove stale entries:
//!
//! - **Lazy**: `get` compares the entry age against the effective TTL and
//!   deletes the entry when it is older.
//! - **Proactive**: `set` with a non-zero TTL spawns a one-shot timer that
//!   removes the entry once the TTL elapses, even if it is never read.
//!
//! Timers carry the write generation they were scheduled for, so a timer
//! that races an overwrite or delete never removes a newer entry.

mod key;
mod store;

pub use key::{KEY_SEPARATOR, generate_key};
pub use store::{CacheStats, CacheStore};

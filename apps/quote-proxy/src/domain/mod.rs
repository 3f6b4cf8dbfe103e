//! Domain Layer - Cache, history and scheduling state machines.
//!
//! Everything in this layer is synchronous and free of I/O. The only
//! runtime coupling is the cache store's optional one-shot expiry timers,
//! which are spawned on the ambient Tokio runtime when one is available.

/// Bounded insertion-ordered cache store and request fingerprints.
pub mod cache;

/// Upstream endpoint descriptors, parameters and request construction.
pub mod endpoint;

/// Hour-bucketed time series.
pub mod history;

/// Recurring job records and fire-time computation.
pub mod scheduling;

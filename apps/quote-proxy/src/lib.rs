#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Proxy - Caching Upstream API Relay
//!
//! Forwards parameterized requests to configured upstream APIs, caches
//! responses by request fingerprint, and keeps a rolling hourly history of
//! one tracked instrument collected by a time-aligned scheduler.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: State machines with no I/O
//!   - `cache`: Bounded insertion-ordered TTL store and key fingerprints
//!   - `endpoint`: Endpoint descriptors, URL and header construction
//!   - `history`: Hour-bucketed series
//!   - `scheduling`: Job records and next-fire computation
//!
//! - **Application**: Ports and services
//!   - `ports`: Clock, config provider, transport, history store
//!   - `services`: Proxy executor, history ledger, scheduler, collection
//!     job, cache sweeper
//!
//! - **Infrastructure**: Adapters
//!   - `config`: Environment settings and YAML API registry
//!   - `transport`: `reqwest` upstream client
//!   - `persistence`: Optional sled history store
//!   - `http`: Axum routes and server
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//! Client ──► HTTP routes ──► ProxyExecutor ──► CacheStore (hit) ──┐
//!                                  │                              │
//!                                  └──► Transport ──► upstream    │
//!                                                                 ▼
//! Scheduler ──► CollectionJob ──► ProxyExecutor ──► HistoryLedger ──► sled
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core state machines with no external dependencies.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheStats, CacheStore, generate_key};
pub use domain::endpoint::{
    AuthDescriptor, EndpointDescriptor, HttpMethod, ParamLocation, RequestParams, RequiredParam,
    ValidationError,
};
pub use domain::history::{HistoryPoint, HistorySeries};
pub use domain::scheduling::{JobOptions, JobState, ScheduledJob, SchedulerStats};

// Application services
pub use application::services::{
    CollectionJob, HistoryLedger, ProxyError, ProxyExecutor, Scheduler, SchedulerConfig,
    SchedulerError, TrackedInstrument,
};

// Infrastructure config
pub use infrastructure::config::{ApiRegistry, ConfigError, ProxyConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

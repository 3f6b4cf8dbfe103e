//! Application Services
//!
//! Orchestration over the domain state machines and the driven ports:
//!
//! - `HistoryLedger`: hour-bucketed series per subject, with write-behind
//! - `ProxyExecutor`: cache-first upstream calls and the history side effect
//! - `Scheduler`: drift-resistant recurring jobs with a failure breaker
//! - `CollectionJob`: scheduled fetch of the tracked instrument
//! - `CacheSweeper`: periodic cache cleanup

mod cache_maintenance;
mod collector;
mod history_ledger;
mod proxy_executor;
mod scheduler;

pub use cache_maintenance::CacheSweeper;
pub use collector::{CollectionJob, collection_job_id};
pub use history_ledger::HistoryLedger;
pub use proxy_executor::{
    DEFAULT_REQUEST_TIMEOUT, ProxyError, ProxyExecutor, TrackedInstrument, snapshot_of,
};
pub use scheduler::{
    DEFAULT_MAX_WAIT, FnJob, JobHandler, Scheduler, SchedulerConfig, SchedulerError,
};

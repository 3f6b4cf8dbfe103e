//! Proxy Configuration Settings
//!
//! Configuration types for the quote proxy, loaded from environment
//! variables prefixed with `QUOTE_PROXY_`. Unparseable values fall back to
//! their defaults; zero capacities and intervals are rejected.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::ConfigError;
use crate::application::services::{DEFAULT_MAX_WAIT, DEFAULT_REQUEST_TIMEOUT, TrackedInstrument};
use crate::domain::history::DEFAULT_MAX_POINTS;
use crate::domain::scheduling::{DEFAULT_MAX_ERRORS, JobOptions};

/// Inbound server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP port for the proxy, history, scheduler, health and metrics routes.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8080 }
    }
}

/// Upstream API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Path of the API registry file.
    pub apis_file: PathBuf,
    /// Timeout for each upstream request.
    pub request_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            apis_file: PathBuf::from("apis.yaml"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum cached responses.
    pub capacity: usize,
    /// TTL for reads that do not pass one (zero = never expire).
    pub default_ttl: Duration,
    /// Period of the cleanup sweep (zero = disabled).
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// History ledger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySettings {
    /// Maximum tracked subjects held in memory.
    pub capacity: usize,
    /// Points kept per subject.
    pub max_points: usize,
    /// Mirror points into the persistent store.
    pub write_behind: bool,
    /// Persistent store location.
    pub db_path: PathBuf,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_points: DEFAULT_MAX_POINTS,
            write_behind: false,
            db_path: PathBuf::from("./data/history.sled"),
        }
    }
}

/// The instrument whose responses feed the history ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSettings {
    /// Upstream api.
    pub api: String,
    /// Endpoint within the api.
    pub endpoint: String,
    /// Parameter carrying the symbol.
    pub param: String,
    /// Tracked symbol.
    pub symbol: String,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            api: "forex".to_string(),
            endpoint: "quote".to_string(),
            param: "symbol".to_string(),
            symbol: "EURUSD".to_string(),
        }
    }
}

impl TrackingSettings {
    /// Tracked instrument for the executor.
    #[must_use]
    pub fn instrument(&self) -> TrackedInstrument {
        TrackedInstrument::new(&self.api, &self.endpoint, &self.param, &self.symbol)
    }
}

/// Scheduled collection of the tracked instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSettings {
    /// Register the collection job.
    pub enabled: bool,
    /// Interval between collections.
    pub interval: Duration,
    /// Fire on hour boundaries.
    pub align_to_hour: bool,
    /// Collect once at startup.
    pub run_immediately: bool,
    /// Consecutive failures before the job disables itself.
    pub max_errors: u32,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
            align_to_hour: true,
            run_immediately: true,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }
}

impl CollectionSettings {
    /// Scheduler options for the collection job.
    #[must_use]
    pub const fn job_options(&self) -> JobOptions {
        JobOptions {
            enabled: self.enabled,
            max_errors: self.max_errors,
            align_to_hour_boundary: self.align_to_hour,
            run_immediately: self.run_immediately,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Longest wait between due-time checks.
    pub max_wait: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Inbound server.
    pub server: ServerSettings,
    /// Upstream APIs.
    pub upstream: UpstreamSettings,
    /// Response cache.
    pub cache: CacheSettings,
    /// History ledger.
    pub history: HistorySettings,
    /// Tracked instrument.
    pub tracking: TrackingSettings,
    /// Collection job.
    pub collection: CollectionSettings,
    /// Scheduler.
    pub scheduler: SchedulerSettings,
}

const PREFIX: &str = "QUOTE_PROXY_";

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity or interval is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity or interval is zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();

        let server = ServerSettings {
            http_port: env.parse("HTTP_PORT", defaults.server.http_port),
        };

        let upstream = UpstreamSettings {
            apis_file: env.path("APIS_FILE", defaults.upstream.apis_file),
            request_timeout: env.millis("REQUEST_TIMEOUT_MS", defaults.upstream.request_timeout),
        };

        let cache = CacheSettings {
            capacity: env.non_zero("CACHE_CAPACITY", defaults.cache.capacity)?,
            default_ttl: env.millis("CACHE_DEFAULT_TTL_MS", defaults.cache.default_ttl),
            cleanup_interval: env.secs(
                "CACHE_CLEANUP_INTERVAL_SECS",
                defaults.cache.cleanup_interval,
            ),
        };

        let history = HistorySettings {
            capacity: env.non_zero("HISTORY_CAPACITY", defaults.history.capacity)?,
            max_points: env.non_zero("HISTORY_MAX_POINTS", defaults.history.max_points)?,
            write_behind: env.flag("HISTORY_WRITE_BEHIND", defaults.history.write_behind),
            db_path: env.path("HISTORY_DB_PATH", defaults.history.db_path),
        };

        let tracking = TrackingSettings {
            api: env.string("TRACKED_API", defaults.tracking.api),
            endpoint: env.string("TRACKED_ENDPOINT", defaults.tracking.endpoint),
            param: env.string("TRACKED_PARAM", defaults.tracking.param),
            symbol: env.string("TRACKED_SYMBOL", defaults.tracking.symbol),
        };

        let interval = env.secs("COLLECT_INTERVAL_SECS", defaults.collection.interval);
        if interval.is_zero() {
            return Err(invalid("COLLECT_INTERVAL_SECS", "must be greater than zero"));
        }
        let collection = CollectionSettings {
            enabled: env.flag("COLLECT_ENABLED", defaults.collection.enabled),
            interval,
            align_to_hour: env.flag("COLLECT_ALIGN_HOUR", defaults.collection.align_to_hour),
            run_immediately: env.flag(
                "COLLECT_RUN_IMMEDIATELY",
                defaults.collection.run_immediately,
            ),
            max_errors: env.non_zero("COLLECT_MAX_ERRORS", defaults.collection.max_errors)?,
        };

        let max_wait = env.secs("SCHEDULER_MAX_WAIT_SECS", defaults.scheduler.max_wait);
        if max_wait.is_zero() {
            return Err(invalid("SCHEDULER_MAX_WAIT_SECS", "must be greater than zero"));
        }

        Ok(Self {
            server,
            upstream,
            cache,
            history,
            tracking,
            collection,
            scheduler: SchedulerSettings { max_wait },
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{key}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.raw(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn non_zero<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
    {
        let value = self.parse(key, default);
        if value == T::default() {
            return Err(invalid(key, "must be greater than zero"));
        }
        Ok(value)
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).unwrap_or(default)
    }

    fn path(&self, key: &str, default: PathBuf) -> PathBuf {
        self.raw(key).map_or(default, PathBuf::from)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.raw(key).map(|v| v.to_lowercase()).as_deref() {
            Some("true" | "1" | "yes" | "on") => true,
            Some("false" | "0" | "no" | "off") => false,
            _ => default,
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.raw(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("{PREFIX}{key}"),
        message: message.to_string(),
    }
}

//! Proxy Executor
//!
//! Turns `(api, endpoint, params)` into an upstream call, consulting the
//! response cache first. A cache hit performs no network I/O.
//!
//! # Flow
//!
//! ```text
//! resolve ─▶ validate ─▶ cache? ─hit──────────────────────────▶ history ─▶ value
//!                          │
//!                          └miss─▶ transport ─▶ cache.set ─▶ history ─▶ value
//! ```
//!
//! The history side effect only applies to the tracked instrument and is
//! infallible from the caller's point of view.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::application::ports::{
    Clock, ConfigProviderPort, OutboundRequest, SystemClock, TransportError, TransportPort,
};
use crate::application::services::HistoryLedger;
use crate::domain::cache::{CacheStore, generate_key};
use crate::domain::endpoint::{EndpointDescriptor, Params, RequestParams, ValidationError};
use crate::domain::history::HistoryPoint;
use crate::infrastructure::metrics::{self, Outcome, StoreKind};

/// Default upstream timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest upstream error body carried into a [`TransportError::Status`].
const MAX_ERROR_MESSAGE_CHARS: usize = 512;

// =============================================================================
// Errors
// =============================================================================

/// Caller-visible proxy failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// Unknown api or endpoint.
    #[error("no endpoint '{endpoint}' configured for api '{api}'")]
    ConfigNotFound {
        /// Requested api.
        api: String,
        /// Requested endpoint.
        endpoint: String,
    },

    /// Required parameters missing.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Upstream call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Tracked Instrument
// =============================================================================

/// The one request whose responses feed the history ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedInstrument {
    /// Upstream api.
    pub api: String,
    /// Endpoint within the api.
    pub endpoint: String,
    /// Parameter carrying the instrument symbol.
    pub param: String,
    /// Instrument symbol; also the history subject.
    pub symbol: String,
}

impl TrackedInstrument {
    /// Create a tracked instrument.
    #[must_use]
    pub fn new(
        api: impl Into<String>,
        endpoint: impl Into<String>,
        param: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            api: api.into(),
            endpoint: endpoint.into(),
            param: param.into(),
            symbol: symbol.into(),
        }
    }

    /// Whether a request targets this instrument. The symbol may arrive as a
    /// path or a query parameter.
    #[must_use]
    pub fn matches(&self, api: &str, endpoint: &str, params: &RequestParams) -> bool {
        self.api == api
            && self.endpoint == endpoint
            && [&params.path, &params.query]
                .into_iter()
                .any(|map| map.get(&self.param) == Some(&self.symbol))
    }

    /// Parameters that request this instrument from `descriptor`.
    #[must_use]
    pub fn request_params(&self, descriptor: &EndpointDescriptor) -> RequestParams {
        let params = RequestParams::new();
        if descriptor.placeholders().contains(&self.param.as_str()) {
            params.with_path(&self.param, &self.symbol)
        } else {
            params.with_query(&self.param, &self.symbol)
        }
    }
}

/// Value recorded for a response body: the first element of a sequence,
/// otherwise the body itself. An empty sequence yields nothing.
#[must_use]
pub fn snapshot_of(body: &Value) -> Option<Value> {
    match body {
        Value::Array(items) => items.first().cloned(),
        other => Some(other.clone()),
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Executes proxied requests.
#[derive(Clone)]
pub struct ProxyExecutor {
    registry: Arc<dyn ConfigProviderPort>,
    transport: Arc<dyn TransportPort>,
    cache: CacheStore<Value>,
    ledger: HistoryLedger,
    clock: Arc<dyn Clock>,
    tracked: Option<TrackedInstrument>,
    request_timeout: Duration,
}

impl std::fmt::Debug for ProxyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyExecutor")
            .field("cache", &self.cache.stats())
            .field("ledger", &self.ledger)
            .field("tracked", &self.tracked)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ProxyExecutor {
    /// Create an executor with no tracked instrument.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ConfigProviderPort>,
        transport: Arc<dyn TransportPort>,
        cache: CacheStore<Value>,
        ledger: HistoryLedger,
    ) -> Self {
        Self {
            registry,
            transport,
            cache,
            ledger,
            clock: Arc::new(SystemClock),
            tracked: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Feed responses for `tracked` into the history ledger.
    #[must_use]
    pub fn with_tracked(mut self, tracked: TrackedInstrument) -> Self {
        self.tracked = Some(tracked);
        self
    }

    /// Use `clock` for history timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the upstream timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Response cache.
    #[must_use]
    pub const fn cache(&self) -> &CacheStore<Value> {
        &self.cache
    }

    /// History ledger.
    #[must_use]
    pub const fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Tracked instrument, if any.
    #[must_use]
    pub const fn tracked(&self) -> Option<&TrackedInstrument> {
        self.tracked.as_ref()
    }

    /// Resolve an endpoint descriptor.
    pub fn resolve(&self, api: &str, endpoint: &str) -> Result<EndpointDescriptor, ProxyError> {
        self.registry
            .resolve(api, endpoint)
            .ok_or_else(|| ProxyError::ConfigNotFound {
                api: api.to_string(),
                endpoint: endpoint.to_string(),
            })
    }

    /// Proxy one request.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::ConfigNotFound`] when the endpoint is not configured
    /// - [`ProxyError::Validation`] when required parameters are missing
    /// - [`ProxyError::Transport`] when the upstream call fails or answers
    ///   with a non-success status
    pub async fn run(
        &self,
        api: &str,
        endpoint: &str,
        params: &RequestParams,
        extra_headers: Option<&Params>,
    ) -> Result<Value, ProxyError> {
        let span = info_span!("proxy", request_id = %Uuid::new_v4(), api, endpoint);
        self.execute(api, endpoint, params, extra_headers)
            .instrument(span)
            .await
    }

    /// Fetch the tracked instrument, recording its history point.
    ///
    /// Returns `None` when no instrument is tracked.
    pub async fn collect_tracked(&self) -> Option<Result<Value, ProxyError>> {
        let tracked = self.tracked.as_ref()?;
        let result = match self.resolve(&tracked.api, &tracked.endpoint) {
            Ok(descriptor) => {
                let params = tracked.request_params(&descriptor);
                self.run(&tracked.api, &tracked.endpoint, &params, None)
                    .await
            }
            Err(e) => Err(e),
        };
        Some(result)
    }

    async fn execute(
        &self,
        api: &str,
        endpoint: &str,
        params: &RequestParams,
        extra_headers: Option<&Params>,
    ) -> Result<Value, ProxyError> {
        let descriptor = self.resolve(api, endpoint)?;
        descriptor.validate(params)?;

        let cache_key = generate_key(api, endpoint, &params.path, &params.query);
        if descriptor.caches_responses() {
            if let Some(cached) = self.cache.get(&cache_key, Some(descriptor.cache_duration)) {
                metrics::record_cache_lookup(true);
                debug!(cache_key = %cache_key, "Cache hit");
                self.record_history(api, endpoint, params, &cached);
                return Ok(cached);
            }
            metrics::record_cache_lookup(false);
            debug!(cache_key = %cache_key, "Cache miss");
        }

        let request = OutboundRequest {
            method: descriptor.method,
            url: descriptor.build_url(params)?,
            headers: descriptor.build_headers(&params.headers, extra_headers),
            timeout: self.request_timeout,
        };

        let started = Instant::now();
        let result = self.transport.send(request).await;
        let elapsed = started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                let outcome = if matches!(e, TransportError::Timeout(_)) {
                    Outcome::Timeout
                } else {
                    Outcome::Failure
                };
                metrics::record_upstream_request(api, outcome, elapsed);
                warn!(error = %e, "Upstream request failed");
                return Err(e.into());
            }
        };

        if !response.is_success() {
            metrics::record_upstream_request(api, Outcome::Status, elapsed);
            warn!(status = response.status, "Upstream returned error status");
            return Err(TransportError::Status {
                status: response.status,
                message: error_message(&response.body),
            }
            .into());
        }
        metrics::record_upstream_request(api, Outcome::Success, elapsed);

        if descriptor.caches_responses() {
            let evicted = self.cache.set(
                cache_key,
                response.body.clone(),
                Some(descriptor.cache_duration),
            );
            if let Some(evicted) = evicted {
                metrics::record_cache_eviction(StoreKind::Response);
                debug!(evicted = %evicted, "Response cache full, evicted oldest entry");
            }
            metrics::set_cache_entries(StoreKind::Response, self.cache.len());
        }

        self.record_history(api, endpoint, params, &response.body);
        Ok(response.body)
    }

    fn record_history(&self, api: &str, endpoint: &str, params: &RequestParams, body: &Value) {
        let Some(tracked) = self
            .tracked
            .as_ref()
            .filter(|tracked| tracked.matches(api, endpoint, params))
        else {
            return;
        };
        let Some(snapshot) = snapshot_of(body) else {
            debug!(subject = %tracked.symbol, "Empty response, no history point recorded");
            return;
        };

        let point = HistoryPoint::new(self.clock.now_ms(), snapshot);
        self.ledger.append_point(&tracked.symbol, point);
        debug!(subject = %tracked.symbol, "Recorded history point");
    }
}

fn error_message(body: &Value) -> String {
    let text = match body {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    text.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

// =============================================================================
// Tests
// =============================================================================

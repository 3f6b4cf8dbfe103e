//! Proxy Flow Integration Tests
//!
//! Drives the executor through a YAML registry and a scripted transport:
//! request construction, caching, history recording and scheduled
//! collection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use quote_proxy::application::ports::{
    Clock, OutboundRequest, TransportError, TransportPort, TransportResponse,
};
use quote_proxy::application::services::{CollectionJob, collection_job_id};
use quote_proxy::domain::scheduling::JobState;
use quote_proxy::{
    ApiRegistry, CacheStore, HistoryLedger, HttpMethod, JobOptions, ProxyError, ProxyExecutor,
    RequestParams, Scheduler, SchedulerConfig, TrackedInstrument,
};

const APIS: &str = r#"
apis:
  forex:
    base_url: https://fx.example.com/
    auth: { type: api_key_query, param: apikey, value: "${FX_KEY}" }
    headers: { Accept: application/json }
    endpoints:
      quote:
        path: /v1/quote/{symbol}
        cache_duration_ms: 5000
        required_params:
          - { name: symbol, in: path }
      convert:
        path: /v1/convert
        method: POST
        headers: { accept: text/csv }
        required_params:
          - { name: from }
          - { name: to }
  news:
    base_url: https://news.example.com
    auth: { type: bearer, token: "${NEWS_TOKEN:-anonymous}" }
    endpoints:
      latest:
        path: /latest
        cache_duration_ms: 60000
"#;

/// Transport answering every request with the configured status and body.
struct ScriptedTransport {
    status: AtomicU16,
    body: Mutex<Value>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    fn new(body: Value) -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU16::new(200),
            body: Mutex::new(body),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn answer(&self, status: u16, body: Value) {
        self.status.store(status, Ordering::SeqCst);
        *self.body.lock() = body;
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn last(&self) -> OutboundRequest {
        self.requests.lock().last().cloned().unwrap()
    }
}

#[async_trait]
impl TransportPort for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(request);
        Ok(TransportResponse {
            status: self.status.load(Ordering::SeqCst),
            body: self.body.lock().clone(),
        })
    }
}

/// Wall clock that advances with Tokio's (pausable) clock.
struct TokioClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::TimeDelta::from_std(self.start.elapsed()).unwrap()
    }
}

fn clock_at(base: DateTime<Utc>) -> Arc<TokioClock> {
    Arc::new(TokioClock {
        base,
        start: Instant::now(),
    })
}

fn ten_seventeen() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 17, 0).unwrap()
}

fn registry() -> ApiRegistry {
    ApiRegistry::from_yaml_str_with(APIS, |name| {
        (name == "FX_KEY").then(|| "k3y".to_string())
    })
    .unwrap()
}

fn executor(transport: Arc<ScriptedTransport>, clock: Arc<TokioClock>) -> ProxyExecutor {
    ProxyExecutor::new(
        Arc::new(registry()),
        transport,
        CacheStore::new(100, Duration::from_secs(300)),
        HistoryLedger::in_memory(8),
    )
    .with_tracked(TrackedInstrument::new("forex", "quote", "symbol", "EURUSD"))
    .with_clock(clock)
}

fn quote(symbol: &str) -> RequestParams {
    RequestParams::new().with_path("symbol", symbol)
}

#[tokio::test(start_paused = true)]
async fn builds_upstream_request_from_registry() {
    let transport = ScriptedTransport::new(json!({"bid": 1.1}));
    let executor = executor(Arc::clone(&transport), clock_at(ten_seventeen()));

    executor
        .run("forex", "quote", &quote("EUR/USD"), None)
        .await
        .unwrap();

    let request = transport.last();
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(
        request.url,
        "https://fx.example.com/v1/quote/EUR%2FUSD?apikey=k3y"
    );
    assert_eq!(
        request.headers,
        vec![("Accept".to_string(), "application/json".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn endpoint_headers_and_bearer_auth_are_applied() {
    let transport = ScriptedTransport::new(json!([]));
    let executor = executor(Arc::clone(&transport), clock_at(ten_seventeen()));

    let params = RequestParams::new()
        .with_query("from", "EUR")
        .with_query("to", "USD");
    executor.run("forex", "convert", &params, None).await.unwrap();
    let convert = transport.last();
    assert_eq!(convert.method, HttpMethod::Post);
    assert_eq!(
        convert.url,
        "https://fx.example.com/v1/convert?from=EUR&to=USD&apikey=k3y"
    );
    assert_eq!(
        convert.headers,
        vec![("accept".to_string(), "text/csv".to_string())]
    );

    executor
        .run("news", "latest", &RequestParams::new(), None)
        .await
        .unwrap();
    let news = transport.last();
    assert_eq!(
        news.headers,
        vec![("Authorization".to_string(), "Bearer anonymous".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn responses_are_cached_per_fingerprint() {
    let transport = ScriptedTransport::new(json!({"bid": 1.1}));
    let executor = executor(Arc::clone(&transport), clock_at(ten_seventeen()));

    executor.run("forex", "quote", &quote("EURUSD"), None).await.unwrap();
    executor.run("forex", "quote", &quote("EURUSD"), None).await.unwrap();
    assert_eq!(transport.calls(), 1);

    executor.run("forex", "quote", &quote("GBPUSD"), None).await.unwrap();
    assert_eq!(transport.calls(), 2);

    tokio::time::advance(Duration::from_millis(5001)).await;
    transport.answer(200, json!({"bid": 1.2}));
    let refreshed = executor.run("forex", "quote", &quote("EURUSD"), None).await.unwrap();
    assert_eq!(refreshed, json!({"bid": 1.2}));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn upstream_error_status_is_not_cached() {
    let transport = ScriptedTransport::new(json!("maintenance"));
    transport.answer(503, json!("maintenance"));
    let executor = executor(Arc::clone(&transport), clock_at(ten_seventeen()));

    let err = executor
        .run("forex", "quote", &quote("EURUSD"), None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ProxyError::Transport(TransportError::Status {
            status: 503,
            message: "maintenance".to_string(),
        })
    );
    assert!(executor.cache().is_empty());
    assert!(executor.ledger().get_history("EURUSD", None, None).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_parameters_never_reach_upstream() {
    let transport = ScriptedTransport::new(json!({}));
    let executor = executor(Arc::clone(&transport), clock_at(ten_seventeen()));

    let err = executor
        .run("forex", "convert", &RequestParams::new().with_query("from", "EUR"), None)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "missing required parameters: to (query)"
    );
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn tracked_instrument_accumulates_hourly_history() {
    let transport = ScriptedTransport::new(json!([{"bid": 1.10}, {"bid": 1.09}]));
    let executor = executor(Arc::clone(&transport), clock_at(ten_seventeen()));

    executor.run("forex", "quote", &quote("EURUSD"), None).await.unwrap();
    executor.run("forex", "quote", &quote("GBPUSD"), None).await.unwrap();

    tokio::time::advance(Duration::from_secs(3600)).await;
    transport.answer(200, json!([{"bid": 1.11}]));
    executor.run("forex", "quote", &quote("EURUSD"), None).await.unwrap();

    let history = executor.ledger().get_history("EURUSD", None, None).await;
    let values: Vec<_> = history.iter().map(|p| p.value.clone()).collect();
    assert_eq!(values, vec![json!({"bid": 1.10}), json!({"bid": 1.11})]);
    assert_eq!(executor.ledger().subjects(), vec!["EURUSD".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn scheduled_collection_feeds_history() {
    let clock = clock_at(ten_seventeen());
    let transport = ScriptedTransport::new(json!({"bid": 1.10}));
    let executor = executor(Arc::clone(&transport), Arc::clone(&clock));

    let scheduler = Scheduler::with_clock(
        SchedulerConfig::default(),
        CancellationToken::new(),
        clock,
    );
    let id = collection_job_id("EURUSD");
    scheduler.add_job(
        id.clone(),
        Duration::from_secs(3600),
        Arc::new(CollectionJob::new(executor.clone())),
        JobOptions {
            align_to_hour_boundary: true,
            run_immediately: true,
            ..JobOptions::default()
        },
    );
    assert_eq!(scheduler.start_all(), 1);

    // Immediate run at 10:17, then 11:00 and 12:00.
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;

    let status = scheduler.get_status(&id).unwrap();
    assert_eq!(status.total_runs, 3);
    assert_eq!(status.state, JobState::Scheduled);
    assert_eq!(
        status.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 3, 15, 13, 0, 0).unwrap())
    );

    // Runs are an hour apart, well past the 5s response TTL.
    assert_eq!(transport.calls(), 3);
    let history = executor.ledger().get_history("EURUSD", None, None).await;
    assert_eq!(history.len(), 3);

    scheduler.shutdown().await;
    assert_eq!(scheduler.get_status(&id).unwrap().state, JobState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn failing_collection_disables_job_until_restarted() {
    let clock = clock_at(ten_seventeen());
    let transport = ScriptedTransport::new(json!("down"));
    transport.answer(500, json!("down"));
    let executor = executor(Arc::clone(&transport), Arc::clone(&clock));

    let scheduler = Scheduler::with_clock(
        SchedulerConfig::default(),
        CancellationToken::new(),
        clock,
    );
    let id = collection_job_id("EURUSD");
    scheduler.add_job(
        id.clone(),
        Duration::from_secs(60),
        Arc::new(CollectionJob::new(executor.clone())),
        JobOptions {
            max_errors: 3,
            ..JobOptions::default()
        },
    );
    scheduler.start(&id).unwrap();

    tokio::time::sleep(Duration::from_secs(10 * 60)).await;

    let status = scheduler.get_status(&id).unwrap();
    assert_eq!(status.state, JobState::Disabled);
    assert!(!status.enabled);
    assert_eq!(status.error_count, 3);
    assert_eq!(transport.calls(), 3);
    assert!(status.last_error.unwrap().starts_with("collecting EURUSD"));
    assert_eq!(scheduler.get_stats().disabled, 1);

    transport.answer(200, json!({"bid": 1.1}));
    scheduler.start(&id).unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;

    let status = scheduler.get_status(&id).unwrap();
    assert!(status.enabled);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.state, JobState::Scheduled);
    assert_eq!(executor.ledger().get_history("EURUSD", None, None).await.len(), 1);

    scheduler.shutdown().await;
}

//! Quote Proxy Binary
//!
//! Starts the caching upstream proxy, the history collection job and the
//! HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-proxy
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_PROXY_APIS_FILE`: API registry file (default: apis.yaml)
//! - `QUOTE_PROXY_HTTP_PORT`: HTTP port (default: 8080)
//! - `QUOTE_PROXY_TRACKED_SYMBOL`: Instrument collected hourly (default: EURUSD)
//! - `QUOTE_PROXY_HISTORY_WRITE_BEHIND`: Persist history points (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log filter (default: quote_proxy=info)
//!
//! See `ProxyConfig` for the full list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_proxy::application::ports::{HistoryStorePort, NoOpHistoryStore};
use quote_proxy::application::services::{
    CacheSweeper, CollectionJob, HistoryLedger, ProxyExecutor, Scheduler, SchedulerConfig,
    collection_job_id,
};
use quote_proxy::domain::cache::CacheStore;
use quote_proxy::infrastructure::config::{ApiRegistry, ProxyConfig};
use quote_proxy::infrastructure::http::{AppState, HttpServer, create_router};
use quote_proxy::infrastructure::metrics::{StoreKind, init_metrics};
use quote_proxy::infrastructure::persistence::build_history_store;
use quote_proxy::infrastructure::telemetry;
use quote_proxy::infrastructure::transport::HttpTransport;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting quote proxy");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, metrics disabled");
    }

    let config = ProxyConfig::from_env()?;
    log_config(&config);

    let registry = ApiRegistry::from_file(&config.upstream.apis_file).with_context(|| {
        format!(
            "loading API registry from {}",
            config.upstream.apis_file.display()
        )
    })?;
    tracing::info!(apis = ?registry.api_names(), "API registry loaded");

    let shutdown_token = CancellationToken::new();

    // History ledger with optional write-behind
    let history_store = build_history_store(&config.history).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "History write-behind unavailable, keeping history in memory");
        Arc::new(NoOpHistoryStore) as Arc<dyn HistoryStorePort>
    });
    let ledger = HistoryLedger::new(
        CacheStore::new(config.history.capacity, Duration::ZERO),
        config.history.max_points,
        history_store,
    );

    // Proxy executor
    let executor = ProxyExecutor::new(
        Arc::new(registry),
        Arc::new(HttpTransport::new()?),
        CacheStore::new(config.cache.capacity, config.cache.default_ttl),
        ledger,
    )
    .with_tracked(config.tracking.instrument())
    .with_request_timeout(config.upstream.request_timeout);

    // Scheduler and collection job
    let scheduler = Arc::new(Scheduler::new(
        SchedulerConfig {
            max_wait: config.scheduler.max_wait,
        },
        shutdown_token.child_token(),
    ));
    scheduler.add_job(
        collection_job_id(&config.tracking.symbol),
        config.collection.interval,
        Arc::new(CollectionJob::new(executor.clone())),
        config.collection.job_options(),
    );
    let started = scheduler.start_all();
    tracing::info!(started, "Scheduler started");

    // Periodic cache cleanup
    if config.cache.cleanup_interval.is_zero() {
        tracing::info!("Cache cleanup sweep disabled");
    } else {
        let sweeper = CacheSweeper::new(
            executor.cache().clone(),
            StoreKind::Response,
            config.cache.cleanup_interval,
            shutdown_token.child_token(),
        );
        tokio::spawn(sweeper.run());
    }

    // HTTP server
    let router = create_router(AppState::new(
        executor,
        Arc::clone(&scheduler),
        env!("CARGO_PKG_VERSION"),
    ));
    let server = HttpServer::new(config.server.http_port, router, shutdown_token.clone());
    let mut server_task = tokio::spawn(server.run());

    tracing::info!("Quote proxy ready");

    let server_result = tokio::select! {
        () = wait_for_signal() => None,
        result = &mut server_task => Some(result),
    };

    shutdown_token.cancel();
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Scheduler did not stop within the shutdown timeout");
    }

    let server_result = match server_result {
        Some(result) => result,
        None => match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("HTTP server did not stop within the shutdown timeout");
                Ok(Ok(()))
            }
        },
    };
    server_result.context("HTTP server task panicked")??;

    tracing::info!("Quote proxy stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        apis_file = %config.upstream.apis_file.display(),
        cache_capacity = config.cache.capacity,
        tracked_api = %config.tracking.api,
        tracked_endpoint = %config.tracking.endpoint,
        tracked_symbol = %config.tracking.symbol,
        collect_enabled = config.collection.enabled,
        collect_interval_secs = config.collection.interval.as_secs(),
        write_behind = config.history.write_behind,
        "Configuration loaded"
    );
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

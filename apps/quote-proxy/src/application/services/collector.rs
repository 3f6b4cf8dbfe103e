//! Collection Job
//!
//! Scheduler handler that fetches the tracked instrument through the proxy
//! executor. Recording the history point is the executor's side effect; the
//! job only reports success or failure to the scheduler.

use anyhow::{Context, bail};
use async_trait::async_trait;

use crate::application::services::{JobHandler, ProxyExecutor};

/// Id of the collection job for `symbol`.
#[must_use]
pub fn collection_job_id(symbol: &str) -> String {
    format!("collect:{symbol}")
}

/// Periodic fetch of the tracked instrument.
#[derive(Debug, Clone)]
pub struct CollectionJob {
    executor: ProxyExecutor,
}

impl CollectionJob {
    /// Create a job over `executor`.
    #[must_use]
    pub const fn new(executor: ProxyExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl JobHandler for CollectionJob {
    async fn run(&self) -> anyhow::Result<()> {
        let Some(result) = self.executor.collect_tracked().await else {
            bail!("no tracked instrument configured");
        };
        let symbol = self
            .executor
            .tracked()
            .map(|tracked| tracked.symbol.as_str())
            .unwrap_or_default();
        result.with_context(|| format!("collecting {symbol}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::application::ports::{
        MockConfigProviderPort, MockTransportPort, TransportError, TransportResponse,
    };
    use crate::application::services::{HistoryLedger, TrackedInstrument};
    use crate::domain::cache::CacheStore;
    use crate::domain::endpoint::{
        AuthDescriptor, EndpointDescriptor, HttpMethod, Params, ParamLocation, RequiredParam,
    };

    fn registry() -> MockConfigProviderPort {
        let mut registry = MockConfigProviderPort::new();
        registry.expect_resolve().returning(|_, _| {
            Some(EndpointDescriptor {
                api: "forex".to_string(),
                name: "quote".to_string(),
                base_url: "https://fx.example.com".to_string(),
                path: "/quote".to_string(),
                method: HttpMethod::Get,
                cache_duration: Duration::ZERO,
                headers: Params::new(),
                required_params: vec![RequiredParam::new("symbol", ParamLocation::Query)],
                auth: AuthDescriptor::None,
            })
        });
        registry
    }

    fn executor(transport: MockTransportPort) -> ProxyExecutor {
        ProxyExecutor::new(
            Arc::new(registry()),
            Arc::new(transport),
            CacheStore::new(4, Duration::ZERO),
            HistoryLedger::in_memory(4),
        )
    }

    #[test]
    fn job_id_names_symbol() {
        assert_eq!(collection_job_id("EURUSD"), "collect:EURUSD");
    }

    #[tokio::test]
    async fn success_records_history() {
        let mut transport = MockTransportPort::new();
        transport
            .expect_send()
            .withf(|request| request.url == "https://fx.example.com/quote?symbol=EURUSD")
            .returning(|_| {
                Ok(TransportResponse {
                    status: 200,
                    body: json!({"bid": 1.1}),
                })
            });
        let executor = executor(transport)
            .with_tracked(TrackedInstrument::new("forex", "quote", "symbol", "EURUSD"));
        let job = CollectionJob::new(executor.clone());

        job.run().await.unwrap();

        assert_eq!(executor.ledger().get_history("EURUSD", None, None).await.len(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_with_context() {
        let mut transport = MockTransportPort::new();
        transport
            .expect_send()
            .returning(|_| Err(TransportError::Network("connection refused".to_string())));
        let executor = executor(transport)
            .with_tracked(TrackedInstrument::new("forex", "quote", "symbol", "EURUSD"));

        let err = CollectionJob::new(executor).run().await.unwrap_err();

        assert_eq!(
            format!("{err:#}"),
            "collecting EURUSD: network error: connection refused"
        );
    }

    #[tokio::test]
    async fn missing_tracked_instrument_fails() {
        let job = CollectionJob::new(executor(MockTransportPort::new()));
        assert!(job.run().await.is_err());
    }
}

//! History Store Port (Driven Port)
//!
//! Optional durable sink for history points. The ledger writes to it
//! behind the in-memory series and never surfaces its failures.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::history::HistoryPoint;

/// Persistent store failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    /// Store could not be opened.
    #[error("failed to open history store: {0}")]
    Open(String),

    /// Write failed.
    #[error("history write failed: {0}")]
    Write(String),

    /// Read failed.
    #[error("history read failed: {0}")]
    Read(String),

    /// Value could not be encoded or decoded.
    #[error("history serialization failed: {0}")]
    Serialization(String),
}

/// Port for durable history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStorePort: Send + Sync {
    /// Whether writes reach a real store.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Append one point for `subject`. A point with an existing timestamp
    /// replaces it.
    async fn append(
        &self,
        subject: &str,
        timestamp_ms: i64,
        value: &Value,
    ) -> Result<(), PersistenceError>;

    /// Points for `subject` within the optional inclusive bounds, ascending.
    async fn query(
        &self,
        subject: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<HistoryPoint>, PersistenceError>;
}

/// Store used when write-behind is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHistoryStore;

#[async_trait]
impl HistoryStorePort for NoOpHistoryStore {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn append(
        &self,
        _subject: &str,
        _timestamp_ms: i64,
        _value: &Value,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn query(
        &self,
        _subject: &str,
        _start_ms: Option<i64>,
        _end_ms: Option<i64>,
    ) -> Result<Vec<HistoryPoint>, PersistenceError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn no_op_store_is_disabled_and_empty() {
        let store = NoOpHistoryStore;

        assert!(!store.is_enabled());
        assert!(store.append("EURUSD", 0, &json!(1.0)).await.is_ok());
        assert!(store.query("EURUSD", None, None).await.unwrap().is_empty());
    }
}

//! Sled-backed history store.
//!
//! Keys are `subject ++ 0x00 ++ timestamp`, the timestamp encoded big-endian
//! with its sign bit flipped so byte order matches numeric order. Values are
//! the JSON-encoded point value.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::ports::{HistoryStorePort, PersistenceError};
use crate::domain::history::HistoryPoint;

const SEPARATOR: u8 = 0;
const TIMESTAMP_LEN: usize = 8;

/// Durable history points in a sled tree.
#[derive(Debug, Clone)]
pub struct SledHistoryStore {
    db: sled::Db,
}

impl SledHistoryStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Open(format!("failed to create directory: {e}")))?;
        }

        let db = sled::open(path).map_err(|e| PersistenceError::Open(e.to_string()))?;
        Ok(Self { db })
    }

    /// Number of stored points across all subjects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

fn key(subject: &str, timestamp_ms: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(subject.len() + 1 + TIMESTAMP_LEN);
    key.extend_from_slice(subject.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(&(timestamp_ms ^ i64::MIN).to_be_bytes());
    key
}

fn timestamp_of(key: &[u8]) -> Result<i64, PersistenceError> {
    let tail = key
        .len()
        .checked_sub(TIMESTAMP_LEN)
        .and_then(|start| key.get(start..))
        .and_then(|bytes| <[u8; TIMESTAMP_LEN]>::try_from(bytes).ok())
        .ok_or_else(|| PersistenceError::Read("truncated history key".to_string()))?;
    Ok(i64::from_be_bytes(tail) ^ i64::MIN)
}

#[async_trait]
impl HistoryStorePort for SledHistoryStore {
    async fn append(
        &self,
        subject: &str,
        timestamp_ms: i64,
        value: &Value,
    ) -> Result<(), PersistenceError> {
        let encoded =
            serde_json::to_vec(value).map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        self.db
            .insert(key(subject, timestamp_ms), encoded)
            .map_err(|e| PersistenceError::Write(e.to_string()))?;

        self.db
            .flush_async()
            .await
            .map_err(|e| PersistenceError::Write(format!("failed to flush: {e}")))?;

        Ok(())
    }

    async fn query(
        &self,
        subject: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<HistoryPoint>, PersistenceError> {
        let from = key(subject, start_ms.unwrap_or(i64::MIN));
        let to = key(subject, end_ms.unwrap_or(i64::MAX));
        if from > to {
            return Ok(Vec::new());
        }

        let mut points = Vec::new();
        for entry in self.db.range(from..=to) {
            let (key, value) = entry.map_err(|e| PersistenceError::Read(e.to_string()))?;
            let value: Value = serde_json::from_slice(&value)
                .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
            points.push(HistoryPoint::new(timestamp_of(&key)?, value));
        }

        Ok(points)
    }
}

//! History Persistence
//!
//! Selects the write-behind target for the history ledger. The sled store
//! is compiled in with the `sled-store` feature.

#[cfg(feature = "sled-store")]
mod sled_store;

use std::sync::Arc;

#[cfg(feature = "sled-store")]
pub use sled_store::SledHistoryStore;

use crate::application::ports::{HistoryStorePort, NoOpHistoryStore, PersistenceError};
use crate::infrastructure::config::HistorySettings;

/// Build the history store described by `settings`.
///
/// # Errors
///
/// Returns `PersistenceError::Open` if write-behind is requested but the
/// store cannot be opened, or the binary was built without a store.
pub fn build_history_store(
    settings: &HistorySettings,
) -> Result<Arc<dyn HistoryStorePort>, PersistenceError> {
    if !settings.write_behind {
        return Ok(Arc::new(NoOpHistoryStore));
    }
    open_store(settings)
}

#[cfg(feature = "sled-store")]
fn open_store(settings: &HistorySettings) -> Result<Arc<dyn HistoryStorePort>, PersistenceError> {
    tracing::info!(path = %settings.db_path.display(), "Opening history store");
    Ok(Arc::new(SledHistoryStore::open(&settings.db_path)?))
}

#[cfg(not(feature = "sled-store"))]
fn open_store(_settings: &HistorySettings) -> Result<Arc<dyn HistoryStorePort>, PersistenceError> {
    Err(PersistenceError::Open(
        "history write-behind requires the `sled-store` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_write_behind_uses_no_op_store() {
        let store = build_history_store(&HistorySettings::default()).unwrap();
        assert!(!store.is_enabled());
    }

    #[cfg(not(feature = "sled-store"))]
    #[test]
    fn write_behind_without_store_is_error() {
        let settings = HistorySettings {
            write_behind: true,
            ..HistorySettings::default()
        };
        assert!(matches!(
            build_history_store(&settings),
            Err(PersistenceError::Open(_))
        ));
    }

    #[cfg(feature = "sled-store")]
    #[test]
    fn write_behind_opens_sled_store() {
        let dir = tempfile::tempdir().unwrap();
        let settings = HistorySettings {
            write_behind: true,
            db_path: dir.path().join("history.sled"),
            ..HistorySettings::default()
        };
        assert!(build_history_store(&settings).unwrap().is_enabled());
    }
}

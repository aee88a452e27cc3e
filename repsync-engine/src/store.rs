//! Persistence collaborator interface.
//!
//! The engine never writes storage itself; it hands finalized session
//! records to a [`SessionStore`] on end and a deletion request on cancel.

use async_trait::async_trait;
use repsync_core::SessionRecord;
use repsync_types::SessionId;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected or failed to write the record.
    #[error("store failed: {0}")]
    Failed(String),
}

/// Receives finalized sessions and deletion requests.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a finalized session record.
    async fn persist(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Discard any trace of a cancelled session.
    async fn discard(&self, session_id: SessionId) -> Result<(), StoreError>;
}

/// A store that drops everything; for tests and embedders that wire
/// persistence elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl SessionStore for NullStore {
    async fn persist(&self, _record: SessionRecord) -> Result<(), StoreError> {
        Ok(())
    }

    async fn discard(&self, _session_id: SessionId) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory store capturing calls for verification in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    records: Vec<SessionRecord>,
    discards: Vec<SessionId>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted records, oldest first.
    pub fn records(&self) -> Vec<SessionRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    /// All discard requests, oldest first.
    pub fn discards(&self) -> Vec<SessionId> {
        self.inner.lock().unwrap().discards.clone()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn persist(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.inner.lock().unwrap().records.push(record);
        Ok(())
    }

    async fn discard(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.inner.lock().unwrap().discards.push(session_id);
        Ok(())
    }
}

// # Memory Document Store
//
// In-memory implementation of DocumentStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and single-process deployments where losing snapshot
// history and pending schedules on restart is acceptable.
//
// ## Crash Behavior
//
// - All snapshots and scheduled changes are lost on restart/crash
// - No recovery possible (state is in-memory only)

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::DocumentTable;
use crate::Error;
use crate::traits::{DocumentStore, Versioned};

/// In-memory document store implementation
///
/// All documents live in a table protected by a RwLock; compare-and-swap
/// runs under the write lock and is therefore atomic.
///
/// # Example
///
/// ```rust,no_run
/// use zoneguard_core::store::MemoryDocumentStore;
/// use zoneguard_core::traits::DocumentStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryDocumentStore::new();
///
///     store.put("SCHEDULED_CHANGES:alice", "[]".to_string(), None).await?;
///     let doc = store.get("SCHEDULED_CHANGES:alice").await?;
///     assert_eq!(doc.map(|d| d.value), Some("[]".to_string()));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<RwLock<DocumentTable>>,
}

impl MemoryDocumentStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(DocumentTable::default())),
        }
    }

    /// Number of stored documents, including ones not yet purged
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(key, Utc::now()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.put(key, value, ttl, Utc::now());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        Ok(guard.compare_and_swap(key, expected_version, value, ttl, Utc::now()))
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.delete(key, Utc::now());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.list(prefix, Utc::now()))
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}

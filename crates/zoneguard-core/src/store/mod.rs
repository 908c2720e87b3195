// # Document Store Implementations
//
// This module provides implementations of the DocumentStore trait for
// different persistence strategies, plus the table both of them share.

pub mod file;
pub mod memory;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::traits::{DocumentStore, Versioned};
use crate::{Error, Result};

/// One stored document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredDocument {
    pub value: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredDocument {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Key → document map with store-wide versioning.
///
/// Versions come from one counter for the whole table, so a document that
/// is deleted and recreated never reuses a version a reader may still hold.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct DocumentTable {
    #[serde(default)]
    next_version: u64,
    #[serde(default)]
    documents: BTreeMap<String, StoredDocument>,
}

impl DocumentTable {
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Versioned> {
        self.documents
            .get(key)
            .filter(|doc| doc.is_live(now))
            .map(|doc| Versioned {
                value: doc.value.clone(),
                version: doc.version,
            })
    }

    /// Every write first drops expired documents, so blobs nobody rewrites
    /// still leave the table once their TTL passes.
    pub fn put(&mut self, key: &str, value: String, ttl: Option<Duration>, now: DateTime<Utc>) {
        self.purge_expired(now);
        self.insert(key, value, ttl, now);
    }

    fn insert(&mut self, key: &str, value: String, ttl: Option<Duration>, now: DateTime<Utc>) {
        self.next_version += 1;
        // A TTL too large to represent never expires
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        self.documents.insert(
            key.to_string(),
            StoredDocument {
                value,
                version: self.next_version,
                expires_at,
            },
        );
    }

    /// Returns whether the swap was applied
    pub fn compare_and_swap(
        &mut self,
        key: &str,
        expected_version: Option<u64>,
        value: Option<String>,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> bool {
        self.purge_expired(now);
        let current = self.get(key, now).map(|doc| doc.version);
        if current != expected_version {
            return false;
        }

        match value {
            Some(value) => self.insert(key, value, ttl, now),
            None => {
                self.documents.remove(key);
            }
        }
        true
    }

    /// Returns whether the table changed, counting purged documents
    pub fn delete(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let purged = self.purge_expired(now);
        self.documents.remove(key).is_some() || purged > 0
    }

    pub fn list(&self, prefix: &str, now: DateTime<Utc>) -> Vec<String> {
        self.documents
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, doc)| doc.is_live(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drop expired documents, returning how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.documents.len();
        self.documents.retain(|_, doc| doc.is_live(now));
        before - self.documents.len()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

/// Open the document store selected by configuration.
///
/// Returns `Ok(None)` when storage is disabled; snapshot and schedule
/// features then report `Error::StorageUnavailable`.
pub async fn open_store(config: &StorageConfig) -> Result<Option<Arc<dyn DocumentStore>>> {
    match config {
        StorageConfig::Memory => Ok(Some(Arc::new(MemoryDocumentStore::new()))),
        StorageConfig::File { path } => {
            if path.is_empty() {
                return Err(Error::config("File storage path cannot be empty"));
            }
            let store = FileDocumentStore::new(path).await?;
            Ok(Some(Arc::new(store)))
        }
        StorageConfig::Disabled => {
            tracing::warn!("Document storage disabled: snapshots and schedules are unavailable");
            Ok(None)
        }
    }
}

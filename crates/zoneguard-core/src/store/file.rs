// # File Document Store
//
// File-based implementation of DocumentStore with crash recovery.
//
// ## Purpose
//
// Keeps snapshots and schedule queues across daemon restarts without an
// external database.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "table": {
//     "next_version": 3,
//     "documents": {
//       "SCHEDULED_CHANGES:alice": {
//         "value": "[...]",
//         "version": 3
//       },
//       "DNS_SNAPSHOT:zone:2025-01-09T12:00:00.000Z": {
//         "value": "{...}",
//         "version": 2,
//         "expires_at": "2025-02-08T12:00:00Z"
//       }
//     }
//   }
// }
// ```

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::DocumentTable;
use crate::Error;
use crate::traits::{DocumentStore, Versioned};

/// Store file format version
/// Used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// File-based document store with crash recovery
///
/// Every mutation is written through to disk before the call returns. The
/// table lock is held across the write, so compare-and-swap is atomic with
/// respect to other callers of the same store instance.
///
/// # Example
///
/// ```rust,no_run
/// use zoneguard_core::store::FileDocumentStore;
/// use zoneguard_core::traits::DocumentStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileDocumentStore::new("/var/lib/zoneguard/store.json").await?;
///     store.put("SCHEDULED_CHANGES:alice", "[]".to_string(), None).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileDocumentStore {
    path: PathBuf,
    table: Arc<Mutex<DocumentTable>>,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    table: DocumentTable,
}

impl FileDocumentStore {
    /// Create or load a file document store
    ///
    /// This will:
    /// 1. Try to load existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with an empty table
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut table = Self::load_with_recovery(&path).await?;
        let purged = table.purge_expired(Utc::now());
        if purged > 0 {
            tracing::debug!("Dropped {} expired documents on load", purged);
        }

        Ok(Self {
            path,
            table: Arc::new(Mutex::new(table)),
        })
    }

    /// Load the table with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If it fails to parse, try loading backup
    /// 3. If backup also fails, start with an empty table
    async fn load_with_recovery(path: &Path) -> Result<DocumentTable, Error> {
        match Self::load(path).await {
            Ok(table) => {
                tracing::debug!("Loaded document store: {} documents", table.len());
                Ok(table)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = sibling(path, "backup");
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(DocumentTable::default());
                }

                match Self::load(&backup_path).await {
                    Ok(table) => {
                        tracing::info!("Recovered store from backup: {} documents", table.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(table)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty store.",
                            backup_err
                        );
                        Ok(DocumentTable::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load the table from file
    async fn load(path: &Path) -> Result<DocumentTable, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(DocumentTable::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("Failed to read store file {}: {}", path.display(), e))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.table)
    }

    /// Write the table to file atomically
    ///
    /// The caller holds the table lock.
    async fn write(&self, table: &DocumentTable) -> Result<(), Error> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            table: table.clone(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store(format!("Failed to serialize store: {}", e)))?;

        let temp_path = sibling(&self.path, "tmp");
        let temp_err = |op: &str, e: std::io::Error| {
            Error::store(format!("Failed to {} {}: {}", op, temp_path.display(), e))
        };

        let mut handle = fs::File::create(&temp_path)
            .await
            .map_err(|e| temp_err("create", e))?;
        handle
            .write_all(json.as_bytes())
            .await
            .map_err(|e| temp_err("write", e))?;
        handle.sync_all().await.map_err(|e| temp_err("sync", e))?;
        drop(handle);

        // Last known good state, used by load_with_recovery
        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, sibling(&self.path, "backup")).await
        {
            tracing::warn!("Failed to create backup: {}", e);
        }

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| temp_err("move into place", e))?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }
}

/// `path` with its extension replaced, next to it on disk
fn sibling(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, Error> {
        let table = self.table.lock().await;
        Ok(table.get(key, Utc::now()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), Error> {
        let mut table = self.table.lock().await;
        table.put(key, value, ttl, Utc::now());
        self.write(&table).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<bool, Error> {
        let mut table = self.table.lock().await;
        if !table.compare_and_swap(key, expected_version, value, ttl, Utc::now()) {
            return Ok(false);
        }
        self.write(&table).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut table = self.table.lock().await;
        if table.delete(key, Utc::now()) {
            self.write(&table).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let table = self.table.lock().await;
        Ok(table.list(prefix, Utc::now()))
    }

    async fn flush(&self) -> Result<(), Error> {
        // Every mutation is written through; rewrite once more so a flush
        // after external tampering restores a consistent file.
        let table = self.table.lock().await;
        self.write(&table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileDocumentStore::new(&path).await.unwrap();
        assert!(store.list("").await.unwrap().is_empty());

        store.put("SCHEDULED_CHANGES:alice", "[]".into(), None).await.unwrap();
        assert!(path.exists());

        // Load new instance and verify persistence
        let store2 = FileDocumentStore::new(&path).await.unwrap();
        let doc = store2.get("SCHEDULED_CHANGES:alice").await.unwrap().unwrap();
        assert_eq!(doc.value, "[]");
    }

    #[tokio::test]
    async fn test_versions_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileDocumentStore::new(&path).await.unwrap();
        store.put("q", "[1]".into(), None).await.unwrap();
        let seen = store.get("q").await.unwrap().unwrap();

        let reopened = FileDocumentStore::new(&path).await.unwrap();
        assert!(
            reopened
                .compare_and_swap("q", Some(seen.version), Some("[1,2]".into()), None)
                .await
                .unwrap()
        );
        assert!(
            !reopened
                .compare_and_swap("q", Some(seen.version), Some("[9]".into()), None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileDocumentStore::new(&path).await.unwrap();
        store.put("k", "first".into(), None).await.unwrap();
        // Second write creates the backup of the first
        store.put("k", "second".into(), None).await.unwrap();

        let backup_path = sibling(&path, "backup");
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FileDocumentStore::new(&path).await.unwrap();
        assert_eq!(
            recovered.get("k").await.unwrap().unwrap().value,
            "first",
            "Backup should contain previous state, not latest"
        );
    }

    #[tokio::test]
    async fn test_expired_documents_dropped_on_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileDocumentStore::new(&path).await.unwrap();
        store
            .put("short", "{}".into(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.put("long", "{}".into(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        let reopened = FileDocumentStore::new(&path).await.unwrap();
        assert_eq!(reopened.list("").await.unwrap(), vec!["long".to_string()]);
    }

    #[tokio::test]
    async fn test_compare_and_swap_removes_expired_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileDocumentStore::new(&path).await.unwrap();
        for i in 0..3 {
            let key = format!("DNS_SNAPSHOT:z1:old{}", i);
            assert!(store
                .compare_and_swap(&key, None, Some("{}".into()), Some(Duration::from_millis(5)))
                .await
                .unwrap());
        }

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store
            .compare_and_swap("DNS_SNAPSHOT:z1:new", None, Some("{}".into()), None)
            .await
            .unwrap());

        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!on_disk.contains("old0"), "expired blob still written: {}", on_disk);
        assert!(on_disk.contains("DNS_SNAPSHOT:z1:new"));
    }
}

// # Document Store Trait
//
// Defines the interface for the persistent key/value collaborator.
//
// ## Purpose
//
// Snapshots, the snapshot index and per-user schedule queues are all JSON
// documents addressed by a composite key:
//
// - `DNS_SNAPSHOT:{zone}:{timestamp}`: immutable snapshot blob
// - `DNS_SNAPSHOTS:{zone}`: snapshot index
// - `SCHEDULED_CHANGES:{username}`: schedule queue
//
// Every document carries a version that changes on each write. Read-modify-
// write callers go through `compare_and_swap` so two writers racing on the
// same document cannot silently drop each other's update.
//
// ## Implementations
//
// - In-memory: `MemoryDocumentStore`
// - File-based: `FileDocumentStore` (single JSON file, atomic rename)

use async_trait::async_trait;
use std::time::Duration;

/// A stored document together with its write version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Raw JSON text
    pub value: String,
    /// Monotonic write version, starts at 1
    pub version: u64,
}

/// Trait for document store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Implement locking/concurrency control for thread safety
/// - ✅ Expire documents whose TTL has elapsed
///
/// ## Forbidden Capabilities
/// - ❌ Interpret document contents (owned by the snapshot and schedule stores)
/// - ❌ Call the DNS provider
/// - ❌ Spawn background tasks (expiry is evaluated lazily on access)
///
/// ## Expiry
///
/// A document whose TTL has elapsed is invisible to every method, exactly
/// as if it had been deleted.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Versioned))`: The document and its version
    /// - `Ok(None)`: No live document under `key`
    /// - `Err(Error)`: Storage error
    async fn get(&self, key: &str) -> Result<Option<Versioned>, crate::Error>;

    /// Unconditionally write a document
    ///
    /// # Parameters
    ///
    /// - `key`: Document key
    /// - `value`: Raw JSON text
    /// - `ttl`: Optional lifetime after which the document expires
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>)
    -> Result<(), crate::Error>;

    /// Atomically replace a document if its version still matches
    ///
    /// # Parameters
    ///
    /// - `expected_version`: `None` means "the document must not exist"
    /// - `value`: New contents; `None` deletes the document
    /// - `ttl`: Lifetime of the new contents
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Swap applied
    /// - `Ok(false)`: Version mismatch, nothing written
    /// - `Err(Error)`: Storage error
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<bool, crate::Error>;

    /// Delete a document (succeeds if it didn't exist)
    async fn delete(&self, key: &str) -> Result<(), crate::Error>;

    /// List live keys starting with `prefix`, sorted ascending
    async fn list(&self, prefix: &str) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

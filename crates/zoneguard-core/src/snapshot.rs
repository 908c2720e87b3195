// # Snapshot Store
//
// Immutable point-in-time copies of a zone's record set.
//
// ## Storage Layout
//
// - blob:  `DNS_SNAPSHOT:{zone}:{timestamp}` holding a [`Snapshot`]
// - index: `DNS_SNAPSHOTS:{zone}` holding `[SnapshotIndexEntry]`
//
// Timestamps are fixed-width UTC with milliseconds, so ascending key order is
// chronological order. Retention eviction relies on this.
//
// ## Failure Model
//
// Capturing runs ahead of a mutation and must never block it. `capture`
// therefore reports a [`CaptureOutcome`] instead of an error; a failed
// capture is logged at `warn` and the mutation proceeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::SnapshotConfig;
use crate::credentials::Credential;
use crate::diff::{RecordDiff, compute_diff};
use crate::model::DnsRecord;
use crate::traits::{DnsProvider, DocumentStore};
use crate::{Error, Result};

/// Key prefix of snapshot blobs
pub const SNAPSHOT_PREFIX: &str = "DNS_SNAPSHOT:";

/// Key prefix of per-zone snapshot indexes
pub const SNAPSHOT_INDEX_PREFIX: &str = "DNS_SNAPSHOTS:";

/// Token selecting the zone's current records as a diff target
pub const LIVE_TARGET: &str = "live";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Attempts at claiming a free blob key when two captures share a millisecond
const KEY_CLAIM_ATTEMPTS: usize = 16;

/// Attempts at updating the index under concurrent writers
const INDEX_CAS_ATTEMPTS: usize = 5;

/// Format an instant the way snapshot keys and schedule fields store it
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `DNS_SNAPSHOT:{zone}:{timestamp}`
pub fn snapshot_key(zone_id: &str, timestamp: &str) -> String {
    format!("{}{}:{}", SNAPSHOT_PREFIX, zone_id, timestamp)
}

fn zone_prefix(zone_id: &str) -> String {
    format!("{}{}:", SNAPSHOT_PREFIX, zone_id)
}

fn index_key(zone_id: &str) -> String {
    format!("{}{}", SNAPSHOT_INDEX_PREFIX, zone_id)
}

/// A zone's complete record set at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: String,
    pub username: String,
    /// Operation that triggered the capture, e.g. `dns.create`
    pub action: String,
    #[serde(default)]
    pub records: Vec<DnsRecord>,
}

/// Snapshot metadata kept in the zone index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotIndexEntry {
    pub key: String,
    pub timestamp: String,
    pub username: String,
    pub action: String,
}

/// One page of snapshot metadata, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub snapshots: Vec<SnapshotIndexEntry>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// Result of a capture attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Stored under `key`; `evicted` older snapshots were removed
    Captured { key: String, evicted: usize },
    /// Nothing was attempted (no store configured)
    Skipped { reason: String },
    /// The capture was attempted and failed
    Failed { error: String },
}

impl CaptureOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured { .. })
    }

    /// Key of the stored snapshot, if one was written
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Captured { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Right-hand side of a diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffTarget {
    /// The zone's current records, fetched from the provider
    Live,
    /// A stored snapshot
    Snapshot(String),
}

impl DiffTarget {
    /// Parse a request value: the literal `live` or a snapshot key
    pub fn parse(value: &str) -> Self {
        if value == LIVE_TARGET {
            Self::Live
        } else {
            Self::Snapshot(value.to_string())
        }
    }
}

impl From<&str> for DiffTarget {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl fmt::Display for DiffTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str(LIVE_TARGET),
            Self::Snapshot(key) => f.write_str(key),
        }
    }
}

/// Fetch a zone's current records, treating any failure as upstream
pub async fn fetch_live_records(
    provider: &dyn DnsProvider,
    credential: &Credential,
    zone_id: &str,
) -> Result<Vec<DnsRecord>> {
    let response = provider
        .list_records(credential, zone_id)
        .await
        .map_err(|e| Error::upstream(format!("Failed to fetch current DNS records: {}", e)))?;

    if !response.success {
        return Err(Error::upstream(format!(
            "Failed to fetch current DNS records: {}",
            response.error_message("Provider API error")
        )));
    }

    Ok(response.result.unwrap_or_default())
}

/// Snapshot capture, retention, listing and diff
pub struct SnapshotStore {
    store: Option<Arc<dyn DocumentStore>>,
    provider: Arc<dyn DnsProvider>,
    config: SnapshotConfig,
}

impl SnapshotStore {
    pub fn new(
        store: Option<Arc<dyn DocumentStore>>,
        provider: Arc<dyn DnsProvider>,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    fn require_store(&self) -> Result<&Arc<dyn DocumentStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::storage_unavailable("Snapshot storage is not configured"))
    }

    /// Capture the zone's live records before a mutation
    pub async fn capture(
        &self,
        credential: &Credential,
        zone_id: &str,
        username: &str,
        action: &str,
    ) -> CaptureOutcome {
        self.capture_at(credential, zone_id, username, action, Utc::now())
            .await
    }

    /// Capture with an explicit clock
    pub async fn capture_at(
        &self,
        credential: &Credential,
        zone_id: &str,
        username: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> CaptureOutcome {
        if self.store.is_none() {
            return skipped();
        }

        let records = match fetch_live_records(self.provider.as_ref(), credential, zone_id).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Snapshot of zone {} before {} failed: {}", zone_id, action, e);
                return CaptureOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        self.record_at(zone_id, username, action, records, now).await
    }

    /// Store records the caller already fetched
    pub async fn record(
        &self,
        zone_id: &str,
        username: &str,
        action: &str,
        records: Vec<DnsRecord>,
    ) -> CaptureOutcome {
        self.record_at(zone_id, username, action, records, Utc::now())
            .await
    }

    /// Store already-fetched records with an explicit clock
    pub async fn record_at(
        &self,
        zone_id: &str,
        username: &str,
        action: &str,
        records: Vec<DnsRecord>,
        now: DateTime<Utc>,
    ) -> CaptureOutcome {
        let Some(store) = &self.store else {
            return skipped();
        };

        match self
            .write_snapshot(store.as_ref(), zone_id, username, action, records, now)
            .await
        {
            Ok((key, evicted)) => {
                tracing::debug!(
                    "Stored snapshot {} ({} evicted by retention)",
                    key,
                    evicted
                );
                CaptureOutcome::Captured { key, evicted }
            }
            Err(e) => {
                tracing::warn!("Snapshot of zone {} before {} failed: {}", zone_id, action, e);
                CaptureOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn write_snapshot(
        &self,
        store: &dyn DocumentStore,
        zone_id: &str,
        username: &str,
        action: &str,
        records: Vec<DnsRecord>,
        now: DateTime<Utc>,
    ) -> Result<(String, usize)> {
        let ttl = self.config.ttl();
        let mut snapshot = Snapshot {
            timestamp: String::new(),
            username: username.to_string(),
            action: action.to_string(),
            records,
        };

        // Blobs are immutable: claim a key nobody holds, moving forward one
        // millisecond on collision
        let mut claimed = None;
        for step in 0..KEY_CLAIM_ATTEMPTS {
            snapshot.timestamp = format_timestamp(now + chrono::Duration::milliseconds(step as i64));
            let key = snapshot_key(zone_id, &snapshot.timestamp);
            let value = serde_json::to_string(&snapshot)?;
            if store
                .compare_and_swap(&key, None, Some(value), Some(ttl))
                .await?
            {
                claimed = Some(key);
                break;
            }
        }
        let key = claimed.ok_or_else(|| {
            Error::store(format!("No free snapshot key for zone {} at {}", zone_id, now))
        })?;

        let evicted = self.enforce_retention(store, zone_id).await?;

        let entry = SnapshotIndexEntry {
            key: key.clone(),
            timestamp: snapshot.timestamp,
            username: username.to_string(),
            action: action.to_string(),
        };
        self.update_index(store, zone_id, entry).await?;

        Ok((key, evicted))
    }

    /// Delete the oldest blobs beyond the retention cap
    async fn enforce_retention(&self, store: &dyn DocumentStore, zone_id: &str) -> Result<usize> {
        let keys = store.list(&zone_prefix(zone_id)).await?;
        let excess = keys.len().saturating_sub(self.config.retention);
        for key in &keys[..excess] {
            store.delete(key).await?;
        }
        Ok(excess)
    }

    /// Add `entry` to the zone index and drop entries whose blob is gone
    async fn update_index(
        &self,
        store: &dyn DocumentStore,
        zone_id: &str,
        entry: SnapshotIndexEntry,
    ) -> Result<()> {
        let index_key = index_key(zone_id);

        for _ in 0..INDEX_CAS_ATTEMPTS {
            let current = store.get(&index_key).await?;
            let live: HashSet<String> = store
                .list(&zone_prefix(zone_id))
                .await?
                .into_iter()
                .collect();

            let mut entries = current
                .as_ref()
                .map(|doc| parse_index(&doc.value))
                .unwrap_or_default();
            entries.retain(|e| live.contains(&e.key) && e.key != entry.key);
            if live.contains(&entry.key) {
                entries.push(entry.clone());
            }
            entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

            let value = serde_json::to_string(&entries)?;
            let expected = current.map(|doc| doc.version);
            if store
                .compare_and_swap(&index_key, expected, Some(value), Some(self.config.ttl()))
                .await?
            {
                return Ok(());
            }
            tracing::debug!("Snapshot index for zone {} changed concurrently, retrying", zone_id);
        }

        // The blob is stored; listing falls back to a prefix scan
        tracing::warn!(
            "Snapshot index for zone {} not updated after {} attempts",
            zone_id,
            INDEX_CAS_ATTEMPTS
        );
        Ok(())
    }

    /// List snapshot metadata for a zone, newest first
    ///
    /// `per_page` is clamped to `[1, max_page_size]`; `page` starts at 1.
    pub async fn list(
        &self,
        zone_id: &str,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> Result<SnapshotPage> {
        let store = self.require_store()?;
        let live_keys = store.list(&zone_prefix(zone_id)).await?;

        let mut entries = match store.get(&index_key(zone_id)).await? {
            Some(doc) => {
                let live: HashSet<&String> = live_keys.iter().collect();
                let mut entries = parse_index(&doc.value);
                entries.retain(|e| live.contains(&e.key));
                entries
            }
            None => Vec::new(),
        };

        if entries.is_empty() {
            entries = self.scan_entries(store.as_ref(), &live_keys).await?;
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let per_page = per_page
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let page = page.unwrap_or(1).max(1);
        let total = entries.len();
        let total_pages = total.div_ceil(per_page).max(1);

        let snapshots = entries
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();

        Ok(SnapshotPage {
            snapshots,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    /// Rebuild metadata from the blobs themselves
    async fn scan_entries(
        &self,
        store: &dyn DocumentStore,
        keys: &[String],
    ) -> Result<Vec<SnapshotIndexEntry>> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(doc) = store.get(key).await? else {
                continue;
            };
            let entry = match serde_json::from_str::<Snapshot>(&doc.value) {
                Ok(snapshot) => SnapshotIndexEntry {
                    key: key.clone(),
                    timestamp: snapshot.timestamp,
                    username: snapshot.username,
                    action: snapshot.action,
                },
                Err(e) => {
                    tracing::debug!("Unreadable snapshot blob {}: {}", key, e);
                    SnapshotIndexEntry {
                        key: key.clone(),
                        timestamp: key_timestamp(key).to_string(),
                        username: "unknown".to_string(),
                        action: "unknown".to_string(),
                    }
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Load one snapshot by key
    pub async fn get_full(&self, key: &str) -> Result<Snapshot> {
        let store = self.require_store()?;
        if !key.starts_with(SNAPSHOT_PREFIX) {
            return Err(Error::not_found(format!("Snapshot not found: {}", key)));
        }

        let doc = store
            .get(key)
            .await?
            .ok_or_else(|| Error::not_found(format!("Snapshot not found: {}", key)))?;

        Ok(serde_json::from_str(&doc.value)?)
    }

    /// Load a snapshot that must belong to `zone_id`
    pub async fn get_for_zone(&self, zone_id: &str, key: &str) -> Result<Snapshot> {
        if !key.starts_with(&zone_prefix(zone_id)) {
            self.require_store()?;
            return Err(Error::not_found(format!(
                "Snapshot {} does not belong to zone {}",
                key, zone_id
            )));
        }
        self.get_full(key).await
    }

    /// Diff a stored snapshot against another snapshot or the live zone
    pub async fn diff(
        &self,
        credential: &Credential,
        zone_id: &str,
        from_key: &str,
        to: &DiffTarget,
    ) -> Result<RecordDiff> {
        let from = self.get_for_zone(zone_id, from_key).await?;

        let to_records = match to {
            DiffTarget::Live => {
                fetch_live_records(self.provider.as_ref(), credential, zone_id).await?
            }
            DiffTarget::Snapshot(key) => self.get_for_zone(zone_id, key).await?.records,
        };

        let diff = compute_diff(&from.records, &to_records);
        tracing::debug!(
            "Diff {} -> {}: {} added, {} removed, {} modified",
            from_key,
            to,
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len()
        );
        Ok(diff)
    }
}

fn skipped() -> CaptureOutcome {
    CaptureOutcome::Skipped {
        reason: "snapshot storage is not configured".to_string(),
    }
}

fn parse_index(raw: &str) -> Vec<SnapshotIndexEntry> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable snapshot index: {}", e);
        Vec::new()
    })
}

/// Timestamp part of `DNS_SNAPSHOT:{zone}:{timestamp}`
fn key_timestamp(key: &str) -> &str {
    key.strip_prefix(SNAPSHOT_PREFIX)
        .and_then(|rest| rest.split_once(':'))
        .map(|(_, timestamp)| timestamp)
        .unwrap_or(key)
}

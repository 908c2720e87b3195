//! Guarded record mutations
//!
//! [`ZoneGuard`] wires the components together and is the entry point used by
//! request handlers. Every record mutation runs the same sequence:
//!
//! ```text
//! capture snapshot ──▶ provider call ──▶ (success) event sink
//! ```
//!
//! The capture never blocks the mutation: without a store it is skipped, and
//! a failed capture is reported alongside the provider's response.

use serde::Serialize;
use std::sync::Arc;

use crate::config::{GuardConfig, ScheduleConfig};
use crate::credentials::{Credential, CredentialChain};
use crate::diff::RecordDiff;
use crate::events::{ChangeEvent, EventSink, dispatch};
use crate::model::{DnsRecord, RecordBody, RecordPatch};
use crate::rollback::{ReconciliationEngine, RollbackReport};
use crate::schedule::{ScheduleExecutor, ScheduleRequest, ScheduleStore, ScheduledChange};
use crate::snapshot::{CaptureOutcome, DiffTarget, Snapshot, SnapshotPage, SnapshotStore};
use crate::traits::{ApiResponse, DnsProvider, DocumentStore};
use crate::{Error, Result};

/// Provider response of a guarded mutation, with the snapshot taken before it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardedResponse<T> {
    pub response: ApiResponse<T>,
    pub snapshot: CaptureOutcome,
}

/// Snapshot-guarded access to a provider's zones
pub struct ZoneGuard {
    provider: Arc<dyn DnsProvider>,
    store: Option<Arc<dyn DocumentStore>>,
    snapshots: Arc<SnapshotStore>,
    schedules: Arc<ScheduleStore>,
    reconciler: ReconciliationEngine,
    events: Arc<dyn EventSink>,
}

impl ZoneGuard {
    /// Build the components over one store and provider
    ///
    /// `store` is `None` when storage is disabled; snapshot, rollback and
    /// schedule operations then fail with `Error::StorageUnavailable`.
    pub fn new(
        store: Option<Arc<dyn DocumentStore>>,
        provider: Arc<dyn DnsProvider>,
        events: Arc<dyn EventSink>,
        config: &GuardConfig,
    ) -> Self {
        let snapshots = Arc::new(SnapshotStore::new(
            store.clone(),
            provider.clone(),
            config.snapshots.clone(),
        ));
        let schedules = Arc::new(ScheduleStore::new(store.clone()));
        let reconciler = ReconciliationEngine::new(provider.clone(), snapshots.clone(), events.clone());

        Self {
            provider,
            store,
            snapshots,
            schedules,
            reconciler,
            events,
        }
    }

    pub fn store(&self) -> Option<&Arc<dyn DocumentStore>> {
        self.store.as_ref()
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn schedules(&self) -> &ScheduleStore {
        &self.schedules
    }

    /// Executor sharing this guard's store, provider and event sink
    pub fn executor(&self, credentials: CredentialChain, config: &ScheduleConfig) -> ScheduleExecutor {
        ScheduleExecutor::new(
            self.schedules.clone(),
            self.provider.clone(),
            credentials,
            self.events.clone(),
            config,
        )
    }

    async fn notify(&self, kind: &str, username: &str, detail: String) {
        dispatch(self.events.as_ref(), ChangeEvent::new(kind, username, detail)).await;
    }

    /// Snapshot the zone, then create a record
    pub async fn create_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        username: &str,
        body: &RecordBody,
    ) -> Result<GuardedResponse<DnsRecord>> {
        let snapshot = self
            .snapshots
            .capture(credential, zone_id, username, "dns.create")
            .await;

        let response = self.provider.create_record(credential, zone_id, body).await?;
        if response.success {
            let detail = format!(
                "{} {} → {} (zone: {})",
                body.record_type,
                body.name,
                body.content.as_deref().unwrap_or_default(),
                zone_id
            );
            tracing::info!("{} created {}", username, detail);
            self.notify("dns.create", username, detail).await;
        }

        Ok(GuardedResponse { response, snapshot })
    }

    /// Snapshot the zone, then patch a record
    pub async fn update_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        username: &str,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<GuardedResponse<DnsRecord>> {
        if record_id.is_empty() {
            return Err(Error::validation("Missing record id"));
        }

        let snapshot = self
            .snapshots
            .capture(credential, zone_id, username, "dns.update")
            .await;

        let response = self
            .provider
            .patch_record(credential, zone_id, record_id, patch)
            .await?;
        if response.success {
            let field = |name: &str| patch.get(name).and_then(|v| v.as_str()).unwrap_or("");
            let detail = format!(
                "{} {} (zone: {}, record: {})",
                field("type"),
                field("name"),
                zone_id,
                record_id
            );
            tracing::info!("{} updated {}", username, detail);
            self.notify("dns.update", username, detail).await;
        }

        Ok(GuardedResponse { response, snapshot })
    }

    /// Snapshot the zone, then delete a record
    pub async fn delete_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        username: &str,
        record_id: &str,
    ) -> Result<GuardedResponse<serde_json::Value>> {
        if record_id.is_empty() {
            return Err(Error::validation("Missing record id"));
        }

        let snapshot = self
            .snapshots
            .capture(credential, zone_id, username, "dns.delete")
            .await;

        let response = self
            .provider
            .delete_record(credential, zone_id, record_id)
            .await?;
        if response.success {
            let detail = format!("record: {} (zone: {})", record_id, zone_id);
            tracing::info!("{} deleted {}", username, detail);
            self.notify("dns.delete", username, detail).await;
        }

        Ok(GuardedResponse { response, snapshot })
    }

    pub async fn list_snapshots(
        &self,
        zone_id: &str,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> Result<SnapshotPage> {
        self.snapshots.list(zone_id, page, per_page).await
    }

    pub async fn get_snapshot(&self, key: &str) -> Result<Snapshot> {
        self.snapshots.get_full(key).await
    }

    pub async fn diff_snapshots(
        &self,
        credential: &Credential,
        zone_id: &str,
        from_key: &str,
        to: &DiffTarget,
    ) -> Result<RecordDiff> {
        self.snapshots.diff(credential, zone_id, from_key, to).await
    }

    pub async fn rollback(
        &self,
        credential: &Credential,
        zone_id: &str,
        snapshot_key: &str,
        username: &str,
    ) -> Result<RollbackReport> {
        if snapshot_key.is_empty() {
            return Err(Error::validation("snapshotKey is required."));
        }
        self.reconciler
            .rollback(credential, zone_id, snapshot_key, username)
            .await
    }

    pub async fn schedule_change(
        &self,
        username: &str,
        request: ScheduleRequest,
    ) -> Result<ScheduledChange> {
        self.schedules.create(username, request).await
    }

    pub async fn list_scheduled(&self, username: &str) -> Result<Vec<ScheduledChange>> {
        self.schedules.list(username).await
    }

    pub async fn cancel_scheduled(&self, username: &str, id: &str) -> Result<()> {
        self.schedules.cancel(username, id).await
    }
}

//! Rollback of a zone to a stored snapshot
//!
//! Reconciliation is split in two so the decision logic can be tested
//! without I/O:
//!
//! - [`plan_rollback`] compares the live records with the target by record id
//!   and yields the operations that converge one to the other.
//! - [`ReconciliationEngine::rollback`] protects the current state with a
//!   snapshot, then executes the plan in the order delete → create → update.
//!
//! Every planned operation is attempted. Failures are collected into
//! [`RollbackError`]s and never abort the remaining operations.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::credentials::Credential;
use crate::events::{ChangeEvent, EventSink, dispatch};
use crate::model::{DnsRecord, RecordBody};
use crate::snapshot::{CaptureOutcome, SnapshotStore, fetch_live_records};
use crate::traits::DnsProvider;
use crate::traits::dns_provider::call_outcome;
use crate::Result;

/// Snapshot action recorded before a rollback mutates anything
pub const ROLLBACK_ACTION: &str = "dns.rollback";

/// A record replaced in place
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub id: String,
    pub target: DnsRecord,
}

/// Operations that converge the live record set to a target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackPlan {
    /// Ids present now but absent from the target
    pub deletes: Vec<String>,
    /// Target records with no live counterpart, or without an id
    pub creates: Vec<DnsRecord>,
    /// Records present on both sides whose restorable fields differ
    pub updates: Vec<RecordUpdate>,
}

impl RollbackPlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty() && self.updates.is_empty()
    }

    /// Number of provider calls the plan needs
    pub fn len(&self) -> usize {
        self.deletes.len() + self.creates.len() + self.updates.len()
    }
}

/// Plan a rollback from `current` to `target`, matching records by id
pub fn plan_rollback(current: &[DnsRecord], target: &[DnsRecord]) -> RollbackPlan {
    let target_ids: HashSet<&str> = target.iter().filter_map(|r| r.id.as_deref()).collect();

    let mut current_by_id: HashMap<&str, &DnsRecord> = HashMap::new();
    let mut plan = RollbackPlan::default();

    for record in current {
        let Some(id) = record.id.as_deref() else {
            continue;
        };
        if current_by_id.insert(id, record).is_some() {
            continue;
        }
        if !target_ids.contains(id) {
            plan.deletes.push(id.to_string());
        }
    }

    let mut seen = HashSet::new();
    for record in target {
        match record.id.as_deref() {
            None => plan.creates.push(record.clone()),
            Some(id) if !seen.insert(id) => {}
            Some(id) => match current_by_id.get(id) {
                None => plan.creates.push(record.clone()),
                Some(live) if !live.same_restorable_state(record) => {
                    plan.updates.push(RecordUpdate {
                        id: id.to_string(),
                        target: record.clone(),
                    });
                }
                Some(_) => {}
            },
        }
    }

    plan
}

/// Which phase an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackAction {
    Delete,
    Create,
    Update,
}

/// A failed rollback operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackError {
    pub action: RollbackAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordBody>,
    pub message: String,
}

/// Outcome of a rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub deleted: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<RollbackError>,
    /// The protective snapshot taken before any mutation
    pub snapshot: CaptureOutcome,
}

impl RollbackReport {
    fn new(snapshot: CaptureOutcome) -> Self {
        Self {
            deleted: 0,
            created: 0,
            updated: 0,
            errors: Vec::new(),
            snapshot,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Restores zones to stored snapshots
pub struct ReconciliationEngine {
    provider: Arc<dyn DnsProvider>,
    snapshots: Arc<SnapshotStore>,
    events: Arc<dyn EventSink>,
}

impl ReconciliationEngine {
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        snapshots: Arc<SnapshotStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider,
            snapshots,
            events,
        }
    }

    /// Converge `zone_id` to the snapshot stored under `snapshot_key`
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable` when no store is configured
    /// - `NotFound` when the snapshot is missing or belongs to another zone
    /// - `Upstream` when the live records cannot be listed
    ///
    /// Individual operation failures do not error; they are listed in the
    /// report.
    pub async fn rollback(
        &self,
        credential: &Credential,
        zone_id: &str,
        snapshot_key: &str,
        username: &str,
    ) -> Result<RollbackReport> {
        let target = self.snapshots.get_for_zone(zone_id, snapshot_key).await?;
        let current = fetch_live_records(self.provider.as_ref(), credential, zone_id).await?;

        let protective = self
            .snapshots
            .record(zone_id, username, ROLLBACK_ACTION, current.clone())
            .await;

        let plan = plan_rollback(&current, &target.records);
        tracing::info!(
            "Rolling back zone {} to {}: {} deletes, {} creates, {} updates",
            zone_id,
            target.timestamp,
            plan.deletes.len(),
            plan.creates.len(),
            plan.updates.len()
        );

        let report = self.execute(credential, zone_id, plan, protective).await;

        let detail = format!(
            "Rolled back zone {} to snapshot {} (deleted: {}, created: {}, updated: {})",
            zone_id, target.timestamp, report.deleted, report.created, report.updated
        );
        if !report.is_clean() {
            tracing::warn!("{} with {} errors", detail, report.errors.len());
        }
        dispatch(
            self.events.as_ref(),
            ChangeEvent::new(ROLLBACK_ACTION, username, detail),
        )
        .await;

        Ok(report)
    }

    async fn execute(
        &self,
        credential: &Credential,
        zone_id: &str,
        plan: RollbackPlan,
        protective: CaptureOutcome,
    ) -> RollbackReport {
        let mut report = RollbackReport::new(protective);

        for id in plan.deletes {
            match call_outcome(self.provider.delete_record(credential, zone_id, &id).await) {
                Ok(()) => report.deleted += 1,
                Err(message) => report.errors.push(RollbackError {
                    action: RollbackAction::Delete,
                    id: Some(id),
                    record: None,
                    message,
                }),
            }
        }

        for record in plan.creates {
            let body = record.to_body();
            match call_outcome(self.provider.create_record(credential, zone_id, &body).await) {
                Ok(()) => report.created += 1,
                Err(message) => report.errors.push(RollbackError {
                    action: RollbackAction::Create,
                    id: None,
                    record: Some(body),
                    message,
                }),
            }
        }

        for update in plan.updates {
            let body = update.target.to_body();
            let result = self
                .provider
                .overwrite_record(credential, zone_id, &update.id, &body)
                .await;
            match call_outcome(result) {
                Ok(()) => report.updated += 1,
                Err(message) => report.errors.push(RollbackError {
                    action: RollbackAction::Update,
                    id: Some(update.id),
                    record: None,
                    message,
                }),
            }
        }

        report
    }
}

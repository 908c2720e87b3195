// # Schedule Store
//
// User-facing operations on a user's own queue: create, list, cancel.
//
// Every write is a read-modify-write of the whole queue document. Writes go
// through `compare_and_swap` on the version that was read, so a concurrent
// sweep or a second request can never silently overwrite an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{ChangeAction, ChangeStatus, SCHEDULE_PREFIX, ScheduledChange, parse_instant, queue_key};
use crate::model::{RecordBody, RecordPatch};
use crate::snapshot::format_timestamp;
use crate::traits::{DocumentStore, Versioned};
use crate::{Error, Result};

/// Attempts at writing a queue under concurrent writers
pub(crate) const QUEUE_CAS_ATTEMPTS: usize = 5;

/// Request to schedule a change, as submitted by a user
///
/// Every field is optional on the wire so that validation can report
/// precisely what is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub zone_name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub record: Option<RecordPatch>,
    #[serde(default)]
    pub record_id: Option<String>,
    /// RFC 3339 instant
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub account_index: Option<u32>,
}

/// Right to enumerate every user's queue.
///
/// Only the executor constructs one.
#[derive(Debug)]
pub struct SweepCapability {
    _private: (),
}

impl SweepCapability {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Check a request and build the pending entry it describes
fn validate(request: ScheduleRequest, now: DateTime<Utc>) -> Result<ScheduledChange> {
    let (Some(zone_id), Some(action), Some(scheduled_at)) = (
        non_empty(&request.zone_id),
        non_empty(&request.action),
        non_empty(&request.scheduled_at),
    ) else {
        return Err(Error::validation(
            "Missing required fields: zoneId, action, scheduledAt",
        ));
    };

    let action: ChangeAction = action.parse()?;

    let scheduled = parse_instant(scheduled_at)
        .ok_or_else(|| Error::validation("Invalid scheduledAt date format."))?;
    if scheduled <= now {
        return Err(Error::validation("scheduledAt must be in the future."));
    }

    if action.needs_record() && request.record.is_none() {
        return Err(Error::validation(
            "Record data is required for create/update actions.",
        ));
    }
    if action == ChangeAction::Create
        && let Some(record) = &request.record
    {
        RecordBody::from_payload(record)
            .map_err(|e| Error::validation(format!("Invalid record data: {}", e)))?;
    }

    if action.needs_record_id() && non_empty(&request.record_id).is_none() {
        return Err(Error::validation(
            "recordId is required for update/delete actions.",
        ));
    }

    Ok(ScheduledChange {
        id: Uuid::new_v4().to_string(),
        zone_id: zone_id.to_string(),
        zone_name: request.zone_name.unwrap_or_default(),
        action,
        record: request.record,
        record_id: request.record_id.filter(|id| !id.is_empty()),
        scheduled_at: format_timestamp(scheduled),
        created_at: format_timestamp(now),
        status: ChangeStatus::Pending,
        executed_at: None,
        error: None,
        account_index: request.account_index.unwrap_or(0),
    })
}

/// Read and parse a queue; a missing document is an empty queue
pub(crate) async fn load_queue(
    store: &dyn DocumentStore,
    username: &str,
) -> Result<(Vec<ScheduledChange>, Option<u64>)> {
    match store.get(&queue_key(username)).await? {
        Some(Versioned { value, version }) => {
            let entries: Vec<serde_json::Value> = serde_json::from_str(&value).map_err(|e| {
                Error::store(format!("Schedule queue for {} is unreadable: {}", username, e))
            })?;
            // A malformed entry is dropped rather than locking the whole queue
            let changes = entries
                .into_iter()
                .filter_map(|entry| match serde_json::from_value::<ScheduledChange>(entry) {
                    Ok(change) => Some(change),
                    Err(e) => {
                        tracing::warn!(
                            "Dropping malformed scheduled change for {}: {}",
                            username, e
                        );
                        None
                    }
                })
                .collect();
            Ok((changes, Some(version)))
        }
        None => Ok((Vec::new(), None)),
    }
}

/// Write a queue if it is still at `expected`; an empty queue is deleted
pub(crate) async fn save_queue(
    store: &dyn DocumentStore,
    username: &str,
    expected: Option<u64>,
    changes: &[ScheduledChange],
) -> Result<bool> {
    let value = if changes.is_empty() {
        None
    } else {
        Some(serde_json::to_string(changes)?)
    };
    if value.is_none() && expected.is_none() {
        return Ok(true);
    }
    store
        .compare_and_swap(&queue_key(username), expected, value, None)
        .await
}

/// Per-user schedule queues
pub struct ScheduleStore {
    store: Option<Arc<dyn DocumentStore>>,
}

impl ScheduleStore {
    pub fn new(store: Option<Arc<dyn DocumentStore>>) -> Self {
        Self { store }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub(crate) fn require_store(&self) -> Result<&Arc<dyn DocumentStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::storage_unavailable("Schedule storage is not configured"))
    }

    /// Validate and append a change to the user's queue
    pub async fn create(&self, username: &str, request: ScheduleRequest) -> Result<ScheduledChange> {
        self.create_at(username, request, Utc::now()).await
    }

    /// Create with an explicit clock
    pub async fn create_at(
        &self,
        username: &str,
        request: ScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<ScheduledChange> {
        let store = self.require_store()?;
        let change = validate(request, now)?;

        for _ in 0..QUEUE_CAS_ATTEMPTS {
            let (mut changes, version) = load_queue(store.as_ref(), username).await?;
            changes.push(change.clone());
            if save_queue(store.as_ref(), username, version, &changes).await? {
                tracing::info!(
                    "Scheduled {} on zone {} for {} at {} ({})",
                    change.action,
                    change.zone_id,
                    username,
                    change.scheduled_at,
                    change.id
                );
                return Ok(change);
            }
            tracing::debug!("Schedule queue for {} changed concurrently, retrying", username);
        }

        Err(Error::store(format!(
            "Schedule queue for {} kept changing; try again",
            username
        )))
    }

    /// The user's pending changes
    pub async fn list(&self, username: &str) -> Result<Vec<ScheduledChange>> {
        let store = self.require_store()?;
        let (changes, _) = load_queue(store.as_ref(), username).await?;
        Ok(changes.into_iter().filter(|c| c.is_pending()).collect())
    }

    /// Remove a pending change
    ///
    /// # Errors
    ///
    /// - `NotFound` when the user has no change with `id`
    /// - `InvalidState` when the change already executed; the queue is left
    ///   unchanged
    pub async fn cancel(&self, username: &str, id: &str) -> Result<()> {
        let store = self.require_store()?;

        for _ in 0..QUEUE_CAS_ATTEMPTS {
            let (mut changes, version) = load_queue(store.as_ref(), username).await?;
            let index = changes
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| Error::not_found("Scheduled change not found"))?;

            if !changes[index].is_pending() {
                return Err(Error::invalid_state("Only pending changes can be cancelled"));
            }

            changes.remove(index);
            if save_queue(store.as_ref(), username, version, &changes).await? {
                tracing::info!("Cancelled scheduled change {} for {}", id, username);
                return Ok(());
            }
        }

        Err(Error::store(format!(
            "Schedule queue for {} kept changing; try again",
            username
        )))
    }

    /// Every user that has a queue
    pub async fn list_owners(&self, _capability: &SweepCapability) -> Result<Vec<String>> {
        let store = self.require_store()?;
        Ok(store
            .list(SCHEDULE_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(SCHEDULE_PREFIX).map(str::to_string))
            .collect())
    }
}

//! Deferred single-record mutations
//!
//! Each user owns one queue document (`SCHEDULED_CHANGES:{username}`) holding
//! a JSON array of [`ScheduledChange`]s. Users add and cancel entries through
//! [`ScheduleStore`]; only [`ScheduleExecutor`] moves an entry out of
//! `pending`, and only the executor can enumerate every user's queue.

pub mod executor;
pub mod store;

pub use executor::{ScheduleExecutor, SweepReport, SweepResult};
pub use store::{ScheduleRequest, ScheduleStore, SweepCapability};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;
use crate::model::RecordPatch;
use crate::snapshot::format_timestamp;

/// Document key prefix for per-user schedule queues
pub const SCHEDULE_PREFIX: &str = "SCHEDULED_CHANGES:";

pub(crate) fn queue_key(username: &str) -> String {
    format!("{}{}", SCHEDULE_PREFIX, username)
}

/// Mutation to perform when the change comes due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// POST a new record
    Create,
    /// PATCH an existing record
    Update,
    /// DELETE an existing record
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn needs_record(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    pub fn needs_record_id(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl FromStr for ChangeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(Error::validation(
                "Invalid action. Must be create, update, or delete.",
            )),
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state; `pending` is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Completed,
    Failed,
}

impl ChangeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One deferred mutation in a user's queue
///
/// Status, execution time and error are read-only outside the crate: the
/// executor is the only writer of a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledChange {
    pub id: String,
    pub zone_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub zone_name: String,
    pub action: ChangeAction,
    /// Record payload for create (full record) or update (changed fields)
    #[serde(default)]
    pub record: Option<RecordPatch>,
    #[serde(default)]
    pub record_id: Option<String>,
    pub scheduled_at: String,
    pub created_at: String,
    status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    executed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub account_index: u32,
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ScheduledChange {
    pub fn status(&self) -> ChangeStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == ChangeStatus::Pending
    }

    pub fn executed_at(&self) -> Option<&str> {
        self.executed_at.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `None` when the stored value does not parse
    pub fn scheduled_time(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.scheduled_at)
    }

    /// Pending and due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.scheduled_time().is_some_and(|at| at <= now)
    }

    /// Terminal and executed more than `max_age` before `now`
    pub(crate) fn is_expired(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.status.is_terminal()
            && self
                .executed_at
                .as_deref()
                .and_then(parse_instant)
                .is_some_and(|at| now - at > max_age)
    }

    /// `pending → completed`; returns whether the transition happened
    pub(crate) fn complete(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = ChangeStatus::Completed;
        self.executed_at = Some(format_timestamp(at));
        self.error = None;
        true
    }

    /// `pending → failed`; returns whether the transition happened
    pub(crate) fn fail(&mut self, message: impl Into<String>, at: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = ChangeStatus::Failed;
        self.executed_at = Some(format_timestamp(at));
        self.error = Some(message.into());
        true
    }
}

pub(crate) fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

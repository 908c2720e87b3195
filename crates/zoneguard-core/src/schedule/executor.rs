//! Scheduled change executor
//!
//! The executor is the unattended half of scheduling. A sweep walks every
//! user's queue and, for each pending entry that is due:
//!
//! 1. resolves a provider credential for `(username, accountIndex)`
//! 2. performs the single mutation (create → POST, update → PATCH,
//!    delete → DELETE)
//! 3. moves the entry to `completed` or `failed`
//!
//! Terminal entries older than the cleanup age are then pruned and the queue
//! is written back. Entries are processed one at a time; nothing fans out.
//!
//! ## Concurrency
//!
//! The `pending` status gate is the only guard against executing an entry
//! twice. The queue write is a compare-and-swap: if a user changed the queue
//! mid-sweep, the executor re-reads it, re-applies its outcomes to entries
//! that are still pending, and tries again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::store::{QUEUE_CAS_ATTEMPTS, SweepCapability, load_queue, save_queue};
use super::{ChangeAction, ChangeStatus, ScheduleStore, ScheduledChange};
use crate::config::ScheduleConfig;
use crate::credentials::CredentialChain;
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, EventSink, dispatch};
use crate::model::RecordBody;
use crate::traits::{DnsProvider, DocumentStore};
use crate::traits::dns_provider::call_outcome;

/// Failure recorded when no credential source knows the queue owner
pub const CREDENTIAL_MISSING: &str = "Could not resolve provider credential for this user/account.";

/// Event emitted for each scheduled change that executed successfully
pub const SCHEDULED_EVENT: &str = "dns.scheduled";

/// Outcome of one executed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResult {
    pub id: String,
    pub username: String,
    pub status: ChangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub processed: usize,
    pub results: Vec<SweepResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed(String),
}

impl Outcome {
    /// Apply to an entry; only pending entries change
    fn apply(&self, change: &mut ScheduledChange, at: DateTime<Utc>) -> bool {
        match self {
            Outcome::Completed => change.complete(at),
            Outcome::Failed(message) => change.fail(message.clone(), at),
        }
    }
}

fn prune(changes: &mut Vec<ScheduledChange>, now: DateTime<Utc>, max_age: chrono::Duration) -> usize {
    let before = changes.len();
    changes.retain(|c| !c.is_expired(now, max_age));
    before - changes.len()
}

/// Executes due scheduled changes across all queues
pub struct ScheduleExecutor {
    schedules: Arc<ScheduleStore>,
    provider: Arc<dyn DnsProvider>,
    credentials: CredentialChain,
    events: Arc<dyn EventSink>,
    cleanup_age: chrono::Duration,
    capability: SweepCapability,
}

impl ScheduleExecutor {
    pub fn new(
        schedules: Arc<ScheduleStore>,
        provider: Arc<dyn DnsProvider>,
        credentials: CredentialChain,
        events: Arc<dyn EventSink>,
        config: &ScheduleConfig,
    ) -> Self {
        Self {
            schedules,
            provider,
            credentials,
            events,
            cleanup_age: config.cleanup_age(),
            capability: SweepCapability::new(),
        }
    }

    /// Execute every due change now
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep with an explicit clock
    ///
    /// A queue that cannot be read is skipped with a warning; the sweep only
    /// errors when the store itself is unavailable.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let store = self.schedules.require_store()?;
        let owners = self.schedules.list_owners(&self.capability).await?;

        let mut report = SweepReport::default();
        for username in owners {
            match self.sweep_queue(store.as_ref(), &username, now).await {
                Ok(results) => report.results.extend(results),
                Err(e) => warn!("Skipping schedule queue of {}: {}", username, e),
            }
        }
        report.processed = report.results.len();

        if report.processed > 0 {
            let failed = report
                .results
                .iter()
                .filter(|r| r.status == ChangeStatus::Failed)
                .count();
            info!(
                "Sweep executed {} scheduled changes ({} failed)",
                report.processed, failed
            );
        } else {
            debug!("Sweep found no due scheduled changes");
        }

        Ok(report)
    }

    async fn sweep_queue(
        &self,
        store: &dyn DocumentStore,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SweepResult>> {
        let (mut changes, version) = load_queue(store, username).await?;

        let mut executed = Vec::new();
        for change in changes.iter_mut().filter(|c| c.is_due(now)) {
            let outcome = self.execute(username, change).await;
            outcome.apply(change, now);
            executed.push((change.id.clone(), outcome));
        }

        let pruned = prune(&mut changes, now, self.cleanup_age);
        if pruned > 0 {
            debug!("Pruned {} finished changes from {}'s queue", pruned, username);
        }

        if !executed.is_empty() || pruned > 0 {
            // The mutations already happened; a lost write is logged, not undone
            if let Err(e) = self
                .persist(store, username, changes, version, &executed, now)
                .await
            {
                error!("Failed to record sweep outcomes for {}: {}", username, e);
            }
        }

        Ok(executed
            .into_iter()
            .map(|(id, outcome)| {
                let (status, error) = match outcome {
                    Outcome::Completed => (ChangeStatus::Completed, None),
                    Outcome::Failed(message) => (ChangeStatus::Failed, Some(message)),
                };
                SweepResult {
                    id,
                    username: username.to_string(),
                    status,
                    error,
                }
            })
            .collect())
    }

    /// Write the queue back, merging with concurrent edits
    async fn persist(
        &self,
        store: &dyn DocumentStore,
        username: &str,
        mut changes: Vec<ScheduledChange>,
        mut version: Option<u64>,
        executed: &[(String, Outcome)],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for _ in 0..QUEUE_CAS_ATTEMPTS {
            if save_queue(store, username, version, &changes).await? {
                return Ok(());
            }
            debug!("Schedule queue for {} changed during sweep, merging", username);

            let (fresh, fresh_version) = load_queue(store, username).await?;
            changes = fresh;
            version = fresh_version;

            let mut changed = false;
            for (id, outcome) in executed {
                if let Some(change) = changes.iter_mut().find(|c| &c.id == id) {
                    changed |= outcome.apply(change, now);
                }
            }
            changed |= prune(&mut changes, now, self.cleanup_age) > 0;
            if !changed {
                return Ok(());
            }
        }

        Err(Error::store(format!(
            "Schedule queue for {} kept changing; outcomes not recorded",
            username
        )))
    }

    async fn execute(&self, username: &str, change: &ScheduledChange) -> Outcome {
        let Some(credential) = self
            .credentials
            .resolve(username, change.account_index)
            .await
        else {
            warn!(
                "No credential for {} (account {}); failing scheduled change {}",
                username, change.account_index, change.id
            );
            return Outcome::Failed(CREDENTIAL_MISSING.to_string());
        };

        let zone_id = change.zone_id.as_str();
        let result = match (change.action, &change.record, change.record_id.as_deref()) {
            (ChangeAction::Create, Some(record), _) => {
                match RecordBody::from_payload(record) {
                    Ok(body) => call_outcome(
                        self.provider.create_record(&credential, zone_id, &body).await,
                    ),
                    Err(e) => Err(format!("Invalid record data: {}", e)),
                }
            }
            (ChangeAction::Update, Some(patch), Some(record_id)) => call_outcome(
                self.provider
                    .patch_record(&credential, zone_id, record_id, patch)
                    .await,
            ),
            (ChangeAction::Delete, _, Some(record_id)) => call_outcome(
                self.provider
                    .delete_record(&credential, zone_id, record_id)
                    .await,
            ),
            (action, _, _) => Err(format!(
                "Scheduled {} is missing its record data or recordId",
                action
            )),
        };

        match result {
            Ok(()) => {
                info!(
                    "Executed scheduled {} on zone {} for {} ({})",
                    change.action, zone_id, username, change.id
                );
                dispatch(
                    self.events.as_ref(),
                    ChangeEvent::new(
                        SCHEDULED_EVENT,
                        username,
                        format!(
                            "Executed scheduled {} on zone {} ({})",
                            change.action, zone_id, change.id
                        ),
                    ),
                )
                .await;
                Outcome::Completed
            }
            Err(message) => {
                warn!(
                    "Scheduled {} on zone {} for {} failed: {}",
                    change.action, zone_id, username, message
                );
                Outcome::Failed(message)
            }
        }
    }

    /// Sweep on a fixed interval until SIGINT/SIGTERM
    pub async fn run(&self, interval: Duration) -> Result<()> {
        self.run_until(interval, shutdown_signal()).await
    }

    /// Sweep on a fixed interval until `shutdown_rx` fires or is dropped
    ///
    /// Used by tests and embedders that manage shutdown themselves.
    pub async fn run_with_shutdown(
        &self,
        interval: Duration,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        self.run_until(interval, async {
            let _ = shutdown_rx.await;
        })
        .await
    }

    async fn run_until<F>(&self, interval: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let store = self.schedules.require_store()?;
        info!("Schedule executor started, sweeping every {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        // Keep running; the next tick retries
                        error!("Sweep failed: {}", e);
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        store.flush().await?;
        info!("Store flushed, schedule executor stopped");
        Ok(())
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

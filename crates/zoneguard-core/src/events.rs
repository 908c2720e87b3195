//! Audit / webhook notification boundary
//!
//! After a mutation succeeds, the core hands a [`ChangeEvent`] to an
//! [`EventSink`]. Delivery is fire-and-forget: a failing sink is logged and
//! never fails the operation that produced the event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Result;

/// Event descriptor handed to audit and webhook collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Event type, e.g. `dns.create`, `dns.rollback`, `dns.scheduled`
    #[serde(rename = "event")]
    pub kind: String,
    pub username: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(kind: impl Into<String>, username: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            username: username.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of change notifications
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> Result<()>;
}

/// Deliver to a sink, logging instead of propagating failure
pub async fn dispatch(sink: &dyn EventSink, event: ChangeEvent) {
    if let Err(e) = sink.notify(&event).await {
        tracing::warn!("Event sink failed for {}: {}", event.kind, e);
    }
}

/// Writes each event to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        tracing::info!(
            event = %event.kind,
            username = %event.username,
            "{}",
            event.detail
        );
        Ok(())
    }
}

/// Forwards events onto a bounded channel for an external consumer.
///
/// When the channel is full the event is dropped with a warning, so a slow
/// consumer can never stall a mutation.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => tracing::warn!(
                "Event channel full, dropping {} event. Drain the receiver faster or pass a larger capacity to ChannelEventSink::new.",
                event.kind
            ),
            Err(mpsc::error::TrySendError::Closed(_)) => tracing::warn!(
                "Event receiver dropped, discarding {} event",
                event.kind
            ),
        }
        Ok(())
    }
}

/// Fans one event out to several sinks (e.g. audit log and webhook)
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        for sink in &self.sinks {
            dispatch(sink.as_ref(), event.clone()).await;
        }
        Ok(())
    }
}

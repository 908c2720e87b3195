// # zoneguard-core
//
// State-safety library for provider-managed DNS zones.
//
// ## Architecture Overview
//
// - **SnapshotStore**: Captures immutable copies of a zone before mutations
// - **Diff engine**: Structured difference between two record sets
// - **ReconciliationEngine**: Rolls a zone back to a stored snapshot
// - **ScheduleStore**: Per-user queues of deferred single mutations
// - **ScheduleExecutor**: Unattended sweep that executes due changes
// - **ZoneGuard**: Snapshot-guarded create/update/delete entry point
//
// ## Seams
//
// - **DnsProvider**: Provider API (Cloudflare lives in its own crate)
// - **DocumentStore**: Persistent JSON documents with TTL and compare-and-swap
// - **CredentialProvider**: Resolves credentials for the unattended sweep
// - **EventSink**: Audit / webhook notification after successful mutations
//
// ## Design Principles
//
// 1. **Never block a mutation on a snapshot**: capture reports an outcome
// 2. **Deterministic reconciliation**: planning is a pure function
// 3. **No lost updates**: shared documents are written by compare-and-swap
// 4. **Library-First**: the daemon is a thin shell over this crate

pub mod config;
pub mod credentials;
pub mod diff;
pub mod error;
pub mod events;
pub mod model;
pub mod rollback;
pub mod schedule;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{GuardConfig, ScheduleConfig, SnapshotConfig, StorageConfig};
pub use credentials::{
    Credential, CredentialChain, CredentialProvider, EnvCredentialProvider,
    StoredCredentialProvider,
};
pub use diff::{ModifiedRecord, RecordDiff, compute_diff};
pub use error::{Error, Result};
pub use events::{ChangeEvent, ChannelEventSink, EventSink, FanoutEventSink, TracingEventSink};
pub use model::{DnsRecord, RecordBody, RecordPatch, RecordSummary};
pub use rollback::{ReconciliationEngine, RollbackError, RollbackPlan, RollbackReport, plan_rollback};
pub use schedule::{
    ChangeAction, ChangeStatus, ScheduleExecutor, ScheduleRequest, ScheduleStore,
    ScheduledChange, SweepReport, SweepResult,
};
pub use service::{GuardedResponse, ZoneGuard};
pub use snapshot::{CaptureOutcome, DiffTarget, Snapshot, SnapshotIndexEntry, SnapshotPage, SnapshotStore};
pub use store::{FileDocumentStore, MemoryDocumentStore, open_store};
pub use traits::{ApiMessage, ApiResponse, DnsProvider, DocumentStore, Versioned};

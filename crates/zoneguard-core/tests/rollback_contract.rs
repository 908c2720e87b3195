//! Contract Test: Rollback
//!
//! Constraints verified:
//! - A zone already equal to the snapshot is left untouched
//! - Operations run in the order delete → create → update
//! - A failed operation is reported and never aborts the others
//! - The pre-rollback state is snapshotted before any mutation

mod common;

use common::*;
use std::sync::Arc;
use zoneguard_core::events::EventSink;
use zoneguard_core::rollback::{ROLLBACK_ACTION, RollbackAction};
use zoneguard_core::snapshot::{CaptureOutcome, SnapshotStore};
use zoneguard_core::traits::DnsProvider;
use zoneguard_core::{DnsRecord, Error, MemoryDocumentStore, ReconciliationEngine, SnapshotConfig};

struct Harness {
    provider: MockDnsProvider,
    sink: RecordingSink,
    snapshots: Arc<SnapshotStore>,
    engine: ReconciliationEngine,
}

fn harness(records: Vec<DnsRecord>) -> Harness {
    let provider = MockDnsProvider::with_records(records);
    let sink = RecordingSink::new();
    let dyn_provider: Arc<dyn DnsProvider> = Arc::new(provider.clone());
    let snapshots = Arc::new(SnapshotStore::new(
        Some(Arc::new(MemoryDocumentStore::new())),
        dyn_provider.clone(),
        SnapshotConfig::default(),
    ));
    let events: Arc<dyn EventSink> = Arc::new(sink.clone());
    let engine = ReconciliationEngine::new(dyn_provider, snapshots.clone(), events);
    Harness {
        provider,
        sink,
        snapshots,
        engine,
    }
}

impl Harness {
    /// Snapshot the current zone and return its key
    async fn checkpoint(&self) -> String {
        let outcome = self
            .snapshots
            .capture_at(&token(), ZONE, "alice", "dns.update", base_time())
            .await;
        outcome.key().expect("checkpoint captured").to_string()
    }
}

#[tokio::test]
async fn rollback_to_identical_state_is_a_no_op() {
    let h = harness(vec![
        a_record("r1", "www", "1.1.1.1"),
        a_record("r2", "api", "2.2.2.2"),
    ]);
    let key = h.checkpoint().await;
    h.provider.clear_calls();

    let report = h.engine.rollback(&token(), ZONE, &key, "alice").await.unwrap();

    assert_eq!((report.deleted, report.created, report.updated), (0, 0, 0));
    assert!(report.errors.is_empty());
    assert!(report.snapshot.is_captured(), "protective snapshot is taken");
    assert!(h.provider.mutation_calls().is_empty());
    assert_eq!(h.provider.calls(), vec!["list"], "live records listed exactly once");
}

#[tokio::test]
async fn rollback_converges_in_delete_create_update_order() {
    let h = harness(vec![
        a_record("r1", "www", "1.1.1.1"),
        a_record("r2", "api", "2.2.2.2"),
    ]);
    let key = h.checkpoint().await;
    let target = h.provider.records();

    // Drift: r1 edited, r2 deleted, r3 added
    h.provider.set_records(vec![
        a_record("r1", "www", "9.9.9.9"),
        a_record("r3", "mail", "3.3.3.3"),
    ]);
    h.provider.clear_calls();

    let report = h.engine.rollback(&token(), ZONE, &key, "alice").await.unwrap();

    assert_eq!((report.deleted, report.created, report.updated), (1, 1, 1));
    assert!(report.is_clean());
    assert_eq!(
        h.provider.mutation_calls(),
        vec!["delete:r3", "create:api", "overwrite:r1"]
    );

    let live = h.provider.records();
    assert_eq!(live.len(), 2);
    assert_eq!(live[0], target[0], "r1 restored in place");
    assert_eq!(live[1].name, "api");
    assert_eq!(live[1].content, "2.2.2.2");
}

#[tokio::test]
async fn failures_are_collected_and_execution_continues() {
    let h = harness(vec![a_record("r1", "www", "1.1.1.1")]);
    let key = h.checkpoint().await;

    h.provider.set_records(vec![
        a_record("r1", "www", "9.9.9.9"),
        a_record("r2", "old", "2.2.2.2"),
        a_record("r3", "older", "3.3.3.3"),
    ]);
    h.provider.fail_call("delete:r2");
    h.provider.clear_calls();

    let report = h.engine.rollback(&token(), ZONE, &key, "alice").await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].action, RollbackAction::Delete);
    assert_eq!(report.errors[0].id.as_deref(), Some("r2"));
    assert_eq!(report.errors[0].message, "Record does not exist.");
    assert_eq!(
        h.provider.mutation_calls(),
        vec!["delete:r2", "delete:r3", "overwrite:r1"]
    );
}

#[tokio::test]
async fn transport_failures_carry_their_message() {
    let h = harness(Vec::new());
    let key = h.checkpoint().await;

    h.provider.set_records(vec![a_record("r1", "www", "1.1.1.1")]);
    h.provider.fail_transport(true);

    let report = h.engine.rollback(&token(), ZONE, &key, "alice").await.unwrap();

    assert_eq!(report.deleted, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].message.contains("connection reset by peer"));
}

#[tokio::test]
async fn protective_snapshot_holds_pre_rollback_state() {
    let h = harness(vec![a_record("r1", "www", "1.1.1.1")]);
    let key = h.checkpoint().await;

    let drifted = vec![a_record("r1", "www", "9.9.9.9")];
    h.provider.set_records(drifted.clone());

    let report = h.engine.rollback(&token(), ZONE, &key, "bob").await.unwrap();
    let CaptureOutcome::Captured { key: protective, .. } = &report.snapshot else {
        panic!("expected a protective snapshot, got {:?}", report.snapshot);
    };

    let stored = h.snapshots.get_full(protective).await.unwrap();
    assert_eq!(stored.records, drifted);
    assert_eq!(stored.action, ROLLBACK_ACTION);
    assert_eq!(stored.username, "bob");

    // Rolling back to the protective snapshot undoes the rollback
    let undo = h.engine.rollback(&token(), ZONE, protective, "bob").await.unwrap();
    assert_eq!(undo.updated, 1);
    assert_eq!(h.provider.records(), drifted);
}

#[tokio::test]
async fn rollback_emits_event_even_with_errors() {
    let h = harness(Vec::new());
    let key = h.checkpoint().await;
    h.provider.set_records(vec![a_record("r1", "www", "1.1.1.1")]);
    h.provider.fail_call("delete:r1");

    let report = h.engine.rollback(&token(), ZONE, &key, "alice").await.unwrap();
    assert!(!report.is_clean());

    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ROLLBACK_ACTION);
    assert_eq!(events[0].username, "alice");
    assert!(events[0].detail.contains(ZONE));
}

#[tokio::test]
async fn listing_failure_aborts_before_any_mutation() {
    let h = harness(vec![a_record("r1", "www", "1.1.1.1")]);
    let key = h.checkpoint().await;
    h.provider.fail_listing(true);

    let err = h.engine.rollback(&token(), ZONE, &key, "alice").await.unwrap_err();

    assert!(matches!(err, Error::Upstream(_)));
    assert!(h.provider.mutation_calls().is_empty());
    assert!(h.sink.events().is_empty());
    let page = h.snapshots.list(ZONE, None, None).await.unwrap();
    assert_eq!(page.total, 1, "no protective snapshot without live records");
}

#[tokio::test]
async fn missing_or_foreign_snapshot_is_not_found() {
    let h = harness(vec![a_record("r1", "www", "1.1.1.1")]);
    let key = h.checkpoint().await;

    let missing = h
        .engine
        .rollback(&token(), ZONE, "DNS_SNAPSHOT:zone-1:2000-01-01T00:00:00.000Z", "alice")
        .await
        .unwrap_err();
    assert!(matches!(missing, Error::NotFound(_)));

    let foreign = h
        .engine
        .rollback(&token(), "zone-2", &key, "alice")
        .await
        .unwrap_err();
    assert!(matches!(foreign, Error::NotFound(_)));

    assert!(h.provider.mutation_calls().is_empty());
}

//! Test doubles and common utilities for contract tests
//!
//! The mock provider keeps an in-memory zone so tests can assert on the
//! resulting record set as well as on the calls that produced it.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zoneguard_core::events::{ChangeEvent, EventSink};
use zoneguard_core::model::{DnsRecord, RecordBody, RecordPatch};
use zoneguard_core::traits::{ApiResponse, DnsProvider};
use zoneguard_core::{Credential, Error, Result};

/// A mock DnsProvider backed by an in-memory zone
#[derive(Clone, Default)]
pub struct MockDnsProvider {
    /// Current records of the (single) zone
    records: Arc<Mutex<Vec<DnsRecord>>>,
    /// Every call in order, e.g. `delete:r1`
    calls: Arc<Mutex<Vec<String>>>,
    /// Calls (same format as `calls`) answered with `success: false`
    api_failures: Arc<Mutex<HashSet<String>>>,
    /// Fail listing with `success: false`
    list_fails: Arc<AtomicBool>,
    /// Fail every mutation at the transport level
    transport_fails: Arc<AtomicBool>,
    /// Create/overwrite bodies exactly as they would go on the wire
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    next_id: Arc<AtomicUsize>,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<DnsRecord>) -> Self {
        let provider = Self::new();
        provider.set_records(records);
        provider
    }

    pub fn set_records(&self, records: Vec<DnsRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than listing
    pub fn mutation_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "list")
            .collect()
    }

    pub fn sent_bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().unwrap().clone()
    }

    fn keep_body(&self, body: &RecordBody) {
        let wire = serde_json::to_value(body).unwrap();
        self.bodies.lock().unwrap().push(wire);
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Answer `call` (e.g. `delete:r2`) with an API error
    pub fn fail_call(&self, call: &str) {
        self.api_failures.lock().unwrap().insert(call.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.list_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transport(&self, fail: bool) {
        self.transport_fails.store(fail, Ordering::SeqCst);
    }

    /// Log the call and decide whether it fails
    fn begin(&self, call: String) -> Option<std::result::Result<(), Error>> {
        let failing = self.api_failures.lock().unwrap().contains(&call);
        self.calls.lock().unwrap().push(call);
        if self.transport_fails.load(Ordering::SeqCst) {
            return Some(Err(Error::http("connection reset by peer")));
        }
        failing.then_some(Ok(()))
    }
}

fn api_error<T>() -> ApiResponse<T> {
    ApiResponse::failure("Record does not exist.")
}

fn from_body(body: &RecordBody, id: String) -> DnsRecord {
    let mut record: DnsRecord =
        serde_json::from_value(serde_json::to_value(body).unwrap()).unwrap();
    record.id = Some(id);
    record
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    async fn list_records(
        &self,
        _credential: &Credential,
        _zone_id: &str,
    ) -> Result<ApiResponse<Vec<DnsRecord>>> {
        self.calls.lock().unwrap().push("list".to_string());
        if self.list_fails.load(Ordering::SeqCst) {
            return Ok(ApiResponse::failure("Authentication error"));
        }
        Ok(ApiResponse::ok(self.records()))
    }

    async fn create_record(
        &self,
        _credential: &Credential,
        _zone_id: &str,
        body: &RecordBody,
    ) -> Result<ApiResponse<DnsRecord>> {
        self.keep_body(body);
        match self.begin(format!("create:{}", body.name)) {
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => return Ok(api_error()),
            None => {}
        }
        let id = format!("gen-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = from_body(body, id);
        self.records.lock().unwrap().push(record.clone());
        Ok(ApiResponse::ok(record))
    }

    async fn overwrite_record(
        &self,
        _credential: &Credential,
        _zone_id: &str,
        record_id: &str,
        body: &RecordBody,
    ) -> Result<ApiResponse<DnsRecord>> {
        self.keep_body(body);
        match self.begin(format!("overwrite:{}", record_id)) {
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => return Ok(api_error()),
            None => {}
        }
        let mut records = self.records.lock().unwrap();
        let Some(slot) = records.iter_mut().find(|r| r.id.as_deref() == Some(record_id)) else {
            return Ok(api_error());
        };
        *slot = from_body(body, record_id.to_string());
        Ok(ApiResponse::ok(slot.clone()))
    }

    async fn patch_record(
        &self,
        _credential: &Credential,
        _zone_id: &str,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<ApiResponse<DnsRecord>> {
        match self.begin(format!("patch:{}", record_id)) {
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => return Ok(api_error()),
            None => {}
        }
        let mut records = self.records.lock().unwrap();
        let Some(slot) = records.iter_mut().find(|r| r.id.as_deref() == Some(record_id)) else {
            return Ok(api_error());
        };
        let mut value = serde_json::to_value(&*slot).unwrap();
        for (field, new_value) in patch {
            value[field] = new_value.clone();
        }
        *slot = serde_json::from_value(value).unwrap();
        Ok(ApiResponse::ok(slot.clone()))
    }

    async fn delete_record(
        &self,
        _credential: &Credential,
        _zone_id: &str,
        record_id: &str,
    ) -> Result<ApiResponse<serde_json::Value>> {
        match self.begin(format!("delete:{}", record_id)) {
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => return Ok(api_error()),
            None => {}
        }
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id.as_deref() != Some(record_id));
        if records.len() == before {
            return Ok(api_error());
        }
        Ok(ApiResponse::ok(serde_json::json!({ "id": record_id })))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// An EventSink that keeps every event
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub const ZONE: &str = "zone-1";

pub fn token() -> Credential {
    Credential::api_token("test-token")
}

pub fn a_record(id: &str, name: &str, content: &str) -> DnsRecord {
    DnsRecord::new("A", name, content).with_id(id)
}

/// Fixed reference instant for clock-driven tests
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

pub fn hours(h: i64) -> chrono::Duration {
    chrono::Duration::hours(h)
}

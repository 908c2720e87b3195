// # DNS Provider Trait
//
// Defines the interface for reading and mutating a zone's records via a
// provider API.
//
// ## Implementations
//
// - Cloudflare: `zoneguard-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use zoneguard_core::DnsProvider;
//
// let listing = provider.list_records(&credential, "zone-id").await?;
// if listing.success {
//     for record in listing.result.unwrap_or_default() {
//         println!("{} {} {}", record.record_type, record.name, record.content);
//     }
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;
use crate::model::{DnsRecord, RecordBody, RecordPatch};

/// One message from a provider's `errors` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// Response envelope `{success, result?, errors?}`
///
/// Everything above the provider normalizes on `success` and the first
/// error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
}

impl<T> ApiResponse<T> {
    /// A successful envelope carrying `result`
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            result: Some(result),
            errors: Vec::new(),
        }
    }

    /// A failed envelope carrying a single error message
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            errors: vec![ApiMessage::new(message)],
        }
    }

    /// `errors[0].message`, if the provider sent one
    pub fn first_error(&self) -> Option<&str> {
        self.errors
            .first()
            .map(|e| e.message.as_str())
            .filter(|m| !m.is_empty())
    }

    /// Error text to record for a failed call
    pub fn error_message(&self, fallback: &str) -> String {
        self.first_error().unwrap_or(fallback).to_string()
    }
}

/// Error text recorded when a failed envelope carries no message
pub const API_ERROR_FALLBACK: &str = "Provider API error";

/// Collapse one provider call into `Ok` on success or the error text to record
pub(crate) fn call_outcome<T>(result: Result<ApiResponse<T>, crate::Error>) -> Result<(), String> {
    match result {
        Ok(response) if response.success => Ok(()),
        Ok(response) => Err(response.error_message(API_ERROR_FALLBACK)),
        Err(e) => Err(e.to_string()),
    }
}

/// Trait for DNS provider implementations
///
/// Each method performs the provider call for exactly one operation and
/// reports the provider's envelope as-is. Transport failures (connection,
/// timeout, unparseable body) are returned as `Err`; API-level failures are
/// `Ok` with `success == false`.
///
/// # Trust Level: Untrusted
///
/// Providers perform HTTP calls to their own endpoints only. They do not
/// retry, do not touch the document store, and do not snapshot. Retention,
/// reconciliation and scheduling decisions belong to the core.
///
/// The credential is passed per call: the same provider instance serves
/// interactive requests and the scheduled sweep, which resolves a different
/// credential for every queue owner.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// List every record in the zone, following pagination to the end
    async fn list_records(
        &self,
        credential: &Credential,
        zone_id: &str,
    ) -> Result<ApiResponse<Vec<DnsRecord>>, crate::Error>;

    /// Create a record; the provider assigns the id
    async fn create_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        body: &RecordBody,
    ) -> Result<ApiResponse<DnsRecord>, crate::Error>;

    /// Replace a record's contents (PUT semantics)
    async fn overwrite_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        record_id: &str,
        body: &RecordBody,
    ) -> Result<ApiResponse<DnsRecord>, crate::Error>;

    /// Partially update a record (PATCH semantics); only the given fields change
    async fn patch_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<ApiResponse<DnsRecord>, crate::Error>;

    /// Delete a record
    async fn delete_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        record_id: &str,
    ) -> Result<ApiResponse<serde_json::Value>, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

// # Cloudflare DNS Provider
//
// Cloudflare API v4 implementation of `zoneguard_core::DnsProvider`.
//
// ## Behavior
//
// - One HTTP request per operation, except listing which follows
//   `result_info.total_pages` until the zone is exhausted
// - The credential is passed per call; the provider holds no secrets
// - Cloudflare's `{success, result, errors}` envelope is returned as-is
// - A non-envelope body falls back on the HTTP status code
// - Transport failures (connect, timeout, unreadable body) are `Err`
// - Dry-run mode performs reads but only logs mutations
//
// ## Trust Level: Untrusted (DNS Provider)
//
// No retries, no caching, no background tasks, no document store access.
// Snapshots, reconciliation and scheduling belong to the core.
//
// ## API Reference
//
// - List DNS Records: GET `/zones/:zone_id/dns_records?page=&per_page=`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Overwrite DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`
// - Update DNS Record: PATCH `/zones/:zone_id/dns_records/:record_id`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use zoneguard_core::model::{DnsRecord, RecordBody, RecordPatch};
use zoneguard_core::traits::{ApiResponse, DnsProvider};
use zoneguard_core::{Credential, Error, Result};

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest page size the records endpoint accepts
const LIST_PAGE_SIZE: u32 = 100;

/// Stop following pagination past this many pages
const MAX_LIST_PAGES: u32 = 1000;

/// Pagination block of a list response
#[derive(Debug, Default, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

/// Cloudflare DNS provider
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the provider will:
/// - Perform every GET request (listing, record lookup for PATCH)
/// - Log the intended POST/PUT/PATCH/DELETE payload
/// - **NOT** modify DNS records, and answer as if the call succeeded
pub struct CloudflareProvider {
    client: reqwest::Client,
    base_url: String,
    dry_run: bool,
}

impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("base_url", &self.base_url)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a provider against the public API
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built (e.g. no TLS
    /// backend is available).
    pub fn new(dry_run: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            dry_run,
        })
    }

    /// Create a provider that mutates records
    pub fn new_live() -> Result<Self> {
        Self::new(false)
    }

    /// Create a provider that only logs mutations
    pub fn new_dry_run() -> Result<Self> {
        Self::new(true)
    }

    /// Point the provider at another API root (proxies, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn records_url(&self, zone_id: &str) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, zone_id)
    }

    fn record_url(&self, zone_id: &str, record_id: &str) -> String {
        format!("{}/{}", self.records_url(zone_id), record_id)
    }

    /// Send one request and read the whole body
    async fn execute(
        &self,
        request: RequestBuilder,
        credential: &Credential,
        what: &str,
    ) -> Result<(StatusCode, String)> {
        if credential.is_empty() {
            return Err(Error::credential("Cloudflare credential is empty"));
        }

        let response = authorize(request, credential)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("{} failed: {}", what, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("{} failed reading response: {}", what, e)))?;

        tracing::debug!("Cloudflare {} answered {}", what, status);
        Ok((status, body))
    }

    async fn list_page(
        &self,
        credential: &Credential,
        zone_id: &str,
        page: u32,
    ) -> Result<(ApiResponse<Vec<DnsRecord>>, Option<u32>)> {
        let request = self
            .client
            .get(self.records_url(zone_id))
            .query(&[("page", page), ("per_page", LIST_PAGE_SIZE)]);
        let (status, body) = self.execute(request, credential, "list records").await?;

        let envelope = parse_envelope(status, &body)?;
        let total_pages = serde_json::from_str::<PageInfo>(&body)
            .ok()
            .and_then(|info| info.result_info)
            .and_then(|info| info.total_pages);
        Ok((envelope, total_pages))
    }

    async fn get_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        record_id: &str,
    ) -> Result<ApiResponse<DnsRecord>> {
        let request = self.client.get(self.record_url(zone_id, record_id));
        let (status, body) = self.execute(request, credential, "get record").await?;
        parse_envelope(status, &body)
    }
}

/// Attach authentication headers for `credential`
fn authorize(request: RequestBuilder, credential: &Credential) -> RequestBuilder {
    match credential {
        Credential::ApiToken(token) => request.bearer_auth(token),
        Credential::GlobalKey { email, key } => request
            .header("X-Auth-Email", email)
            .header("X-Auth-Key", key),
    }
}

/// Parse Cloudflare's envelope, falling back on the HTTP status
///
/// A 2xx response that is not an envelope is an `Err`: we cannot tell what
/// happened. Any other status becomes a failed envelope.
fn parse_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<ApiResponse<T>> {
    match serde_json::from_str::<ApiResponse<T>>(body) {
        Ok(envelope) => Ok(envelope),
        Err(e) if status.is_success() => Err(Error::provider(
            "cloudflare",
            format!("Unparseable response ({}): {}", status, e),
        )),
        Err(_) => Ok(ApiResponse::failure(status_message(status))),
    }
}

fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 | 403 => format!(
            "Authentication failed: Invalid API token or insufficient permissions. Status: {}",
            status
        ),
        404 => format!("Zone or record not found. Status: {}", status),
        409 => format!("Conflict: Record is being updated by another process. Status: {}", status),
        429 => format!("Rate limit exceeded. Please retry later. Status: {}", status),
        500..=599 => format!("Cloudflare server error (transient). Status: {}", status),
        _ => format!("Cloudflare request failed. Status: {}", status),
    }
}

/// The record a successful dry-run call would have produced
fn dry_run_record(body: &RecordBody, id: Option<&str>) -> Result<DnsRecord> {
    let mut record: DnsRecord = serde_json::from_value(serde_json::to_value(body)?)?;
    record.id = id.map(str::to_string);
    Ok(record)
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn list_records(
        &self,
        credential: &Credential,
        zone_id: &str,
    ) -> Result<ApiResponse<Vec<DnsRecord>>> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let (envelope, total_pages) = self.list_page(credential, zone_id, page).await?;
            if !envelope.success {
                // A partial listing is never reported as the zone
                return Ok(ApiResponse {
                    success: false,
                    result: None,
                    errors: envelope.errors,
                });
            }

            let batch = envelope.result.unwrap_or_default();
            let exhausted = batch.is_empty();
            records.extend(batch);

            match total_pages {
                Some(total) if page < total && !exhausted && page < MAX_LIST_PAGES => page += 1,
                _ => break,
            }
        }

        tracing::debug!("Listed {} records in zone {} ({} pages)", records.len(), zone_id, page);
        Ok(ApiResponse::ok(records))
    }

    async fn create_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        body: &RecordBody,
    ) -> Result<ApiResponse<DnsRecord>> {
        let url = self.records_url(zone_id);
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send POST request to {} with payload: {}",
                url,
                serde_json::to_string(body)?
            );
            return Ok(ApiResponse::ok(dry_run_record(body, None)?));
        }

        tracing::info!("Creating {} record {} in zone {}", body.record_type, body.name, zone_id);
        let request = self.client.post(url).json(body);
        let (status, text) = self.execute(request, credential, "create record").await?;
        parse_envelope(status, &text)
    }

    async fn overwrite_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        record_id: &str,
        body: &RecordBody,
    ) -> Result<ApiResponse<DnsRecord>> {
        let url = self.record_url(zone_id, record_id);
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send PUT request to {} with payload: {}",
                url,
                serde_json::to_string(body)?
            );
            return Ok(ApiResponse::ok(dry_run_record(body, Some(record_id))?));
        }

        tracing::info!("Overwriting record {} in zone {}", record_id, zone_id);
        let request = self.client.put(url).json(body);
        let (status, text) = self.execute(request, credential, "overwrite record").await?;
        parse_envelope(status, &text)
    }

    async fn patch_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<ApiResponse<DnsRecord>> {
        let url = self.record_url(zone_id, record_id);
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send PATCH request to {} with payload: {}",
                url,
                serde_json::to_string(patch)?
            );
            let current = self.get_record(credential, zone_id, record_id).await?;
            let Some(record) = current.result.filter(|_| current.success) else {
                return Ok(ApiResponse {
                    success: false,
                    result: None,
                    errors: current.errors,
                });
            };
            let mut merged = serde_json::to_value(record)?;
            if let Some(fields) = merged.as_object_mut() {
                fields.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            return Ok(ApiResponse::ok(serde_json::from_value(merged)?));
        }

        tracing::info!("Patching record {} in zone {}", record_id, zone_id);
        let request = self.client.patch(url).json(patch);
        let (status, text) = self.execute(request, credential, "patch record").await?;
        parse_envelope(status, &text)
    }

    async fn delete_record(
        &self,
        credential: &Credential,
        zone_id: &str,
        record_id: &str,
    ) -> Result<ApiResponse<serde_json::Value>> {
        let url = self.record_url(zone_id, record_id);
        if self.dry_run {
            tracing::info!("[DRY-RUN] Would send DELETE request to {}", url);
            return Ok(ApiResponse::ok(serde_json::json!({ "id": record_id })));
        }

        tracing::info!("Deleting record {} in zone {}", record_id, zone_id);
        let request = self.client.delete(url);
        let (status, text) = self.execute(request, credential, "delete record").await?;
        parse_envelope(status, &text)
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(request: &reqwest::Request, name: &str) -> Option<String> {
        request
            .headers()
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[test]
    fn test_api_token_is_sent_as_bearer() {
        let client = reqwest::Client::new();
        let request = authorize(client.get("https://example.test/"), &Credential::api_token("tok"))
            .build()
            .unwrap();

        assert_eq!(header(&request, "authorization").as_deref(), Some("Bearer tok"));
        assert!(header(&request, "x-auth-key").is_none());
    }

    #[test]
    fn test_global_key_uses_email_headers() {
        let client = reqwest::Client::new();
        let credential = Credential::global_key("ops@example.com", "k3y");
        let request = authorize(client.get("https://example.test/"), &credential)
            .build()
            .unwrap();

        assert_eq!(header(&request, "x-auth-email").as_deref(), Some("ops@example.com"));
        assert_eq!(header(&request, "x-auth-key").as_deref(), Some("k3y"));
        assert!(header(&request, "authorization").is_none());
    }

    #[test]
    fn test_urls() {
        let provider = CloudflareProvider::new_live()
            .unwrap()
            .with_base_url("http://localhost:8080/client/v4/");

        assert_eq!(
            provider.records_url("z1"),
            "http://localhost:8080/client/v4/zones/z1/dns_records"
        );
        assert_eq!(
            provider.record_url("z1", "r1"),
            "http://localhost:8080/client/v4/zones/z1/dns_records/r1"
        );
    }

    #[test]
    fn test_envelope_is_returned_as_is() {
        let body = r#"{"success": false, "errors": [{"code": 81057, "message": "Record already exists."}], "result": null}"#;
        let envelope: ApiResponse<DnsRecord> = parse_envelope(StatusCode::BAD_REQUEST, body).unwrap();

        assert!(!envelope.success);
        assert_eq!(envelope.first_error(), Some("Record already exists."));
    }

    #[test]
    fn test_non_envelope_error_falls_back_on_status() {
        let envelope: ApiResponse<DnsRecord> =
            parse_envelope(StatusCode::TOO_MANY_REQUESTS, "<html>slow down</html>").unwrap();
        assert!(!envelope.success);
        assert!(envelope.first_error().unwrap().starts_with("Rate limit exceeded"));

        let envelope: ApiResponse<DnsRecord> =
            parse_envelope(StatusCode::FORBIDDEN, "").unwrap();
        assert!(envelope.first_error().unwrap().starts_with("Authentication failed"));
    }

    #[test]
    fn test_unparseable_success_is_transport_error() {
        let result: Result<ApiResponse<DnsRecord>> = parse_envelope(StatusCode::OK, "not json");
        assert!(matches!(result, Err(Error::Provider { .. })));
    }

    #[test]
    fn test_list_page_info() {
        let body = r#"{
            "success": true,
            "errors": [],
            "result": [{"id": "r1", "type": "A", "name": "www.example.com", "content": "1.1.1.1", "ttl": 1}],
            "result_info": {"page": 1, "per_page": 100, "count": 1, "total_count": 101, "total_pages": 2}
        }"#;
        let info: PageInfo = serde_json::from_str(body).unwrap();
        assert_eq!(info.result_info.and_then(|i| i.total_pages), Some(2));

        let envelope: ApiResponse<Vec<DnsRecord>> = parse_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(envelope.result.unwrap()[0].id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_dry_run_mutations_do_not_touch_the_network() {
        // Unroutable base URL: any real request would fail
        let provider = CloudflareProvider::new_dry_run()
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let credential = Credential::api_token("tok");
        let body = DnsRecord::new("A", "www.example.com", "1.2.3.4").to_body();

        let created = provider.create_record(&credential, "z1", &body).await.unwrap();
        assert!(created.success);
        assert_eq!(created.result.unwrap().content, "1.2.3.4");

        let replaced = provider
            .overwrite_record(&credential, "z1", "r1", &body)
            .await
            .unwrap();
        assert_eq!(replaced.result.unwrap().id.as_deref(), Some("r1"));

        let deleted = provider.delete_record(&credential, "z1", "r1").await.unwrap();
        assert!(deleted.success);
    }

    #[tokio::test]
    async fn test_empty_credential_is_rejected() {
        let provider = CloudflareProvider::new_live()
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        let err = provider
            .list_records(&Credential::api_token(""), "z1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
    }

    #[test]
    fn test_debug_has_no_secrets() {
        let provider = CloudflareProvider::new_dry_run().unwrap();
        let debug_str = format!("{:?}", provider);

        assert!(debug_str.contains("CloudflareProvider"));
        assert!(debug_str.contains("dry_run: true"));
        assert!(provider.is_dry_run());
    }

    #[test]
    fn test_provider_name() {
        let provider = CloudflareProvider::new_live().unwrap();
        assert_eq!(provider.provider_name(), "cloudflare");
    }
}

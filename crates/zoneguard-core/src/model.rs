//! Record data model shared by snapshots, diffs, rollbacks and schedules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single DNS resource record as returned by the provider.
///
/// `id` is provider-assigned and changes when a record is recreated.
/// Fields this crate does not interpret are kept in `extra` so a snapshot
/// stays a faithful copy of the provider's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub record_type: String,

    pub name: String,

    #[serde(default)]
    pub content: String,

    /// Time-to-live in seconds; `1` means "automatic"
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,

    /// Structured payload for SRV/CAA/LOC style records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_ttl() -> u32 {
    1
}

impl DnsRecord {
    /// Create a record with automatic TTL and no optional fields
    pub fn new(
        record_type: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            record_type: record_type.into(),
            name: name.into(),
            content: content.into(),
            ttl: default_ttl(),
            proxied: None,
            priority: None,
            data: None,
            extra: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_proxied(mut self, proxied: bool) -> Self {
        self.proxied = Some(proxied);
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Grouping key used by the diff engine
    pub fn diff_key(&self) -> String {
        format!("{}::{}", self.record_type, self.name)
    }

    /// Whether two records agree on every field a rollback can restore.
    ///
    /// `data` is re-submitted on create/update but is not compared: providers
    /// derive `content` from it.
    pub fn same_restorable_state(&self, other: &DnsRecord) -> bool {
        self.record_type == other.record_type
            && self.name == other.name
            && self.content == other.content
            && self.ttl == other.ttl
            && self.proxied == other.proxied
            && self.priority == other.priority
    }

    /// Payload for create/update calls
    pub fn to_body(&self) -> RecordBody {
        RecordBody {
            record_type: self.record_type.clone(),
            name: self.name.clone(),
            content: Some(self.content.clone()),
            ttl: Some(self.ttl),
            proxied: self.proxied,
            priority: self.priority,
            data: self.data.clone(),
            extra: Map::new(),
        }
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            record_type: self.record_type.clone(),
            name: self.name.clone(),
            content: self.content.clone(),
            ttl: self.ttl,
            proxied: self.proxied,
            priority: self.priority,
        }
    }
}

/// Body submitted to the provider when creating or replacing a record.
///
/// Absent fields stay absent on the wire so the provider applies its own
/// defaults; anything else the caller supplied (`comment`, `tags`, ...)
/// travels in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBody {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordBody {
    /// Body for a record payload supplied as raw JSON fields
    pub fn from_payload(payload: &RecordPatch) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(payload.clone()))
    }
}

/// Partial record submitted with PATCH semantics
pub type RecordPatch = Map<String, Value>;

/// Projection of a record reported in diffs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
}

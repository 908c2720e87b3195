//! Configuration types for zoneguard
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main zoneguard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Document store backing snapshots and schedules
    #[serde(default)]
    pub storage: StorageConfig,

    /// Snapshot retention and paging
    #[serde(default)]
    pub snapshots: SnapshotConfig,

    /// Scheduled change execution
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl GuardConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.storage.validate()?;
        self.snapshots.validate()?;
        self.schedule.validate()?;
        Ok(())
    }
}

/// Document store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// JSON file store
    File {
        /// Path to the store file
        path: String,
    },

    /// No store; snapshot and schedule features are unavailable
    Disabled,
}

impl StorageConfig {
    /// Validate the storage configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StorageConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("File storage path cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the storage type name
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::File { .. } => "file",
            StorageConfig::Disabled => "disabled",
        }
    }
}

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Maximum snapshots kept per zone; older ones are evicted first
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Days a snapshot lives before the store expires it
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,

    /// Page size used when a listing request gives none
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Upper bound for a requested page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.retention == 0 {
            return Err(crate::Error::config("Snapshot retention must be > 0"));
        }
        if self.ttl_days == 0 {
            return Err(crate::Error::config("Snapshot TTL must be > 0 days"));
        }
        if self.max_page_size == 0 {
            return Err(crate::Error::config("Snapshot max page size must be > 0"));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(crate::Error::config(format!(
                "Snapshot default page size must be between 1 and {}",
                self.max_page_size
            )));
        }
        Ok(())
    }

    /// Snapshot lifetime as a store TTL
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days.saturating_mul(24 * 60 * 60))
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            ttl_days: default_ttl_days(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Ten years
const MAX_CLEANUP_AGE_HOURS: u64 = 24 * 365 * 10;

/// Schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hours a completed or failed entry is kept before pruning
    #[serde(default = "default_cleanup_age_hours")]
    pub cleanup_age_hours: u64,

    /// Interval between sweeps when running as a daemon (in seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Identity allowed to fall back to environment credentials
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.sweep_interval_secs == 0 {
            return Err(crate::Error::config("Sweep interval must be > 0"));
        }
        if self.admin_username.is_empty() {
            return Err(crate::Error::config("Admin username cannot be empty"));
        }
        if self.cleanup_age_hours > MAX_CLEANUP_AGE_HOURS {
            return Err(crate::Error::config(format!(
                "Cleanup age cannot exceed {} hours",
                MAX_CLEANUP_AGE_HOURS
            )));
        }
        Ok(())
    }

    pub fn cleanup_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cleanup_age_hours.min(MAX_CLEANUP_AGE_HOURS) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cleanup_age_hours: default_cleanup_age_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            admin_username: default_admin_username(),
        }
    }
}

fn default_retention() -> usize {
    20
}

fn default_ttl_days() -> u64 {
    30
}

fn default_page_size() -> usize {
    10
}

fn default_max_page_size() -> usize {
    100
}

fn default_cleanup_age_hours() -> u64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_admin_username() -> String {
    "admin".to_string()
}

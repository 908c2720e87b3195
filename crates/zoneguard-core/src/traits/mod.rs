//! Core traits for zoneguard
//!
//! This module defines the abstract interfaces at the system's seams.
//!
//! - [`DnsProvider`]: Read and mutate zone records via provider APIs
//! - [`DocumentStore`]: Persistent JSON documents with TTL and compare-and-swap

pub mod dns_provider;
pub mod document_store;

pub use dns_provider::{ApiMessage, ApiResponse, DnsProvider};
pub use document_store::{DocumentStore, Versioned};

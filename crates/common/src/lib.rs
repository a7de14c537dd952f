//! Common types and utilities shared across Palisade crates.
//!
//! This crate holds the small building blocks that both the configuration
//! layer and the certificate lifecycle core depend on:
//!
//! - [`ids`] - validated identifier newtypes ([`DomainSet`], [`RecordKey`])
//! - [`backoff`] - bounded exponential backoff for retryable operations

pub mod backoff;
pub mod ids;

pub use backoff::{retry, Backoff};
pub use ids::{DomainSet, DomainSetError, RecordKey};

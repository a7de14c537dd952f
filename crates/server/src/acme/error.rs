//! Error types for the certificate lifecycle core.

use palisade_common::{DomainSetError, RecordKey};
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage layout error: {0}")]
    Layout(String),
}

/// Errors surfaced by certificate lifecycle operations.
///
/// `CaUnavailable` is retried with bounded backoff inside the protocol
/// driver before it reaches a caller; everything else surfaces directly.
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Caller supplied an empty or malformed domain set. Not retried.
    #[error("invalid domain set: {0}")]
    InvalidDomainSet(#[from] DomainSetError),

    /// An issuance or renewal for the same domain set is already running.
    /// Callers should poll status instead of retrying.
    #[error("operation already in flight for {0}")]
    AlreadyInFlight(RecordKey),

    /// The certificate authority could not be reached or kept failing
    /// after the retry budget was exhausted.
    #[error("certificate authority unavailable: {0}")]
    CaUnavailable(String),

    /// Domain ownership proof was rejected or timed out. Not retried
    /// automatically; repeated attempts risk authority-side rate limits.
    #[error("domain validation failed: {0}")]
    ValidationFailed(String),

    /// Local storage failure. The record is left in its prior stable state.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// No record exists for the requested domain set.
    #[error("no certificate record for {0}")]
    NotFound(RecordKey),
}

impl AcmeError {
    /// Short machine-readable tag for logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidDomainSet(_) => "invalid_domain_set",
            Self::AlreadyInFlight(_) => "already_in_flight",
            Self::CaUnavailable(_) => "ca_unavailable",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Persistence(_) => "persistence_error",
            Self::NotFound(_) => "not_found",
        }
    }
}

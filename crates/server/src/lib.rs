//! Palisade Server Library
//!
//! Automated TLS certificate lifecycle management for edge servers.
//!
//! This library provides the components for obtaining, persisting, and
//! renewing certificates from an ACME authority:
//!
//! - **Storage**: Crash-safe on-disk records with `meta.json` as commit point
//! - **Challenges**: HTTP-01 token staging and DNS-01 TXT record management
//! - **Protocol**: Order lifecycle against the authority, with retry/backoff
//! - **Orchestration**: Single-flight state machine per domain set
//! - **Scheduling**: Background renewal sweeps with jitter
//! - **Serving Policy**: Listener eligibility and the plain-HTTP gate
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use palisade_server::acme::{AcmeClient, CertificateManager, CertificateStore};
//!
//! let store = Arc::new(CertificateStore::new("/var/lib/palisade/acme".as_ref())?);
//! let manager = Arc::new(CertificateManager::new(store, driver, false));
//! manager.resume()?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod api;
pub mod policy;
pub mod tls;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Certificate lifecycle
pub use acme::{
    AcmeClient, AcmeError, CertificateManager, CertificateRecord, CertificateStatus,
    CertificateStore, RenewalScheduler,
};

// Challenge responder (shared with the HTTP listener)
pub use acme::{ChallengeResponder, ACME_CHALLENGE_PREFIX};

// Management handlers
pub use api::{ApiError, ManagementApi};

// Serving policy
pub use policy::{HttpDecision, HttpPolicy};
pub use tls::{serving_mode, ServingMode};

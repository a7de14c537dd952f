//! Automated certificate lifecycle management.
//!
//! Obtains and renews TLS certificates from Let's Encrypt and compatible
//! authorities, with durable storage and a background renewal loop.
//!
//! # Architecture
//!
//! - [`CertificateManager`] - Orchestrator; owns the per-record state
//!   machine and the single-flight guarantee
//! - [`AcmeClient`] - [`AcmeDriver`] implementation over `instant-acme`
//! - [`ChallengeResponder`] - Stages ownership proofs (http-01 tokens,
//!   dns-01 TXT records) for the authority's validators
//! - [`CertificateStore`] - Crash-safe persistence of records, material,
//!   and the shared account credential
//! - [`RenewalScheduler`] - Background task that renews expiring records
//!
//! # Issuance Flow
//!
//! 1. [`CertificateManager::issue`] takes the record's flight lock and
//!    moves it to `pending`
//! 2. The driver opens an order; the authority answers with one challenge
//!    per domain
//! 3. [`ChallengeResponder`] stages each proof; the driver signals
//!    readiness and polls until validation settles (`validating`)
//! 4. The driver submits a signing request and downloads the chain
//!    (`finalizing`)
//! 5. [`CertificateStore`] persists material, then commits metadata; the
//!    record becomes `issued` and a transition event fires

mod challenge;
mod client;
mod dns;
mod error;
mod manager;
mod scheduler;
mod storage;

pub use challenge::{ChallengeProof, ChallengeResponder, ACME_CHALLENGE_PREFIX};
pub use client::{AcmeClient, AcmeDriver, AcmeOrder};
pub use dns::{ApiDnsProvider, DnsProvider, DNS_API_TOKEN_ENV};
pub use error::{AcmeError, StorageError};
pub use manager::{CertificateManager, TransitionEvent};
pub use scheduler::RenewalScheduler;
pub use storage::{
    CertificateRecord, CertificateStatus, CertificateStore, IssuedMaterial,
    StoredAccountCredentials,
};

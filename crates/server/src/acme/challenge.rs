//! Domain-validation challenge staging.
//!
//! Makes ownership proofs discoverable while an order is being validated:
//! http-01 tokens are held in memory for the plain-HTTP listener to serve at
//! `/.well-known/acme-challenge/<token>`, dns-01 values are provisioned
//! through a [`DnsProvider`]. The responder has no issuance-flow knowledge;
//! the protocol driver stages and unstages proofs around validation.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, trace};

use super::dns::DnsProvider;
use super::error::AcmeError;

/// http-01 challenge path prefix.
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// One staged ownership proof.
#[derive(Debug, Clone)]
pub enum ChallengeProof {
    Http {
        token: String,
        key_authorization: String,
    },
    Dns {
        domain: String,
        txt_value: String,
    },
}

/// Stages and serves validation proofs.
///
/// # Thread Safety
///
/// Token maps use `DashMap` so the request path can look proofs up without
/// locking against an in-flight issuance.
pub struct ChallengeResponder {
    /// http-01: token -> key authorization.
    http_tokens: Arc<DashMap<String, String>>,
    /// dns-01: domain -> provider record id, for cleanup.
    dns_records: Arc<DashMap<String, String>>,
    dns_provider: Option<Arc<dyn DnsProvider>>,
}

impl ChallengeResponder {
    pub fn new(dns_provider: Option<Arc<dyn DnsProvider>>) -> Self {
        Self {
            http_tokens: Arc::new(DashMap::new()),
            dns_records: Arc::new(DashMap::new()),
            dns_provider,
        }
    }

    /// Make a proof discoverable by the authority's validator.
    pub async fn stage(&self, proof: &ChallengeProof) -> Result<(), AcmeError> {
        match proof {
            ChallengeProof::Http {
                token,
                key_authorization,
            } => {
                debug!(token = %token, "Staging http-01 challenge");
                self.http_tokens
                    .insert(token.clone(), key_authorization.clone());
                Ok(())
            }
            ChallengeProof::Dns { domain, txt_value } => {
                let provider = self.dns_provider.as_ref().ok_or_else(|| {
                    AcmeError::ValidationFailed(
                        "dns-01 challenge requested but no DNS provider is configured".to_string(),
                    )
                })?;

                let record_name = format!("_acme-challenge.{domain}");
                debug!(record = %record_name, "Staging dns-01 challenge");
                let record_id = provider.add_txt_record(&record_name, txt_value).await?;
                self.dns_records.insert(domain.clone(), record_id);
                Ok(())
            }
        }
    }

    /// Remove a staged proof. Idempotent; called on success and failure
    /// paths alike so no validation artifact outlives its order.
    pub async fn unstage(&self, proof: &ChallengeProof) {
        match proof {
            ChallengeProof::Http { token, .. } => {
                if self.http_tokens.remove(token).is_some() {
                    debug!(token = %token, "Unstaged http-01 challenge");
                }
            }
            ChallengeProof::Dns { domain, .. } => {
                let Some((_, record_id)) = self.dns_records.remove(domain) else {
                    return;
                };
                let Some(provider) = self.dns_provider.as_ref() else {
                    return;
                };
                if let Err(e) = provider.remove_record(&record_id).await {
                    // Cleanup failure is logged, not propagated; the order
                    // outcome is already decided at this point.
                    error!(
                        domain = %domain,
                        id = %record_id,
                        error = %e,
                        "Failed to remove dns-01 TXT record"
                    );
                }
            }
        }
    }

    /// Key authorization for a staged http-01 token.
    pub fn response_for(&self, token: &str) -> Option<String> {
        let result = self.http_tokens.get(token).map(|v| v.clone());
        if result.is_some() {
            trace!(token = %token, "Challenge token found");
        } else {
            trace!(token = %token, "Challenge token not found");
        }
        result
    }

    /// Whether an http-01 token is currently staged.
    pub fn has_staged_token(&self, token: &str) -> bool {
        self.http_tokens.contains_key(token)
    }

    /// Extract the token from a request path.
    ///
    /// Returns `Some(token)` if the path is under the challenge prefix.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// Number of staged proofs across both challenge types.
    pub fn pending_count(&self) -> usize {
        self.http_tokens.len() + self.dns_records.len()
    }

    /// Drop all staged http-01 tokens. Called during shutdown.
    pub fn clear(&self) {
        let count = self.http_tokens.len();
        self.http_tokens.clear();
        if count > 0 {
            debug!(cleared = count, "Cleared staged challenges");
        }
    }
}

impl Default for ChallengeResponder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Clone for ChallengeResponder {
    fn clone(&self) -> Self {
        Self {
            http_tokens: Arc::clone(&self.http_tokens),
            dns_records: Arc::clone(&self.dns_records),
            dns_provider: self.dns_provider.clone(),
        }
    }
}

impl std::fmt::Debug for ChallengeResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeResponder")
            .field("staged_http_tokens", &self.http_tokens.len())
            .field("staged_dns_records", &self.dns_records.len())
            .field("has_dns_provider", &self.dns_provider.is_some())
            .finish()
    }
}

//! ACME protocol driver.
//!
//! Translates a manager-level issuance intent into the authority-facing
//! exchange: account bootstrap, order placement, challenge fulfillment,
//! finalization, certificate download. Everything nondeterministic (network
//! round trips, polling) lives behind the [`AcmeDriver`] and [`AcmeOrder`]
//! traits so the manager's state machine stays deterministic and testable
//! with a substituted driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, Order, OrderStatus,
};
use palisade_common::{retry, Backoff, DomainSet};
use palisade_config::ChallengeKind;
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{debug, info};

use super::challenge::{ChallengeProof, ChallengeResponder};
use super::error::{AcmeError, StorageError};
use super::storage::{CertificateStore, IssuedMaterial, StoredAccountCredentials};

/// Deadline for the whole challenge-validation phase of one order.
const VALIDATION_DEADLINE: Duration = Duration::from_secs(120);

/// Cap on the order-status poll interval.
const POLL_INTERVAL_CAP: Duration = Duration::from_secs(10);

/// Attempts to download the chain after the order turns valid.
const CERTIFICATE_POLL_ATTEMPTS: u32 = 5;

/// Opens orders with the certificate authority.
#[async_trait]
pub trait AcmeDriver: Send + Sync {
    /// Open an order covering the given domain set.
    ///
    /// Transient failures are retried internally with bounded backoff
    /// before `CaUnavailable` is surfaced.
    async fn request_order(
        &self,
        domains: &DomainSet,
        challenge_type: ChallengeKind,
    ) -> Result<Box<dyn AcmeOrder>, AcmeError>;
}

/// One in-flight order.
#[async_trait]
pub trait AcmeOrder: Send {
    /// Stage ownership proofs, signal readiness, and poll until every
    /// authorization settles or the validation deadline elapses.
    ///
    /// Staged proofs are unstaged before this returns, on success and
    /// failure alike.
    async fn fulfill_challenges(&mut self) -> Result<(), AcmeError>;

    /// Submit the signing request and download the issued chain.
    async fn finalize(&mut self) -> Result<IssuedMaterial, AcmeError>;
}

/// instant-acme backed driver.
pub struct AcmeClient {
    contact_email: String,
    directory_url: String,
    store: Arc<CertificateStore>,
    responder: Arc<ChallengeResponder>,
    account: OnceCell<Account>,
    backoff: Backoff,
    validation_deadline: Duration,
}

impl AcmeClient {
    pub fn new(
        store: Arc<CertificateStore>,
        responder: Arc<ChallengeResponder>,
        contact_email: &str,
        directory_url: &str,
    ) -> Self {
        Self {
            contact_email: contact_email.to_string(),
            directory_url: directory_url.to_string(),
            store,
            responder,
            account: OnceCell::new(),
            backoff: Backoff::default(),
            validation_deadline: VALIDATION_DEADLINE,
        }
    }

    /// Directory URL for the chosen environment, honoring an override.
    pub fn directory_url_for(staging: bool, override_url: Option<&str>) -> String {
        match override_url {
            Some(url) => url.to_string(),
            None if staging => LetsEncrypt::Staging.url().to_string(),
            None => LetsEncrypt::Production.url().to_string(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_validation_deadline(mut self, deadline: Duration) -> Self {
        self.validation_deadline = deadline;
        self
    }

    /// Lazily bootstrap the shared account: reuse persisted credentials or
    /// register a fresh account and persist its credentials.
    async fn account(&self) -> Result<&Account, AcmeError> {
        self.account
            .get_or_try_init(|| self.init_account())
            .await
    }

    async fn init_account(&self) -> Result<Account, AcmeError> {
        if let Some(json) = self.store.load_credentials_json()? {
            let credentials: AccountCredentials =
                serde_json::from_str(&json).map_err(StorageError::from)?;
            let account = Account::from_credentials(credentials).await.map_err(|e| {
                AcmeError::CaUnavailable(format!("failed to restore account: {e}"))
            })?;
            debug!("Restored existing CA account from storage");
            return Ok(account);
        }

        let contact = format!("mailto:{}", self.contact_email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| AcmeError::CaUnavailable(format!("failed to create account: {e}")))?;

        let json = serde_json::to_string(&credentials).map_err(StorageError::from)?;
        self.store.save_credentials_json(&json)?;
        self.store.save_account(&StoredAccountCredentials {
            contact_email: Some(self.contact_email.clone()),
            created: Utc::now(),
        })?;

        info!(directory = %self.directory_url, "Registered new CA account");
        Ok(account)
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory_url", &self.directory_url)
            .field("has_account", &self.account.initialized())
            .finish()
    }
}

#[async_trait]
impl AcmeDriver for AcmeClient {
    async fn request_order(
        &self,
        domains: &DomainSet,
        challenge_type: ChallengeKind,
    ) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let account = self.account().await?;

        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|d| Identifier::Dns(d.to_string()))
            .collect();

        let order = retry(self.backoff, "create_order", || async {
            account
                .new_order(&NewOrder {
                    identifiers: &identifiers,
                })
                .await
        })
        .await
        .map_err(|e| AcmeError::CaUnavailable(format!("failed to create order: {e}")))?;

        info!(domains = %domains, challenge = challenge_type.as_str(), "Opened certificate order");

        Ok(Box::new(LiveOrder {
            order,
            domains: domains.clone(),
            challenge_type,
            responder: Arc::clone(&self.responder),
            staged: Vec::new(),
            deadline: self.validation_deadline,
        }))
    }
}

/// An order in progress against a live authority.
struct LiveOrder {
    order: Order,
    domains: DomainSet,
    challenge_type: ChallengeKind,
    responder: Arc<ChallengeResponder>,
    staged: Vec<ChallengeProof>,
    deadline: Duration,
}

fn ca_error(context: &str, e: instant_acme::Error) -> AcmeError {
    AcmeError::CaUnavailable(format!("{context}: {e}"))
}

#[async_trait]
impl AcmeOrder for LiveOrder {
    async fn fulfill_challenges(&mut self) -> Result<(), AcmeError> {
        let deadline = self.deadline;
        let outcome = match tokio::time::timeout(deadline, self.drive_validation()).await {
            Ok(result) => result,
            Err(_) => Err(AcmeError::ValidationFailed(format!(
                "validation did not complete within {}s",
                deadline.as_secs()
            ))),
        };

        // Proofs never outlive validation, whatever the outcome.
        for proof in std::mem::take(&mut self.staged) {
            self.responder.unstage(&proof).await;
        }

        outcome
    }

    async fn finalize(&mut self) -> Result<IssuedMaterial, AcmeError> {
        let key_pair = KeyPair::generate().map_err(|e| {
            AcmeError::ValidationFailed(format!("failed to generate certificate key: {e}"))
        })?;

        let mut params = CertificateParams::new(self.domains.as_slice().to_vec())
            .map_err(|e| AcmeError::ValidationFailed(format!("invalid signing request: {e}")))?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params.serialize_request(&key_pair).map_err(|e| {
            AcmeError::ValidationFailed(format!("failed to serialize signing request: {e}"))
        })?;

        self.order
            .finalize(csr.der().as_ref())
            .await
            .map_err(|e| ca_error("failed to finalize order", e))?;

        // Wait for the authority to process the finalization.
        let mut delay = Duration::from_secs(1);
        loop {
            self.order
                .refresh()
                .await
                .map_err(|e| ca_error("failed to refresh order", e))?;
            match self.order.state().status {
                OrderStatus::Valid => break,
                OrderStatus::Pending | OrderStatus::Ready | OrderStatus::Processing => {
                    sleep(delay).await;
                    delay = (delay * 2).min(POLL_INTERVAL_CAP);
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::ValidationFailed(
                        "order became invalid during finalization".to_string(),
                    ));
                }
            }
        }

        let mut tries = 0;
        let cert_chain_pem = loop {
            tries += 1;
            if tries > CERTIFICATE_POLL_ATTEMPTS {
                return Err(AcmeError::CaUnavailable(
                    "authority never published the certificate".to_string(),
                ));
            }
            match self
                .order
                .certificate()
                .await
                .map_err(|e| ca_error("failed to download certificate", e))?
            {
                Some(chain) => break chain,
                None => sleep(Duration::from_secs(1)).await,
            }
        };

        let expires_at = chain_expiry(&cert_chain_pem)?;
        info!(domains = %self.domains, expires = %expires_at, "Certificate issued");

        Ok(IssuedMaterial {
            cert_chain_pem,
            private_key_pem: key_pair.serialize_pem(),
            issued_at: Utc::now(),
            expires_at,
        })
    }
}

impl LiveOrder {
    async fn drive_validation(&mut self) -> Result<(), AcmeError> {
        let authorizations = self
            .order
            .authorizations()
            .await
            .map_err(|e| ca_error("failed to get authorizations", e))?;

        let wanted = match self.challenge_type {
            ChallengeKind::Http01 => ChallengeType::Http01,
            ChallengeKind::Dns01 => ChallengeType::Dns01,
        };

        let mut ready_urls = Vec::new();
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                other => {
                    return Err(AcmeError::ValidationFailed(format!(
                        "unexpected authorization status: {other:?}"
                    )));
                }
            }

            let Identifier::Dns(domain) = &authz.identifier;

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == wanted)
                .ok_or_else(|| {
                    AcmeError::ValidationFailed(format!(
                        "authority offered no {} challenge for {}",
                        self.challenge_type.as_str(),
                        domain
                    ))
                })?;

            let key_auth = self.order.key_authorization(challenge);
            let proof = match self.challenge_type {
                ChallengeKind::Http01 => ChallengeProof::Http {
                    token: challenge.token.clone(),
                    key_authorization: key_auth.as_str().to_string(),
                },
                ChallengeKind::Dns01 => ChallengeProof::Dns {
                    domain: domain.clone(),
                    txt_value: key_auth.dns_value(),
                },
            };

            self.responder.stage(&proof).await?;
            self.staged.push(proof);
            ready_urls.push(challenge.url.clone());
        }

        if self.challenge_type == ChallengeKind::Dns01 {
            self.check_dns_propagation().await?;
        }

        for url in &ready_urls {
            debug!(url = %url, "Signaling challenge ready");
            self.order
                .set_challenge_ready(url)
                .await
                .map_err(|e| ca_error("failed to set challenge ready", e))?;
        }

        // Poll at increasing intervals until every authorization settles.
        let mut delay = Duration::from_secs(1);
        loop {
            self.order
                .refresh()
                .await
                .map_err(|e| ca_error("failed to refresh order", e))?;

            match self.order.state().status {
                OrderStatus::Pending | OrderStatus::Processing => {
                    sleep(delay).await;
                    delay = (delay * 2).min(POLL_INTERVAL_CAP);
                }
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::ValidationFailed(
                        "authority rejected a domain ownership proof".to_string(),
                    ));
                }
            }
        }
    }

    /// Confirm TXT records are visible before telling the authority to look.
    async fn check_dns_propagation(&self) -> Result<(), AcmeError> {
        use hickory_resolver::error::ResolveErrorKind;
        use hickory_resolver::AsyncResolver;

        let mut unsettled: Vec<(String, String)> = self
            .staged
            .iter()
            .filter_map(|proof| match proof {
                ChallengeProof::Dns { domain, txt_value } => {
                    Some((format!("_acme-challenge.{domain}"), txt_value.clone()))
                }
                ChallengeProof::Http { .. } => None,
            })
            .collect();

        let mut delay = Duration::from_millis(250);
        let mut tries = 0u8;

        'outer: loop {
            sleep(delay).await;

            let resolver = AsyncResolver::tokio_from_system_conf().map_err(|e| {
                AcmeError::ValidationFailed(format!("failed to create DNS resolver: {e}"))
            })?;

            while let Some((name, value)) = unsettled.pop() {
                let settled = match resolver.txt_lookup(&name).await {
                    Ok(records) => records.iter().any(|txt| txt.to_string() == value),
                    Err(err) => {
                        let ResolveErrorKind::NoRecordsFound { .. } = err.kind() else {
                            return Err(AcmeError::ValidationFailed(format!(
                                "TXT lookup for {name} failed: {err}"
                            )));
                        };
                        false
                    }
                };

                if !settled {
                    tries += 1;
                    if tries >= 10 {
                        return Err(AcmeError::ValidationFailed(format!(
                            "TXT record for {name} never became visible"
                        )));
                    }
                    delay = (delay * 2).min(POLL_INTERVAL_CAP);
                    debug!(record = %name, tries, "TXT record not yet visible, waiting");
                    unsettled.push((name, value));
                    continue 'outer;
                }
            }
            return Ok(());
        }
    }
}

/// Expiry of the leaf certificate in a PEM chain.
pub(crate) fn chain_expiry(cert_chain_pem: &str) -> Result<DateTime<Utc>, AcmeError> {
    use x509_parser::prelude::Pem;

    let pem = Pem::iter_from_buffer(cert_chain_pem.as_bytes())
        .next()
        .transpose()
        .map_err(|e| AcmeError::ValidationFailed(format!("invalid PEM in chain: {e}")))?
        .ok_or_else(|| AcmeError::ValidationFailed("empty certificate chain".to_string()))?;

    let cert = pem
        .parse_x509()
        .map_err(|e| AcmeError::ValidationFailed(format!("invalid X509 certificate: {e}")))?;

    let timestamp = cert.validity().not_after.to_datetime().unix_timestamp();
    DateTime::<Utc>::from_timestamp(timestamp, 0).ok_or_else(|| {
        AcmeError::ValidationFailed("certificate expiry out of range".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_expiry_from_self_signed() {
        let key = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();

        let expiry = chain_expiry(&cert.pem()).unwrap();
        assert!(expiry > Utc::now());
    }

    #[test]
    fn test_chain_expiry_rejects_garbage() {
        assert!(chain_expiry("not a certificate").is_err());
        assert!(chain_expiry("").is_err());
    }

    #[test]
    fn test_directory_url_selection() {
        assert_eq!(
            AcmeClient::directory_url_for(false, None),
            LetsEncrypt::Production.url().to_string()
        );
        assert_eq!(
            AcmeClient::directory_url_for(true, None),
            LetsEncrypt::Staging.url().to_string()
        );
        assert_eq!(
            AcmeClient::directory_url_for(true, Some("https://pebble.local/dir")),
            "https://pebble.local/dir"
        );
    }
}

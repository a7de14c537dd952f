//! Management surface for certificate operations.
//!
//! Typed handlers the routing layer calls after applying its own
//! authentication: inspect a record, trigger issuance or renewal, and
//! report the listener-eligible serving mode. Responses never contain key
//! material.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::StatusCode;
use palisade_config::{ChallengeKind, Config, HttpConfig, TlsConfig, TlsMode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::acme::{AcmeError, CertificateManager, CertificateRecord, CertificateStatus};
use crate::tls::{can_serve_https, serving_mode, ServingMode};

/// Error payload with an HTTP status for the routing layer.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for ApiError {}

impl From<AcmeError> for ApiError {
    fn from(e: AcmeError) -> Self {
        let status = match &e {
            AcmeError::InvalidDomainSet(_) => StatusCode::BAD_REQUEST,
            AcmeError::AlreadyInFlight(_) => StatusCode::CONFLICT,
            AcmeError::NotFound(_) => StatusCode::NOT_FOUND,
            AcmeError::ValidationFailed(_) => StatusCode::BAD_GATEWAY,
            AcmeError::CaUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AcmeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Public view of a certificate record.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateInfo {
    pub domains: Vec<String>,
    pub status: CertificateStatus,
    pub challenge_type: ChallengeKind,
    pub staging: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Whether this record can back an HTTPS listener right now.
    pub https_ready: bool,
}

impl CertificateInfo {
    fn from_record(record: &CertificateRecord, configured_staging: bool) -> Self {
        Self {
            domains: record.domains.as_slice().to_vec(),
            status: record.status,
            challenge_type: record.challenge_type,
            staging: record.staging,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            last_error: record.last_error.clone(),
            https_ready: can_serve_https(record, Utc::now(), configured_staging),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub domains: Vec<String>,
    /// Defaults to the configured challenge type.
    #[serde(default)]
    pub challenge_type: Option<ChallengeKind>,
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub domains: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RenewResponse {
    pub renewed: bool,
    pub detail: String,
    pub certificate: CertificateInfo,
}

#[derive(Debug, Serialize)]
pub struct ServingModeInfo {
    pub mode: &'static str,
    pub http_enabled: bool,
    pub tls_enabled: bool,
    pub https_ready: bool,
}

/// Handler context built once at startup from the immutable config
/// snapshot.
pub struct ManagementApi {
    manager: Arc<CertificateManager>,
    http: HttpConfig,
    tls: TlsConfig,
    renew_before: chrono::Duration,
}

impl ManagementApi {
    pub fn new(manager: Arc<CertificateManager>, config: &Config) -> Self {
        let renew_before_days = config
            .tls
            .acme
            .as_ref()
            .map(|acme| acme.renew_before_days)
            .unwrap_or(30);
        Self {
            manager,
            http: config.http.clone(),
            tls: config.tls.clone(),
            renew_before: chrono::Duration::days(i64::from(renew_before_days)),
        }
    }

    /// Certificate details for a domain set.
    pub fn info(&self, domains: &[String]) -> ApiResult<CertificateInfo> {
        let record = self.manager.status(domains)?;
        Ok(CertificateInfo::from_record(&record, self.manager.staging()))
    }

    /// Every managed record.
    pub fn list(&self) -> Vec<CertificateInfo> {
        let staging = self.manager.staging();
        self.manager
            .all_records()
            .iter()
            .map(|record| CertificateInfo::from_record(record, staging))
            .collect()
    }

    /// Trigger issuance for a domain set.
    pub async fn issue(&self, request: IssueRequest) -> ApiResult<CertificateInfo> {
        let challenge_type = request
            .challenge_type
            .or_else(|| self.tls.acme.as_ref().map(|acme| acme.challenge_type))
            .unwrap_or(ChallengeKind::Http01);

        info!(domains = ?request.domains, "Issuance requested via management API");
        let record = self.manager.issue(&request.domains, challenge_type).await?;
        Ok(CertificateInfo::from_record(&record, self.manager.staging()))
    }

    /// Trigger renewal for a domain set.
    ///
    /// Short-circuits without touching the authority when the certificate
    /// still has more validity left than the renewal threshold.
    pub async fn renew(&self, request: RenewRequest) -> ApiResult<RenewResponse> {
        let record = self.manager.status(&request.domains)?;

        let still_valid = record.status == CertificateStatus::Issued
            && matches!(
                record.expires_at,
                Some(expires) if expires - Utc::now() > self.renew_before
            );
        if still_valid {
            return Ok(RenewResponse {
                renewed: false,
                detail: "certificate still valid, renewal not needed".to_string(),
                certificate: CertificateInfo::from_record(&record, self.manager.staging()),
            });
        }

        info!(domains = ?request.domains, "Renewal requested via management API");
        let record = self.manager.renew(&request.domains).await?;
        Ok(RenewResponse {
            renewed: true,
            detail: "certificate renewed".to_string(),
            certificate: CertificateInfo::from_record(&record, self.manager.staging()),
        })
    }

    /// Which listeners the process is currently eligible to serve.
    pub fn serving_mode(&self) -> ServingModeInfo {
        let https_ready = self.https_ready();
        let mode: ServingMode = serving_mode(&self.http, self.tls.enabled, https_ready);
        ServingModeInfo {
            mode: mode.as_str(),
            http_enabled: self.http.enabled,
            tls_enabled: self.tls.enabled,
            https_ready,
        }
    }

    fn https_ready(&self) -> bool {
        if !self.tls.enabled {
            return false;
        }
        match self.tls.mode {
            // Custom material was checked by config validation at startup.
            TlsMode::Custom => self.tls.cert_file.is_some() && self.tls.key_file.is_some(),
            TlsMode::Acme => {
                let Some(acme) = self.tls.acme.as_ref() else {
                    return false;
                };
                match self.manager.status(&acme.domains) {
                    Ok(record) => {
                        can_serve_https(&record, Utc::now(), self.manager.staging())
                    }
                    Err(_) => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AcmeDriver, AcmeOrder, CertificateStore, IssuedMaterial};
    use async_trait::async_trait;
    use palisade_common::{DomainSet, RecordKey};
    use tempfile::TempDir;

    struct UnreachableDriver;

    #[async_trait]
    impl AcmeDriver for UnreachableDriver {
        async fn request_order(
            &self,
            _domains: &DomainSet,
            _challenge_type: ChallengeKind,
        ) -> Result<Box<dyn AcmeOrder>, AcmeError> {
            Err(AcmeError::CaUnavailable("unreachable in this test".to_string()))
        }
    }

    fn setup(config: Config) -> (TempDir, Arc<CertificateManager>, ManagementApi) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CertificateStore::new(temp_dir.path()).unwrap());
        let manager = Arc::new(CertificateManager::new(
            store,
            Arc::new(UnreachableDriver),
            false,
        ));
        let api = ManagementApi::new(Arc::clone(&manager), &config);
        (temp_dir, manager, api)
    }

    fn seed_issued(manager: &CertificateManager, domain: &str, expires_in_days: i64) {
        let domains = DomainSet::parse([domain]).unwrap();
        let mut record =
            CertificateRecord::new(domains.clone(), ChallengeKind::Http01, false);
        record.status = CertificateStatus::Issued;
        record.issued_at = Some(Utc::now());
        record.expires_at = Some(Utc::now() + chrono::Duration::days(expires_in_days));

        let material = IssuedMaterial {
            cert_chain_pem: "cert".to_string(),
            private_key_pem: "key".to_string(),
            issued_at: record.issued_at.unwrap(),
            expires_at: record.expires_at.unwrap(),
        };
        manager.store().save_record(&record, Some(&material)).unwrap();
        manager.resume().unwrap();

        let key = RecordKey::new(&domains, false);
        assert!(manager.store().load_material(&key).unwrap().is_some());
    }

    #[test]
    fn test_error_status_mapping() {
        let invalid: ApiError =
            AcmeError::ValidationFailed("nope".to_string()).into();
        assert_eq!(invalid.status, StatusCode::BAD_GATEWAY);
        assert_eq!(invalid.kind, "validation_failed");

        let key = RecordKey::new(&DomainSet::parse(["example.com"]).unwrap(), false);
        let conflict: ApiError = AcmeError::AlreadyInFlight(key.clone()).into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let missing: ApiError = AcmeError::NotFound(key).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_info_unknown_domain_is_404() {
        let (_dir, _manager, api) = setup(Config::default());

        let err = api.info(&["unknown.com".to_string()]).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_renew_short_circuits_while_valid() {
        let (_dir, manager, api) = setup(Config::default());
        seed_issued(&manager, "example.com", 80);

        let response = api
            .renew(RenewRequest {
                domains: vec!["example.com".to_string()],
            })
            .await
            .unwrap();

        assert!(!response.renewed);
        assert!(response.detail.contains("still valid"));
        assert_eq!(response.certificate.status, CertificateStatus::Issued);
    }

    #[tokio::test]
    async fn test_renew_due_certificate_surfaces_driver_error() {
        let (_dir, manager, api) = setup(Config::default());
        seed_issued(&manager, "example.com", 5);

        let err = api
            .renew(RenewRequest {
                domains: vec!["example.com".to_string()],
            })
            .await
            .unwrap_err();

        // The stub authority is unreachable, so the attempt surfaces 503.
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_serving_mode_reports_http_only_without_certificates() {
        let mut config = Config::default();
        config.tls.enabled = true;
        config.tls.mode = TlsMode::Acme;
        let (_dir, _manager, api) = setup(config);

        let mode = api.serving_mode();
        assert_eq!(mode.mode, "http");
        assert!(!mode.https_ready);
    }
}

//! Serving-mode decisions.
//!
//! Pure functions consulted by listener bootstrap: whether a certificate
//! record is usable for HTTPS, and which listeners the process should open.
//! No I/O happens here; callers re-evaluate on every manager transition
//! event.

use chrono::{DateTime, Utc};
use palisade_config::HttpConfig;

use crate::acme::{CertificateRecord, CertificateStatus};

/// Which listeners the process offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingMode {
    /// Plain HTTP only; no usable certificate or TLS disabled.
    HttpOnly,
    /// HTTPS only; plain HTTP disabled by configuration.
    HttpsOnly,
    /// Both listeners open.
    Both,
    /// Nothing servable: HTTP disabled and no usable certificate.
    Unavailable,
}

impl ServingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpOnly => "http",
            Self::HttpsOnly => "https",
            Self::Both => "http+https",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for ServingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a record can back an HTTPS listener.
///
/// Requires `issued` status, unexpired material, and an environment match:
/// a staging certificate never satisfies a production configuration, and
/// vice versa.
pub fn can_serve_https(
    record: &CertificateRecord,
    now: DateTime<Utc>,
    configured_staging: bool,
) -> bool {
    record.status == CertificateStatus::Issued
        && matches!(record.expires_at, Some(expires) if now < expires)
        && record.staging == configured_staging
}

/// Decide the serving mode from configuration and certificate readiness.
pub fn serving_mode(http: &HttpConfig, tls_enabled: bool, https_ready: bool) -> ServingMode {
    let https = tls_enabled && https_ready;
    match (http.enabled, https) {
        (true, true) => ServingMode::Both,
        (true, false) => ServingMode::HttpOnly,
        (false, true) => ServingMode::HttpsOnly,
        (false, false) => ServingMode::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_common::DomainSet;
    use palisade_config::ChallengeKind;

    fn record(status: CertificateStatus, expires_in_days: Option<i64>, staging: bool) -> CertificateRecord {
        let domains = DomainSet::parse(["example.com"]).unwrap();
        let mut record = CertificateRecord::new(domains, ChallengeKind::Http01, staging);
        record.status = status;
        record.expires_at = expires_in_days.map(|d| Utc::now() + chrono::Duration::days(d));
        record
    }

    #[test]
    fn test_issued_valid_record_serves() {
        let rec = record(CertificateStatus::Issued, Some(60), false);
        assert!(can_serve_https(&rec, Utc::now(), false));
    }

    #[test]
    fn test_expired_record_does_not_serve() {
        let rec = record(CertificateStatus::Issued, Some(-1), false);
        assert!(!can_serve_https(&rec, Utc::now(), false));
    }

    #[test]
    fn test_missing_expiry_does_not_serve() {
        let rec = record(CertificateStatus::Issued, None, false);
        assert!(!can_serve_https(&rec, Utc::now(), false));
    }

    #[test]
    fn test_non_issued_statuses_do_not_serve() {
        for status in [
            CertificateStatus::Uninitialized,
            CertificateStatus::Pending,
            CertificateStatus::Validating,
            CertificateStatus::Finalizing,
            CertificateStatus::Renewing,
            CertificateStatus::Failed,
        ] {
            let rec = record(status, Some(60), false);
            assert!(!can_serve_https(&rec, Utc::now(), false), "{status} served");
        }
    }

    #[test]
    fn test_staging_mismatch_does_not_serve() {
        let staging_rec = record(CertificateStatus::Issued, Some(60), true);
        assert!(!can_serve_https(&staging_rec, Utc::now(), false));
        assert!(can_serve_https(&staging_rec, Utc::now(), true));

        let prod_rec = record(CertificateStatus::Issued, Some(60), false);
        assert!(!can_serve_https(&prod_rec, Utc::now(), true));
    }

    #[test]
    fn test_serving_mode_matrix() {
        let http_on = HttpConfig {
            enabled: true,
            redirect_to_https: false,
        };
        let http_off = HttpConfig {
            enabled: false,
            redirect_to_https: false,
        };

        assert_eq!(serving_mode(&http_on, true, true), ServingMode::Both);
        assert_eq!(serving_mode(&http_on, true, false), ServingMode::HttpOnly);
        assert_eq!(serving_mode(&http_on, false, false), ServingMode::HttpOnly);
        assert_eq!(serving_mode(&http_off, true, true), ServingMode::HttpsOnly);
        assert_eq!(serving_mode(&http_off, true, false), ServingMode::Unavailable);
        assert_eq!(serving_mode(&http_off, false, false), ServingMode::Unavailable);
    }
}

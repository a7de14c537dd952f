//! Typed configuration model.
//!
//! Mirrors the structure of the KDL document: a `server` block for bind
//! addresses, an `http` block for plain-HTTP policy, and a `tls` block that
//! selects between operator-supplied certificates and automated issuance.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the plain-HTTP listener.
    pub http_address: String,
    /// Bind address for the HTTPS listener.
    pub https_address: String,
    /// How long to wait for in-flight work during shutdown.
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: default_http_address(),
            https_address: default_https_address(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
        }
    }
}

pub(crate) fn default_http_address() -> String {
    "0.0.0.0:8080".to_string()
}

pub(crate) fn default_https_address() -> String {
    "0.0.0.0:8443".to_string()
}

pub(crate) fn default_graceful_shutdown_timeout() -> u64 {
    30
}

/// Plain-HTTP serving policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whether plain HTTP is served at all.
    pub enabled: bool,
    /// When HTTP is disabled, redirect to HTTPS instead of rejecting.
    pub redirect_to_https: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redirect_to_https: false,
        }
    }
}

/// How HTTPS certificates are provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Operator supplies cert-file and key-file paths.
    Custom,
    /// Certificates are obtained and renewed automatically.
    Acme,
}

/// TLS configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    pub mode: TlsMode,
    /// Certificate chain path (custom mode).
    pub cert_file: Option<PathBuf>,
    /// Private key path (custom mode).
    pub key_file: Option<PathBuf>,
    /// Automated issuance settings (acme mode).
    pub acme: Option<AcmeSettings>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: TlsMode::Custom,
            cert_file: None,
            key_file: None,
            acme: None,
        }
    }
}

/// Which validation method the certificate authority should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeKind {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
}

impl ChallengeKind {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http-01" | "http01" | "http" => Some(Self::Http01),
            "dns-01" | "dns01" | "dns" => Some(Self::Dns01),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
        }
    }
}

/// Settings for automated certificate issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeSettings {
    /// Contact email registered with the certificate authority.
    pub email: String,
    /// Domains the certificate must cover. The first entry is primary.
    pub domains: Vec<String>,
    /// Use the CA's staging environment.
    pub staging: bool,
    pub challenge_type: ChallengeKind,
    /// Directory where account material and certificates are persisted.
    pub storage: PathBuf,
    /// Renew when fewer than this many days of validity remain.
    pub renew_before_days: u32,
    /// How often the renewal scheduler wakes up.
    pub check_interval_hours: u64,
    /// DNS zone for dns-01 record placement.
    pub dns_zone: Option<String>,
    /// Override the CA directory URL (testing against a local authority).
    pub directory_url: Option<String>,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            email: String::new(),
            domains: Vec::new(),
            staging: false,
            challenge_type: ChallengeKind::Http01,
            storage: default_acme_storage(),
            renew_before_days: default_renew_before_days(),
            check_interval_hours: default_check_interval_hours(),
            dns_zone: None,
            directory_url: None,
        }
    }
}

pub(crate) fn default_acme_storage() -> PathBuf {
    PathBuf::from("/var/lib/palisade/acme")
}

pub(crate) fn default_renew_before_days() -> u32 {
    30
}

pub(crate) fn default_check_interval_hours() -> u64 {
    24
}

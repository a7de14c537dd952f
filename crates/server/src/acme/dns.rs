//! DNS provider integration for dns-01 validation.
//!
//! Provisions the `_acme-challenge` TXT records the authority looks up. The
//! API token is resolved from the environment, never from the configuration
//! file.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::error::AcmeError;

/// Environment variable holding the DNS provider API token.
pub const DNS_API_TOKEN_ENV: &str = "PALISADE_DNS_API_TOKEN";

/// Provisions TXT records for dns-01 validation.
///
/// Implementations return an opaque record id from `add_txt_record` that is
/// later passed to `remove_record` for cleanup.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn add_txt_record(&self, name: &str, value: &str) -> Result<String, AcmeError>;
    async fn remove_record(&self, record_id: &str) -> Result<(), AcmeError>;
}

/// Cloudflare-style DNS API client.
pub struct ApiDnsProvider {
    client: reqwest::Client,
    api_base: String,
    zone_id: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiRecordEnvelope {
    result: ApiRecord,
}

#[derive(Deserialize)]
struct ApiRecord {
    id: String,
}

impl ApiDnsProvider {
    pub const DEFAULT_API_BASE: &'static str = "https://api.cloudflare.com/client/v4";

    /// Build a provider for the given zone.
    ///
    /// Fails when the token environment variable is not set.
    pub fn from_env(zone_id: &str) -> Result<Self, AcmeError> {
        let token = std::env::var(DNS_API_TOKEN_ENV).map_err(|_| {
            AcmeError::ValidationFailed(format!(
                "dns-01 requires the {} environment variable",
                DNS_API_TOKEN_ENV
            ))
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            zone_id: zone_id.to_string(),
            token,
        })
    }

    /// Point the client at a different API endpoint (local test server).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl DnsProvider for ApiDnsProvider {
    async fn add_txt_record(&self, name: &str, value: &str) -> Result<String, AcmeError> {
        let url = format!("{}/zones/{}/dns_records", self.api_base, self.zone_id);
        debug!(record = %name, "Creating TXT record");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "type": "TXT",
                "name": name,
                "content": value,
                "ttl": 60,
            }))
            .send()
            .await
            .map_err(|e| AcmeError::CaUnavailable(format!("DNS provider unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(AcmeError::ValidationFailed(format!(
                "DNS provider rejected TXT record for {}: HTTP {}",
                name,
                response.status()
            )));
        }

        let envelope: ApiRecordEnvelope = response
            .json()
            .await
            .map_err(|e| AcmeError::ValidationFailed(format!("bad DNS provider response: {e}")))?;

        debug!(record = %name, id = %envelope.result.id, "TXT record created");
        Ok(envelope.result.id)
    }

    async fn remove_record(&self, record_id: &str) -> Result<(), AcmeError> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, self.zone_id, record_id
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AcmeError::CaUnavailable(format!("DNS provider unreachable: {e}")))?;

        if !response.status().is_success() {
            warn!(
                id = %record_id,
                status = %response.status(),
                "DNS provider refused record deletion"
            );
        }

        Ok(())
    }
}

impl std::fmt::Debug for ApiDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiDnsProvider")
            .field("api_base", &self.api_base)
            .field("zone_id", &self.zone_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

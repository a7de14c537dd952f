//! Type-safe identifier newtypes for Palisade.
//!
//! These types provide compile-time safety for the two identities the
//! certificate core revolves around: the ordered set of hostnames covered
//! by one certificate ([`DomainSet`]) and the storage/lookup key derived
//! from it ([`RecordKey`]). Keeping them as distinct types prevents a raw
//! hostname list from being used where a validated, canonical set is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum total length of a hostname, per RFC 1035.
const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single DNS label.
const MAX_LABEL_LEN: usize = 63;

/// Errors produced while validating a domain set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainSetError {
    /// The set contained no hostnames at all.
    #[error("domain set is empty")]
    Empty,

    /// A hostname failed syntax validation.
    #[error("invalid hostname '{hostname}': {reason}")]
    InvalidHostname { hostname: String, reason: String },
}

/// An ordered, validated, de-duplicated set of hostnames covered by one
/// certificate. The first entry is the primary domain.
///
/// Hostnames are lowercased on construction. A single leading wildcard
/// label (`*.example.com`) is accepted; wildcards anywhere else are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainSet(Vec<String>);

impl DomainSet {
    /// Validate and canonicalize a list of hostnames.
    ///
    /// Duplicates are dropped while preserving order; the first hostname
    /// becomes the primary domain.
    pub fn parse<I, S>(domains: I) -> Result<Self, DomainSetError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = Vec::new();
        for domain in domains {
            let hostname = domain.as_ref().trim().to_ascii_lowercase();
            validate_hostname(&hostname)?;
            if !seen.contains(&hostname) {
                seen.push(hostname);
            }
        }
        if seen.is_empty() {
            return Err(DomainSetError::Empty);
        }
        Ok(Self(seen))
    }

    /// The primary domain (first hostname in the set).
    pub fn primary(&self) -> &str {
        // Construction guarantees at least one entry.
        &self.0[0]
    }

    /// All hostnames, primary first.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Number of hostnames in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: an empty set cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// Validate a single hostname's syntax.
fn validate_hostname(hostname: &str) -> Result<(), DomainSetError> {
    let invalid = |reason: &str| DomainSetError::InvalidHostname {
        hostname: hostname.to_string(),
        reason: reason.to_string(),
    };

    if hostname.is_empty() {
        return Err(invalid("empty hostname"));
    }
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(invalid("longer than 253 characters"));
    }

    // Strip one leading wildcard label, if present.
    let body = hostname.strip_prefix("*.").unwrap_or(hostname);
    if body.contains('*') {
        return Err(invalid("wildcard only allowed as the leading label"));
    }

    let labels: Vec<&str> = body.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid("must contain at least two labels"));
    }

    for label in labels {
        if label.is_empty() {
            return Err(invalid("empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(invalid("label longer than 63 characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label starts or ends with a hyphen"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("label contains invalid characters"));
        }
    }

    Ok(())
}

/// Storage and lookup key for a certificate record.
///
/// Staging and production certificates for the same domain set are distinct
/// records, so the key is the primary domain plus the staging flag. The
/// storage name doubles as the on-disk directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    primary: String,
    staging: bool,
}

impl RecordKey {
    /// Derive the key for a domain set issued against the given CA
    /// environment.
    pub fn new(domains: &DomainSet, staging: bool) -> Self {
        Self {
            primary: domains.primary().to_string(),
            staging,
        }
    }

    /// The primary domain this key was derived from.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Whether this record belongs to the staging CA environment.
    pub fn staging(&self) -> bool {
        self.staging
    }

    /// Directory-safe name for on-disk storage.
    ///
    /// Wildcard labels are rewritten so the name stays a single valid path
    /// component.
    pub fn storage_name(&self) -> String {
        let base = self.primary.replace("*.", "_wildcard.");
        if self.staging {
            format!("{base}@staging")
        } else {
            base
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.staging {
            write!(f, "{} (staging)", self.primary)
        } else {
            write!(f, "{}", self.primary)
        }
    }
}

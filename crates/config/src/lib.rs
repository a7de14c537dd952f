//! Configuration for the Palisade certificate daemon.
//!
//! Configuration is written in KDL. [`Config::from_file`] parses a document
//! into the typed model and [`Config::validate`] lints it without touching
//! the network, so `palisade test` can run anywhere.

pub mod kdl;
pub mod server;
pub mod validate;

pub use server::{AcmeSettings, ChallengeKind, HttpConfig, ServerConfig, TlsConfig, TlsMode};
pub use validate::{
    validate_config, ErrorCategory, ValidationError, ValidationResult, ValidationWarning,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Config {
    /// Load and parse a KDL configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        kdl::parse_config(&text).with_context(|| format!("failed to parse {:?}", path))
    }

    /// Parse a KDL configuration document from a string.
    pub fn from_str(text: &str) -> Result<Self> {
        kdl::parse_config(text)
    }

    /// Lint the configuration. Does not perform network checks.
    pub fn validate(&self) -> ValidationResult {
        validate::validate_config(self)
    }
}

//! Configuration validation.
//!
//! Runs after parsing and collects every problem instead of stopping at the
//! first, so `palisade test` can report all of them in one pass.

mod acme;
mod certs;

use std::fmt;
use std::net::SocketAddr;

use crate::Config;

/// Category of a validation error, for grouped reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Server,
    Http,
    Certificate,
    Acme,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Http => write!(f, "http"),
            Self::Certificate => write!(f, "certificate"),
            Self::Acme => write!(f, "acme"),
        }
    }
}

/// A fatal configuration problem.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A non-fatal configuration concern.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Accumulated validation outcome.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_addresses(config, &mut result);
    validate_http(config, &mut result);

    if config.tls.enabled {
        match config.tls.mode {
            crate::server::TlsMode::Custom => result.merge(certs::validate_certificates(config)),
            crate::server::TlsMode::Acme => result.merge(acme::validate_acme(config)),
        }
    }

    result
}

fn validate_addresses(config: &Config, result: &mut ValidationResult) {
    for (label, addr) in [
        ("http-address", &config.server.http_address),
        ("https-address", &config.server.https_address),
    ] {
        if addr.parse::<SocketAddr>().is_err() {
            result.add_error(ValidationError::new(
                ErrorCategory::Server,
                format!("Invalid {}: '{}' (expected host:port)", label, addr),
            ));
        }
    }
}

fn validate_http(config: &Config, result: &mut ValidationResult) {
    if config.http.enabled && config.http.redirect_to_https {
        result.add_warning(ValidationWarning::new(
            "redirect-to-https has no effect while http.enabled is true",
        ));
    }
    if !config.http.enabled && config.http.redirect_to_https && !config.tls.enabled {
        result.add_error(ValidationError::new(
            ErrorCategory::Http,
            "redirect-to-https requires tls.enabled (nothing to redirect to)",
        ));
    }
}

//! Custom-mode certificate validation.
//!
//! Checks that operator-supplied certificate and key files exist, parse, and
//! have usable validity remaining.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Validate operator-supplied certificate material.
pub fn validate_certificates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let cert_file = match config.tls.cert_file.as_deref() {
        Some(path) => path,
        None => {
            result.add_error(ValidationError::new(
                ErrorCategory::Certificate,
                "TLS mode 'custom' requires cert-file",
            ));
            return result;
        }
    };
    let key_file = match config.tls.key_file.as_deref() {
        Some(path) => path,
        None => {
            result.add_error(ValidationError::new(
                ErrorCategory::Certificate,
                "TLS mode 'custom' requires key-file",
            ));
            return result;
        }
    };

    if !cert_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Certificate not found: {:?}", cert_file),
        ));
        return result;
    }
    if !key_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Private key not found: {:?}", key_file),
        ));
        return result;
    }

    match inspect_certificate(cert_file) {
        Ok(Some(warning)) => result.add_warning(warning),
        Ok(None) => {}
        Err(e) => result.add_error(e),
    }

    result
}

/// Parse a PEM certificate and check its expiry window.
fn inspect_certificate(cert_path: &Path) -> Result<Option<ValidationWarning>, ValidationError> {
    use std::fs;

    let cert_pem = fs::read(cert_path).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to read certificate {:?}: {}", cert_path, e),
        )
    })?;

    let pem = pem::parse(&cert_pem).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to parse certificate {:?}: {}", cert_path, e),
        )
    })?;

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents()).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Invalid X509 certificate {:?}: {}", cert_path, e),
        )
    })?;

    let now = SystemTime::now();
    let not_after = cert.validity().not_after.to_datetime().unix_timestamp() as u64;
    let expiry_time = SystemTime::UNIX_EPOCH + Duration::from_secs(not_after);

    if expiry_time < now {
        return Err(ValidationError::new(
            ErrorCategory::Certificate,
            format!(
                "Certificate expired: {:?} (expired at {})",
                cert_path,
                cert.validity().not_after
            ),
        ));
    }

    let thirty_days = Duration::from_secs(30 * 86400);
    if expiry_time < now + thirty_days {
        return Ok(Some(ValidationWarning::new(format!(
            "Certificate expires soon: {:?} (expires at {})",
            cert_path,
            cert.validity().not_after
        ))));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::TlsMode;

    fn custom_config(cert: &str, key: &str) -> Config {
        let mut config = Config::default();
        config.tls.enabled = true;
        config.tls.mode = TlsMode::Custom;
        config.tls.cert_file = Some(cert.into());
        config.tls.key_file = Some(key.into());
        config
    }

    #[test]
    fn test_missing_certificate_file() {
        let config = custom_config("/nonexistent/cert.pem", "/nonexistent/key.pem");

        let result = validate_certificates(&config);

        assert!(!result.errors.is_empty());
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Certificate not found")));
    }

    #[test]
    fn test_missing_paths_entirely() {
        let mut config = Config::default();
        config.tls.enabled = true;
        config.tls.mode = TlsMode::Custom;

        let result = validate_certificates(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("requires cert-file")));
    }

    #[test]
    fn test_garbage_pem_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").expect("write cert");
        std::fs::write(&key, "not a key").expect("write key");

        let config = custom_config(
            cert.to_str().expect("utf8 path"),
            key.to_str().expect("utf8 path"),
        );

        let result = validate_certificates(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Failed to parse certificate")));
    }
}

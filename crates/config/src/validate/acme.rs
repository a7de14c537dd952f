//! Automated-issuance settings validation.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::server::ChallengeKind;
use crate::Config;
use palisade_common::DomainSet;

/// Validate acme-mode settings.
pub fn validate_acme(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let acme = match config.tls.acme.as_ref() {
        Some(acme) => acme,
        None => {
            result.add_error(ValidationError::new(
                ErrorCategory::Acme,
                "TLS mode 'acme' requires an acme block",
            ));
            return result;
        }
    };

    if !looks_like_email(&acme.email) {
        result.add_error(ValidationError::new(
            ErrorCategory::Acme,
            format!("Invalid contact email: '{}'", acme.email),
        ));
    }

    match DomainSet::parse(acme.domains.iter().map(String::as_str)) {
        Ok(domains) => {
            if acme.challenge_type == ChallengeKind::Http01
                && domains.iter().any(|d| d.starts_with("*."))
            {
                result.add_error(ValidationError::new(
                    ErrorCategory::Acme,
                    "Wildcard domains require challenge-type \"dns-01\"",
                ));
            }
        }
        Err(e) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Acme,
                format!("Invalid domains: {}", e),
            ));
        }
    }

    if acme.challenge_type == ChallengeKind::Dns01 && acme.dns_zone.is_none() {
        result.add_error(ValidationError::new(
            ErrorCategory::Acme,
            "challenge-type \"dns-01\" requires dns-zone",
        ));
    }

    if acme.renew_before_days < 1 {
        result.add_error(ValidationError::new(
            ErrorCategory::Acme,
            "renew-before-days must be at least 1",
        ));
    } else if acme.renew_before_days > 60 {
        result.add_warning(ValidationWarning::new(format!(
            "renew-before-days {} is unusually high (certificates are valid ~90 days)",
            acme.renew_before_days
        )));
    }

    if acme.check_interval_hours < 1 {
        result.add_error(ValidationError::new(
            ErrorCategory::Acme,
            "check-interval-hours must be at least 1",
        ));
    }

    if acme.staging && acme.directory_url.is_some() {
        result.add_warning(ValidationWarning::new(
            "directory-url overrides the staging flag",
        ));
    }

    result
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

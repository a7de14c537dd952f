//! Server, HTTP, and TLS KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::server::*;

use super::helpers::{
    get_bool_entry, get_child, get_int_entry, get_string_args, get_string_entry,
};

/// Parse the `server` block.
pub fn parse_server_config(node: &kdl::KdlNode) -> Result<ServerConfig> {
    trace!("Parsing server configuration block");

    let config = ServerConfig {
        http_address: get_string_entry(node, "http-address")
            .unwrap_or_else(default_http_address),
        https_address: get_string_entry(node, "https-address")
            .unwrap_or_else(default_https_address),
        graceful_shutdown_timeout_secs: get_int_entry(node, "graceful-shutdown-timeout-secs")
            .map(|v| v as u64)
            .unwrap_or_else(default_graceful_shutdown_timeout),
    };

    trace!(
        http_address = %config.http_address,
        https_address = %config.https_address,
        "Parsed server configuration"
    );

    Ok(config)
}

/// Parse the `http` block.
pub fn parse_http_config(node: &kdl::KdlNode) -> Result<HttpConfig> {
    trace!("Parsing http configuration block");

    Ok(HttpConfig {
        enabled: get_bool_entry(node, "enabled").unwrap_or(true),
        redirect_to_https: get_bool_entry(node, "redirect-to-https").unwrap_or(false),
    })
}

/// Parse the `tls` block, including the nested `acme` block when present.
pub fn parse_tls_config(node: &kdl::KdlNode) -> Result<TlsConfig> {
    trace!("Parsing tls configuration block");

    let mode_str = get_string_entry(node, "mode").unwrap_or_else(|| "custom".to_string());
    let mode = match mode_str.to_lowercase().as_str() {
        "custom" => TlsMode::Custom,
        "acme" => TlsMode::Acme,
        other => {
            return Err(anyhow::anyhow!(
                "Invalid TLS mode '{}'. Valid modes: custom, acme",
                other
            ));
        }
    };

    let acme = match get_child(node, "acme") {
        Some(acme_node) => Some(parse_acme_settings(acme_node)?),
        None => None,
    };

    let config = TlsConfig {
        enabled: get_bool_entry(node, "enabled").unwrap_or(false),
        mode,
        cert_file: get_string_entry(node, "cert-file").map(PathBuf::from),
        key_file: get_string_entry(node, "key-file").map(PathBuf::from),
        acme,
    };

    trace!(
        enabled = config.enabled,
        mode = ?config.mode,
        has_acme = config.acme.is_some(),
        "Parsed tls configuration"
    );

    Ok(config)
}

fn parse_acme_settings(node: &kdl::KdlNode) -> Result<AcmeSettings> {
    let email = get_string_entry(node, "email").ok_or_else(|| {
        anyhow::anyhow!("acme block requires an 'email' field, e.g., email \"admin@example.com\"")
    })?;

    let domains = get_string_args(node, "domains");
    if domains.is_empty() {
        return Err(anyhow::anyhow!(
            "acme block requires a 'domains' field, e.g., domains \"example.com\" \"www.example.com\""
        ));
    }

    let challenge_str =
        get_string_entry(node, "challenge-type").unwrap_or_else(|| "http-01".to_string());
    let challenge_type = ChallengeKind::from_str_loose(&challenge_str).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid challenge type '{}'. Valid types: http-01, dns-01",
            challenge_str
        )
    })?;

    trace!(
        email = %email,
        domain_count = domains.len(),
        challenge_type = challenge_type.as_str(),
        "Parsed acme settings"
    );

    Ok(AcmeSettings {
        email,
        domains,
        staging: get_bool_entry(node, "staging").unwrap_or(false),
        challenge_type,
        storage: get_string_entry(node, "storage")
            .map(PathBuf::from)
            .unwrap_or_else(default_acme_storage),
        renew_before_days: get_int_entry(node, "renew-before-days")
            .map(|v| v as u32)
            .unwrap_or_else(default_renew_before_days),
        check_interval_hours: get_int_entry(node, "check-interval-hours")
            .map(|v| v as u64)
            .unwrap_or_else(default_check_interval_hours),
        dns_zone: get_string_entry(node, "dns-zone"),
        directory_url: get_string_entry(node, "directory-url"),
    })
}

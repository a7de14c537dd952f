//! KDL document parsing.

pub mod helpers;
pub mod server;

use anyhow::{Context, Result};
use kdl::KdlDocument;
use tracing::warn;

use crate::Config;

/// Parse a full KDL configuration document.
pub fn parse_config(text: &str) -> Result<Config> {
    let doc: KdlDocument = text
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid KDL document: {e}"))?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                config.server =
                    server::parse_server_config(node).context("in server block")?;
            }
            "http" => {
                config.http = server::parse_http_config(node).context("in http block")?;
            }
            "tls" => {
                config.tls = server::parse_tls_config(node).context("in tls block")?;
            }
            other => {
                warn!(section = other, "Ignoring unknown configuration section");
            }
        }
    }

    Ok(config)
}

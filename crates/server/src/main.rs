//! Palisade - Main entry point
//!
//! Automated TLS certificate lifecycle management for edge servers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use palisade_config::{ChallengeKind, Config, TlsMode};
use palisade_server::acme::{
    AcmeClient, ApiDnsProvider, CertificateManager, CertificateStore, ChallengeResponder,
    RenewalScheduler,
};
use palisade_server::acme::DnsProvider;
use palisade_server::api::ManagementApi;

/// Palisade - automated certificate lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "palisade")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "PALISADE_CONFIG")]
    config: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test {
        /// Configuration file to test
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
    /// Run the server (default)
    Run {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
}

const DEFAULT_CONFIG_PATH: &str = "/etc/palisade/config.kdl";

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.test {
        return test_config(cli.config.as_deref());
    }

    match cli.command {
        Some(Commands::Test { config }) => {
            test_config(config.as_deref().or(cli.config.as_deref()))
        }
        Some(Commands::Run { config }) => run_server(config.or(cli.config), cli.verbose),
        None => run_server(cli.config, cli.verbose),
    }
}

/// Test configuration file and exit
fn test_config(config_path: Option<&str>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);
    info!("Testing configuration file: {}", path);
    let config = Config::from_file(path).context("Failed to load configuration file")?;

    let result = config.validate();
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    if !result.is_ok() {
        for err in &result.errors {
            error!("{}", err);
        }
        bail!("configuration file {} test failed", path);
    }

    println!("palisade: configuration file {} test is successful", path);
    Ok(())
}

/// Run the server
fn run_server(config_path: Option<String>, verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let path = config_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!("Loading configuration from: {}", path);
    let config = Config::from_file(&path).context("Failed to load configuration file")?;

    let result = config.validate();
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    if !result.is_ok() {
        for err in &result.errors {
            error!("{}", err);
        }
        bail!("configuration validation failed");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let manager = if config.tls.enabled && config.tls.mode == TlsMode::Acme {
        Some(start_certificate_management(&config).await?)
    } else {
        info!(tls_enabled = config.tls.enabled, "Certificate management not active");
        None
    };

    let api = manager
        .as_ref()
        .map(|(manager, _)| ManagementApi::new(Arc::clone(manager), &config));
    if let Some(api) = &api {
        let mode = api.serving_mode();
        info!(
            mode = mode.mode,
            https_ready = mode.https_ready,
            "Serving mode determined"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, initiating graceful shutdown");

    if let Some((_, shutdown)) = manager {
        let grace = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
        shutdown.shutdown(grace).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Handle to the background scheduler, used for graceful shutdown.
struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    responder: Arc<ChallengeResponder>,
}

impl SchedulerHandle {
    async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(grace, self.task).await.is_err() {
            warn!("Renewal scheduler did not stop within the grace period");
        }
        // Any proofs an interrupted order left behind are stale now.
        self.responder.clear();
    }
}

/// Build the certificate management stack and bring stored records up to
/// their configured state.
async fn start_certificate_management(
    config: &Config,
) -> Result<(Arc<CertificateManager>, SchedulerHandle)> {
    let acme = config
        .tls
        .acme
        .as_ref()
        .context("tls mode is acme but no acme settings are present")?;

    let store = Arc::new(
        CertificateStore::new(&acme.storage)
            .context("Failed to initialize certificate store")?,
    );

    let dns_provider = match acme.challenge_type {
        ChallengeKind::Dns01 => {
            let zone = acme
                .dns_zone
                .as_deref()
                .context("dns-01 challenges require a dns-zone")?;
            let provider =
                ApiDnsProvider::from_env(zone).context("Failed to configure DNS provider")?;
            Some(Arc::new(provider) as Arc<dyn DnsProvider>)
        }
        ChallengeKind::Http01 => None,
    };
    let responder = Arc::new(ChallengeResponder::new(dns_provider));

    let directory_url =
        AcmeClient::directory_url_for(acme.staging, acme.directory_url.as_deref());
    info!(
        directory_url = %directory_url,
        staging = acme.staging,
        challenge_type = acme.challenge_type.as_str(),
        "Configuring certificate authority client"
    );
    let client = AcmeClient::new(
        Arc::clone(&store),
        Arc::clone(&responder),
        &acme.email,
        &directory_url,
    );

    let manager = Arc::new(CertificateManager::new(
        store,
        Arc::new(client),
        acme.staging,
    ));
    let resumed = manager
        .resume()
        .context("Failed to load persisted certificate records")?;
    info!(records = resumed, "Certificate state loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = RenewalScheduler::new(
        Arc::clone(&manager),
        acme.renew_before_days,
        shutdown_rx,
    )
    .with_interval(Duration::from_secs(u64::from(acme.check_interval_hours) * 3600));

    // Bring the configured domain set to a usable state before the periodic
    // loop takes over. A validation failure here is logged, not fatal: the
    // scheduler keeps the record available for explicit retry.
    if let Err(e) = scheduler
        .ensure_certificates(&acme.domains, acme.challenge_type)
        .await
    {
        error!(error = %e, domains = ?acme.domains, "Initial certificate provisioning failed");
    }

    let task = tokio::spawn(scheduler.run());
    info!("Certificate renewal scheduler started");

    Ok((
        manager,
        SchedulerHandle {
            shutdown_tx,
            task,
            responder,
        },
    ))
}

//! Background certificate renewal scheduler.
//!
//! Periodically asks the manager which records are due and issues one
//! renew call per qualifying record. Single-flight is the manager's
//! guarantee; the scheduler just skips records whose lock is busy. A
//! failure on one record never stops evaluation of the others.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use palisade_config::ChallengeKind;

use super::error::AcmeError;
use super::manager::CertificateManager;
use super::storage::CertificateStatus;

/// Default check interval (24 hours).
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Minimum check interval (1 hour).
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Maximum startup/wake jitter (5 minutes).
const MAX_JITTER: Duration = Duration::from_secs(300);

/// Background renewal scheduler.
pub struct RenewalScheduler {
    manager: Arc<CertificateManager>,
    check_interval: Duration,
    /// Renew when remaining validity drops below this.
    renew_before: chrono::Duration,
    shutdown: watch::Receiver<bool>,
}

impl RenewalScheduler {
    /// Create a scheduler.
    ///
    /// * `renew_before_days` - remaining-validity threshold that makes a
    ///   record due for renewal
    /// * `shutdown` - flips to `true` when the process is draining
    pub fn new(
        manager: Arc<CertificateManager>,
        renew_before_days: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            manager,
            check_interval: DEFAULT_CHECK_INTERVAL,
            renew_before: chrono::Duration::days(i64::from(renew_before_days)),
            shutdown,
        }
    }

    /// Set the check interval, clamped to a minimum of 1 hour to avoid
    /// excessive polling.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    /// Run the scheduler loop until shutdown.
    ///
    /// Each wake is jittered so multiple instances sharing a clock don't
    /// stampede the authority together.
    pub async fn run(mut self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            renew_before_days = self.renew_before.num_days(),
            "Starting certificate renewal scheduler"
        );

        // Short initial delay so startup issuance settles first.
        let initial_delay = Duration::from_secs(10) + jitter();
        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {}
            _ = self.wait_for_shutdown() => return,
        }

        self.check_renewals().await;

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.reset();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::time::sleep(jitter()).await;
                    debug!("Running scheduled certificate renewal check");
                    self.check_renewals().await;
                }
                _ = self.wait_for_shutdown() => {
                    info!("Renewal scheduler shutting down");
                    return;
                }
            }
        }
    }

    async fn wait_for_shutdown(&mut self) {
        while !*self.shutdown.borrow() {
            if self.shutdown.changed().await.is_err() {
                // Sender dropped; treat as shutdown.
                return;
            }
        }
    }

    /// Evaluate every record once and renew the due ones sequentially.
    async fn check_renewals(&self) {
        let due = self
            .manager
            .needs_renewal(Utc::now(), self.renew_before);

        if due.is_empty() {
            debug!("No certificates due for renewal");
            return;
        }

        info!(due_count = due.len(), "Certificates due for renewal");

        for domains in due {
            let start = Instant::now();
            let domain_list: Vec<String> =
                domains.iter().map(str::to_string).collect();

            match self.manager.renew(&domain_list).await {
                Ok(record) => {
                    info!(
                        record = %record.key(),
                        expires = ?record.expires_at,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Certificate renewed"
                    );
                }
                Err(AcmeError::AlreadyInFlight(key)) => {
                    debug!(record = %key, "Renewal already in flight, skipping");
                }
                Err(e) => {
                    // One record's failure never blocks the others.
                    error!(domains = %domains, error = %e, "Certificate renewal failed");
                }
            }
        }
    }

    /// Startup issuance: make sure the configured domain set has a usable
    /// certificate before listeners open.
    pub async fn ensure_certificates(
        &self,
        domains: &[String],
        challenge_type: ChallengeKind,
    ) -> Result<(), AcmeError> {
        match self.manager.status(domains) {
            Err(AcmeError::NotFound(_)) => {
                info!("No certificate record exists, issuing");
                self.manager.issue(domains, challenge_type).await?;
                Ok(())
            }
            Err(e) => Err(e),
            Ok(record) if record.status == CertificateStatus::Issued => {
                let due = matches!(
                    record.expires_at,
                    Some(expires) if expires - Utc::now() <= self.renew_before
                );
                if due {
                    info!(record = %record.key(), "Certificate due, renewing at startup");
                    self.manager.renew(domains).await?;
                } else {
                    info!(
                        record = %record.key(),
                        expires = ?record.expires_at,
                        "Certificate already valid"
                    );
                }
                Ok(())
            }
            Ok(record) if record.status == CertificateStatus::Failed => {
                info!(record = %record.key(), "Previous attempt failed, re-issuing");
                self.manager.issue(domains, challenge_type).await?;
                Ok(())
            }
            Ok(record) if record.status.is_in_flight() => {
                // A stale in-flight status from a previous process; the
                // flight lock is free, so re-drive the exchange.
                warn!(
                    record = %record.key(),
                    status = %record.status,
                    "Record was mid-flight at last shutdown, re-issuing"
                );
                self.manager.issue(domains, challenge_type).await?;
                Ok(())
            }
            Ok(record) => {
                info!(record = %record.key(), "Record never completed issuance, issuing");
                self.manager.issue(domains, challenge_type).await?;
                Ok(())
            }
        }
    }
}

fn jitter() -> Duration {
    let millis = rand::thread_rng().gen_range(0..MAX_JITTER.as_millis() as u64);
    Duration::from_millis(millis)
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("renew_before_days", &self.renew_before.num_days())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_clamped_to_minimum() {
        let (_tx, rx) = watch::channel(false);
        let manager = test_manager();
        let scheduler =
            RenewalScheduler::new(manager, 30, rx).with_interval(Duration::from_secs(60));

        assert_eq!(scheduler.check_interval, MIN_CHECK_INTERVAL);
    }

    #[tokio::test]
    async fn test_ensure_re_drives_record_stuck_mid_flight() {
        use crate::acme::storage::{CertificateRecord, CertificateStatus, CertificateStore};
        use palisade_common::DomainSet;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CertificateStore::new(dir.path()).unwrap());
        let domains = DomainSet::parse(["example.com"]).unwrap();
        let mut record = CertificateRecord::new(domains, ChallengeKind::Http01, false);
        record.status = CertificateStatus::Validating;
        store.save_record(&record, None).unwrap();
        std::mem::forget(dir);

        let manager = Arc::new(CertificateManager::new(store, Arc::new(NoopDriver), false));
        manager.resume().unwrap();

        let (_tx, rx) = watch::channel(false);
        let scheduler = RenewalScheduler::new(Arc::clone(&manager), 30, rx);

        // The driver is unreachable, so a re-drive surfaces its error
        // instead of accepting the stale status as done.
        let result = scheduler
            .ensure_certificates(&["example.com".to_string()], ChallengeKind::Http01)
            .await;
        assert!(matches!(result, Err(AcmeError::CaUnavailable(_))));

        let record = manager.status(&["example.com".to_string()]).unwrap();
        assert_eq!(record.status, CertificateStatus::Failed);
    }

    #[test]
    fn test_jitter_bounded() {
        for _ in 0..100 {
            assert!(jitter() < MAX_JITTER);
        }
    }

    /// Driver that refuses every order as if the authority were down.
    struct NoopDriver;

    #[async_trait::async_trait]
    impl crate::acme::client::AcmeDriver for NoopDriver {
        async fn request_order(
            &self,
            _domains: &palisade_common::DomainSet,
            _challenge_type: ChallengeKind,
        ) -> Result<Box<dyn crate::acme::client::AcmeOrder>, AcmeError> {
            Err(AcmeError::CaUnavailable("test driver".to_string()))
        }
    }

    fn test_manager() -> Arc<CertificateManager> {
        use crate::acme::storage::CertificateStore;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CertificateStore::new(dir.path()).unwrap());
        // Leak the tempdir so the store outlives this helper in tests.
        std::mem::forget(dir);
        Arc::new(CertificateManager::new(store, Arc::new(NoopDriver), false))
    }
}

//! Certificate lifecycle orchestration.
//!
//! Owns the per-record state machine and the single-flight guarantee. All
//! record mutation goes through here: `issue` and `renew` hold a per-record
//! exclusive lock for the full protocol exchange, while `status` reads a
//! lock-free snapshot and never waits behind in-flight work.
//!
//! # State Machine
//!
//! ```text
//! uninitialized -> pending -> validating -> finalizing -> issued
//! issued -> renewing -> issued
//! pending/validating/finalizing/renewing -> failed
//! ```
//!
//! `failed` is terminal for the automatic flow: only an explicit `issue` or
//! `renew` call re-attempts, never the scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use palisade_common::{DomainSet, RecordKey};
use palisade_config::ChallengeKind;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use super::client::AcmeDriver;
use super::error::{AcmeError, StorageError};
use super::storage::{CertificateRecord, CertificateStatus, CertificateStore, IssuedMaterial};

/// Capacity of the transition event channel.
const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// Emitted on every status change, for listener bootstrap and logging.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    /// Storage name of the record (primary domain, staging-suffixed).
    pub record: String,
    pub status: CertificateStatus,
}

/// Orchestrates issuance and renewal across all managed domain sets.
pub struct CertificateManager {
    store: Arc<CertificateStore>,
    driver: Arc<dyn AcmeDriver>,
    /// Last stable snapshot per record, served to status readers.
    records: DashMap<String, CertificateRecord>,
    /// Single-flight locks, one per record.
    flights: DashMap<String, Arc<Mutex<()>>>,
    transitions: broadcast::Sender<TransitionEvent>,
    /// Which CA environment this process issues against.
    staging: bool,
}

impl CertificateManager {
    pub fn new(store: Arc<CertificateStore>, driver: Arc<dyn AcmeDriver>, staging: bool) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            store,
            driver,
            records: DashMap::new(),
            flights: DashMap::new(),
            transitions,
            staging,
        }
    }

    /// Load persisted records into the snapshot map.
    ///
    /// Records persisted mid-flight by a previous process load with their
    /// in-flight status; their flight locks start free, so a fresh `issue`
    /// or `renew` call can pick them up.
    pub fn resume(&self) -> Result<usize, StorageError> {
        let records = self.store.load_all()?;
        let count = records.len();
        for record in records {
            debug!(
                record = %record.key(),
                status = %record.status,
                "Resumed certificate record"
            );
            self.records.insert(record.key().storage_name(), record);
        }
        if count > 0 {
            info!(count, "Resumed certificate records from storage");
        }
        Ok(count)
    }

    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    pub fn staging(&self) -> bool {
        self.staging
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.transitions.subscribe()
    }

    /// Issue a certificate for a domain set.
    ///
    /// Rejects malformed domain sets synchronously and fails fast with
    /// `AlreadyInFlight` when another issuance or renewal holds the
    /// record's flight lock. Held for the full protocol exchange, which may
    /// take tens of seconds.
    pub async fn issue(
        &self,
        domains: &[String],
        challenge_type: ChallengeKind,
    ) -> Result<CertificateRecord, AcmeError> {
        let domains = DomainSet::parse(domains)?;
        let key = RecordKey::new(&domains, self.staging);
        let name = key.storage_name();

        let _guard = self
            .flight_lock(&name)
            .try_lock_owned()
            .map_err(|_| AcmeError::AlreadyInFlight(key.clone()))?;

        let mut record = match self.records.get(&name) {
            // Challenge type is fixed at record creation; a re-issue keeps it.
            // The domain set is not: a re-issue with a different set orders
            // for the requested set, so added hostnames end up covered.
            Some(existing) => {
                let mut existing = existing.clone();
                if existing.challenge_type != challenge_type {
                    warn!(
                        record = %key,
                        requested = challenge_type.as_str(),
                        actual = existing.challenge_type.as_str(),
                        "Ignoring challenge type change for existing record"
                    );
                }
                if existing.domains != domains {
                    info!(
                        record = %key,
                        previous = %existing.domains,
                        requested = %domains,
                        "Domain set changed, ordering for the requested set"
                    );
                    existing.domains = domains;
                }
                existing
            }
            None => CertificateRecord::new(domains, challenge_type, self.staging),
        };

        record.last_error = None;
        self.transition(&mut record, CertificateStatus::Pending)?;

        info!(record = %key, "Starting certificate issuance");
        let outcome = self.run_order(&mut record, false).await;
        self.complete(record, outcome)
    }

    /// Renew an existing record.
    ///
    /// Requires previously issued material; re-runs the issuance exchange
    /// while preserving the record's identity and challenge type. The old
    /// chain keeps serving until the new one is fully persisted.
    pub async fn renew(&self, domains: &[String]) -> Result<CertificateRecord, AcmeError> {
        let domains = DomainSet::parse(domains)?;
        let key = RecordKey::new(&domains, self.staging);
        let name = key.storage_name();

        let Some(existing) = self.records.get(&name).map(|r| r.clone()) else {
            return Err(AcmeError::NotFound(key));
        };
        if existing.expires_at.is_none() || self.store.load_material(&key)?.is_none() {
            // Never issued; nothing to renew.
            return Err(AcmeError::NotFound(key));
        }

        let _guard = self
            .flight_lock(&name)
            .try_lock_owned()
            .map_err(|_| AcmeError::AlreadyInFlight(key.clone()))?;

        let mut record = existing;
        record.last_error = None;
        self.transition(&mut record, CertificateStatus::Renewing)?;

        info!(record = %key, "Starting certificate renewal");
        let outcome = self.run_order(&mut record, true).await;
        self.complete(record, outcome)
    }

    /// Read-only snapshot of a record. Never blocks behind in-flight work.
    pub fn status(&self, domains: &[String]) -> Result<CertificateRecord, AcmeError> {
        let domains = DomainSet::parse(domains)?;
        let key = RecordKey::new(&domains, self.staging);
        self.records
            .get(&key.storage_name())
            .map(|r| r.clone())
            .ok_or(AcmeError::NotFound(key))
    }

    /// Snapshot of every managed record.
    pub fn all_records(&self) -> Vec<CertificateRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    /// Domain sets due for renewal: `issued` records whose remaining
    /// validity is within the threshold. Failed or in-flight records are
    /// never returned, so the scheduler cannot retry them. Records from the
    /// other CA environment sharing the same store are skipped.
    pub fn needs_renewal(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Vec<DomainSet> {
        self.records
            .iter()
            .filter(|r| r.staging == self.staging)
            .filter(|r| r.status == CertificateStatus::Issued)
            .filter(|r| matches!(r.expires_at, Some(expires) if expires - now <= threshold))
            .map(|r| r.domains.clone())
            .collect()
    }

    fn flight_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.flights
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drive one order through the protocol exchange.
    ///
    /// Renewals stay in `renewing` for the whole exchange; initial issuance
    /// walks `pending -> validating -> finalizing`.
    async fn run_order(
        &self,
        record: &mut CertificateRecord,
        renewal: bool,
    ) -> Result<IssuedMaterial, AcmeError> {
        let mut order = self
            .driver
            .request_order(&record.domains, record.challenge_type)
            .await?;

        if !renewal {
            self.transition(record, CertificateStatus::Validating)?;
        }
        order.fulfill_challenges().await?;

        if !renewal {
            self.transition(record, CertificateStatus::Finalizing)?;
        }
        order.finalize().await
    }

    /// Commit the outcome of an exchange.
    fn complete(
        &self,
        mut record: CertificateRecord,
        outcome: Result<IssuedMaterial, AcmeError>,
    ) -> Result<CertificateRecord, AcmeError> {
        match outcome {
            Ok(material) => {
                record.status = CertificateStatus::Issued;
                record.issued_at = Some(material.issued_at);
                record.expires_at = Some(material.expires_at);
                record.last_error = None;
                // Material lands before the metadata commit point.
                self.store.save_record(&record, Some(&material))?;
                self.records
                    .insert(record.key().storage_name(), record.clone());
                self.publish(&record);
                info!(
                    record = %record.key(),
                    expires = %material.expires_at,
                    "Certificate record issued"
                );
                Ok(record)
            }
            Err(e @ AcmeError::Persistence(_)) => {
                // Storage is the thing that failed; leave the record at its
                // last durable state instead of trying to persist `failed`.
                error!(record = %record.key(), error = %e, "Storage failure during issuance");
                Err(e)
            }
            Err(e) => {
                record.status = CertificateStatus::Failed;
                record.last_error = Some(e.to_string());
                if let Err(save_err) = self.store.save_record(&record, None) {
                    error!(
                        record = %record.key(),
                        error = %save_err,
                        "Failed to persist failure state"
                    );
                }
                self.records
                    .insert(record.key().storage_name(), record.clone());
                self.publish(&record);
                warn!(record = %record.key(), error = %e, "Certificate operation failed");
                Err(e)
            }
        }
    }

    fn transition(
        &self,
        record: &mut CertificateRecord,
        status: CertificateStatus,
    ) -> Result<(), AcmeError> {
        record.status = status;
        self.store.save_record(record, None)?;
        self.records
            .insert(record.key().storage_name(), record.clone());
        self.publish(record);
        Ok(())
    }

    fn publish(&self, record: &CertificateRecord) {
        // Send failure only means nobody is listening.
        let _ = self.transitions.send(TransitionEvent {
            record: record.key().storage_name(),
            status: record.status,
        });
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("records", &self.records.len())
            .field("staging", &self.staging)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::client::AcmeOrder;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Driver whose orders always fail at validation.
    struct RejectingDriver;

    struct RejectingOrder;

    #[async_trait]
    impl AcmeDriver for RejectingDriver {
        async fn request_order(
            &self,
            _domains: &DomainSet,
            _challenge_type: ChallengeKind,
        ) -> Result<Box<dyn AcmeOrder>, AcmeError> {
            Ok(Box::new(RejectingOrder))
        }
    }

    #[async_trait]
    impl AcmeOrder for RejectingOrder {
        async fn fulfill_challenges(&mut self) -> Result<(), AcmeError> {
            Err(AcmeError::ValidationFailed("proof rejected".to_string()))
        }

        async fn finalize(&mut self) -> Result<IssuedMaterial, AcmeError> {
            unreachable!("validation never succeeds")
        }
    }

    /// Driver that records the domain set of every requested order before
    /// failing validation.
    struct RecordingDriver {
        orders: std::sync::Mutex<Vec<Vec<String>>>,
    }

    impl RecordingDriver {
        fn new() -> Self {
            Self {
                orders: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AcmeDriver for RecordingDriver {
        async fn request_order(
            &self,
            domains: &DomainSet,
            _challenge_type: ChallengeKind,
        ) -> Result<Box<dyn AcmeOrder>, AcmeError> {
            self.orders
                .lock()
                .unwrap()
                .push(domains.iter().map(str::to_owned).collect());
            Ok(Box::new(RejectingOrder))
        }
    }

    fn setup_manager() -> (TempDir, CertificateManager) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CertificateStore::new(temp_dir.path()).unwrap());
        let manager = CertificateManager::new(store, Arc::new(RejectingDriver), false);
        (temp_dir, manager)
    }

    fn seed_record(
        manager: &CertificateManager,
        domain: &str,
        status: CertificateStatus,
        expires_in_days: Option<i64>,
    ) {
        let domains = DomainSet::parse([domain]).unwrap();
        let mut record = CertificateRecord::new(domains, ChallengeKind::Http01, false);
        record.status = status;
        record.expires_at = expires_in_days.map(|d| Utc::now() + chrono::Duration::days(d));
        if status == CertificateStatus::Issued {
            record.issued_at = Some(Utc::now());
        }
        manager
            .records
            .insert(record.key().storage_name(), record);
    }

    #[tokio::test]
    async fn test_issue_rejects_malformed_domains() {
        let (_dir, manager) = setup_manager();

        let result = manager
            .issue(&["not a domain!".to_string()], ChallengeKind::Http01)
            .await;

        assert!(matches!(result, Err(AcmeError::InvalidDomainSet(_))));
    }

    #[tokio::test]
    async fn test_failed_validation_sets_failed_with_last_error() {
        let (_dir, manager) = setup_manager();

        let result = manager
            .issue(&["example.com".to_string()], ChallengeKind::Http01)
            .await;
        assert!(matches!(result, Err(AcmeError::ValidationFailed(_))));

        let record = manager.status(&["example.com".to_string()]).unwrap();
        assert_eq!(record.status, CertificateStatus::Failed);
        assert!(record.last_error.as_deref().unwrap().contains("proof rejected"));
    }

    #[tokio::test]
    async fn test_status_unknown_is_not_found() {
        let (_dir, manager) = setup_manager();

        let result = manager.status(&["unknown.com".to_string()]);
        assert!(matches!(result, Err(AcmeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_renew_without_record_is_not_found() {
        let (_dir, manager) = setup_manager();

        let result = manager.renew(&["unknown.com".to_string()]).await;
        assert!(matches!(result, Err(AcmeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_renew_never_issued_record_is_not_found() {
        let (_dir, manager) = setup_manager();
        seed_record(&manager, "failed.com", CertificateStatus::Failed, None);

        let result = manager.renew(&["failed.com".to_string()]).await;
        assert!(matches!(result, Err(AcmeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_needs_renewal_filters_by_status_and_expiry() {
        let (_dir, manager) = setup_manager();

        seed_record(&manager, "due.com", CertificateStatus::Issued, Some(10));
        seed_record(&manager, "fresh.com", CertificateStatus::Issued, Some(80));
        seed_record(&manager, "failed.com", CertificateStatus::Failed, Some(5));
        seed_record(&manager, "pending.com", CertificateStatus::Pending, None);

        let due = manager.needs_renewal(Utc::now(), chrono::Duration::days(30));

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].primary(), "due.com");
    }

    #[tokio::test]
    async fn test_needs_renewal_skips_other_environment_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CertificateStore::new(temp_dir.path()).unwrap());
        let manager = CertificateManager::new(store, Arc::new(RejectingDriver), false);

        // A due staging record sharing the production manager's store.
        let domains = DomainSet::parse(["staged.com"]).unwrap();
        let mut record = CertificateRecord::new(domains, ChallengeKind::Http01, true);
        record.status = CertificateStatus::Issued;
        record.issued_at = Some(Utc::now());
        record.expires_at = Some(Utc::now() + chrono::Duration::days(5));
        manager
            .records
            .insert(record.key().storage_name(), record);

        seed_record(&manager, "due.com", CertificateStatus::Issued, Some(10));

        let due = manager.needs_renewal(Utc::now(), chrono::Duration::days(30));

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].primary(), "due.com");
    }

    #[tokio::test]
    async fn test_reissue_orders_for_expanded_domain_set() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CertificateStore::new(temp_dir.path()).unwrap());
        let driver = Arc::new(RecordingDriver::new());
        let manager = CertificateManager::new(store, driver.clone(), false);

        let _ = manager
            .issue(&["example.com".to_string()], ChallengeKind::Http01)
            .await;
        let _ = manager
            .issue(
                &["example.com".to_string(), "www.example.com".to_string()],
                ChallengeKind::Http01,
            )
            .await;

        let orders = driver.orders.lock().unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0], ["example.com"]);
        assert_eq!(orders[1], ["example.com", "www.example.com"]);
        drop(orders);

        let record = manager.status(&["example.com".to_string()]).unwrap();
        assert_eq!(record.domains.as_slice(), ["example.com", "www.example.com"]);
    }

    #[tokio::test]
    async fn test_transition_events_published() {
        let (_dir, manager) = setup_manager();
        let mut events = manager.subscribe();

        let _ = manager
            .issue(&["example.com".to_string()], ChallengeKind::Http01)
            .await;

        // pending -> validating -> failed
        let first = events.recv().await.unwrap();
        assert_eq!(first.status, CertificateStatus::Pending);
        assert_eq!(first.record, "example.com");

        let second = events.recv().await.unwrap();
        assert_eq!(second.status, CertificateStatus::Validating);

        let third = events.recv().await.unwrap();
        assert_eq!(third.status, CertificateStatus::Failed);
    }

    #[tokio::test]
    async fn test_resume_loads_persisted_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(CertificateStore::new(temp_dir.path()).unwrap());

        let domains = DomainSet::parse(["example.com"]).unwrap();
        let mut record = CertificateRecord::new(domains, ChallengeKind::Http01, false);
        record.status = CertificateStatus::Validating;
        store.save_record(&record, None).unwrap();

        let manager = CertificateManager::new(store, Arc::new(RejectingDriver), false);
        let count = manager.resume().unwrap();

        assert_eq!(count, 1);
        let loaded = manager.status(&["example.com".to_string()]).unwrap();
        assert_eq!(loaded.status, CertificateStatus::Validating);
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Incident ledger: a bounded, encrypted, newest-first list of security
// incidents, with severity-based dispatch.
//
// The whole list is stored as one envelope under `security_incidents`. All
// writes go through a single mutex that also caches the decrypted list, so
// concurrent writers cannot drop each other's entries. Each append runs on
// its own task and completes even if the caller stops waiting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bastion_bridge::PlatformBridge;
use bastion_core::clock::Clock;
use bastion_core::error::{BastionError, Result};
use bastion_core::types::{
    DeviceInfo, IncidentMetadata, IncidentType, SecurityIncident, Severity,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, instrument, warn};

use crate::export::{self, ExportFormat};
use crate::sink::IncidentSink;
use crate::storage::ProtectedStorage;

pub const INCIDENTS_STORAGE_KEY: &str = "security_incidents";

/// Most incidents retained; older ones are evicted first.
pub const MAX_INCIDENTS: usize = 1000;

const ESCALATION_CAPACITY: usize = 16;

/// Query over the ledger. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentFilter {
    pub incident_type: Option<IncidentType>,
    pub severity: Option<Severity>,
    /// Inclusive lower bound on severity.
    pub min_severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl IncidentFilter {
    pub fn matches(&self, incident: &SecurityIncident) -> bool {
        self.incident_type.is_none_or(|t| incident.incident_type == t)
            && self.severity.is_none_or(|s| incident.severity == s)
            && self.min_severity.is_none_or(|s| incident.severity >= s)
            && self.since.is_none_or(|t| incident.timestamp >= t)
            && self.until.is_none_or(|t| incident.timestamp <= t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentStatistics {
    pub total: usize,
    pub by_type: BTreeMap<IncidentType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub last_24_hours: usize,
    pub last_7_days: usize,
}

/// Encrypted incident store and severity dispatcher.
pub struct IncidentLedger {
    shared: Arc<Shared>,
    bridge: Arc<dyn PlatformBridge>,
    clock: Arc<dyn Clock>,
    user_id: RwLock<Option<String>>,
}

/// State the append task needs after the caller has gone.
struct Shared {
    storage: Arc<ProtectedStorage>,
    /// Decrypted list, newest first. `None` until first loaded.
    entries: Mutex<Option<Vec<SecurityIncident>>>,
    escalations: broadcast::Sender<SecurityIncident>,
    lockdown_recommended: AtomicBool,
    capacity: usize,
}

impl IncidentLedger {
    pub fn new(
        storage: Arc<ProtectedStorage>,
        bridge: Arc<dyn PlatformBridge>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_capacity(storage, bridge, clock, MAX_INCIDENTS)
    }

    /// A ledger that retains at most `capacity` incidents.
    pub fn with_capacity(
        storage: Arc<ProtectedStorage>,
        bridge: Arc<dyn PlatformBridge>,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> Self {
        let (escalations, _) = broadcast::channel(ESCALATION_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                storage,
                entries: Mutex::new(None),
                escalations,
                lockdown_recommended: AtomicBool::new(false),
                capacity: capacity.max(1),
            }),
            bridge,
            clock,
            user_id: RwLock::new(None),
        }
    }

    /// Load the stored ledger.
    ///
    /// A ledger that exists but cannot be decrypted is discarded and a
    /// tampering incident is recorded in its place. Key store failures
    /// propagate and leave the stored ledger untouched.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> Result<()> {
        let mut entries = self.shared.entries.lock().await;
        match self.shared.load().await {
            Ok(list) => {
                info!(count = list.len(), "incident ledger loaded");
                *entries = Some(list);
            }
            Err(BastionError::Decryption) => {
                warn!("incident ledger unreadable; starting a new ledger");
                *entries = Some(Vec::new());
                drop(entries);
                self.log_incident(
                    IncidentType::DataTamperingDetected,
                    Severity::High,
                    "Stored incident ledger failed integrity checks and was reset",
                    None,
                )
                .await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Attach a user id to incidents recorded from now on.
    pub async fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write().await = user_id;
    }

    /// Record an incident, persist the ledger, then dispatch by severity.
    ///
    /// The write is detached: dropping the returned future does not cancel
    /// it.
    #[instrument(skip(self, description, metadata))]
    pub async fn log_incident(
        &self,
        incident_type: IncidentType,
        severity: Severity,
        description: impl Into<String>,
        metadata: Option<IncidentMetadata>,
    ) -> Result<SecurityIncident> {
        let now = self.clock.now();
        let incident = SecurityIncident {
            id: incident_id(now),
            incident_type,
            severity,
            description: description.into(),
            timestamp: now,
            device_info: self.device_info(),
            user_id: self.user_id.read().await.clone(),
            metadata,
        };

        let shared = Arc::clone(&self.shared);
        let record = incident.clone();
        tokio::spawn(async move { shared.append(record).await })
            .await
            .map_err(|e| BastionError::Database(format!("incident write task failed: {e}")))??;
        Ok(incident)
    }

    /// Incidents matching `filter`, newest first.
    pub async fn incidents(&self, filter: &IncidentFilter) -> Result<Vec<SecurityIncident>> {
        let all = self.shared.snapshot().await?;
        let matching = all.into_iter().filter(|i| filter.matches(i));
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    /// Counts per type and severity, plus the last-day and last-week
    /// totals. Every type and severity is present, zero when unseen.
    pub async fn statistics(&self) -> Result<IncidentStatistics> {
        let all = self.shared.snapshot().await?;
        let now = self.clock.now();
        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);

        let mut stats = IncidentStatistics {
            total: all.len(),
            by_type: IncidentType::ALL.into_iter().map(|t| (t, 0)).collect(),
            by_severity: Severity::ALL.into_iter().map(|s| (s, 0)).collect(),
            ..Default::default()
        };
        for incident in &all {
            *stats.by_type.entry(incident.incident_type).or_default() += 1;
            *stats.by_severity.entry(incident.severity).or_default() += 1;
            if incident.timestamp >= day_ago {
                stats.last_24_hours += 1;
            }
            if incident.timestamp >= week_ago {
                stats.last_7_days += 1;
            }
        }
        Ok(stats)
    }

    /// Log a summary of the ledger and raise the lockdown flag if a
    /// critical incident happened in the last hour.
    pub async fn audit(&self) -> Result<IncidentStatistics> {
        let stats = self.statistics().await?;
        let recent_critical = self.has_critical_incidents_in_last_hour().await;
        if recent_critical {
            self.shared.lockdown_recommended.store(true, Ordering::SeqCst);
            warn!("critical incident within the last hour");
        }
        info!(
            total = stats.total,
            last_24_hours = stats.last_24_hours,
            last_7_days = stats.last_7_days,
            "incident audit complete"
        );
        Ok(stats)
    }

    /// Whether a critical incident was recorded in the last hour. Query
    /// failures report `false`.
    pub async fn has_critical_incidents_in_last_hour(&self) -> bool {
        let since = self.clock.now() - Duration::hours(1);
        match self.shared.snapshot().await {
            Ok(all) => all
                .iter()
                .any(|i| i.severity == Severity::Critical && i.timestamp >= since),
            Err(e) => {
                warn!(error = %e, "incident query failed");
                false
            }
        }
    }

    /// Render the whole ledger, newest first.
    pub async fn export(&self, format: ExportFormat) -> Result<String> {
        export::render(format, &self.shared.snapshot().await?)
    }

    /// Export sealed under `passphrase` (age / scrypt).
    pub async fn export_sealed(&self, format: ExportFormat, passphrase: &str) -> Result<Vec<u8>> {
        let rendered = self.export(format).await?;
        export::seal(rendered.as_bytes(), passphrase)
    }

    /// Remove every incident.
    pub async fn clear(&self) -> Result<()> {
        let mut entries = self.shared.entries.lock().await;
        self.shared
            .storage
            .remove_from_storage(INCIDENTS_STORAGE_KEY)
            .await?;
        *entries = Some(Vec::new());
        info!("incident ledger cleared");
        Ok(())
    }

    /// Receive every critical incident as it is recorded.
    pub fn subscribe_escalations(&self) -> broadcast::Receiver<SecurityIncident> {
        self.shared.escalations.subscribe()
    }

    /// Latched once a critical incident is dispatched.
    pub fn lockdown_recommended(&self) -> bool {
        self.shared.lockdown_recommended.load(Ordering::SeqCst)
    }

    /// Clear the lockdown latch.
    pub fn acknowledge_lockdown(&self) {
        self.shared.lockdown_recommended.store(false, Ordering::SeqCst);
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_id: self
                .bridge
                .device_identifier()
                .unwrap_or_else(|_| "unknown".into()),
            platform: self.bridge.platform(),
            os_version: self.bridge.os_version(),
            app_version: self.bridge.app_version(),
        }
    }
}

impl Shared {
    async fn append(&self, incident: SecurityIncident) -> Result<()> {
        {
            let mut entries = self.entries.lock().await;
            let mut next = match entries.as_ref() {
                Some(list) => list.clone(),
                None => self.load().await?,
            };
            next.insert(0, incident.clone());
            next.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            next.truncate(self.capacity);
            self.storage
                .encrypt_for_storage(INCIDENTS_STORAGE_KEY, &next)
                .await?;
            *entries = Some(next);
        }

        self.dispatch(&incident);
        Ok(())
    }

    fn dispatch(&self, incident: &SecurityIncident) {
        let id = incident.id.as_str();
        let kind = incident.incident_type;
        match incident.severity {
            Severity::Critical => {
                error!(%id, %kind, description = %incident.description, "critical security incident");
                self.lockdown_recommended.store(true, Ordering::SeqCst);
                if self.escalations.send(incident.clone()).is_err() {
                    debug!("no escalation subscribers");
                }
            }
            Severity::High => warn!(%id, %kind, "high severity security incident"),
            Severity::Medium => info!(%id, %kind, "security incident"),
            Severity::Low => debug!(%id, %kind, "low severity security incident"),
        }
    }

    async fn snapshot(&self) -> Result<Vec<SecurityIncident>> {
        let mut entries = self.entries.lock().await;
        if let Some(list) = entries.as_ref() {
            return Ok(list.clone());
        }
        let list = self.load().await?;
        *entries = Some(list.clone());
        Ok(list)
    }

    async fn load(&self) -> Result<Vec<SecurityIncident>> {
        Ok(self
            .storage
            .decrypt_from_storage(INCIDENTS_STORAGE_KEY)
            .await?
            .unwrap_or_default())
    }
}

/// `inc_{unix millis}_{8 hex chars}`.
fn incident_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("inc_{}_{}", now.timestamp_millis(), &suffix[..8])
}

#[async_trait]
impl IncidentSink for IncidentLedger {
    async fn record_incident(
        &self,
        incident_type: IncidentType,
        severity: Severity,
        description: String,
        metadata: Option<IncidentMetadata>,
    ) -> Result<()> {
        self.log_incident(incident_type, severity, description, metadata)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use bastion_bridge::{MemoryBridge, NativeKeychain};
    use bastion_core::clock::ManualClock;
    use bastion_core::config::EncryptionConfig;
    use bastion_core::types::Platform;

    use super::*;
    use crate::storage::MASTER_KEY_NAME;

    struct Fixture {
        bridge: Arc<MemoryBridge>,
        storage: Arc<ProtectedStorage>,
        clock: Arc<ManualClock>,
        ledger: IncidentLedger,
    }

    fn fixture_with_capacity(capacity: usize) -> Fixture {
        let bridge = Arc::new(MemoryBridge::new(Platform::Android));
        let storage = Arc::new(ProtectedStorage::new(
            bridge.clone(),
            bridge.clone(),
            EncryptionConfig::default(),
        ));
        let clock = Arc::new(ManualClock::default());
        let ledger =
            IncidentLedger::with_capacity(storage.clone(), bridge.clone(), clock.clone(), capacity);
        Fixture {
            bridge,
            storage,
            clock,
            ledger,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_capacity(MAX_INCIDENTS)
    }

    #[tokio::test]
    async fn incident_carries_identity() {
        let f = fixture();
        f.ledger.set_user_id(Some("user-7".into())).await;
        let incident = f
            .ledger
            .log_incident(IncidentType::RootDetected, Severity::High, "Device is rooted", None)
            .await
            .unwrap();

        assert!(incident.id.starts_with("inc_"));
        let suffix = incident.id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(incident.device_info.device_id, "memory-device-0001");
        assert_eq!(incident.device_info.platform, Platform::Android);
        assert_eq!(incident.user_id.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn newest_first_and_encrypted_at_rest() {
        let f = fixture();
        f.ledger
            .log_incident(IncidentType::DebuggingDetected, Severity::Medium, "first", None)
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(1));
        f.ledger
            .log_incident(IncidentType::HookingDetected, Severity::High, "second", None)
            .await
            .unwrap();

        let all = f.ledger.incidents(&IncidentFilter::default()).await.unwrap();
        assert_eq!(all[0].description, "second");
        assert_eq!(all[1].description, "first");

        let raw = f.bridge.keychain().load_secret(INCIDENTS_STORAGE_KEY).unwrap().unwrap();
        let raw = String::from_utf8_lossy(&raw);
        assert!(!raw.contains("second"));
        assert!(raw.contains("ciphertext"));
    }

    #[tokio::test]
    async fn retention_keeps_newest() {
        let f = fixture_with_capacity(3);
        for i in 0..5 {
            f.ledger
                .log_incident(IncidentType::DebuggingDetected, Severity::Low, format!("n{i}"), None)
                .await
                .unwrap();
            f.clock.advance(Duration::seconds(1));
        }
        let all = f.ledger.incidents(&IncidentFilter::default()).await.unwrap();
        let names: Vec<_> = all.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(names, ["n4", "n3", "n2"]);
    }

    #[tokio::test]
    async fn full_ledger_evicts_the_oldest() {
        let f = fixture();
        let template = f
            .ledger
            .log_incident(IncidentType::DebuggingDetected, Severity::Low, "n0", None)
            .await
            .unwrap();
        let mut seeded: Vec<SecurityIncident> = (0..MAX_INCIDENTS)
            .map(|i| SecurityIncident {
                id: format!("inc_seed_{i}"),
                description: format!("n{i}"),
                timestamp: template.timestamp + Duration::seconds(i as i64),
                ..template.clone()
            })
            .collect();
        seeded.reverse();
        f.storage
            .encrypt_for_storage(INCIDENTS_STORAGE_KEY, &seeded)
            .await
            .unwrap();

        let ledger = IncidentLedger::new(f.storage.clone(), f.bridge.clone(), f.clock.clone());
        ledger.initialize().await.unwrap();
        assert_eq!(ledger.statistics().await.unwrap().total, MAX_INCIDENTS);

        f.clock.advance(Duration::seconds(MAX_INCIDENTS as i64));
        ledger
            .log_incident(IncidentType::DebuggingDetected, Severity::Low, "newest", None)
            .await
            .unwrap();

        let all = ledger.incidents(&IncidentFilter::default()).await.unwrap();
        assert_eq!(all.len(), MAX_INCIDENTS);
        assert_eq!(all[0].description, "newest");
        assert_eq!(all[MAX_INCIDENTS - 1].description, "n1");
        assert!(all.iter().all(|i| i.description != "n0"));
    }

    #[tokio::test]
    async fn abandoned_write_still_lands() {
        let f = fixture();
        let held = f.ledger.shared.entries.lock().await;
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            f.ledger
                .log_incident(IncidentType::HookingDetected, Severity::High, "late", None),
        )
        .await;
        assert!(waited.is_err());
        drop(held);

        let all = f.ledger.incidents(&IncidentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "late");
    }

    /// Keychain whose master key reads fail a set number of times.
    struct FlakyKeychain {
        inner: Arc<MemoryBridge>,
        failures: AtomicUsize,
    }

    impl NativeKeychain for FlakyKeychain {
        fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
            self.inner.store_secret(key, value)
        }

        fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let fail = key == MASTER_KEY_NAME
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if fail {
                return Err(BastionError::KeyStore("keychain locked".into()));
            }
            self.inner.load_secret(key)
        }

        fn delete_secret(&self, key: &str) -> Result<()> {
            self.inner.delete_secret(key)
        }
    }

    #[tokio::test]
    async fn keychain_outage_keeps_the_stored_ledger() {
        let f = fixture();
        for i in 0..3 {
            f.ledger
                .log_incident(IncidentType::RootDetected, Severity::High, format!("r{i}"), None)
                .await
                .unwrap();
        }

        let flaky = Arc::new(FlakyKeychain {
            inner: f.bridge.clone(),
            failures: AtomicUsize::new(1),
        });
        let storage = Arc::new(ProtectedStorage::new(
            flaky,
            f.bridge.clone(),
            EncryptionConfig::default(),
        ));
        let restarted = IncidentLedger::new(storage, f.bridge.clone(), f.clock.clone());
        assert!(matches!(
            restarted.initialize().await.unwrap_err(),
            BastionError::KeyStore(_)
        ));

        restarted.initialize().await.unwrap();
        let all = restarted.incidents(&IncidentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all
            .iter()
            .all(|i| i.incident_type != IncidentType::DataTamperingDetected));
    }

    #[tokio::test]
    async fn concurrent_writers_lose_nothing() {
        let f = fixture();
        let ledger = Arc::new(IncidentLedger::new(
            f.storage.clone(),
            f.bridge.clone(),
            f.clock.clone(),
        ));
        let mut writers = tokio::task::JoinSet::new();
        for i in 0..8 {
            let ledger = Arc::clone(&ledger);
            writers.spawn(async move {
                ledger
                    .log_incident(
                        IncidentType::SuspiciousNetworkActivity,
                        Severity::Medium,
                        format!("w{i}"),
                        None,
                    )
                    .await
                    .map(|_| ())
            });
        }
        while let Some(joined) = writers.join_next().await {
            joined.unwrap().unwrap();
        }
        assert_eq!(ledger.statistics().await.unwrap().total, 8);

        // A fresh ledger over the same storage sees the same eight.
        let reloaded = IncidentLedger::new(f.storage.clone(), f.bridge.clone(), f.clock.clone());
        reloaded.initialize().await.unwrap();
        assert_eq!(reloaded.statistics().await.unwrap().total, 8);
    }

    #[tokio::test]
    async fn filters_and_statistics() {
        let f = fixture();
        f.ledger
            .log_incident(IncidentType::RootDetected, Severity::High, "old", None)
            .await
            .unwrap();
        f.clock.advance(Duration::days(2));
        f.ledger
            .log_incident(IncidentType::RootDetected, Severity::Critical, "recent", None)
            .await
            .unwrap();
        f.ledger
            .log_incident(IncidentType::DebuggingDetected, Severity::Low, "noise", None)
            .await
            .unwrap();

        let roots = f
            .ledger
            .incidents(&IncidentFilter {
                incident_type: Some(IncidentType::RootDetected),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(roots.len(), 2);

        let serious = f
            .ledger
            .incidents(&IncidentFilter {
                min_severity: Some(Severity::High),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(serious.len(), 1);
        assert_eq!(serious[0].description, "recent");

        let stats = f.ledger.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type[&IncidentType::RootDetected], 2);
        assert_eq!(stats.by_severity[&Severity::Low], 1);
        assert_eq!(stats.by_type.len(), 8);
        assert_eq!(stats.by_type[&IncidentType::HookingDetected], 0);
        assert_eq!(stats.by_severity[&Severity::Medium], 0);
        assert_eq!(stats.last_24_hours, 2);
        assert_eq!(stats.last_7_days, 3);
    }

    #[tokio::test]
    async fn critical_dispatch_escalates() {
        let f = fixture();
        let mut rx = f.ledger.subscribe_escalations();
        f.ledger
            .log_incident(IncidentType::HookingDetected, Severity::High, "high", None)
            .await
            .unwrap();
        assert!(!f.ledger.lockdown_recommended());

        f.ledger
            .log_incident(IncidentType::DataTamperingDetected, Severity::Critical, "critical", None)
            .await
            .unwrap();
        assert!(f.ledger.lockdown_recommended());
        assert_eq!(rx.recv().await.unwrap().description, "critical");
        assert!(f.ledger.has_critical_incidents_in_last_hour().await);

        f.clock.advance(Duration::minutes(61));
        assert!(!f.ledger.has_critical_incidents_in_last_hour().await);
        f.ledger.acknowledge_lockdown();
        assert!(!f.ledger.lockdown_recommended());
    }

    #[tokio::test]
    async fn csv_export_has_header_plus_rows() {
        let f = fixture();
        for i in 0..3 {
            f.ledger
                .log_incident(IncidentType::DebuggingDetected, Severity::Low, format!("d{i}"), None)
                .await
                .unwrap();
        }
        let csv = f.ledger.export(ExportFormat::Csv).await.unwrap();
        assert_eq!(csv.lines().count(), 4);

        let sealed = f
            .ledger
            .export_sealed(ExportFormat::Json, "export-passphrase")
            .await
            .unwrap();
        let opened = export::unseal(&sealed, "export-passphrase").unwrap();
        let back: Vec<SecurityIncident> = serde_json::from_slice(&opened).unwrap();
        assert_eq!(back.len(), 3);
    }

    #[tokio::test]
    async fn clear_empties_ledger() {
        let f = fixture();
        f.ledger
            .log_incident(IncidentType::RootDetected, Severity::High, "x", None)
            .await
            .unwrap();
        f.ledger.clear().await.unwrap();
        assert!(f.ledger.incidents(&IncidentFilter::default()).await.unwrap().is_empty());
        assert!(f.bridge.keychain().load_secret(INCIDENTS_STORAGE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_ledger_is_reset_with_tamper_incident() {
        let f = fixture();
        f.bridge
            .keychain()
            .store_secret(INCIDENTS_STORAGE_KEY, b"{\"not\":\"an envelope\"}")
            .unwrap();
        f.ledger.initialize().await.unwrap();

        let all = f.ledger.incidents(&IncidentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].incident_type, IncidentType::DataTamperingDetected);
    }

    #[tokio::test]
    async fn audit_latches_on_recent_critical() {
        let f = fixture();
        f.ledger
            .log_incident(IncidentType::RootDetected, Severity::Critical, "c", None)
            .await
            .unwrap();

        let restarted = IncidentLedger::new(f.storage.clone(), f.bridge.clone(), f.clock.clone());
        restarted.initialize().await.unwrap();
        assert!(!restarted.lockdown_recommended());
        let stats = restarted.audit().await.unwrap();
        assert_eq!(stats.total, 1);
        assert!(restarted.lockdown_recommended());
    }
}

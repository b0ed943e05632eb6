// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security manager: builds every component, initializes them together,
// and combines their results into risk assessments and a health summary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bastion_bridge::{NativeKeychain, PlatformBridge};
use bastion_core::clock::Clock;
use bastion_core::config::{AppLockConfigUpdate, SecurityConfig, SecurityConfigUpdate};
use bastion_core::error::{BastionError, Result};
use bastion_core::types::{
    CertificateInfo, DeviceSecurityStatus, IncidentMetadata, IncidentType, LockState,
    RiskLevel, SecurityIncident, Severity,
};
use rustls::RootCertStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{error, info, instrument, warn};

use crate::app_lock::{AppLock, UnlockMethod};
use crate::certificates::CertificatePinValidator;
use crate::export::ExportFormat;
use crate::incidents::{IncidentFilter, IncidentLedger, IncidentStatistics};
use crate::integrity::{self, DeviceIntegrityChecker};
use crate::risk;
use crate::sink::{self, IncidentSink};
use crate::storage::{EncryptionEnvelope, ProtectedStorage};
use crate::tls::PinnedServerVerifier;

pub const PRIVACY_STORAGE_KEY: &str = "privacy_settings";

/// Result of [`SecurityManager::perform_security_assessment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAssessment {
    pub device_security: DeviceSecurityStatus,
    pub recommendations: Vec<String>,
    pub risk_level: RiskLevel,
    pub risk_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Result of [`SecurityManager::security_health`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityHealth {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub risk_level: RiskLevel,
}

/// Sends component incidents to the ledger, or only to the trace log when
/// incident logging is switched off.
struct IncidentRouter {
    ledger: Arc<IncidentLedger>,
    enabled: AtomicBool,
}

#[async_trait]
impl IncidentSink for IncidentRouter {
    async fn record_incident(
        &self,
        incident_type: IncidentType,
        severity: Severity,
        description: String,
        metadata: Option<IncidentMetadata>,
    ) -> Result<()> {
        if self.enabled.load(Ordering::SeqCst) {
            self.ledger
                .record_incident(incident_type, severity, description, metadata)
                .await
        } else {
            info!(%incident_type, %severity, %description, "incident logging disabled; not recorded");
            Ok(())
        }
    }
}

/// Composition root for the security subsystem.
///
/// Construct once per process and share behind an `Arc`. Every operation
/// other than [`initialize`](Self::initialize) and the read-only accessors
/// fails with [`BastionError::NotInitialized`] until `initialize` has
/// succeeded.
pub struct SecurityManager {
    config: RwLock<SecurityConfig>,
    storage: Arc<ProtectedStorage>,
    integrity: DeviceIntegrityChecker,
    certificates: CertificatePinValidator,
    app_lock: AppLock,
    ledger: Arc<IncidentLedger>,
    router: Arc<IncidentRouter>,
    initialized: AtomicBool,
}

impl SecurityManager {
    /// Wire the components over the given platform services. Nothing
    /// touches the keychain until [`initialize`](Self::initialize).
    pub fn new(
        bridge: Arc<dyn PlatformBridge>,
        keychain: Arc<dyn NativeKeychain>,
        clock: Arc<dyn Clock>,
        config: SecurityConfig,
    ) -> Self {
        let storage = Arc::new(ProtectedStorage::new(
            keychain,
            Arc::clone(&bridge),
            config.data_encryption.clone(),
        ));
        let ledger = Arc::new(IncidentLedger::new(
            Arc::clone(&storage),
            Arc::clone(&bridge),
            Arc::clone(&clock),
        ));
        let router = Arc::new(IncidentRouter {
            ledger: Arc::clone(&ledger),
            enabled: AtomicBool::new(config.incident_logging),
        });
        let sink: Arc<dyn IncidentSink> = router.clone();

        let integrity = DeviceIntegrityChecker::new(
            Arc::clone(&bridge),
            Arc::clone(&sink),
            Arc::clone(&clock),
            config.integrity.clone(),
        );
        let certificates = CertificatePinValidator::new(
            Arc::clone(&storage),
            Arc::clone(&sink),
            Arc::clone(&clock),
            config.trusted_issuers.clone(),
        );
        let app_lock = AppLock::new(Arc::clone(&storage), bridge, sink, clock);

        Self {
            config: RwLock::new(config),
            storage,
            integrity,
            certificates,
            app_lock,
            ledger,
            router,
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize every component, replacing the configuration first when
    /// `config` is given.
    ///
    /// Component initialization runs concurrently. If any of it fails the
    /// manager stays uninitialized and the error is returned.
    #[instrument(skip_all)]
    pub async fn initialize(&self, config: Option<SecurityConfig>) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        let config = {
            let mut current = self.config.write().await;
            if let Some(config) = config {
                config.validate()?;
                *current = config;
            }
            current.clone()
        };
        self.push_config(&config).await?;

        tokio::try_join!(
            self.storage.initialize(),
            self.app_lock.initialize(config.app_lock),
            self.certificates
                .initialize(&config.certificate_pins, &config.trusted_issuers),
            self.ledger.initialize(),
        )?;

        if config.device_security_checks {
            let status = self.integrity.check_integrity().await;
            if status.is_compromised() {
                warn!("device integrity compromised at startup");
            }
        }
        if let Err(e) = self.ledger.audit().await {
            warn!(error = %e, "startup incident audit failed");
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("security manager initialized");
        Ok(())
    }

    /// Whether the last `initialize` succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Probe the device and score the result.
    pub async fn perform_security_assessment(&self) -> Result<SecurityAssessment> {
        self.ensure_initialized()?;
        let status = self.integrity.check_integrity().await;
        let risk_score = risk::risk_score(&status);
        Ok(SecurityAssessment {
            device_security: status,
            recommendations: integrity::recommendations(&status),
            risk_level: risk::level_for_score(risk_score),
            risk_score,
        })
    }

    /// `false` on a rooted, jailbroken, or hooked device, after logging an
    /// incident for the finding.
    #[instrument(skip_all)]
    pub async fn validate_app_integrity(&self) -> Result<bool> {
        self.ensure_initialized()?;
        let status = self.integrity.check_integrity().await;

        if status.is_compromised() {
            let incident_type = if status.is_jailbroken {
                IncidentType::JailbreakDetected
            } else {
                IncidentType::RootDetected
            };
            sink::report(
                &*self.router,
                incident_type,
                Severity::Critical,
                "App integrity check failed: device is compromised",
                None,
            )
            .await;
            return Ok(false);
        }
        if status.has_hooking_framework {
            sink::report(
                &*self.router,
                IncidentType::HookingDetected,
                Severity::High,
                "App integrity check failed: hooking framework present",
                None,
            )
            .await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Lock the app, record a critical incident, then drop in-memory key
    /// material. The lock and wipe happen even if recording fails.
    ///
    /// The wipe runs last: recording the incident needs the master key.
    #[instrument(skip_all)]
    pub async fn emergency_lockdown(&self) -> Result<()> {
        self.ensure_initialized()?;
        error!("emergency lockdown");
        self.app_lock.force_lock().await;
        sink::report(
            &*self.router,
            IncidentType::UnauthorizedAccessAttempt,
            Severity::Critical,
            "Emergency lockdown triggered",
            Some(sink::metadata([("reason", "emergency_lockdown")])),
        )
        .await;
        self.ledger.acknowledge_lockdown();
        self.storage.wipe_keys().await;
        Ok(())
    }

    /// Summarize the current posture into a status with issues and
    /// recommendations.
    pub async fn security_health(&self) -> Result<SecurityHealth> {
        let assessment = self.perform_security_assessment().await?;
        let recent_critical = self.ledger.has_critical_incidents_in_last_hour().await;
        let status = &assessment.device_security;

        let mut issues = Vec::new();
        if status.is_rooted {
            issues.push("Device is rooted".to_owned());
        }
        if status.is_jailbroken {
            issues.push("Device is jailbroken".to_owned());
        }
        if status.has_hooking_framework {
            issues.push("Hooking framework detected".to_owned());
        }
        if status.is_debugging_enabled {
            issues.push("Debugging is enabled".to_owned());
        }
        if !status.has_screen_lock {
            issues.push("No screen lock is set".to_owned());
        }
        if status.is_emulator {
            issues.push("Running on an emulator".to_owned());
        }
        if recent_critical {
            issues.push("Critical security incident in the last hour".to_owned());
        }

        let health = if recent_critical || assessment.risk_level >= RiskLevel::High {
            HealthStatus::Critical
        } else if !issues.is_empty() {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        Ok(SecurityHealth {
            status: health,
            issues,
            recommendations: assessment.recommendations,
            risk_level: assessment.risk_level,
        })
    }

    /// Merge `update` into the configuration and push it to the
    /// components. An invalid update leaves everything unchanged.
    #[instrument(skip_all)]
    pub async fn update_security_config(&self, update: SecurityConfigUpdate) -> Result<()> {
        self.ensure_initialized()?;
        let app_lock_update = update.app_lock;
        let config = {
            let mut current = self.config.write().await;
            current.apply(update)?;
            current.clone()
        };
        self.push_config(&config).await?;
        if let Some(update) = app_lock_update {
            self.app_lock.update_config(update).await?;
        }
        info!("security configuration updated");
        Ok(())
    }

    /// The configuration currently in force.
    pub async fn security_config(&self) -> SecurityConfig {
        self.config.read().await.clone()
    }

    /// Latched when a critical incident has been recorded and no lockdown
    /// has run since.
    pub fn lockdown_recommended(&self) -> bool {
        self.ledger.lockdown_recommended()
    }

    /// Receive every critical incident as it is recorded.
    pub fn subscribe_escalations(&self) -> broadcast::Receiver<SecurityIncident> {
        self.ledger.subscribe_escalations()
    }

    // Protected storage.

    /// Seal `data` in a fresh envelope.
    pub async fn encrypt_data<T: Serialize + ?Sized>(&self, data: &T) -> Result<EncryptionEnvelope> {
        self.ensure_initialized()?;
        self.storage.encrypt(data).await
    }

    /// Open an envelope produced by [`encrypt_data`](Self::encrypt_data).
    pub async fn decrypt_data<T: DeserializeOwned>(&self, envelope: &EncryptionEnvelope) -> Result<T> {
        self.ensure_initialized()?;
        self.storage.decrypt(envelope).await
    }

    /// Encrypt `data` and keep it in the keychain under `key`.
    pub async fn store_secure<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<()> {
        self.ensure_initialized()?;
        self.storage.encrypt_for_storage(key, data).await
    }

    /// Load and decrypt the value under `key`. `Ok(None)` when absent.
    pub async fn load_secure<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.ensure_initialized()?;
        self.storage.decrypt_from_storage(key).await
    }

    /// Delete the value under `key`.
    pub async fn remove_secure(&self, key: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.storage.remove_from_storage(key).await
    }

    /// Store the host's privacy preferences, encrypted.
    pub async fn save_privacy_settings(&self, settings: &serde_json::Value) -> Result<()> {
        self.store_secure(PRIVACY_STORAGE_KEY, settings).await
    }

    /// Privacy preferences saved earlier, if any.
    pub async fn load_privacy_settings(&self) -> Result<Option<serde_json::Value>> {
        self.load_secure(PRIVACY_STORAGE_KEY).await
    }

    // App lock.

    /// Enable the app lock with `update` merged into its settings.
    pub async fn enable_app_lock(&self, update: AppLockConfigUpdate) -> Result<()> {
        self.ensure_initialized()?;
        self.app_lock.enable(update).await
    }

    /// Disable the app lock and unlock.
    pub async fn disable_app_lock(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.app_lock.disable().await
    }

    /// Whether the app is locked or locked out.
    pub async fn is_app_locked(&self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.app_lock.is_locked().await)
    }

    /// Current lock state, after timeouts have been applied.
    pub async fn app_lock_state(&self) -> Result<LockState> {
        self.ensure_initialized()?;
        Ok(self.app_lock.state().await)
    }

    /// Try to unlock. `Ok(false)` on a rejected attempt or an active
    /// lockout.
    pub async fn unlock_app(&self, method: UnlockMethod<'_>) -> Result<bool> {
        self.ensure_initialized()?;
        self.app_lock.unlock(method).await
    }

    /// Lock now, if the lock is enabled.
    pub async fn lock_app(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.app_lock.lock().await
    }

    /// Set or replace the app-specific unlock credential.
    pub async fn set_unlock_credential(&self, secret: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.app_lock.set_credential(secret).await
    }

    /// Consecutive failed unlock attempts.
    pub async fn failed_unlock_attempts(&self) -> Result<u32> {
        self.ensure_initialized()?;
        Ok(self.app_lock.failed_attempts().await)
    }

    /// Seconds left in the current lockout, zero when none.
    pub async fn remaining_lockout_secs(&self) -> Result<u64> {
        self.ensure_initialized()?;
        Ok(self.app_lock.remaining_lockout_secs().await)
    }

    /// Note user activity, restarting the inactivity timer.
    pub async fn record_activity(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.app_lock.record_activity().await;
        Ok(())
    }

    /// Clear failed attempts and any lockout.
    pub async fn reset_app_lock(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.app_lock.reset().await
    }

    // Certificates.

    /// Run the pin, chain, expiry, and hostname checks. A rejection is
    /// recorded as an incident.
    pub async fn validate_certificate(&self, hostname: &str, cert: &CertificateInfo) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.certificates.validate(hostname, cert).await)
    }

    /// Validate a certificate given as `openssl x509 -text` style output.
    pub async fn validate_certificate_text(&self, hostname: &str, raw: &str) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.certificates.validate_raw(hostname, raw).await)
    }

    /// Pin extra fingerprints for `hostname` and persist them.
    pub async fn add_certificate_pin(&self, hostname: &str, fingerprints: &[String]) -> Result<()> {
        self.ensure_initialized()?;
        self.certificates.add_pin(hostname, fingerprints).await
    }

    /// Drop every pin for `hostname`. Returns whether any existed.
    pub async fn remove_certificate_pin(&self, hostname: &str) -> Result<bool> {
        self.ensure_initialized()?;
        self.certificates.remove_pin(hostname).await
    }

    /// A rustls verifier that enforces the live pin table.
    pub fn tls_verifier(&self, roots: Arc<RootCertStore>) -> Result<PinnedServerVerifier> {
        self.ensure_initialized()?;
        PinnedServerVerifier::new(roots, self.certificates.pin_table())
    }

    // Incidents.

    /// Record an incident, subject to the `incident_logging` setting.
    pub async fn log_incident(
        &self,
        incident_type: IncidentType,
        severity: Severity,
        description: impl Into<String>,
        metadata: Option<IncidentMetadata>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.router
            .record_incident(incident_type, severity, description.into(), metadata)
            .await
    }

    /// Stored incidents matching `filter`, newest first.
    pub async fn incidents(&self, filter: &IncidentFilter) -> Result<Vec<SecurityIncident>> {
        self.ensure_initialized()?;
        self.ledger.incidents(filter).await
    }

    /// Counts by type and severity plus recent totals.
    pub async fn incident_statistics(&self) -> Result<IncidentStatistics> {
        self.ensure_initialized()?;
        self.ledger.statistics().await
    }

    /// Render the ledger as CSV or JSON.
    pub async fn export_incidents(&self, format: ExportFormat) -> Result<String> {
        self.ensure_initialized()?;
        self.ledger.export(format).await
    }

    /// Render the ledger and seal it under `passphrase`.
    pub async fn export_incidents_sealed(&self, format: ExportFormat, passphrase: &str) -> Result<Vec<u8>> {
        self.ensure_initialized()?;
        self.ledger.export_sealed(format, passphrase).await
    }

    /// Delete every stored incident.
    pub async fn clear_incidents(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.ledger.clear().await
    }

    /// Whether a critical incident was recorded in the last hour.
    pub async fn has_critical_incidents_in_last_hour(&self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.ledger.has_critical_incidents_in_last_hour().await)
    }

    /// Attach `user_id` to incidents recorded from now on.
    pub async fn set_user_id(&self, user_id: Option<String>) -> Result<()> {
        self.ensure_initialized()?;
        self.ledger.set_user_id(user_id).await;
        Ok(())
    }

    async fn push_config(&self, config: &SecurityConfig) -> Result<()> {
        self.storage.set_config(config.data_encryption.clone()).await?;
        self.integrity.set_config(config.integrity.clone()).await;
        self.certificates
            .set_pinning_enabled(config.certificate_pinning);
        self.router
            .enabled
            .store(config.incident_logging, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(BastionError::NotInitialized)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use bastion_bridge::MemoryBridge;
    use bastion_core::clock::ManualClock;
    use bastion_core::config::IntegrityConfig;
    use bastion_core::types::Platform;
    use chrono::Duration;

    use super::*;
    use crate::probes;

    struct Fixture {
        bridge: Arc<MemoryBridge>,
        clock: Arc<ManualClock>,
        manager: SecurityManager,
        root: tempfile::TempDir,
    }

    fn config(root: &Path) -> SecurityConfig {
        SecurityConfig {
            integrity: IntegrityConfig {
                debug_build: false,
                filesystem_root: root.to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MemoryBridge::new(Platform::Android));
        let clock = Arc::new(ManualClock::default());
        let manager = SecurityManager::new(
            bridge.clone(),
            bridge.clone(),
            clock.clone(),
            config(root.path()),
        );
        Fixture {
            bridge,
            clock,
            manager,
            root,
        }
    }

    async fn ready() -> Fixture {
        let f = fixture();
        f.manager.initialize(None).await.unwrap();
        f
    }

    fn plant(root: &Path, marker: &str) {
        let path = probes::resolve(root, marker);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    async fn types(manager: &SecurityManager) -> Vec<(IncidentType, Severity)> {
        manager
            .incidents(&IncidentFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|i| (i.incident_type, i.severity))
            .collect()
    }

    #[tokio::test]
    async fn wrappers_fail_before_initialize() {
        let f = fixture();
        assert!(!f.manager.is_initialized());
        assert!(matches!(
            f.manager.encrypt_data("x").await,
            Err(BastionError::NotInitialized)
        ));
        assert!(matches!(
            f.manager.is_app_locked().await,
            Err(BastionError::NotInitialized)
        ));
        assert!(matches!(
            f.manager.export_incidents(ExportFormat::Csv).await,
            Err(BastionError::NotInitialized)
        ));
        assert!(matches!(
            f.manager.emergency_lockdown().await,
            Err(BastionError::NotInitialized)
        ));
        assert!(matches!(
            f.manager.perform_security_assessment().await,
            Err(BastionError::NotInitialized)
        ));
        assert!(matches!(
            f.manager
                .update_security_config(SecurityConfigUpdate::default())
                .await,
            Err(BastionError::NotInitialized)
        ));
        assert_eq!(f.bridge.emulator_probe_count(), 0);
        assert_eq!(f.manager.ledger.statistics().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn initialize_prepares_every_component() {
        let f = ready().await;
        assert!(f.manager.is_initialized());
        assert!(f.manager.storage.has_master_key().await);
        assert!(!f.manager.is_app_locked().await.unwrap());
        assert!(f.manager.incidents(&IncidentFilter::default()).await.unwrap().is_empty());
        assert!(!f.bridge.keychain().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_leaves_manager_uninitialized() {
        let f = fixture();
        let mut bad = config(f.root.path());
        bad.data_encryption.iterations = 100;
        let err = f.manager.initialize(Some(bad)).await.unwrap_err();
        assert!(matches!(err, BastionError::InvalidConfig(_)));
        assert!(!f.manager.is_initialized());
    }

    #[tokio::test]
    async fn startup_check_records_root_incident() {
        let f = fixture();
        plant(f.root.path(), "/system/xbin/su");
        f.manager.initialize(None).await.unwrap();
        assert_eq!(
            types(&f.manager).await,
            vec![(IncidentType::RootDetected, Severity::High)]
        );
    }

    #[tokio::test]
    async fn startup_check_can_be_skipped() {
        let f = fixture();
        plant(f.root.path(), "/system/xbin/su");
        let mut cfg = config(f.root.path());
        cfg.device_security_checks = false;
        f.manager.initialize(Some(cfg)).await.unwrap();
        assert!(types(&f.manager).await.is_empty());
        assert_eq!(f.bridge.emulator_probe_count(), 0);
    }

    #[tokio::test]
    async fn clean_device_assessment() {
        let f = ready().await;
        let assessment = f.manager.perform_security_assessment().await.unwrap();
        assert_eq!(assessment.risk_score, 0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.recommendations.is_empty());
        assert!(f.manager.validate_app_integrity().await.unwrap());

        let health = f.manager.security_health().await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.issues.is_empty());
    }

    #[tokio::test]
    async fn emulator_without_screen_lock_is_a_warning() {
        let f = ready().await;
        f.bridge.update_profile(|p| {
            p.emulator = true;
            p.screen_lock = false;
        });
        f.clock.advance(Duration::minutes(10));

        let assessment = f.manager.perform_security_assessment().await.unwrap();
        assert_eq!(assessment.risk_score, 25);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert_eq!(assessment.recommendations.len(), 2);

        let health = f.manager.security_health().await.unwrap();
        assert_eq!(health.status, HealthStatus::Warning);
        assert_eq!(health.issues.len(), 2);
    }

    #[tokio::test]
    async fn rooted_device_fails_app_integrity() {
        let f = fixture();
        plant(f.root.path(), "/sbin/su");
        f.manager.initialize(None).await.unwrap();

        assert!(!f.manager.validate_app_integrity().await.unwrap());
        let recorded = types(&f.manager).await;
        assert_eq!(recorded[0], (IncidentType::RootDetected, Severity::Critical));

        let health = f.manager.security_health().await.unwrap();
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(health.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn hooking_fails_app_integrity_with_high_incident() {
        let f = fixture();
        f.bridge.update_profile(|p| {
            p.installed_packages.insert("org.lsposed.manager".into());
        });
        f.manager.initialize(None).await.unwrap();

        assert!(!f.manager.validate_app_integrity().await.unwrap());
        assert_eq!(
            types(&f.manager).await,
            vec![
                (IncidentType::HookingDetected, Severity::High),
                (IncidentType::HookingDetected, Severity::High),
            ]
        );
        let assessment = f.manager.perform_security_assessment().await.unwrap();
        assert_eq!(assessment.risk_score, 30);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn emergency_lockdown_locks_and_wipes() {
        let f = ready().await;
        let mut escalations = f.manager.subscribe_escalations();
        f.manager.store_secure("note", "kept").await.unwrap();

        f.manager.emergency_lockdown().await.unwrap();

        assert!(!f.manager.storage.has_master_key().await);
        assert!(f.manager.is_app_locked().await.unwrap());
        assert_eq!(f.manager.app_lock_state().await.unwrap(), LockState::Locked);
        let incident = escalations.recv().await.unwrap();
        assert_eq!(incident.incident_type, IncidentType::UnauthorizedAccessAttempt);
        assert_eq!(incident.severity, Severity::Critical);
        assert!(!f.manager.lockdown_recommended());
        assert!(f.manager.has_critical_incidents_in_last_hour().await.unwrap());
        assert_eq!(
            f.manager.security_health().await.unwrap().status,
            HealthStatus::Critical
        );

        // Data sealed before the lockdown still opens once the key reloads.
        assert_eq!(
            f.manager.load_secure::<String>("note").await.unwrap().as_deref(),
            Some("kept")
        );
    }

    #[tokio::test]
    async fn critical_incident_ages_out_of_health() {
        let f = ready().await;
        f.manager
            .log_incident(IncidentType::DataTamperingDetected, Severity::Critical, "tamper", None)
            .await
            .unwrap();
        assert!(f.manager.lockdown_recommended());
        assert_eq!(
            f.manager.security_health().await.unwrap().status,
            HealthStatus::Critical
        );

        f.clock.advance(Duration::hours(2));
        assert_eq!(
            f.manager.security_health().await.unwrap().status,
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn incident_logging_can_be_switched_off() {
        let f = ready().await;
        f.manager
            .update_security_config(SecurityConfigUpdate {
                incident_logging: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        f.manager
            .log_incident(IncidentType::SuspiciousNetworkActivity, Severity::Medium, "x", None)
            .await
            .unwrap();
        assert!(types(&f.manager).await.is_empty());
        assert!(!f.manager.security_config().await.incident_logging);
    }

    #[tokio::test]
    async fn config_update_reaches_app_lock() {
        let f = ready().await;
        f.manager
            .update_security_config(SecurityConfigUpdate {
                app_lock: Some(AppLockConfigUpdate {
                    enabled: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        f.manager.lock_app().await.unwrap();
        assert!(f.manager.is_app_locked().await.unwrap());

        f.manager.set_unlock_credential("2468").await.unwrap();
        assert!(!f.manager.unlock_app(UnlockMethod::Credential("1357")).await.unwrap());
        assert_eq!(f.manager.failed_unlock_attempts().await.unwrap(), 1);
        assert!(f.manager.unlock_app(UnlockMethod::Credential("2468")).await.unwrap());
        assert_eq!(f.manager.failed_unlock_attempts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_config_update_changes_nothing() {
        let f = ready().await;
        let before = f.manager.security_config().await;
        let err = f
            .manager
            .update_security_config(SecurityConfigUpdate {
                certificate_pinning: Some(false),
                data_encryption: Some(bastion_core::config::EncryptionConfig {
                    salt_length: 8,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BastionError::InvalidConfig(_)));
        assert_eq!(f.manager.security_config().await, before);
    }

    #[tokio::test]
    async fn pin_mismatch_is_recorded_once() {
        let f = ready().await;
        f.manager
            .add_certificate_pin("api.example.com", &["aa".repeat(32)])
            .await
            .unwrap();
        let cert = CertificateInfo {
            subject: "CN=api.example.com".into(),
            issuer: "CN=R11, O=Let's Encrypt".into(),
            serial_number: None,
            fingerprint: "bb".repeat(32),
            valid_from: f.clock.now() - Duration::days(1),
            valid_to: f.clock.now() + Duration::days(1),
            subject_alt_names: Vec::new(),
        };
        assert!(!f.manager.validate_certificate("api.example.com", &cert).await.unwrap());
        assert_eq!(
            types(&f.manager).await,
            vec![(IncidentType::CertificatePinningFailed, Severity::High)]
        );

        assert!(f.manager.remove_certificate_pin("api.example.com").await.unwrap());
        assert!(f.manager.validate_certificate("api.example.com", &cert).await.unwrap());
    }

    #[tokio::test]
    async fn privacy_settings_round_trip() {
        let f = ready().await;
        assert_eq!(f.manager.load_privacy_settings().await.unwrap(), None);
        let settings = serde_json::json!({ "analytics": false, "crash_reports": true });
        f.manager.save_privacy_settings(&settings).await.unwrap();
        assert_eq!(f.manager.load_privacy_settings().await.unwrap(), Some(settings));
    }

    #[tokio::test]
    async fn csv_export_through_manager() {
        let f = ready().await;
        f.manager.set_user_id(Some("user-7".into())).await.unwrap();
        f.manager
            .log_incident(IncidentType::DebuggingDetected, Severity::Low, "dbg", None)
            .await
            .unwrap();
        let csv = f.manager.export_incidents(ExportFormat::Csv).await.unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("\"debugging_detected\",\"low\",\"dbg\""));
        assert!(csv.trim_end().ends_with("\"user-7\""));
        assert_eq!(f.manager.incident_statistics().await.unwrap().total, 1);

        f.manager.clear_incidents().await.unwrap();
        assert_eq!(f.manager.incident_statistics().await.unwrap().total, 0);
    }
}

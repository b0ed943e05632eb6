// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device integrity: root, jailbreak, hooking, emulator, and debugging
// detection with a TTL-bounded cache.

use std::sync::Arc;

use bastion_bridge::PlatformBridge;
use bastion_core::clock::Clock;
use bastion_core::config::{IntegrityConfig, ProbeFailurePolicy};
use bastion_core::types::{DeviceSecurityStatus, IncidentType, Platform, Severity};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::probes;
use crate::sink::{self, IncidentSink};

#[derive(Debug, Clone, Copy)]
struct CachedStatus {
    status: DeviceSecurityStatus,
    checked_at: DateTime<Utc>,
}

/// Probes the device and caches the resulting posture.
///
/// Concurrent callers share one probe: the cache lock is held while probing,
/// so a second caller waits and then reads the fresh result.
pub struct DeviceIntegrityChecker {
    bridge: Arc<dyn PlatformBridge>,
    sink: Arc<dyn IncidentSink>,
    clock: Arc<dyn Clock>,
    config: RwLock<IntegrityConfig>,
    cache: Mutex<Option<CachedStatus>>,
}

impl DeviceIntegrityChecker {
    pub fn new(
        bridge: Arc<dyn PlatformBridge>,
        sink: Arc<dyn IncidentSink>,
        clock: Arc<dyn Clock>,
        config: IntegrityConfig,
    ) -> Self {
        Self {
            bridge,
            sink,
            clock,
            config: RwLock::new(config),
            cache: Mutex::new(None),
        }
    }

    /// Replace the settings and drop the cached result.
    pub async fn set_config(&self, config: IntegrityConfig) {
        *self.config.write().await = config;
        self.invalidate_cache().await;
    }

    pub async fn invalidate_cache(&self) {
        self.cache.lock().await.take();
    }

    /// Current posture, from cache when younger than the TTL.
    ///
    /// Each positive finding of a fresh probe is reported to the sink.
    #[instrument(skip_all)]
    pub async fn check_integrity(&self) -> DeviceSecurityStatus {
        let config = self.config.read().await.clone();
        let mut cache = self.cache.lock().await;
        let now = self.clock.now();
        let ttl = Duration::seconds(i64::try_from(config.cache_ttl_secs).unwrap_or(i64::MAX));

        if let Some(cached) = cache.as_ref() {
            if now - cached.checked_at < ttl {
                debug!("integrity status served from cache");
                return cached.status;
            }
        }

        let status = self.probe(&config).await;
        *cache = Some(CachedStatus {
            status,
            checked_at: now,
        });
        drop(cache);

        info!(
            rooted = status.is_rooted,
            jailbroken = status.is_jailbroken,
            hooking = status.has_hooking_framework,
            emulator = status.is_emulator,
            debugging = status.is_debugging_enabled,
            "device integrity checked"
        );
        self.report(&status).await;
        status
    }

    /// Recommendations for the most recent posture.
    pub async fn recommendations(&self) -> Vec<String> {
        recommendations(&self.check_integrity().await)
    }

    async fn probe(&self, config: &IntegrityConfig) -> DeviceSecurityStatus {
        let platform = self.bridge.platform();
        let policy = config.probe_failure_policy;
        let root = config.filesystem_root.as_path();

        let (is_rooted, is_jailbroken, has_hooking_framework) = tokio::join!(
            self.detect_root(platform, root, policy),
            detect_jailbreak(platform, root, policy),
            self.detect_hooking(platform, root, policy),
        );

        let has_screen_lock = self.bridge.has_screen_lock().unwrap_or_else(|e| {
            debug!(error = %e, "screen lock query failed");
            false
        });
        let biometrics_available = self.bridge.biometric_hardware_present().unwrap_or(false)
            && self.bridge.biometrics_enrolled().unwrap_or(false);
        let is_emulator = policy.resolve(self.bridge.is_emulator());
        let usb_debugging =
            platform == Platform::Android && policy.resolve(self.bridge.usb_debugging_enabled());

        DeviceSecurityStatus {
            is_jailbroken,
            is_rooted,
            has_screen_lock,
            biometrics_available,
            is_emulator,
            is_debugging_enabled: config.debug_build || usb_debugging,
            has_hooking_framework,
        }
    }

    async fn detect_root(
        &self,
        platform: Platform,
        root: &std::path::Path,
        policy: ProbeFailurePolicy,
    ) -> bool {
        if platform != Platform::Android {
            return false;
        }
        let su = policy.resolve(probes::any_marker_present(root, probes::ANDROID_SU_PATHS).await);
        let managers =
            policy.resolve(probes::any_marker_present(root, probes::ANDROID_ROOT_MANAGER_PATHS).await);
        su || managers || self.any_package_installed(probes::ANDROID_ROOT_PACKAGES, policy)
    }

    async fn detect_hooking(
        &self,
        platform: Platform,
        root: &std::path::Path,
        policy: ProbeFailurePolicy,
    ) -> bool {
        match platform {
            Platform::Android => {
                policy.resolve(probes::any_marker_present(root, probes::ANDROID_HOOKING_PATHS).await)
                    || self.any_package_installed(probes::ANDROID_HOOKING_PACKAGES, policy)
            }
            Platform::Ios => {
                policy.resolve(probes::any_marker_present(root, probes::IOS_HOOKING_PATHS).await)
            }
            Platform::Desktop => false,
        }
    }

    fn any_package_installed(&self, packages: &[&str], policy: ProbeFailurePolicy) -> bool {
        packages
            .iter()
            .any(|package| policy.resolve(self.bridge.is_package_installed(package)))
    }

    async fn report(&self, status: &DeviceSecurityStatus) {
        let findings = [
            (
                status.is_rooted,
                IncidentType::RootDetected,
                Severity::High,
                "Device is rooted",
            ),
            (
                status.is_jailbroken,
                IncidentType::JailbreakDetected,
                Severity::High,
                "Device is jailbroken",
            ),
            (
                status.has_hooking_framework,
                IncidentType::HookingDetected,
                Severity::High,
                "Hooking framework detected",
            ),
            (
                status.is_debugging_enabled,
                IncidentType::DebuggingDetected,
                Severity::Medium,
                "Debugging is enabled",
            ),
        ];
        for (found, incident_type, severity, description) in findings {
            if found {
                warn!(%incident_type, "integrity finding");
                sink::report(&*self.sink, incident_type, severity, description, None).await;
            }
        }
    }
}

async fn detect_jailbreak(platform: Platform, root: &std::path::Path, policy: ProbeFailurePolicy) -> bool {
    if platform != Platform::Ios {
        return false;
    }
    policy.resolve(probes::any_marker_present(root, probes::IOS_JAILBREAK_PATHS).await)
        || probes::can_write_outside_sandbox(&probes::resolve(root, probes::IOS_SANDBOX_PROBE)).await
}

/// One recommendation per unsafe condition, in a fixed order.
pub fn recommendations(status: &DeviceSecurityStatus) -> Vec<String> {
    let mut out = Vec::new();
    if status.is_compromised() {
        out.push(
            "This device is rooted or jailbroken. Use an unmodified device for sensitive data."
                .to_owned(),
        );
    }
    if status.has_hooking_framework {
        out.push("Remove hooking or instrumentation frameworks from this device.".to_owned());
    }
    if status.is_debugging_enabled {
        out.push("Disable USB and developer debugging.".to_owned());
    }
    if !status.has_screen_lock {
        out.push("Set a screen lock (PIN, pattern, or password).".to_owned());
    }
    if status.is_emulator {
        out.push("Run the app on a physical device rather than an emulator.".to_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use bastion_bridge::MemoryBridge;
    use bastion_core::clock::ManualClock;

    use super::*;
    use crate::sink::testing::RecordingSink;

    struct Fixture {
        bridge: Arc<MemoryBridge>,
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
        checker: DeviceIntegrityChecker,
        root: tempfile::TempDir,
    }

    fn fixture(platform: Platform) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MemoryBridge::new(platform));
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::default());
        let config = IntegrityConfig {
            debug_build: false,
            filesystem_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let checker = DeviceIntegrityChecker::new(bridge.clone(), sink.clone(), clock.clone(), config);
        Fixture {
            bridge,
            sink,
            clock,
            checker,
            root,
        }
    }

    fn plant(root: &Path, marker: &str) {
        let path = probes::resolve(root, marker);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[tokio::test]
    async fn clean_device_reports_nothing() {
        let f = fixture(Platform::Android);
        let status = f.checker.check_integrity().await;
        assert_eq!(
            status,
            DeviceSecurityStatus {
                has_screen_lock: true,
                biometrics_available: true,
                ..Default::default()
            }
        );
        assert!(f.sink.recorded().is_empty());
        assert!(recommendations(&status).is_empty());
    }

    #[tokio::test]
    async fn su_binary_marks_android_rooted() {
        let f = fixture(Platform::Android);
        plant(f.root.path(), "/system/xbin/su");

        let status = f.checker.check_integrity().await;
        assert!(status.is_rooted);
        assert!(status.is_compromised());
        assert_eq!(
            f.sink.types(),
            vec![(IncidentType::RootDetected, Severity::High)]
        );
    }

    #[tokio::test]
    async fn root_manager_package_marks_rooted() {
        let f = fixture(Platform::Android);
        f.bridge.update_profile(|p| {
            p.installed_packages.insert("com.topjohnwu.magisk".into());
        });
        assert!(f.checker.check_integrity().await.is_rooted);
    }

    #[tokio::test]
    async fn root_probe_is_android_only() {
        let f = fixture(Platform::Ios);
        plant(f.root.path(), "/system/xbin/su");
        let status = f.checker.check_integrity().await;
        assert!(!status.is_rooted);
        assert!(!status.is_jailbroken);
    }

    #[tokio::test]
    async fn cydia_marks_ios_jailbroken() {
        let f = fixture(Platform::Ios);
        plant(f.root.path(), "/Applications/Cydia.app");
        let status = f.checker.check_integrity().await;
        assert!(status.is_jailbroken);
        assert_eq!(
            f.sink.types(),
            vec![(IncidentType::JailbreakDetected, Severity::High)]
        );
    }

    #[tokio::test]
    async fn frida_server_is_hooking() {
        let f = fixture(Platform::Android);
        plant(f.root.path(), "/data/local/tmp/frida-server");
        let status = f.checker.check_integrity().await;
        assert!(status.has_hooking_framework);
        assert!(!status.is_rooted);
        assert_eq!(
            f.sink.types(),
            vec![(IncidentType::HookingDetected, Severity::High)]
        );
    }

    #[tokio::test]
    async fn cached_within_ttl_then_refreshed() {
        let f = fixture(Platform::Android);
        f.checker.check_integrity().await;
        f.clock.advance(Duration::seconds(299));
        f.checker.check_integrity().await;
        assert_eq!(f.bridge.emulator_probe_count(), 1);

        f.clock.advance(Duration::seconds(2));
        f.checker.check_integrity().await;
        assert_eq!(f.bridge.emulator_probe_count(), 2);
    }

    #[tokio::test]
    async fn cache_hit_does_not_repeat_incidents() {
        let f = fixture(Platform::Android);
        plant(f.root.path(), "/sbin/su");
        f.checker.check_integrity().await;
        f.checker.check_integrity().await;
        assert_eq!(f.sink.recorded().len(), 1);
    }

    #[tokio::test]
    async fn probe_failure_policy_applies() {
        let f = fixture(Platform::Android);
        f.bridge.update_profile(|p| p.fail_runtime_probes = true);
        let status = f.checker.check_integrity().await;
        assert!(!status.is_emulator);
        assert!(!status.is_rooted);

        f.checker
            .set_config(IntegrityConfig {
                probe_failure_policy: ProbeFailurePolicy::FailClosed,
                debug_build: false,
                filesystem_root: f.root.path().to_path_buf(),
                ..Default::default()
            })
            .await;
        let status = f.checker.check_integrity().await;
        assert!(status.is_emulator);
        assert!(status.is_rooted);
    }

    #[tokio::test]
    async fn debug_build_and_usb_debugging() {
        let f = fixture(Platform::Android);
        f.bridge.update_profile(|p| p.usb_debugging = true);
        let status = f.checker.check_integrity().await;
        assert!(status.is_debugging_enabled);
        assert_eq!(
            f.sink.types(),
            vec![(IncidentType::DebuggingDetected, Severity::Medium)]
        );

        let g = fixture(Platform::Desktop);
        g.checker
            .set_config(IntegrityConfig {
                debug_build: true,
                filesystem_root: g.root.path().to_path_buf(),
                ..Default::default()
            })
            .await;
        assert!(g.checker.check_integrity().await.is_debugging_enabled);
    }

    #[tokio::test]
    async fn concurrent_checks_probe_once() {
        let f = fixture(Platform::Android);
        let (a, b) = tokio::join!(f.checker.check_integrity(), f.checker.check_integrity());
        assert_eq!(a, b);
        assert_eq!(f.bridge.emulator_probe_count(), 1);
    }

    #[test]
    fn recommendation_per_condition() {
        let status = DeviceSecurityStatus {
            is_rooted: true,
            has_hooking_framework: true,
            is_debugging_enabled: true,
            has_screen_lock: false,
            is_emulator: true,
            ..Default::default()
        };
        assert_eq!(recommendations(&status).len(), 5);

        let locked_only = DeviceSecurityStatus {
            has_screen_lock: false,
            ..Default::default()
        };
        assert_eq!(recommendations(&locked_only).len(), 1);
    }
}

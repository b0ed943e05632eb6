// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BastionError, Result};
use crate::types::CertificatePin;

/// Lowest PBKDF2 iteration count the storage engine accepts.
pub const MIN_KDF_ITERATIONS: u32 = 10_000;

/// Issuer substrings accepted by the certificate chain check.
pub const DEFAULT_TRUSTED_ISSUERS: &[&str] = &[
    "DigiCert",
    "Let's Encrypt",
    "GlobalSign",
    "Sectigo",
    "Amazon",
    "Google Trust Services",
    "ISRG",
];

/// Process-wide security settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Run the device integrity check during `initialize`.
    pub device_security_checks: bool,
    /// Enforce the host → fingerprint pin table during certificate validation.
    pub certificate_pinning: bool,
    pub app_lock: AppLockConfig,
    pub data_encryption: EncryptionConfig,
    /// Record incidents in the ledger. When off, incidents are only traced.
    pub incident_logging: bool,
    /// Owned by the host's privacy screens; carried through untouched.
    pub privacy_controls: serde_json::Value,
    pub integrity: IntegrityConfig,
    /// Pins loaded at startup, merged with pins persisted at runtime.
    pub certificate_pins: Vec<CertificatePin>,
    pub trusted_issuers: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            device_security_checks: true,
            certificate_pinning: true,
            app_lock: AppLockConfig::default(),
            data_encryption: EncryptionConfig::default(),
            incident_logging: true,
            privacy_controls: serde_json::Value::Null,
            integrity: IntegrityConfig::default(),
            certificate_pins: Vec::new(),
            trusted_issuers: DEFAULT_TRUSTED_ISSUERS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

impl SecurityConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the subsystem cannot honour safely.
    pub fn validate(&self) -> Result<()> {
        self.data_encryption.validate()?;
        if self.app_lock.max_failed_attempts == 0 {
            return Err(BastionError::InvalidConfig(
                "app_lock.max_failed_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply a partial update and re-validate. On error `self` is unchanged.
    pub fn apply(&mut self, update: SecurityConfigUpdate) -> Result<()> {
        let mut next = self.clone();
        if let Some(v) = update.device_security_checks {
            next.device_security_checks = v;
        }
        if let Some(v) = update.certificate_pinning {
            next.certificate_pinning = v;
        }
        if let Some(v) = update.app_lock {
            next.app_lock.apply(v);
        }
        if let Some(v) = update.data_encryption {
            next.data_encryption = v;
        }
        if let Some(v) = update.incident_logging {
            next.incident_logging = v;
        }
        if let Some(v) = update.privacy_controls {
            next.privacy_controls = v;
        }
        if let Some(v) = update.integrity {
            next.integrity = v;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// Partial update for [`SecurityConfig`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfigUpdate {
    pub device_security_checks: Option<bool>,
    pub certificate_pinning: Option<bool>,
    pub app_lock: Option<AppLockConfigUpdate>,
    pub data_encryption: Option<EncryptionConfig>,
    pub incident_logging: Option<bool>,
    pub privacy_controls: Option<serde_json::Value>,
    pub integrity: Option<IntegrityConfig>,
}

/// App-lock policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppLockConfig {
    pub enabled: bool,
    pub biometrics_enabled: bool,
    /// Inactivity period before the app locks itself, in seconds.
    pub lock_timeout_secs: u64,
    pub max_failed_attempts: u32,
    /// Lockout length once `max_failed_attempts` is reached, in seconds.
    pub lockout_duration_secs: u64,
}

impl Default for AppLockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            biometrics_enabled: false,
            lock_timeout_secs: 300,
            max_failed_attempts: 5,
            lockout_duration_secs: 300,
        }
    }
}

impl AppLockConfig {
    pub fn apply(&mut self, update: AppLockConfigUpdate) {
        if let Some(v) = update.enabled {
            self.enabled = v;
        }
        if let Some(v) = update.biometrics_enabled {
            self.biometrics_enabled = v;
        }
        if let Some(v) = update.lock_timeout_secs {
            self.lock_timeout_secs = v;
        }
        if let Some(v) = update.max_failed_attempts {
            self.max_failed_attempts = v.max(1);
        }
        if let Some(v) = update.lockout_duration_secs {
            self.lockout_duration_secs = v;
        }
    }
}

/// Partial update for [`AppLockConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppLockConfigUpdate {
    pub enabled: Option<bool>,
    pub biometrics_enabled: Option<bool>,
    pub lock_timeout_secs: Option<u64>,
    pub max_failed_attempts: Option<u32>,
    pub lockout_duration_secs: Option<u64>,
}

/// Envelope encryption parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub algorithm: String,
    pub key_size: u32,
    /// PBKDF2-HMAC-SHA256 rounds per derived key.
    pub iterations: u32,
    pub salt_length: usize,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: "AES-256-GCM".into(),
            key_size: 256,
            iterations: MIN_KDF_ITERATIONS,
            salt_length: 16,
        }
    }
}

impl EncryptionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.algorithm.eq_ignore_ascii_case("AES-256-GCM") {
            return Err(BastionError::InvalidConfig(format!(
                "unsupported algorithm {:?}",
                self.algorithm
            )));
        }
        if self.key_size != 256 {
            return Err(BastionError::InvalidConfig(format!(
                "unsupported key size {}",
                self.key_size
            )));
        }
        if self.iterations < MIN_KDF_ITERATIONS {
            return Err(BastionError::InvalidConfig(format!(
                "iterations must be at least {MIN_KDF_ITERATIONS}"
            )));
        }
        if self.salt_length != 16 {
            return Err(BastionError::InvalidConfig(
                "salt_length must be 16".into(),
            ));
        }
        Ok(())
    }
}

/// What an integrity probe reports when it cannot complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailurePolicy {
    /// Treat the failure as "not detected" (availability first).
    #[default]
    FailOpen,
    /// Treat the failure as "detected" (suspicion first).
    FailClosed,
}

impl ProbeFailurePolicy {
    /// Resolve a probe outcome to a detection flag.
    pub fn resolve<E>(self, outcome: std::result::Result<bool, E>) -> bool {
        match outcome {
            Ok(detected) => detected,
            Err(_) => matches!(self, Self::FailClosed),
        }
    }
}

/// Device integrity checker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// How long a completed check is reused, in seconds.
    pub cache_ttl_secs: u64,
    pub probe_failure_policy: ProbeFailurePolicy,
    /// Whether the running binary is a debug build. Reported as
    /// "debugging enabled" by the integrity checker.
    pub debug_build: bool,
    /// Prefix for marker-path probes.
    pub filesystem_root: PathBuf,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            probe_failure_policy: ProbeFailurePolicy::default(),
            debug_build: cfg!(debug_assertions),
            filesystem_root: PathBuf::from("/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SecurityConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = SecurityConfig::from_json(
            r#"{ "certificate_pinning": false, "app_lock": { "max_failed_attempts": 3 } }"#,
        )
        .unwrap();
        assert!(!config.certificate_pinning);
        assert!(config.device_security_checks);
        assert_eq!(config.app_lock.max_failed_attempts, 3);
        assert_eq!(config.app_lock.lockout_duration_secs, 300);
        assert_eq!(config.data_encryption.iterations, MIN_KDF_ITERATIONS);
    }

    #[test]
    fn weak_iterations_rejected() {
        let mut config = SecurityConfig::default();
        let err = config
            .apply(SecurityConfigUpdate {
                data_encryption: Some(EncryptionConfig {
                    iterations: 1_000,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, BastionError::InvalidConfig(_)));
        assert_eq!(config.data_encryption.iterations, MIN_KDF_ITERATIONS);
    }

    #[test]
    fn app_lock_update_merges() {
        let mut config = SecurityConfig::default();
        config
            .apply(SecurityConfigUpdate {
                app_lock: Some(AppLockConfigUpdate {
                    enabled: Some(true),
                    lock_timeout_secs: Some(60),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert!(config.app_lock.enabled);
        assert_eq!(config.app_lock.lock_timeout_secs, 60);
        assert_eq!(config.app_lock.max_failed_attempts, 5);
    }

    #[test]
    fn probe_policy_resolution() {
        let failed: std::result::Result<bool, ()> = Err(());
        assert!(!ProbeFailurePolicy::FailOpen.resolve(failed));
        assert!(ProbeFailurePolicy::FailClosed.resolve(failed));
        assert!(ProbeFailurePolicy::FailOpen.resolve::<()>(Ok(true)));
    }
}

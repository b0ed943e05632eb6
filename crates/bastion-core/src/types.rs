// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Bastion security subsystem.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating system family the subsystem is running on.
///
/// Integrity probes are platform-conditional: root checks only run on
/// Android, jailbreak checks only on iOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

impl Platform {
    /// Platform of the current compilation target.
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else {
            Self::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Desktop => "desktop",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the device's security posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSecurityStatus {
    pub is_jailbroken: bool,
    pub is_rooted: bool,
    pub has_screen_lock: bool,
    /// Biometric hardware is present *and* at least one biometric is enrolled.
    pub biometrics_available: bool,
    pub is_emulator: bool,
    pub is_debugging_enabled: bool,
    pub has_hooking_framework: bool,
}

impl DeviceSecurityStatus {
    /// True when the OS sandbox can no longer be trusted.
    pub fn is_compromised(&self) -> bool {
        self.is_jailbroken || self.is_rooted
    }
}

/// Device identity attached to every recorded incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub platform: Platform,
    pub os_version: String,
    pub app_version: String,
}

/// Kinds of security incident the ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    JailbreakDetected,
    RootDetected,
    DebuggingDetected,
    HookingDetected,
    CertificatePinningFailed,
    UnauthorizedAccessAttempt,
    DataTamperingDetected,
    SuspiciousNetworkActivity,
}

impl IncidentType {
    pub const ALL: [IncidentType; 8] = [
        Self::JailbreakDetected,
        Self::RootDetected,
        Self::DebuggingDetected,
        Self::HookingDetected,
        Self::CertificatePinningFailed,
        Self::UnauthorizedAccessAttempt,
        Self::DataTamperingDetected,
        Self::SuspiciousNetworkActivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JailbreakDetected => "jailbreak_detected",
            Self::RootDetected => "root_detected",
            Self::DebuggingDetected => "debugging_detected",
            Self::HookingDetected => "hooking_detected",
            Self::CertificatePinningFailed => "certificate_pinning_failed",
            Self::UnauthorizedAccessAttempt => "unauthorized_access_attempt",
            Self::DataTamperingDetected => "data_tampering_detected",
            Self::SuspiciousNetworkActivity => "suspicious_network_activity",
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A primitive value in an incident's metadata map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Metadata attached to an incident. Ordered so exports are stable.
pub type IncidentMetadata = BTreeMap<String, MetadataValue>;

/// A recorded security incident. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub id: String,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub device_info: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IncidentMetadata>,
}

/// Coarse classification derived from the additive device risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted fingerprints for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePin {
    pub hostname: String,
    pub fingerprints: BTreeSet<String>,
}

impl CertificatePin {
    pub fn new<I, S>(hostname: impl Into<String>, fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hostname: hostname.into(),
            fingerprints: fingerprints.into_iter().map(Into::into).collect(),
        }
    }
}

/// Fields extracted from a presented TLS certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial_number: Option<String>,
    /// Lowercase hex SHA-256 of the raw certificate.
    pub fingerprint: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
}

/// Observable state of the app lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    Unlocked,
    Locked,
    /// Unlock attempts are rejected until `until`.
    LockedOut { until: DateTime<Utc> },
}

/// Full app-lock bookkeeping, as persisted and as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLockState {
    pub enabled: bool,
    pub biometrics_enabled: bool,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    /// Inactivity period after which the app locks itself, in seconds.
    pub lock_timeout_secs: u64,
    pub max_failed_attempts: u32,
    /// Length of a lockout, in seconds.
    pub lockout_duration_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_type_serializes_snake_case() {
        let json = serde_json::to_string(&IncidentType::CertificatePinningFailed).unwrap();
        assert_eq!(json, "\"certificate_pinning_failed\"");
        for kind in IncidentType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn metadata_values_are_untagged() {
        let mut meta = IncidentMetadata::new();
        meta.insert("attempts".into(), 3u32.into());
        meta.insert("host".into(), "api.example.com".into());
        meta.insert("pinned".into(), true.into());

        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"attempts":3,"host":"api.example.com","pinned":true}"#);

        let back: IncidentMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn compromised_covers_both_flags() {
        let mut status = DeviceSecurityStatus::default();
        assert!(!status.is_compromised());
        status.is_rooted = true;
        assert!(status.is_compromised());
        status = DeviceSecurityStatus {
            is_jailbroken: true,
            ..Default::default()
        };
        assert!(status.is_compromised());
    }
}

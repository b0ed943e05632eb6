// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for native capabilities.
//
// Every method is synchronous: the native calls behind them (JNI, keychain
// queries) are short and blocking. Callers on an async runtime that need
// strict latency can move them onto `spawn_blocking`.

use bastion_core::error::Result;
use bastion_core::types::Platform;

/// Unified bridge that groups all native capabilities.
pub trait PlatformBridge:
    NativeKeychain + NativeDeviceInfo + NativeAuthentication + NativeRuntimeInspection
{
    /// Human-readable platform name (e.g. "Android", "Desktop (stub)").
    fn platform_name(&self) -> &str;

    /// Platform family, used to select platform-conditional probes.
    fn platform(&self) -> Platform;
}

/// Secure key storage in the platform keychain / keystore.
pub trait NativeKeychain: Send + Sync {
    /// Store a secret under the given key, replacing any previous value.
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret by key. Returns None if not found.
    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret by key. Succeeds if the key does not exist.
    fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Identity of the device and the running app.
pub trait NativeDeviceInfo: Send + Sync {
    /// A stable hardware-derived identifier.
    fn device_identifier(&self) -> Result<String>;

    fn os_version(&self) -> String;

    fn app_version(&self) -> String;
}

/// Screen-lock and biometric capabilities.
pub trait NativeAuthentication: Send + Sync {
    /// Whether a PIN, pattern, or password protects the device.
    fn has_screen_lock(&self) -> Result<bool>;

    fn biometric_hardware_present(&self) -> Result<bool>;

    fn biometrics_enrolled(&self) -> Result<bool>;

    /// Show the system biometric prompt.
    ///
    /// Returns `Ok(true)` when the user authenticated and `Ok(false)` when
    /// they failed or cancelled.
    fn authenticate_biometric(&self, reason: &str) -> Result<bool>;
}

/// Inspection of the runtime environment.
pub trait NativeRuntimeInspection: Send + Sync {
    fn is_emulator(&self) -> Result<bool>;

    /// USB / remote debugging toggled on in system settings.
    fn usb_debugging_enabled(&self) -> Result<bool>;

    fn is_package_installed(&self, package: &str) -> Result<bool>;
}

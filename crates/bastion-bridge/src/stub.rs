// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub bridge for desktop/CI builds where native mobile APIs are unavailable.
//
// Keychain and authentication calls return `PlatformUnavailable`; desktop
// hosts pair this bridge with a file-backed key store. Runtime inspection
// reports a clean environment.

use bastion_core::error::{BastionError, Result};
use bastion_core::types::Platform;

use crate::traits::*;

/// Location of the systemd machine identifier on Linux hosts.
const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// No-op bridge returned on non-mobile platforms.
pub struct StubBridge;

impl PlatformBridge for StubBridge {
    fn platform_name(&self) -> &str {
        "Desktop (stub)"
    }

    fn platform(&self) -> Platform {
        Platform::Desktop
    }
}

impl NativeKeychain for StubBridge {
    fn store_secret(&self, _key: &str, _value: &[u8]) -> Result<()> {
        tracing::warn!("NativeKeychain::store_secret called on stub bridge");
        Err(BastionError::PlatformUnavailable)
    }

    fn load_secret(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        tracing::warn!("NativeKeychain::load_secret called on stub bridge");
        Err(BastionError::PlatformUnavailable)
    }

    fn delete_secret(&self, _key: &str) -> Result<()> {
        Err(BastionError::PlatformUnavailable)
    }
}

impl NativeDeviceInfo for StubBridge {
    fn device_identifier(&self) -> Result<String> {
        match std::fs::read_to_string(MACHINE_ID_PATH) {
            Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_owned()),
            _ => std::env::var("HOSTNAME").map_err(|_| BastionError::PlatformUnavailable),
        }
    }

    fn os_version(&self) -> String {
        std::env::consts::OS.to_owned()
    }

    fn app_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_owned()
    }
}

impl NativeAuthentication for StubBridge {
    fn has_screen_lock(&self) -> Result<bool> {
        Err(BastionError::PlatformUnavailable)
    }

    fn biometric_hardware_present(&self) -> Result<bool> {
        Ok(false)
    }

    fn biometrics_enrolled(&self) -> Result<bool> {
        Ok(false)
    }

    fn authenticate_biometric(&self, _reason: &str) -> Result<bool> {
        tracing::warn!("NativeAuthentication::authenticate_biometric called on stub bridge");
        Err(BastionError::PlatformUnavailable)
    }
}

impl NativeRuntimeInspection for StubBridge {
    fn is_emulator(&self) -> Result<bool> {
        Ok(false)
    }

    fn usb_debugging_enabled(&self) -> Result<bool> {
        Ok(false)
    }

    fn is_package_installed(&self, _package: &str) -> Result<bool> {
        Ok(false)
    }
}

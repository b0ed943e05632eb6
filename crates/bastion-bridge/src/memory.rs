// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory bridge with a scriptable device profile.
//
// Used by tests and by hosts that compute device state themselves (e.g. an
// iOS shell that probes in Swift and pushes the results into Rust). Probe
// and prompt counters let tests assert how often the native layer was hit.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bastion_core::error::{BastionError, Result};
use bastion_core::types::Platform;

use crate::traits::*;

/// Keychain backed by a `HashMap`. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored secrets.
    pub fn len(&self) -> usize {
        self.secrets.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.secrets
            .lock()
            .map_err(|_| BastionError::KeyStore("memory keychain lock poisoned".into()))
    }
}

impl NativeKeychain for MemoryKeychain {
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.guard()?.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.guard()?.get(key).cloned())
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.guard()?.remove(key);
        Ok(())
    }
}

/// Device characteristics reported by a [`MemoryBridge`].
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device_id: String,
    pub os_version: String,
    pub app_version: String,
    pub screen_lock: bool,
    pub biometric_hardware: bool,
    pub biometrics_enrolled: bool,
    pub emulator: bool,
    pub usb_debugging: bool,
    pub installed_packages: HashSet<String>,
    /// Make every runtime-inspection call fail, to exercise probe policies.
    pub fail_runtime_probes: bool,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            device_id: "memory-device-0001".into(),
            os_version: "14".into(),
            app_version: env!("CARGO_PKG_VERSION").into(),
            screen_lock: true,
            biometric_hardware: true,
            biometrics_enrolled: true,
            emulator: false,
            usb_debugging: false,
            installed_packages: HashSet::new(),
            fail_runtime_probes: false,
        }
    }
}

/// Scriptable bridge for tests and self-probing hosts.
#[derive(Debug)]
pub struct MemoryBridge {
    platform: Platform,
    keychain: MemoryKeychain,
    profile: Mutex<DeviceProfile>,
    biometric_results: Mutex<VecDeque<bool>>,
    emulator_probes: AtomicUsize,
    biometric_prompts: AtomicUsize,
}

impl MemoryBridge {
    /// A clean, screen-locked device on `platform`.
    pub fn new(platform: Platform) -> Self {
        Self::with_profile(platform, DeviceProfile::default())
    }

    pub fn with_profile(platform: Platform, profile: DeviceProfile) -> Self {
        Self {
            platform,
            keychain: MemoryKeychain::new(),
            profile: Mutex::new(profile),
            biometric_results: Mutex::new(VecDeque::new()),
            emulator_probes: AtomicUsize::new(0),
            biometric_prompts: AtomicUsize::new(0),
        }
    }

    /// Mutate the reported device profile.
    pub fn update_profile(&self, f: impl FnOnce(&mut DeviceProfile)) {
        let mut profile = self.profile.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut profile);
    }

    /// Queue the outcome of the next biometric prompt. Unscripted prompts fail.
    pub fn queue_biometric_result(&self, success: bool) {
        self.biometric_results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(success);
    }

    /// How many times the emulator probe ran. One per full integrity check.
    pub fn emulator_probe_count(&self) -> usize {
        self.emulator_probes.load(Ordering::SeqCst)
    }

    pub fn biometric_prompt_count(&self) -> usize {
        self.biometric_prompts.load(Ordering::SeqCst)
    }

    pub fn keychain(&self) -> &MemoryKeychain {
        &self.keychain
    }

    fn profile(&self) -> DeviceProfile {
        self.profile.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn runtime_probe(&self) -> Result<DeviceProfile> {
        let profile = self.profile();
        if profile.fail_runtime_probes {
            return Err(BastionError::Bridge("runtime probe failed".into()));
        }
        Ok(profile)
    }
}

impl PlatformBridge for MemoryBridge {
    fn platform_name(&self) -> &str {
        "Memory"
    }

    fn platform(&self) -> Platform {
        self.platform
    }
}

impl NativeKeychain for MemoryBridge {
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.keychain.store_secret(key, value)
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.keychain.load_secret(key)
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.keychain.delete_secret(key)
    }
}

impl NativeDeviceInfo for MemoryBridge {
    fn device_identifier(&self) -> Result<String> {
        Ok(self.profile().device_id)
    }

    fn os_version(&self) -> String {
        self.profile().os_version
    }

    fn app_version(&self) -> String {
        self.profile().app_version
    }
}

impl NativeAuthentication for MemoryBridge {
    fn has_screen_lock(&self) -> Result<bool> {
        Ok(self.profile().screen_lock)
    }

    fn biometric_hardware_present(&self) -> Result<bool> {
        Ok(self.profile().biometric_hardware)
    }

    fn biometrics_enrolled(&self) -> Result<bool> {
        Ok(self.profile().biometrics_enrolled)
    }

    fn authenticate_biometric(&self, _reason: &str) -> Result<bool> {
        self.biometric_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .biometric_results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(false))
    }
}

impl NativeRuntimeInspection for MemoryBridge {
    fn is_emulator(&self) -> Result<bool> {
        self.emulator_probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.runtime_probe()?.emulator)
    }

    fn usb_debugging_enabled(&self) -> Result<bool> {
        Ok(self.runtime_probe()?.usb_debugging)
    }

    fn is_package_installed(&self, package: &str) -> Result<bool> {
        Ok(self.runtime_probe()?.installed_packages.contains(package))
    }
}

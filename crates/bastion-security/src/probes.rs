// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem and package markers left behind by root, jailbreak, and
// instrumentation tooling, plus the async probes that look for them.
//
// Marker paths are absolute on the device. Probes resolve them against a
// configurable root so they can run against a fixture directory.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// `su` binaries dropped by Android root tools.
pub const ANDROID_SU_PATHS: &[&str] = &[
    "/data/local/su",
    "/data/local/bin/su",
    "/data/local/xbin/su",
    "/sbin/su",
    "/su/bin/su",
    "/system/bin/su",
    "/system/bin/.ext/su",
    "/system/bin/failsafe/su",
    "/system/sd/xbin/su",
    "/system/usr/we-need-root/su",
    "/system/xbin/su",
    "/cache/su",
    "/data/su",
    "/dev/su",
    "/system_ext/bin/su",
    "/vendor/bin/su",
];

/// Magisk and SuperSU installation artefacts.
pub const ANDROID_ROOT_MANAGER_PATHS: &[&str] = &[
    "/data/adb/magisk",
    "/sbin/.magisk",
    "/sbin/magisk",
    "/system/bin/magisk",
    "/cache/magisk.log",
    "/data/magisk/magisk.db",
    "/system/app/Superuser.apk",
    "/system/xbin/daemonsu",
];

/// Root manager packages.
pub const ANDROID_ROOT_PACKAGES: &[&str] = &[
    "com.noshufou.android.su",
    "com.noshufou.android.su.elite",
    "eu.chainfire.supersu",
    "com.koushikdutta.superuser",
    "com.thirdparty.superuser",
    "com.yellowes.su",
    "com.topjohnwu.magisk",
    "com.kingroot.kinguser",
    "com.kingo.root",
];

pub const IOS_JAILBREAK_PATHS: &[&str] = &[
    "/Applications/Cydia.app",
    "/Applications/Sileo.app",
    "/Applications/Zebra.app",
    "/Library/MobileSubstrate/MobileSubstrate.dylib",
    "/bin/bash",
    "/usr/sbin/sshd",
    "/etc/apt",
    "/private/var/lib/apt/",
    "/private/var/lib/cydia",
    "/private/var/stash",
    "/var/jb",
    "/usr/libexec/cydia",
];

/// File the sandbox write probe tries to create on iOS.
pub const IOS_SANDBOX_PROBE: &str = "/private/bastion_sandbox_probe.txt";

/// Frida, Xposed, and Substrate artefacts on Android.
pub const ANDROID_HOOKING_PATHS: &[&str] = &[
    "/data/local/tmp/frida-server",
    "/data/local/tmp/re.frida.server",
    "/system/bin/frida-server",
    "/system/xbin/frida-server",
    "/system/framework/XposedBridge.jar",
    "/system/bin/app_process32_xposed",
    "/system/bin/app_process64_xposed",
    "/system/lib/libxposed_art.so",
    "/system/lib64/libxposed_art.so",
    "/data/adb/modules/lsposed",
    "/data/adb/modules/riru_lsposed",
    "/data/adb/modules/edxposed",
    "/system/lib/libsubstrate.so",
    "/system/lib64/libsubstrate.so",
];

/// Hooking framework manager packages on Android.
pub const ANDROID_HOOKING_PACKAGES: &[&str] = &[
    "de.robv.android.xposed.installer",
    "org.lsposed.manager",
    "org.meowcat.edxposed.manager",
    "com.saurik.substrate",
];

/// Frida, Substrate, and Cycript artefacts on iOS.
pub const IOS_HOOKING_PATHS: &[&str] = &[
    "/usr/sbin/frida-server",
    "/usr/lib/frida/frida-agent.dylib",
    "/Library/MobileSubstrate/DynamicLibraries",
    "/usr/lib/libsubstrate.dylib",
    "/usr/lib/substitute-inserter.dylib",
    "/usr/bin/cycript",
    "/usr/lib/libcycript.dylib",
];

/// Resolve a device-absolute marker path under `root`.
pub fn resolve(root: &Path, marker: &str) -> PathBuf {
    root.join(marker.trim_start_matches('/'))
}

/// Whether any marker exists under `root`.
///
/// A found marker wins over probe errors. If nothing is found and at least
/// one lookup failed, the first error is returned so the caller's failure
/// policy decides.
pub async fn any_marker_present(root: &Path, markers: &[&str]) -> io::Result<bool> {
    let mut first_error = None;
    for marker in markers {
        match tokio::fs::try_exists(resolve(root, marker)).await {
            Ok(true) => {
                debug!(marker, "marker present");
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(false),
    }
}

/// Whether a file can be created at `path`. A sandboxed iOS app cannot
/// write outside its container, so success indicates a jailbreak.
pub async fn can_write_outside_sandbox(path: &Path) -> bool {
    match tokio::fs::write(path, b"probe").await {
        Ok(()) => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "sandbox probe file left behind");
            }
            true
        }
        Err(_) => false,
    }
}

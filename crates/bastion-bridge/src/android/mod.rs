// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Android platform bridge via JNI.
//
// Requires the Android NDK and targets `aarch64-linux-android` or
// `armv7-linux-androideabi`. Each trait method invokes the corresponding
// Android API through JNI calls into the ART runtime.
//
// ## Architecture notes
//
// Queries that complete synchronously (SharedPreferences, Settings,
// KeyguardManager, BiometricManager, android.os.Build) are implemented here.
//
// `BiometricPrompt` is callback driven and must be shown from the host
// Activity; `authenticate_biometric` returns `BastionError::Bridge` so the
// host routes the prompt itself and reports the outcome through the app
// lock's credential path.

#![cfg(target_os = "android")]

use std::sync::OnceLock;

use jni::objects::{JByteArray, JObject, JString, JValue};
use jni::{JNIEnv, JavaVM};

use bastion_core::error::{BastionError, Result};
use bastion_core::types::Platform;

use crate::traits::*;

// ---------------------------------------------------------------------------
// JNI bootstrap helpers
// ---------------------------------------------------------------------------

/// Prefix applied to all SharedPreferences keys to avoid collisions.
const PREFS_KEY_PREFIX: &str = "bastion_";

/// SharedPreferences file name.
const PREFS_FILE: &str = "bastion_secure_store";

/// `BiometricManager.canAuthenticate()` result codes.
const BIOMETRIC_SUCCESS: i32 = 0;
const BIOMETRIC_ERROR_HW_UNAVAILABLE: i32 = 1;
const BIOMETRIC_ERROR_NO_HARDWARE: i32 = 12;

/// Substrings of `Build.FINGERPRINT` / `Build.HARDWARE` / `Build.PRODUCT`
/// that identify the stock emulator images and common third-party ones.
const EMULATOR_BUILD_MARKERS: &[&str] = &[
    "generic",
    "unknown",
    "emulator",
    "goldfish",
    "ranchu",
    "sdk_gphone",
    "vbox86",
    "genymotion",
];

/// Process-wide handle to the Java VM, resolved on first use.
static JAVA_VM: OnceLock<JavaVM> = OnceLock::new();

fn java_vm() -> Result<&'static JavaVM> {
    if let Some(vm) = JAVA_VM.get() {
        return Ok(vm);
    }
    let ctx = ndk_context::android_context();
    // SAFETY: `ctx.vm()` returns the `JavaVM*` set by the NDK glue code.
    // The pointer is guaranteed valid for the lifetime of the process.
    let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }
        .map_err(|e| BastionError::Bridge(format!("failed to obtain JavaVM: {e}")))?;
    Ok(JAVA_VM.get_or_init(|| vm))
}

/// Obtain a [`JNIEnv`] for the current thread, attaching it if needed.
fn jni_env() -> Result<JNIEnv<'static>> {
    java_vm()?
        .attach_current_thread_permanently()
        .map_err(|e| BastionError::Bridge(format!("failed to attach JNI thread: {e}")))
}

/// Obtain the current Android `Activity` as a [`JObject`].
fn activity() -> Result<JObject<'static>> {
    let ctx = ndk_context::android_context();
    let ptr = ctx.context();
    if ptr.is_null() {
        return Err(BastionError::Bridge(
            "Android context is null; native activity not initialised".into(),
        ));
    }
    // SAFETY: the NDK guarantees this pointer is a valid global jobject for
    // the hosting Activity.
    Ok(unsafe { JObject::from_raw(ptr.cast()) })
}

/// Convenience: map any `jni::errors::Error` into `BastionError::Bridge`.
fn jni_err(context: &str, e: jni::errors::Error) -> BastionError {
    BastionError::Bridge(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// Bridge struct
// ---------------------------------------------------------------------------

/// Android implementation of the Bastion platform bridge.
///
/// The struct is zero-sized; all state lives on the Java side.
pub struct AndroidBridge;

impl AndroidBridge {
    /// Create a new Android bridge.
    ///
    /// This does **not** touch JNI; the first JNI call happens lazily when
    /// a trait method is invoked.
    pub fn new() -> Self {
        Self
    }
}

impl Default for AndroidBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformBridge for AndroidBridge {
    fn platform_name(&self) -> &str {
        "Android"
    }

    fn platform(&self) -> Platform {
        Platform::Android
    }
}

// ---------------------------------------------------------------------------
// NativeKeychain: SharedPreferences (MODE_PRIVATE)
// ---------------------------------------------------------------------------

impl NativeKeychain for AndroidBridge {
    /// Store a secret in the app-private SharedPreferences file.
    ///
    /// Values arrive here already sealed by the protected storage engine
    /// (or are the master key itself); they are Base64-encoded for storage.
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let alias = format!("{PREFS_KEY_PREFIX}{key}");

        tracing::debug!(alias = %alias, "Android: storing secret");

        let j_bytes = env
            .byte_array_from_slice(value)
            .map_err(|e| jni_err("byte_array_from_slice(value)", e))?;

        let encoded: JObject = env
            .call_static_method(
                "android/util/Base64",
                "encodeToString",
                "([BI)Ljava/lang/String;",
                &[JValue::Object(&j_bytes), JValue::Int(2)], // Base64.NO_WRAP
            )
            .map_err(|e| jni_err("Base64.encodeToString", e))?
            .l()
            .map_err(|e| jni_err("encodeToString->l", e))?;

        let editor = preferences_editor(&mut env, &activity)?;
        let j_alias: JString = env
            .new_string(&alias)
            .map_err(|e| jni_err("new_string(alias)", e))?;

        env.call_method(
            &editor,
            "putString",
            "(Ljava/lang/String;Ljava/lang/String;)Landroid/content/SharedPreferences$Editor;",
            &[JValue::Object(&j_alias), JValue::Object(&encoded)],
        )
        .map_err(|e| jni_err("editor.putString", e))?;

        // commit() rather than apply(): the master key must be durable
        // before the first ciphertext that depends on it is written.
        let committed = env
            .call_method(&editor, "commit", "()Z", &[])
            .map_err(|e| jni_err("editor.commit", e))?
            .z()
            .map_err(|e| jni_err("commit->z", e))?;

        if !committed {
            return Err(BastionError::KeyStore(format!(
                "SharedPreferences commit failed for {alias}"
            )));
        }
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let alias = format!("{PREFS_KEY_PREFIX}{key}");

        let prefs = shared_preferences(&mut env, &activity)?;
        let j_alias: JString = env
            .new_string(&alias)
            .map_err(|e| jni_err("new_string(alias)", e))?;

        let encoded: JObject = env
            .call_method(
                &prefs,
                "getString",
                "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;",
                &[JValue::Object(&j_alias), JValue::Object(&JObject::null())],
            )
            .map_err(|e| jni_err("getString", e))?
            .l()
            .map_err(|e| jni_err("getString->l", e))?;

        if encoded.is_null() {
            tracing::debug!(alias = %alias, "Android: secret not found");
            return Ok(None);
        }

        let decoded: JObject = env
            .call_static_method(
                "android/util/Base64",
                "decode",
                "(Ljava/lang/String;I)[B",
                &[JValue::Object(&encoded), JValue::Int(2)], // Base64.NO_WRAP
            )
            .map_err(|e| jni_err("Base64.decode", e))?
            .l()
            .map_err(|e| jni_err("decode->l", e))?;

        let decoded = JByteArray::from(decoded);
        let bytes = env
            .convert_byte_array(&decoded)
            .map_err(|e| jni_err("convert_byte_array(decoded)", e))?;

        Ok(Some(bytes))
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let alias = format!("{PREFS_KEY_PREFIX}{key}");

        let editor = preferences_editor(&mut env, &activity)?;
        let j_alias: JString = env
            .new_string(&alias)
            .map_err(|e| jni_err("new_string(alias)", e))?;

        env.call_method(
            &editor,
            "remove",
            "(Ljava/lang/String;)Landroid/content/SharedPreferences$Editor;",
            &[JValue::Object(&j_alias)],
        )
        .map_err(|e| jni_err("editor.remove", e))?;

        env.call_method(&editor, "apply", "()V", &[])
            .map_err(|e| jni_err("editor.apply", e))?;

        tracing::debug!(alias = %alias, "Android: secret deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NativeDeviceInfo: Settings.Secure / android.os.Build
// ---------------------------------------------------------------------------

impl NativeDeviceInfo for AndroidBridge {
    /// `Settings.Secure.ANDROID_ID`, scoped to the app signing key.
    fn device_identifier(&self) -> Result<String> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let resolver = content_resolver(&mut env, &activity)?;
        let j_name: JString = env
            .new_string("android_id")
            .map_err(|e| jni_err("new_string(android_id)", e))?;

        let id: JObject = env
            .call_static_method(
                "android/provider/Settings$Secure",
                "getString",
                "(Landroid/content/ContentResolver;Ljava/lang/String;)Ljava/lang/String;",
                &[JValue::Object(&resolver), JValue::Object(&j_name)],
            )
            .map_err(|e| jni_err("Settings.Secure.getString", e))?
            .l()
            .map_err(|e| jni_err("getString->l", e))?;

        if id.is_null() {
            return Err(BastionError::Bridge("ANDROID_ID unavailable".into()));
        }
        java_string(&mut env, id)
    }

    fn os_version(&self) -> String {
        jni_env()
            .and_then(|mut env| static_string(&mut env, "android/os/Build$VERSION", "RELEASE"))
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Build.VERSION.RELEASE unavailable");
                "unknown".into()
            })
    }

    fn app_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_owned()
    }
}

// ---------------------------------------------------------------------------
// NativeAuthentication: KeyguardManager / BiometricManager
// ---------------------------------------------------------------------------

impl NativeAuthentication for AndroidBridge {
    fn has_screen_lock(&self) -> Result<bool> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let keyguard = system_service(&mut env, &activity, "keyguard")?;
        env.call_method(&keyguard, "isDeviceSecure", "()Z", &[])
            .map_err(|e| jni_err("KeyguardManager.isDeviceSecure", e))?
            .z()
            .map_err(|e| jni_err("isDeviceSecure->z", e))
    }

    fn biometric_hardware_present(&self) -> Result<bool> {
        let status = biometric_status()?;
        Ok(status != BIOMETRIC_ERROR_NO_HARDWARE && status != BIOMETRIC_ERROR_HW_UNAVAILABLE)
    }

    fn biometrics_enrolled(&self) -> Result<bool> {
        Ok(biometric_status()? == BIOMETRIC_SUCCESS)
    }

    fn authenticate_biometric(&self, reason: &str) -> Result<bool> {
        tracing::info!(reason, "Android: biometric prompt requested");
        Err(BastionError::Bridge(
            "BiometricPrompt must be shown by the host Activity".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// NativeRuntimeInspection: Build fields, Settings.Global, PackageManager
// ---------------------------------------------------------------------------

impl NativeRuntimeInspection for AndroidBridge {
    fn is_emulator(&self) -> Result<bool> {
        let mut env = jni_env()?;
        for field in ["FINGERPRINT", "HARDWARE", "PRODUCT", "MODEL"] {
            let value = static_string(&mut env, "android/os/Build", field)?.to_ascii_lowercase();
            if EMULATOR_BUILD_MARKERS.iter().any(|m| value.contains(m)) {
                tracing::debug!(field, "emulator build marker matched");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn usb_debugging_enabled(&self) -> Result<bool> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let resolver = content_resolver(&mut env, &activity)?;
        let j_name: JString = env
            .new_string("adb_enabled")
            .map_err(|e| jni_err("new_string(adb_enabled)", e))?;

        let enabled = env
            .call_static_method(
                "android/provider/Settings$Global",
                "getInt",
                "(Landroid/content/ContentResolver;Ljava/lang/String;I)I",
                &[JValue::Object(&resolver), JValue::Object(&j_name), JValue::Int(0)],
            )
            .map_err(|e| jni_err("Settings.Global.getInt", e))?
            .i()
            .map_err(|e| jni_err("getInt->i", e))?;

        Ok(enabled != 0)
    }

    fn is_package_installed(&self, package: &str) -> Result<bool> {
        let mut env = jni_env()?;
        let activity = activity()?;

        let pm: JObject = env
            .call_method(
                &activity,
                "getPackageManager",
                "()Landroid/content/pm/PackageManager;",
                &[],
            )
            .map_err(|e| jni_err("getPackageManager", e))?
            .l()
            .map_err(|e| jni_err("getPackageManager->l", e))?;

        let j_pkg: JString = env
            .new_string(package)
            .map_err(|e| jni_err("new_string(package)", e))?;

        let lookup = env.call_method(
            &pm,
            "getPackageInfo",
            "(Ljava/lang/String;I)Landroid/content/pm/PackageInfo;",
            &[JValue::Object(&j_pkg), JValue::Int(0)],
        );

        match lookup {
            Ok(_) => Ok(true),
            Err(jni::errors::Error::JavaException) => {
                // NameNotFoundException: the package is absent.
                env.exception_clear()
                    .map_err(|e| jni_err("exception_clear", e))?;
                Ok(false)
            }
            Err(e) => Err(jni_err("getPackageInfo", e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Obtain the application's `SharedPreferences` in private mode.
fn shared_preferences<'a>(env: &mut JNIEnv<'a>, activity: &JObject<'_>) -> Result<JObject<'a>> {
    let j_name: JString = env
        .new_string(PREFS_FILE)
        .map_err(|e| jni_err("new_string(prefs_name)", e))?;

    env.call_method(
        activity,
        "getSharedPreferences",
        "(Ljava/lang/String;I)Landroid/content/SharedPreferences;",
        &[JValue::Object(&j_name), JValue::Int(0)], // MODE_PRIVATE
    )
    .map_err(|e| jni_err("getSharedPreferences", e))?
    .l()
    .map_err(|e| jni_err("getSharedPreferences->l", e))
}

fn preferences_editor<'a>(env: &mut JNIEnv<'a>, activity: &JObject<'_>) -> Result<JObject<'a>> {
    let prefs = shared_preferences(env, activity)?;
    env.call_method(
        &prefs,
        "edit",
        "()Landroid/content/SharedPreferences$Editor;",
        &[],
    )
    .map_err(|e| jni_err("SharedPreferences.edit", e))?
    .l()
    .map_err(|e| jni_err("edit->l", e))
}

fn content_resolver<'a>(env: &mut JNIEnv<'a>, activity: &JObject<'_>) -> Result<JObject<'a>> {
    env.call_method(
        activity,
        "getContentResolver",
        "()Landroid/content/ContentResolver;",
        &[],
    )
    .map_err(|e| jni_err("getContentResolver", e))?
    .l()
    .map_err(|e| jni_err("getContentResolver->l", e))
}

fn system_service<'a>(
    env: &mut JNIEnv<'a>,
    activity: &JObject<'_>,
    name: &str,
) -> Result<JObject<'a>> {
    let j_name: JString = env
        .new_string(name)
        .map_err(|e| jni_err("new_string(service)", e))?;

    let service = env
        .call_method(
            activity,
            "getSystemService",
            "(Ljava/lang/String;)Ljava/lang/Object;",
            &[JValue::Object(&j_name)],
        )
        .map_err(|e| jni_err("getSystemService", e))?
        .l()
        .map_err(|e| jni_err("getSystemService->l", e))?;

    if service.is_null() {
        return Err(BastionError::PlatformUnavailable);
    }
    Ok(service)
}

/// `BiometricManager.canAuthenticate()` (API 29+).
fn biometric_status() -> Result<i32> {
    let mut env = jni_env()?;
    let activity = activity()?;
    let manager = system_service(&mut env, &activity, "biometric")?;
    env.call_method(&manager, "canAuthenticate", "()I", &[])
        .map_err(|e| jni_err("BiometricManager.canAuthenticate", e))?
        .i()
        .map_err(|e| jni_err("canAuthenticate->i", e))
}

fn static_string(env: &mut JNIEnv<'_>, class: &str, field: &str) -> Result<String> {
    let value = env
        .get_static_field(class, field, "Ljava/lang/String;")
        .map_err(|e| jni_err(field, e))?
        .l()
        .map_err(|e| jni_err("static_field->l", e))?;

    if value.is_null() {
        return Ok(String::new());
    }
    java_string(env, value)
}

fn java_string(env: &mut JNIEnv<'_>, obj: JObject<'_>) -> Result<String> {
    let j_str = JString::from(obj);
    let value: String = env
        .get_string(&j_str)
        .map_err(|e| jni_err("get_string", e))?
        .into();
    Ok(value)
}

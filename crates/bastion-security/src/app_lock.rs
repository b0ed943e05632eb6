// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// App lock: Unlocked / Locked / LockedOut state machine.
//
//   Unlocked  --inactivity timeout or lock_app-->          Locked
//   Locked    --successful unlock-->                       Unlocked
//   Locked    --failed unlock, attempts < max-->           Locked
//   Locked    --failed unlock, attempts reach max-->       LockedOut { until }
//   LockedOut --now >= until-->                            Locked (attempts reset)
//
// While LockedOut every unlock is rejected without prompting and without
// counting. The state, counters, and lockout deadline are persisted through
// protected storage, so restarting the app does not reset a lockout.

use std::num::NonZeroU32;
use std::sync::Arc;

use bastion_bridge::PlatformBridge;
use bastion_core::clock::Clock;
use bastion_core::config::{AppLockConfig, AppLockConfigUpdate, MIN_KDF_ITERATIONS};
use bastion_core::error::{BastionError, Result};
use bastion_core::types::{AppLockState, IncidentType, LockState, MetadataValue, Severity};
use chrono::{DateTime, Duration, Utc};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::sink::{self, IncidentSink};
use crate::storage::ProtectedStorage;

pub const SETTINGS_STORAGE_KEY: &str = "app_lock_settings";
pub const CREDENTIAL_STORAGE_KEY: &str = "app_lock_credential";

const BIOMETRIC_REASON: &str = "Unlock to continue";

/// How the user is trying to unlock.
#[derive(Debug, Clone, Copy)]
pub enum UnlockMethod<'a> {
    /// System biometric prompt.
    Biometric,
    /// App-specific PIN or passphrase.
    Credential(&'a str),
}

/// Salted PBKDF2 hash of the unlock credential.
#[derive(Serialize, Deserialize)]
struct CredentialRecord {
    salt: Vec<u8>,
    hash: Vec<u8>,
    iterations: u32,
}

struct Inner {
    config: AppLockConfig,
    state: LockState,
    failed_attempts: u32,
    last_activity: DateTime<Utc>,
}

impl Inner {
    fn snapshot(&self) -> AppLockState {
        AppLockState {
            enabled: self.config.enabled,
            biometrics_enabled: self.config.biometrics_enabled,
            failed_attempts: self.failed_attempts,
            lockout_until: match self.state {
                LockState::LockedOut { until } => Some(until),
                _ => None,
            },
            lock_timeout_secs: self.config.lock_timeout_secs,
            max_failed_attempts: self.config.max_failed_attempts,
            lockout_duration_secs: self.config.lockout_duration_secs,
        }
    }

    /// Apply time-driven transitions. Returns whether anything changed.
    fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            LockState::LockedOut { until } if now >= until => {
                debug!("lockout expired");
                self.state = LockState::Locked;
                self.failed_attempts = 0;
                true
            }
            LockState::Unlocked
                if self.config.enabled
                    && now - self.last_activity >= secs(self.config.lock_timeout_secs) =>
            {
                debug!("inactivity timeout reached");
                self.state = LockState::Locked;
                true
            }
            _ => false,
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

enum Attempt {
    Accepted,
    Rejected,
    LockedOut { until: DateTime<Utc>, attempts: u32 },
}

pub struct AppLock {
    storage: Arc<ProtectedStorage>,
    bridge: Arc<dyn PlatformBridge>,
    sink: Arc<dyn IncidentSink>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    rng: SystemRandom,
}

impl AppLock {
    pub fn new(
        storage: Arc<ProtectedStorage>,
        bridge: Arc<dyn PlatformBridge>,
        sink: Arc<dyn IncidentSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            storage,
            bridge,
            sink,
            clock,
            inner: Mutex::new(Inner {
                config: AppLockConfig::default(),
                state: LockState::Unlocked,
                failed_attempts: 0,
                last_activity: now,
            }),
            rng: SystemRandom::new(),
        }
    }

    /// Restore persisted settings, falling back to `defaults`. An enabled
    /// lock starts Locked; an unexpired lockout is restored as is.
    #[instrument(skip_all)]
    pub async fn initialize(&self, defaults: AppLockConfig) -> Result<()> {
        let persisted: Option<AppLockState> =
            self.storage.decrypt_from_storage(SETTINGS_STORAGE_KEY).await?;
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        match persisted {
            Some(saved) => {
                inner.config = AppLockConfig {
                    enabled: saved.enabled,
                    biometrics_enabled: saved.biometrics_enabled,
                    lock_timeout_secs: saved.lock_timeout_secs,
                    max_failed_attempts: saved.max_failed_attempts.max(1),
                    lockout_duration_secs: saved.lockout_duration_secs,
                };
                inner.failed_attempts = saved.failed_attempts;
                inner.state = match saved.lockout_until {
                    Some(until) if until > now => LockState::LockedOut { until },
                    _ if saved.enabled => LockState::Locked,
                    _ => LockState::Unlocked,
                };
                if matches!(inner.state, LockState::Locked) && saved.lockout_until.is_some() {
                    inner.failed_attempts = 0;
                }
            }
            None => {
                inner.config = defaults;
                inner.state = if defaults.enabled {
                    LockState::Locked
                } else {
                    LockState::Unlocked
                };
            }
        }
        inner.last_activity = now;
        info!(enabled = inner.config.enabled, state = ?inner.state, "app lock ready");
        Ok(())
    }

    /// Enable the lock, merging `update` into the current settings. The
    /// session that enables it stays unlocked; an active lockout is kept.
    #[instrument(skip(self))]
    pub async fn enable(&self, update: AppLockConfigUpdate) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.config.apply(update);
        inner.config.enabled = true;
        if !matches!(inner.state, LockState::LockedOut { .. }) {
            inner.state = LockState::Unlocked;
            inner.failed_attempts = 0;
        }
        inner.last_activity = self.clock.now();
        self.persist(&inner).await?;
        info!("app lock enabled");
        Ok(())
    }

    /// Turn the lock off and unlock. Failed attempts are forgotten.
    pub async fn disable(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.config.enabled {
            return Ok(());
        }
        inner.config.enabled = false;
        inner.state = LockState::Unlocked;
        inner.failed_attempts = 0;
        self.persist(&inner).await?;
        info!("app lock disabled");
        Ok(())
    }

    /// Merge a settings update without changing the current state, unless
    /// the update disables the lock.
    pub async fn update_config(&self, update: AppLockConfigUpdate) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.config.apply(update);
        if !inner.config.enabled {
            inner.state = LockState::Unlocked;
            inner.failed_attempts = 0;
        }
        self.persist(&inner).await
    }

    /// Whether the lock is enabled and not currently unlocked. Applies any
    /// expired timeout or lockout first.
    pub async fn is_locked(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.refresh_and_persist(&mut inner).await;
        inner.config.enabled && inner.state != LockState::Unlocked
    }

    /// Current state after timeout and lockout expiry.
    pub async fn state(&self) -> LockState {
        let mut inner = self.inner.lock().await;
        self.refresh_and_persist(&mut inner).await;
        inner.state
    }

    /// Config, state, counters, and last activity as persisted.
    pub async fn snapshot(&self) -> AppLockState {
        let mut inner = self.inner.lock().await;
        self.refresh_and_persist(&mut inner).await;
        inner.snapshot()
    }

    /// Consecutive failed unlocks since the last success or reset.
    pub async fn failed_attempts(&self) -> u32 {
        self.snapshot().await.failed_attempts
    }

    /// Seconds until the lockout ends, rounded up. Zero when not locked out.
    pub async fn remaining_lockout_secs(&self) -> u64 {
        let now = self.clock.now();
        match self.state().await {
            LockState::LockedOut { until } => {
                let millis = (until - now).num_milliseconds().max(0);
                u64::try_from((millis + 999) / 1000).unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Note user activity, postponing the inactivity timeout.
    pub async fn record_activity(&self) {
        let mut inner = self.inner.lock().await;
        self.refresh_and_persist(&mut inner).await;
        if inner.state == LockState::Unlocked {
            inner.last_activity = self.clock.now();
        }
    }

    /// Lock now. No-op when the lock is disabled or already locked out.
    pub async fn lock(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.config.enabled || !matches!(inner.state, LockState::Unlocked) {
            return Ok(());
        }
        inner.state = LockState::Locked;
        self.persist(&inner).await?;
        debug!("app locked");
        Ok(())
    }

    /// Lock regardless of settings, enabling the lock if needed. An active
    /// lockout is kept. The in-memory state changes even if persisting fails.
    pub async fn force_lock(&self) {
        let mut inner = self.inner.lock().await;
        inner.config.enabled = true;
        if matches!(inner.state, LockState::Unlocked) {
            inner.state = LockState::Locked;
        }
        if let Err(e) = self.persist(&inner).await {
            warn!(error = %e, "forced lock could not be persisted");
        }
        warn!("app force-locked");
    }

    /// Clear failed attempts and any lockout.
    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.failed_attempts = 0;
        if matches!(inner.state, LockState::LockedOut { .. }) {
            inner.state = LockState::Locked;
        }
        if !inner.config.enabled {
            inner.state = LockState::Unlocked;
        }
        self.persist(&inner).await
    }

    /// Attempt to unlock.
    ///
    /// `Ok(true)` when unlocked (or already unlocked), `Ok(false)` when the
    /// attempt failed or a lockout is active. Errors mean the attempt could
    /// not be made (e.g. no credential set) and are not counted. The outcome
    /// stands even if it cannot be persisted.
    #[instrument(skip_all)]
    pub async fn unlock(&self, method: UnlockMethod<'_>) -> Result<bool> {
        let attempt = {
            let mut inner = self.inner.lock().await;
            self.refresh_and_persist(&mut inner).await;

            match inner.state {
                LockState::Unlocked => return Ok(true),
                LockState::LockedOut { until } => {
                    debug!(%until, "unlock rejected during lockout");
                    return Ok(false);
                }
                LockState::Locked => {}
            }

            let success = match method {
                UnlockMethod::Biometric => {
                    if !inner.config.biometrics_enabled {
                        return Err(BastionError::AppLock("biometric unlock is disabled".into()));
                    }
                    self.bridge.authenticate_biometric(BIOMETRIC_REASON)?
                }
                UnlockMethod::Credential(secret) => self.verify_credential(secret).await?,
            };

            let now = self.clock.now();
            let attempt = if success {
                inner.state = LockState::Unlocked;
                inner.failed_attempts = 0;
                inner.last_activity = now;
                Attempt::Accepted
            } else {
                inner.failed_attempts += 1;
                if inner.failed_attempts >= inner.config.max_failed_attempts {
                    let until = now + secs(inner.config.lockout_duration_secs);
                    inner.state = LockState::LockedOut { until };
                    Attempt::LockedOut {
                        until,
                        attempts: inner.failed_attempts,
                    }
                } else {
                    Attempt::Rejected
                }
            };
            if let Err(e) = self.persist(&inner).await {
                warn!(error = %e, "unlock attempt could not be persisted");
            }
            attempt
        };

        match attempt {
            Attempt::Accepted => {
                info!("app unlocked");
                Ok(true)
            }
            Attempt::Rejected => {
                debug!("unlock attempt failed");
                Ok(false)
            }
            Attempt::LockedOut { until, attempts } => {
                warn!(%until, attempts, "too many failed unlock attempts; locked out");
                sink::report(
                    &*self.sink,
                    IncidentType::UnauthorizedAccessAttempt,
                    Severity::High,
                    format!("App locked out after {attempts} failed unlock attempts"),
                    Some(sink::metadata([
                        ("failed_attempts", MetadataValue::from(attempts)),
                        ("lockout_until", MetadataValue::from(until.to_rfc3339())),
                    ])),
                )
                .await;
                Ok(false)
            }
        }
    }

    /// Set (or replace) the app-specific unlock credential.
    pub async fn set_credential(&self, secret: &str) -> Result<()> {
        if secret.is_empty() {
            return Err(BastionError::AppLock("credential must not be empty".into()));
        }
        let mut salt = vec![0u8; 16];
        self.rng
            .fill(&mut salt)
            .map_err(|_| BastionError::KeyGeneration)?;
        let iterations = MIN_KDF_ITERATIONS;
        let mut hash = vec![0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            rounds(iterations)?,
            &salt,
            secret.as_bytes(),
            &mut hash,
        );
        let record = CredentialRecord {
            salt,
            hash,
            iterations,
        };
        self.storage
            .encrypt_for_storage(CREDENTIAL_STORAGE_KEY, &record)
            .await?;
        info!("unlock credential set");
        Ok(())
    }

    pub async fn clear_credential(&self) -> Result<()> {
        self.storage.remove_from_storage(CREDENTIAL_STORAGE_KEY).await
    }

    async fn verify_credential(&self, secret: &str) -> Result<bool> {
        let record: CredentialRecord = self
            .storage
            .decrypt_from_storage(CREDENTIAL_STORAGE_KEY)
            .await?
            .ok_or(BastionError::CredentialNotSet)?;
        Ok(pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            rounds(record.iterations)?,
            &record.salt,
            secret.as_bytes(),
            &record.hash,
        )
        .is_ok())
    }

    async fn refresh_and_persist(&self, inner: &mut Inner) {
        if inner.refresh(self.clock.now()) {
            if let Err(e) = self.persist(inner).await {
                warn!(error = %e, "app lock state could not be persisted");
            }
        }
    }

    async fn persist(&self, inner: &Inner) -> Result<()> {
        self.storage
            .encrypt_for_storage(SETTINGS_STORAGE_KEY, &inner.snapshot())
            .await
    }
}

fn rounds(iterations: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(iterations)
        .ok_or_else(|| BastionError::AppLock("credential record has zero iterations".into()))
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Protected storage: envelope encryption under a device master key.
//
// The master key is SHA-256(device identifier || 32 random bytes), created
// once and kept in the platform keychain. Every encryption derives a fresh
// AES-256-GCM key from it with PBKDF2-HMAC-SHA256 over a random salt, so no
// two envelopes share a key/nonce pair.

use std::num::NonZeroU32;
use std::sync::Arc;

use bastion_bridge::{NativeKeychain, PlatformBridge};
use bastion_core::config::{EncryptionConfig, MIN_KDF_ITERATIONS};
use bastion_core::error::{BastionError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

/// Keychain entry holding the raw master key.
pub const MASTER_KEY_NAME: &str = "master_encryption_key";

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;
const DEVICE_ENTROPY_LEN: usize = 32;

type Key = Zeroizing<[u8; KEY_LEN]>;

/// One encrypted value. All byte fields serialize as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    #[serde(with = "b64")]
    pub salt: [u8; SALT_LEN],
    #[serde(with = "b64")]
    pub iv: [u8; IV_LEN],
    /// AES-GCM ciphertext with the 16-byte tag appended.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// PBKDF2 rounds used for this envelope's key.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    MIN_KDF_ITERATIONS
}

impl EncryptionEnvelope {
    /// Serialize for the keychain.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored envelope. Malformed input is a `Decryption` error.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|_| BastionError::Decryption)
    }
}

mod b64 {
    use super::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S, T>(bytes: &T, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        s.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD.decode(encoded).map_err(de::Error::custom)?;
        T::try_from(bytes).map_err(|_| de::Error::custom("unexpected field length"))
    }
}

/// Envelope encryption over the platform keychain.
pub struct ProtectedStorage {
    keychain: Arc<dyn NativeKeychain>,
    bridge: Arc<dyn PlatformBridge>,
    config: RwLock<EncryptionConfig>,
    /// Cached master key. `None` until first use or after `wipe_keys`.
    master_key: Mutex<Option<Key>>,
    rng: SystemRandom,
}

impl ProtectedStorage {
    pub fn new(
        keychain: Arc<dyn NativeKeychain>,
        bridge: Arc<dyn PlatformBridge>,
        config: EncryptionConfig,
    ) -> Self {
        Self {
            keychain,
            bridge,
            config: RwLock::new(config),
            master_key: Mutex::new(None),
            rng: SystemRandom::new(),
        }
    }

    /// Load the master key, creating and persisting it on first run.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> Result<()> {
        self.master_key().await?;
        info!("protected storage ready");
        Ok(())
    }

    /// Replace the encryption settings. Existing envelopes keep the
    /// iteration count they were sealed with.
    pub async fn set_config(&self, config: EncryptionConfig) -> Result<()> {
        config.validate()?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Whether the master key is currently held in memory.
    pub async fn has_master_key(&self) -> bool {
        self.master_key.lock().await.is_some()
    }

    /// Drop the in-memory master key. The next operation reloads it from
    /// the keychain.
    pub async fn wipe_keys(&self) {
        self.master_key.lock().await.take();
        info!("in-memory key material wiped");
    }

    /// Serialize `data` as JSON and seal it in a fresh envelope.
    pub async fn encrypt<T: Serialize + ?Sized>(&self, data: &T) -> Result<EncryptionEnvelope> {
        let plaintext =
            Zeroizing::new(serde_json::to_vec(data).map_err(|_| BastionError::Encryption)?);
        self.seal(&plaintext).await
    }

    /// Open an envelope and deserialize its JSON payload.
    pub async fn decrypt<T: DeserializeOwned>(&self, envelope: &EncryptionEnvelope) -> Result<T> {
        let plaintext = self.open(envelope).await?;
        serde_json::from_slice(&plaintext).map_err(|_| BastionError::Decryption)
    }

    /// Encrypt `data` and persist the envelope under `key`.
    #[instrument(skip(self, data))]
    pub async fn encrypt_for_storage<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<()> {
        let envelope = self.encrypt(data).await?;
        let bytes = envelope.to_json().map_err(|_| BastionError::Encryption)?;
        self.keychain.store_secret(key, &bytes).map_err(|e| {
            debug!(error = %e, "keychain write failed");
            BastionError::Encryption
        })?;
        debug!(len = bytes.len(), "envelope stored");
        Ok(())
    }

    /// Load and decrypt the envelope stored under `key`. `Ok(None)` when
    /// nothing is stored there.
    #[instrument(skip(self))]
    pub async fn decrypt_from_storage<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.keychain.load_secret(key)? else {
            return Ok(None);
        };
        let envelope = EncryptionEnvelope::from_json(&bytes)?;
        self.decrypt(&envelope).await.map(Some)
    }

    /// Delete the entry under `key`. Missing entries are not an error.
    pub async fn remove_from_storage(&self, key: &str) -> Result<()> {
        self.keychain.delete_secret(key)
    }

    async fn seal(&self, plaintext: &[u8]) -> Result<EncryptionEnvelope> {
        let master = self.master_key().await.map_err(key_unavailable)?;
        let iterations = self.config.read().await.iterations;

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        self.rng.fill(&mut salt).map_err(|_| BastionError::Encryption)?;
        self.rng.fill(&mut iv).map_err(|_| BastionError::Encryption)?;

        let key = aead_key(&master[..], &salt, iterations).map_err(|_| BastionError::Encryption)?;
        let mut ciphertext = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(iv),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| BastionError::Encryption)?;

        Ok(EncryptionEnvelope {
            salt,
            iv,
            ciphertext,
            iterations,
        })
    }

    async fn open(&self, envelope: &EncryptionEnvelope) -> Result<Zeroizing<Vec<u8>>> {
        let master = self.master_key().await.map_err(key_unavailable)?;
        let key = aead_key(&master[..], &envelope.salt, envelope.iterations)
            .map_err(|_| BastionError::Decryption)?;

        let mut in_out = Zeroizing::new(envelope.ciphertext.clone());
        let plaintext = key
            .open_in_place(
                Nonce::assume_unique_for_key(envelope.iv),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| BastionError::Decryption)?;
        Ok(Zeroizing::new(plaintext.to_vec()))
    }

    async fn master_key(&self) -> Result<Key> {
        let mut cached = self.master_key.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let key = self.load_or_create_master_key()?;
        *cached = Some(key.clone());
        Ok(key)
    }

    fn load_or_create_master_key(&self) -> Result<Key> {
        if let Some(stored) = self.keychain.load_secret(MASTER_KEY_NAME)? {
            let stored = Zeroizing::new(stored);
            let bytes: [u8; KEY_LEN] = stored.as_slice().try_into().map_err(|_| {
                BastionError::KeyStore("stored master key has unexpected length".into())
            })?;
            debug!("master key loaded from keychain");
            return Ok(Zeroizing::new(bytes));
        }

        let device_id = self.bridge.device_identifier().unwrap_or_else(|e| {
            warn!(error = %e, "device identifier unavailable; master key uses random entropy only");
            String::new()
        });
        let mut entropy = Zeroizing::new([0u8; DEVICE_ENTROPY_LEN]);
        self.rng
            .fill(&mut entropy[..])
            .map_err(|_| BastionError::KeyGeneration)?;

        let mut hasher = Sha256::new();
        hasher.update(device_id.as_bytes());
        hasher.update(&entropy[..]);
        let key: Key = Zeroizing::new(hasher.finalize().into());

        self.keychain.store_secret(MASTER_KEY_NAME, &key[..])?;
        info!("new master key generated and stored");
        Ok(key)
    }
}

/// A missing master key is a key store failure, never a bad envelope.
fn key_unavailable(e: BastionError) -> BastionError {
    debug!(error = %e, "master key unavailable");
    match e {
        BastionError::KeyStore(_) => e,
        other => BastionError::KeyStore(format!("master key unavailable: {other}")),
    }
}

/// Derive the per-envelope AES-256-GCM key.
fn aead_key(master: &[u8], salt: &[u8], iterations: u32) -> Result<LessSafeKey> {
    let rounds = NonZeroU32::new(iterations)
        .ok_or_else(|| BastionError::InvalidConfig("iterations must be non-zero".into()))?;
    let mut derived = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        rounds,
        salt,
        master,
        &mut derived[..],
    );
    let unbound =
        UnboundKey::new(&AES_256_GCM, &derived[..]).map_err(|_| BastionError::KeyGeneration)?;
    Ok(LessSafeKey::new(unbound))
}

/// Base64 transport form of an envelope: `base64(json)`.
pub fn encode_envelope(envelope: &EncryptionEnvelope) -> Result<String> {
    Ok(STANDARD.encode(envelope.to_json()?))
}

pub fn decode_envelope(encoded: &str) -> Result<EncryptionEnvelope> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| BastionError::Decryption)?;
    EncryptionEnvelope::from_json(&bytes)
}

#[cfg(test)]
mod tests {
    use bastion_bridge::MemoryBridge;
    use bastion_core::types::Platform;
    use serde_json::json;

    use super::*;

    fn storage() -> (Arc<MemoryBridge>, ProtectedStorage) {
        let bridge = Arc::new(MemoryBridge::new(Platform::Android));
        let storage = ProtectedStorage::new(
            bridge.clone(),
            bridge.clone(),
            EncryptionConfig::default(),
        );
        (bridge, storage)
    }

    #[tokio::test]
    async fn round_trip_structured_value() {
        let (_, storage) = storage();
        let value = json!({ "analytics": false, "crash_reports": true, "retention_days": 30 });

        let envelope = storage.encrypt(&value).await.unwrap();
        assert!(!envelope.ciphertext.is_empty());
        let back: serde_json::Value = storage.decrypt(&envelope).await.unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn envelopes_never_repeat_salt_or_iv() {
        let (_, storage) = storage();
        let a = storage.encrypt("same").await.unwrap();
        let b = storage.encrypt("same").await.unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn master_key_created_once_and_persisted() {
        let (bridge, storage) = storage();
        storage.initialize().await.unwrap();
        let stored = bridge.keychain().load_secret(MASTER_KEY_NAME).unwrap().unwrap();
        assert_eq!(stored.len(), KEY_LEN);

        storage.initialize().await.unwrap();
        let again = bridge.keychain().load_secret(MASTER_KEY_NAME).unwrap().unwrap();
        assert_eq!(stored, again);
    }

    #[tokio::test]
    async fn wipe_then_reload_still_decrypts() {
        let (_, storage) = storage();
        let envelope = storage.encrypt(&vec![1u32, 2, 3]).await.unwrap();

        storage.wipe_keys().await;
        assert!(!storage.has_master_key().await);

        let back: Vec<u32> = storage.decrypt(&envelope).await.unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert!(storage.has_master_key().await);
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_a_generic_error() {
        let (_, storage) = storage();
        let mut envelope = storage.encrypt("secret").await.unwrap();
        envelope.ciphertext[0] ^= 0x01;

        let err = storage.decrypt::<String>(&envelope).await.unwrap_err();
        assert!(matches!(err, BastionError::Decryption));
        assert_eq!(err.to_string(), "failed to decrypt data");
    }

    #[tokio::test]
    async fn other_device_key_cannot_decrypt() {
        let (_, a) = storage();
        let (_, b) = storage();
        let envelope = a.encrypt("secret").await.unwrap();
        assert!(b.decrypt::<String>(&envelope).await.is_err());
    }

    #[tokio::test]
    async fn storage_round_trip_and_missing_key() {
        let (_, storage) = storage();
        assert!(storage
            .decrypt_from_storage::<String>("privacy_settings")
            .await
            .unwrap()
            .is_none());

        storage
            .encrypt_for_storage("privacy_settings", &json!({ "telemetry": false }))
            .await
            .unwrap();
        let back: serde_json::Value = storage
            .decrypt_from_storage("privacy_settings")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back["telemetry"], false);

        storage.remove_from_storage("privacy_settings").await.unwrap();
        assert!(storage
            .decrypt_from_storage::<serde_json::Value>("privacy_settings")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_master_key_is_rejected() {
        let (bridge, storage) = storage();
        bridge.keychain().store_secret(MASTER_KEY_NAME, &[1, 2, 3]).unwrap();
        assert!(matches!(
            storage.initialize().await.unwrap_err(),
            BastionError::KeyStore(_)
        ));
        assert!(matches!(
            storage.encrypt("x").await.unwrap_err(),
            BastionError::KeyStore(_)
        ));
        let envelope = EncryptionEnvelope {
            salt: [0; SALT_LEN],
            iv: [0; IV_LEN],
            ciphertext: vec![0; 32],
            iterations: MIN_KDF_ITERATIONS,
        };
        assert!(matches!(
            storage.decrypt::<String>(&envelope).await.unwrap_err(),
            BastionError::KeyStore(_)
        ));
    }

    #[tokio::test]
    async fn envelope_transport_form() {
        let (_, storage) = storage();
        let envelope = storage.encrypt(&42u8).await.unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["salt"].is_string());
        assert!(json["iv"].is_string());

        let decoded = decode_envelope(&encode_envelope(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert!(decode_envelope("not base64 at all!").is_err());
    }

    #[tokio::test]
    async fn iterations_travel_with_the_envelope() {
        let (_, storage) = storage();
        let old = storage.encrypt("before").await.unwrap();
        storage
            .set_config(EncryptionConfig {
                iterations: 20_000,
                ..Default::default()
            })
            .await
            .unwrap();
        let new = storage.encrypt("after").await.unwrap();
        assert_eq!(new.iterations, 20_000);
        let back: String = storage.decrypt(&old).await.unwrap();
        assert_eq!(back, "before");
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Bastion.
//
// Cryptographic failures deliberately carry no detail: the messages are
// shown to callers and must not echo anything derived from key material.

use thiserror::Error;

/// Top-level error type for all Bastion operations.
#[derive(Debug, Error)]
pub enum BastionError {
    // -- Protected storage --
    #[error("failed to encrypt data")]
    Encryption,

    #[error("failed to decrypt data")]
    Decryption,

    #[error("failed to generate encryption key")]
    KeyGeneration,

    #[error("secure key store error: {0}")]
    KeyStore(String),

    #[error("database error: {0}")]
    Database(String),

    // -- Certificates --
    #[error("certificate error: {0}")]
    Certificate(String),

    // -- App lock --
    #[error("app lock error: {0}")]
    AppLock(String),

    #[error("no unlock credential has been set")]
    CredentialNotSet,

    // -- Incident ledger --
    #[error("incident export failed: {0}")]
    Export(String),

    // -- Lifecycle / configuration --
    #[error("security manager is not initialized")]
    NotInitialized,

    #[error("invalid security configuration: {0}")]
    InvalidConfig(String),

    // -- Persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform bridge --
    #[error("platform bridge error: {0}")]
    Bridge(String),

    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BastionError>;

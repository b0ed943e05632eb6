// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite-backed secure key/value store.
//
// Used as the `NativeKeychain` on platforms without a system keystore
// (desktop, CI). Values written here are either the master key or
// already-encrypted envelopes, so the file only needs owner-only permissions.
//
// Schema:
//   secure_kv(
//     key        TEXT PRIMARY KEY,
//     value      BLOB NOT NULL,
//     updated_at TEXT NOT NULL    -- RFC 3339
//   )

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bastion_bridge::NativeKeychain;
use bastion_core::error::{BastionError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument, warn};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS secure_kv (
    key        TEXT PRIMARY KEY,
    value      BLOB NOT NULL,
    updated_at TEXT NOT NULL
);";

/// Convert a `rusqlite::Error` into a `BastionError::Database`.
fn db_err(e: rusqlite::Error) -> BastionError {
    BastionError::Database(e.to_string())
}

/// Key/value secret store in a single SQLite file.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Open (or create) the store at `path` and restrict it to the owner.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE).map_err(db_err)?;
        restrict_permissions(path);

        debug!("secure key store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE).map_err(db_err)?;
        debug!("in-memory secure key store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored entries.
    pub fn count(&self) -> Result<u64> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM secure_kv", [], |row| row.get(0))
            .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BastionError::KeyStore("key store lock poisoned".into()))
    }
}

impl NativeKeychain for SqliteKeyStore {
    #[instrument(skip(self, value), fields(len = value.len()))]
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO secure_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn()?
            .query_row(
                "SELECT value FROM secure_kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM secure_kv WHERE key = ?1", params![key])
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(error = %e, "could not restrict key store permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

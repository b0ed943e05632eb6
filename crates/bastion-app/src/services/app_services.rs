// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application services: loads the security configuration, opens the key
// store, and owns the initialized `SecurityManager`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bastion_bridge::{NativeKeychain, PlatformBridge, platform_bridge};
use bastion_core::clock::SystemClock;
use bastion_core::config::SecurityConfig;
use bastion_core::error::Result;
use bastion_security::{SecurityAssessment, SecurityHealth, SecurityManager, SqliteKeyStore};
use serde::Serialize;
use tracing::{info, warn};

use super::data_dir;

const CONFIG_FILE: &str = "security.json";
const KEYSTORE_FILE: &str = "secure_store.db";

/// Combined output of an assessment run.
#[derive(Debug, Serialize)]
pub struct PostureReport {
    pub platform: String,
    pub assessment: SecurityAssessment,
    pub health: SecurityHealth,
}

/// Shared handle to the security subsystem. Cheap to clone.
#[derive(Clone)]
pub struct AppServices {
    manager: Arc<SecurityManager>,
    platform: String,
    data_dir: PathBuf,
}

impl AppServices {
    /// Initialise against the default data directory.
    pub async fn init() -> Result<Self> {
        Self::init_in(&data_dir::data_dir()).await
    }

    /// Initialise with the key store and configuration under `dir`.
    pub async fn init_in(dir: &Path) -> Result<Self> {
        info!(path = %dir.display(), "initialising app services");
        let config = load_config(dir).unwrap_or_default();
        let keychain = Arc::new(SqliteKeyStore::open(dir.join(KEYSTORE_FILE))?);
        Self::start(platform_bridge(), keychain, config, dir.to_path_buf()).await
    }

    /// In-memory key store and default settings, for when the data
    /// directory is unusable. Nothing survives the process.
    pub async fn fallback() -> Result<Self> {
        let keychain = Arc::new(SqliteKeyStore::open_in_memory()?);
        Self::start(
            platform_bridge(),
            keychain,
            SecurityConfig::default(),
            std::env::temp_dir(),
        )
        .await
    }

    async fn start(
        bridge: Arc<dyn PlatformBridge>,
        keychain: Arc<dyn NativeKeychain>,
        config: SecurityConfig,
        data_dir: PathBuf,
    ) -> Result<Self> {
        let platform = bridge.platform_name().to_owned();
        let manager = SecurityManager::new(bridge, keychain, Arc::new(SystemClock), config);
        manager.initialize(None).await?;
        info!(%platform, "app services initialised");
        Ok(Self {
            manager: Arc::new(manager),
            platform,
            data_dir,
        })
    }

    pub fn manager(&self) -> &SecurityManager {
        &self.manager
    }

    pub async fn posture_report(&self) -> Result<PostureReport> {
        Ok(PostureReport {
            platform: self.platform.clone(),
            assessment: self.manager.perform_security_assessment().await?,
            health: self.manager.security_health().await?,
        })
    }

    /// Write the current configuration back to `security.json`.
    pub async fn save_config(&self) -> Result<PathBuf> {
        let config = self.manager.security_config().await;
        persist_config(&self.data_dir, &config)
    }
}

fn load_config(data_dir: &Path) -> Option<SecurityConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    match SecurityConfig::from_json(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring invalid security config");
            None
        }
    }
}

fn persist_config(data_dir: &Path, config: &SecurityConfig) -> Result<PathBuf> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

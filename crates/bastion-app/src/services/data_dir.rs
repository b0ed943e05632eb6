// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution for desktop hosts.

use std::path::PathBuf;

/// Return the application data directory, creating it if needed.
///
/// `BASTION_DATA_DIR` overrides the XDG location. Mobile hosts pass their
/// sandboxed documents directory through that variable.
pub fn data_dir() -> PathBuf {
    let dir = match std::env::var_os("BASTION_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs_fallback().join("bastion"),
    };
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(path = %dir.display(), error = %e, "could not create data directory");
    }
    dir
}

fn dirs_fallback() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    std::env::temp_dir()
}

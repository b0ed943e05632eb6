// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Incident export: CSV and JSON renderings, plus passphrase-sealed archives
// (age / scrypt) for moving an export off the device.

use std::io::{Read, Write};
use std::str::FromStr;

use age::secrecy::SecretString;
use bastion_core::error::{BastionError, Result};
use bastion_core::types::SecurityIncident;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const CSV_HEADER: [&str; 10] = [
    "ID",
    "Type",
    "Severity",
    "Description",
    "Timestamp",
    "Device ID",
    "Platform",
    "OS Version",
    "App Version",
    "User ID",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(BastionError::Export(format!("unknown export format {other:?}"))),
        }
    }
}

/// Render incidents in `format`.
pub fn render(format: ExportFormat, incidents: &[SecurityIncident]) -> Result<String> {
    match format {
        ExportFormat::Csv => Ok(to_csv(incidents)),
        ExportFormat::Json => to_json(incidents),
    }
}

/// Header row plus one row per incident; every field is quoted.
pub fn to_csv(incidents: &[SecurityIncident]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for incident in incidents {
        let row = [
            incident.id.as_str(),
            incident.incident_type.as_str(),
            incident.severity.as_str(),
            incident.description.as_str(),
            &incident.timestamp.to_rfc3339(),
            incident.device_info.device_id.as_str(),
            incident.device_info.platform.as_str(),
            incident.device_info.os_version.as_str(),
            incident.device_info.app_version.as_str(),
            incident.user_id.as_deref().unwrap_or(""),
        ]
        .map(quote);
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Pretty-printed JSON array of incidents.
pub fn to_json(incidents: &[SecurityIncident]) -> Result<String> {
    serde_json::to_string_pretty(incidents).map_err(|e| BastionError::Export(e.to_string()))
}

/// Seal `plaintext` as an age file under `passphrase`.
#[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(BastionError::Export("passphrase must not be empty".into()));
    }
    let encryptor = age::Encryptor::with_user_passphrase(SecretString::from(passphrase.to_owned()));
    let mut sealed = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut sealed)
        .map_err(|e| BastionError::Export(e.to_string()))?;
    writer
        .write_all(plaintext)
        .map_err(|e| BastionError::Export(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| BastionError::Export(e.to_string()))?;

    debug!(sealed_len = sealed.len(), "export sealed");
    Ok(sealed)
}

/// Open an age file produced by [`seal`].
#[instrument(skip_all, fields(sealed_len = sealed.len()))]
pub fn unseal(sealed: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let decryptor = age::Decryptor::new(sealed).map_err(|_| BastionError::Decryption)?;
    let identity = age::scrypt::Identity::new(SecretString::from(passphrase.to_owned()));
    let mut reader = decryptor
        .decrypt(std::iter::once(&identity as &dyn age::Identity))
        .map_err(|_| BastionError::Decryption)?;

    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(|_| BastionError::Decryption)?;
    Ok(plaintext)
}

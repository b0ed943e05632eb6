// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certificate pinning: pin table, trusted issuers, validity window, and
// hostname matching for presented server certificates.
//
// Validation runs four checks in order and stops at the first failure:
//   1. pin:      if the host is pinned, the fingerprint must be in its set
//   2. chain:    the issuer must contain a trusted issuer name
//   3. expiry:   now must fall inside [valid_from, valid_to]
//   4. hostname: the subject CN or a SAN must match the host
//
// Pins are kept in a shared table so the rustls verifier in `tls` enforces
// the same set during handshakes.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bastion_core::clock::Clock;
use bastion_core::error::{BastionError, Result};
use bastion_core::types::{CertificateInfo, CertificatePin, IncidentType, Severity};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::sink::{self, IncidentSink};
use crate::storage::ProtectedStorage;

/// Storage key for runtime-added pins.
pub const PINS_STORAGE_KEY: &str = "certificate_pins";

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Host → accepted fingerprints, shared with the TLS verifier.
pub type PinTable = Arc<RwLock<HashMap<String, BTreeSet<String>>>>;

/// Lowercase hex SHA-256 of `data`.
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Canonical fingerprint form: lowercase, without `:` separators.
pub fn normalize_fingerprint(fp: &str) -> String {
    fp.trim()
        .chars()
        .filter(|c| *c != ':')
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Whether certificate name `pattern` covers `host`.
///
/// A leading `*.` matches exactly one non-empty label, so
/// `*.example.com` matches `api.example.com` but neither `example.com`
/// nor `a.b.example.com`.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = normalize_host(pattern);
    let host = normalize_host(host);
    if pattern.is_empty() || host.is_empty() {
        return false;
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            if !suffix.contains('.') {
                return false;
            }
            match host.split_once('.') {
                Some((label, rest)) => !label.is_empty() && rest == suffix,
                None => false,
            }
        }
        None => pattern == host,
    }
}

/// The `CN=` component of a distinguished name.
pub fn common_name(dn: &str) -> Option<&str> {
    dn.split([',', '/'])
        .map(str::trim)
        .find_map(|part| {
            part.strip_prefix("CN=")
                .or_else(|| part.strip_prefix("CN ="))
                .or_else(|| part.strip_prefix("cn="))
        })
        .map(str::trim)
        .filter(|cn| !cn.is_empty())
}

/// Best-effort extraction of certificate fields from a textual dump
/// (`openssl x509 -text` style or `Label: value` lines).
///
/// Returns `None` when subject, issuer, or the validity window is missing.
/// When the dump carries a PEM block the fingerprint is taken over its DER
/// bytes, the same value the TLS verifier computes for the leaf. Otherwise
/// it is taken over the raw input.
pub fn parse_certificate(raw: &str) -> Option<CertificateInfo> {
    let mut subject = None;
    let mut issuer = None;
    let mut serial_number = None;
    let mut valid_from = None;
    let mut valid_to = None;
    let mut subject_alt_names = Vec::new();

    let mut lines = raw.lines().map(str::trim).peekable();
    while let Some(line) = lines.next() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().to_ascii_lowercase();
        let value = value.trim();
        match label.as_str() {
            "subject" => subject = Some(value.to_owned()),
            "issuer" => issuer = Some(value.to_owned()),
            "serial number" | "serial" => {
                let value = if value.is_empty() {
                    lines.next_if(|l| !l.contains(':') || is_hex_serial(l)).unwrap_or("")
                } else {
                    value
                };
                let serial = value.split_whitespace().next().unwrap_or("");
                if !serial.is_empty() {
                    serial_number = Some(serial.to_owned());
                }
            }
            "not before" | "valid from" | "notbefore" => valid_from = parse_time(value),
            "not after" | "valid to" | "notafter" => valid_to = parse_time(value),
            "x509v3 subject alternative name" | "subject alternative name" | "san" => {
                let value = if value.is_empty() {
                    lines.next().unwrap_or("")
                } else {
                    value
                };
                subject_alt_names.extend(parse_sans(value));
            }
            _ => {}
        }
    }

    Some(CertificateInfo {
        subject: subject.filter(|s| !s.is_empty())?,
        issuer: issuer.filter(|s| !s.is_empty())?,
        serial_number,
        fingerprint: match pem_der(raw) {
            Some(der) => fingerprint(&der),
            None => fingerprint(raw.as_bytes()),
        },
        valid_from: valid_from?,
        valid_to: valid_to?,
        subject_alt_names,
    })
}

/// DER bytes of the first PEM certificate block in `raw`.
fn pem_der(raw: &str) -> Option<Vec<u8>> {
    let (_, rest) = raw.split_once(PEM_BEGIN)?;
    let (body, _) = rest.split_once(PEM_END)?;
    let body: String = body.split_whitespace().collect();
    match STANDARD.decode(body) {
        Ok(der) => Some(der),
        Err(e) => {
            debug!(error = %e, "PEM block is not valid base64");
            None
        }
    }
}

fn is_hex_serial(line: &str) -> bool {
    line.chars().all(|c| c.is_ascii_hexdigit() || c == ':')
}

fn parse_sans(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let name = entry.strip_prefix("DNS:").unwrap_or(entry).trim();
            (!name.is_empty() && !name.contains(':')).then(|| name.to_owned())
        })
        .collect()
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Ok(t) = DateTime::parse_from_rfc3339(&value) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%b %d %H:%M:%S %Y GMT", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(&value, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Pin,
    Chain,
    Expiry,
    Hostname,
}

impl Failure {
    fn step(self) -> &'static str {
        match self {
            Self::Pin => "pin",
            Self::Chain => "chain",
            Self::Expiry => "expiry",
            Self::Hostname => "hostname",
        }
    }
}

/// Validates presented certificates against pins and policy.
pub struct CertificatePinValidator {
    storage: Arc<ProtectedStorage>,
    sink: Arc<dyn IncidentSink>,
    clock: Arc<dyn Clock>,
    pins: PinTable,
    trusted_issuers: RwLock<Vec<String>>,
    pinning_enabled: AtomicBool,
}

impl CertificatePinValidator {
    pub fn new(
        storage: Arc<ProtectedStorage>,
        sink: Arc<dyn IncidentSink>,
        clock: Arc<dyn Clock>,
        trusted_issuers: Vec<String>,
    ) -> Self {
        Self {
            storage,
            sink,
            clock,
            pins: Arc::new(RwLock::new(HashMap::new())),
            trusted_issuers: RwLock::new(trusted_issuers),
            pinning_enabled: AtomicBool::new(true),
        }
    }

    /// Load configured pins, then merge in pins persisted at runtime.
    #[instrument(skip_all, fields(configured = configured.len()))]
    pub async fn initialize(&self, configured: &[CertificatePin], trusted_issuers: &[String]) -> Result<()> {
        let persisted: Vec<CertificatePin> = self
            .storage
            .decrypt_from_storage(PINS_STORAGE_KEY)
            .await?
            .unwrap_or_default();

        {
            let mut table = self.table_mut()?;
            table.clear();
            for pin in configured.iter().chain(persisted.iter()) {
                table
                    .entry(normalize_host(&pin.hostname))
                    .or_default()
                    .extend(pin.fingerprints.iter().map(|fp| normalize_fingerprint(fp)));
            }
        }
        if !trusted_issuers.is_empty() {
            *self
                .trusted_issuers
                .write()
                .map_err(|_| poisoned())? = trusted_issuers.to_vec();
        }
        info!(persisted = persisted.len(), "certificate pins loaded");
        Ok(())
    }

    /// Handle for the TLS verifier.
    pub fn pin_table(&self) -> PinTable {
        Arc::clone(&self.pins)
    }

    /// Turn the pin step on or off. Chain, expiry, and hostname checks
    /// always run.
    pub fn set_pinning_enabled(&self, enabled: bool) {
        self.pinning_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn pinning_enabled(&self) -> bool {
        self.pinning_enabled.load(Ordering::SeqCst)
    }

    pub fn pins(&self) -> Vec<CertificatePin> {
        let Ok(table) = self.pins.read() else {
            return Vec::new();
        };
        let mut pins: Vec<_> = table
            .iter()
            .map(|(host, fps)| CertificatePin {
                hostname: host.clone(),
                fingerprints: fps.clone(),
            })
            .collect();
        pins.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        pins
    }

    /// Add fingerprints for `hostname` and persist the table.
    #[instrument(skip(self, fingerprints))]
    pub async fn add_pin(&self, hostname: &str, fingerprints: &[String]) -> Result<()> {
        if fingerprints.is_empty() {
            return Err(BastionError::Certificate("a pin needs at least one fingerprint".into()));
        }
        {
            let mut table = self.table_mut()?;
            table
                .entry(normalize_host(hostname))
                .or_default()
                .extend(fingerprints.iter().map(|fp| normalize_fingerprint(fp)));
        }
        self.persist().await
    }

    /// Remove all pins for `hostname`. Returns whether any existed.
    pub async fn remove_pin(&self, hostname: &str) -> Result<bool> {
        let removed = self.table_mut()?.remove(&normalize_host(hostname)).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Run the four checks. A failure is logged as an incident and
    /// reported as `false`.
    #[instrument(skip(self, cert), fields(fingerprint = %cert.fingerprint))]
    pub async fn validate(&self, hostname: &str, cert: &CertificateInfo) -> bool {
        let failure = match self.first_failure(hostname, cert) {
            Ok(None) => {
                debug!("certificate accepted");
                return true;
            }
            Ok(Some(failure)) => failure,
            Err(e) => {
                warn!(error = %e, "certificate validation could not run");
                Failure::Pin
            }
        };

        let (incident_type, severity, description) = match failure {
            Failure::Pin => (
                IncidentType::CertificatePinningFailed,
                Severity::High,
                format!("Certificate for {hostname} does not match its pins"),
            ),
            Failure::Chain => (
                IncidentType::SuspiciousNetworkActivity,
                Severity::Medium,
                format!("Certificate for {hostname} has an untrusted issuer"),
            ),
            Failure::Expiry => (
                IncidentType::SuspiciousNetworkActivity,
                Severity::Medium,
                format!("Certificate for {hostname} is outside its validity period"),
            ),
            Failure::Hostname => (
                IncidentType::SuspiciousNetworkActivity,
                Severity::Medium,
                format!("Certificate does not cover {hostname}"),
            ),
        };
        warn!(step = failure.step(), %hostname, "certificate rejected");
        let metadata = sink::metadata([
            ("hostname", hostname.to_owned()),
            ("fingerprint", cert.fingerprint.clone()),
            ("failed_check", failure.step().to_owned()),
        ]);
        sink::report(&*self.sink, incident_type, severity, description, Some(metadata)).await;
        false
    }

    /// Parse a textual certificate and validate it. Unparseable input is
    /// rejected.
    pub async fn validate_raw(&self, hostname: &str, raw: &str) -> bool {
        match parse_certificate(raw) {
            Some(cert) => self.validate(hostname, &cert).await,
            None => {
                warn!(%hostname, "certificate could not be parsed");
                sink::report(
                    &*self.sink,
                    IncidentType::SuspiciousNetworkActivity,
                    Severity::Medium,
                    format!("Unparseable certificate presented for {hostname}"),
                    Some(sink::metadata([("hostname", hostname)])),
                )
                .await;
                false
            }
        }
    }

    fn first_failure(&self, hostname: &str, cert: &CertificateInfo) -> Result<Option<Failure>> {
        let host = normalize_host(hostname);

        if self.pinning_enabled() {
            let table = self.pins.read().map_err(|_| poisoned())?;
            if let Some(accepted) = table.get(&host) {
                if !accepted.contains(&normalize_fingerprint(&cert.fingerprint)) {
                    return Ok(Some(Failure::Pin));
                }
            }
        }

        if !self.chain_trusted(cert)? {
            return Ok(Some(Failure::Chain));
        }

        let now = self.clock.now();
        if now < cert.valid_from || now > cert.valid_to {
            return Ok(Some(Failure::Expiry));
        }

        let names = common_name(&cert.subject)
            .into_iter()
            .chain(cert.subject_alt_names.iter().map(String::as_str));
        if !names.into_iter().any(|name| hostname_matches(name, &host)) {
            return Ok(Some(Failure::Hostname));
        }
        Ok(None)
    }

    fn chain_trusted(&self, cert: &CertificateInfo) -> Result<bool> {
        if cert.subject.trim().is_empty() || cert.issuer.trim().is_empty() || cert.fingerprint.is_empty() {
            return Ok(false);
        }
        let issuer = cert.issuer.to_lowercase();
        let trusted = self.trusted_issuers.read().map_err(|_| poisoned())?;
        Ok(trusted
            .iter()
            .any(|name| issuer.contains(&name.to_lowercase())))
    }

    async fn persist(&self) -> Result<()> {
        let pins = self.pins();
        self.storage.encrypt_for_storage(PINS_STORAGE_KEY, &pins).await?;
        debug!(hosts = pins.len(), "certificate pins persisted");
        Ok(())
    }

    fn table_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, BTreeSet<String>>>> {
        self.pins.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> BastionError {
    BastionError::Certificate("pin table lock poisoned".into())
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! bastion-security: the security posture and protected-storage subsystem.
//!
//! Components are plain structs wired together by [`SecurityManager`], which
//! is the composition root a host application holds on to. Every component
//! receives its collaborators (platform bridge, keychain, clock, incident
//! sink) explicitly, so each can be constructed on its own in tests.
//!
//! Incidents flow one way: detectors report through an [`IncidentSink`], the
//! manager routes them into the encrypted [`IncidentLedger`], and the ledger
//! dispatches by severity.

pub mod app_lock;
pub mod certificates;
pub mod export;
pub mod incidents;
pub mod integrity;
pub mod keystore;
pub mod manager;
pub mod probes;
pub mod risk;
pub mod sink;
pub mod storage;
pub mod tls;

pub use app_lock::{AppLock, UnlockMethod};
pub use certificates::{CertificatePinValidator, fingerprint, hostname_matches, parse_certificate};
pub use export::ExportFormat;
pub use incidents::{IncidentFilter, IncidentLedger, IncidentStatistics, MAX_INCIDENTS};
pub use integrity::DeviceIntegrityChecker;
pub use keystore::SqliteKeyStore;
pub use manager::{HealthStatus, SecurityAssessment, SecurityHealth, SecurityManager};
pub use risk::{risk_level, risk_score};
pub use sink::IncidentSink;
pub use storage::{EncryptionEnvelope, ProtectedStorage};
pub use tls::PinnedServerVerifier;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Incident sink: the one-way channel detectors use to report incidents.

use async_trait::async_trait;
use bastion_core::error::Result;
use bastion_core::types::{IncidentMetadata, IncidentType, Severity};
use tracing::warn;

/// Receives incidents from detectors and the app lock.
#[async_trait]
pub trait IncidentSink: Send + Sync {
    async fn record_incident(
        &self,
        incident_type: IncidentType,
        severity: Severity,
        description: String,
        metadata: Option<IncidentMetadata>,
    ) -> Result<()>;
}

/// Report an incident. A failing sink is traced and otherwise ignored so
/// detection results are never lost to a logging error.
pub async fn report(
    sink: &dyn IncidentSink,
    incident_type: IncidentType,
    severity: Severity,
    description: impl Into<String>,
    metadata: Option<IncidentMetadata>,
) {
    let description = description.into();
    if let Err(e) = sink
        .record_incident(incident_type, severity, description, metadata)
        .await
    {
        warn!(%incident_type, %severity, error = %e, "failed to record security incident");
    }
}

/// Build a metadata map from key/value pairs.
pub fn metadata<I, K, V>(pairs: I) -> IncidentMetadata
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<bastion_core::types::MetadataValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

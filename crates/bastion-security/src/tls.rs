// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// rustls server verifier that enforces the certificate pin table during
// the TLS handshake, on top of normal WebPKI validation.

use std::sync::Arc;

use bastion_core::error::{BastionError, Result};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::certificates::{PinTable, fingerprint};

/// WebPKI verification plus SHA-256 leaf pinning.
///
/// Hosts without pins get plain WebPKI behaviour.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pins: PinTable,
}

impl PinnedServerVerifier {
    pub fn new(roots: Arc<RootCertStore>, pins: PinTable) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder(roots)
            .build()
            .map_err(|e| BastionError::Certificate(format!("verifier setup failed: {e}")))?;
        Ok(Self { inner, pins })
    }

    /// A client config that verifies servers through this verifier.
    pub fn into_client_config(self) -> ClientConfig {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth()
    }

    /// Check the leaf certificate against the pins for `host`.
    pub fn check_pin(&self, host: &str, end_entity: &[u8]) -> std::result::Result<(), rustls::Error> {
        check_pin(&self.pins, host, end_entity)
    }
}

pub(crate) fn check_pin(pins: &PinTable, host: &str, end_entity: &[u8]) -> std::result::Result<(), rustls::Error> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let table = pins
        .read()
        .map_err(|_| rustls::Error::General("pin table lock poisoned".into()))?;
    let Some(accepted) = table.get(&host) else {
        return Ok(());
    };
    let presented = fingerprint(end_entity);
    if accepted.contains(&presented) {
        debug!(%host, "pinned certificate matched");
        Ok(())
    } else {
        warn!(%host, %presented, "certificate pin mismatch during handshake");
        Err(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verified =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        if let ServerName::DnsName(name) = server_name {
            self.check_pin(name.as_ref(), end_entity.as_ref())?;
        }
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

//! Builds the `rustls` client configuration for a TLS destination: the platform
//! trust store or a configured CA bundle, an optional client certificate, and optional server
//! certificate pinning by SHA-256 fingerprint.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use trakbridge_core::config::TlsMaterial;
use trakbridge_core::error::TransmitError;

/// Builds a `rustls::ClientConfig` from a destination's configured TLS material.
///
/// When `server_fingerprint_sha256` is set, the server's certificate chain verification is
/// replaced entirely with an exact fingerprint check, bypassing CA validation. Otherwise the
/// configured CA bundle, or the platform's native trust store when
/// none is configured, is used.
pub fn build_client_config(material: &TlsMaterial) -> Result<ClientConfig, TransmitError> {
    let builder = ClientConfig::builder();

    let mut config = if let Some(fingerprint) = &material.server_fingerprint_sha256 {
        let verifier = FingerprintVerifier::new(fingerprint.clone());
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
    } else {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(ca_path) = &material.ca_path {
            load_ca_bundle(ca_path, &mut roots)?;
        } else {
            for cert in rustls_native_certs::load_native_certs()
                .map_err(|e| TransmitError::Tls(format!("loading native certs: {e}")))?
            {
                roots
                    .add(cert)
                    .map_err(|e| TransmitError::Tls(format!("invalid native cert: {e}")))?;
            }
        }
        builder.with_root_certificates(roots)
    };

    let config = match (&material.client_cert_path, &material.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_cert_chain(cert_path)?;
            let key = load_private_key(key_path)?;
            config
                .with_client_auth_cert(certs, key)
                .map_err(|e| TransmitError::Tls(format!("invalid client certificate: {e}")))?
        }
        _ => config.with_no_client_auth(),
    };

    Ok(config)
}

fn load_ca_bundle(
    path: &str,
    roots: &mut rustls::RootCertStore,
) -> Result<(), TransmitError> {
    let file = std::fs::read(path)
        .map_err(|e| TransmitError::Tls(format!("reading CA bundle {path}: {e}")))?;
    for cert in rustls_pemfile::certs(&mut file.as_slice()) {
        let cert = cert.map_err(|e| TransmitError::Tls(format!("parsing CA bundle {path}: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| TransmitError::Tls(format!("invalid CA certificate in {path}: {e}")))?;
    }
    Ok(())
}

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>, TransmitError> {
    let file = std::fs::read(path)
        .map_err(|e| TransmitError::Tls(format!("reading client cert {path}: {e}")))?;
    rustls_pemfile::certs(&mut file.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransmitError::Tls(format!("parsing client cert {path}: {e}")))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TransmitError> {
    let file = std::fs::read(path)
        .map_err(|e| TransmitError::Tls(format!("reading client key {path}: {e}")))?;
    rustls_pemfile::private_key(&mut file.as_slice())
        .map_err(|e| TransmitError::Tls(format!("parsing client key {path}: {e}")))?
        .ok_or_else(|| TransmitError::Tls(format!("no private key found in {path}")))
}

/// A [`ServerCertVerifier`] that accepts exactly one pinned SHA-256 fingerprint and otherwise
/// performs no chain validation, per the destination config's `server_fingerprint_sha256`.
#[derive(Debug)]
struct FingerprintVerifier {
    expected_fingerprint: String,
}

impl FingerprintVerifier {
    fn new(expected_fingerprint: String) -> Self {
        FingerprintVerifier {
            expected_fingerprint: expected_fingerprint.to_lowercase(),
        }
    }
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let actual = hex::encode(Sha256::digest(end_entity.as_ref()));
        if actual == self.expected_fingerprint {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!(
                "server certificate fingerprint {actual} did not match pinned {}",
                self.expected_fingerprint
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

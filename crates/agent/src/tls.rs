use std::sync::Arc;

use prism_protocol::SecurityLevel;
use tracing::{info, warn};

/// Build the TLS connector for the operator WebSocket according to the
/// configured security level. `None` means plain ws://.
pub fn build_connector(
    security: SecurityLevel,
    pinned_cert: Option<&str>,
) -> anyhow::Result<Option<tokio_tungstenite::Connector>> {
    match security {
        SecurityLevel::None => Ok(None),
        SecurityLevel::AllowSelfSigned => {
            warn!("TLS certificate verification disabled (allow-self-signed)");
            let config = rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth();
            Ok(Some(tokio_tungstenite::Connector::Rustls(Arc::new(config))))
        }
        SecurityLevel::Strict => {
            let mut root_store = rustls::RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for err in &native.errors {
                warn!("native cert store: {err}");
            }
            for cert in native.certs {
                let _ = root_store.add(cert);
            }

            if let Some(cert_path) = pinned_cert {
                let pem_data = std::fs::read(cert_path)?;
                for cert in rustls_pemfile::certs(&mut pem_data.as_slice()) {
                    let cert = cert?;
                    if let Err(e) = root_store.add(cert) {
                        warn!("failed to pin certificate from {cert_path}: {e}");
                    } else {
                        info!("pinned operator certificate from {cert_path}");
                    }
                }
            }

            let config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            Ok(Some(tokio_tungstenite::Connector::Rustls(Arc::new(config))))
        }
    }
}

/// Certificate verifier that accepts everything. Local development
/// operators run with self-signed certificates.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

//! TLS connector for the mid-connection upgrade.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::prelogin_wrapper::TlsPreloginWrapper;

/// Certificate verifier that accepts any server certificate.
///
/// Only installed for `trust_server_certificate`.
#[derive(Debug)]
struct DangerousServerCertVerifier {
    schemes: Vec<SignatureScheme>,
}

impl DangerousServerCertVerifier {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            schemes: provider.signature_verification_algorithms.supported_schemes(),
        }
    }
}

impl ServerCertVerifier for DangerousServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
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
        self.schemes.clone()
    }
}

/// TLS connector for TDS connections.
///
/// The crypto provider is passed explicitly, so no process-wide default
/// needs to be installed.
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Build a connector from `config`.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = Self::build_client_config(&config)?;
        Ok(Self {
            config,
            inner: TokioTlsConnector::from(Arc::new(client_config)),
        })
    }

    fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = config.protocol_versions();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)?;

        if config.trust_server_certificate {
            tracing::warn!(
                "trust_server_certificate is enabled: server certificate validation is disabled"
            );
            return Ok(builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousServerCertVerifier::new(&provider)))
                .with_no_client_auth());
        }

        Ok(builder
            .with_root_certificates(Self::build_root_store(config)?)
            .with_no_client_auth())
    }

    fn build_root_store(config: &TlsConfig) -> Result<RootCertStore, TlsError> {
        if config.root_certificates.is_empty() {
            return Ok(RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            });
        }

        let mut root_store = RootCertStore::empty();
        for cert in &config.root_certificates {
            root_store
                .add(cert.clone())
                .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        }
        Ok(root_store)
    }

    /// Name used for SNI and validation: the configured override, else `host`.
    pub fn server_name(&self, host: &str) -> Result<ServerName<'static>, TlsError> {
        let name = self.config.server_name.as_deref().unwrap_or(host);
        ServerName::try_from(name.to_string()).map_err(|_| TlsError::InvalidServerName(name.to_string()))
    }

    /// Run the TLS handshake inside PRELOGIN packets over an already open
    /// TDS connection.
    ///
    /// On success the wrapper has been switched to pass-through, so the
    /// returned stream carries plain TLS records. On failure the stream is
    /// consumed; the connection cannot fall back to cleartext.
    pub async fn connect_with_prelogin<S>(
        &self,
        stream: S,
        host: &str,
    ) -> Result<TlsStream<TlsPreloginWrapper<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self.server_name(host)?;
        tracing::debug!(server_name = ?server_name, "starting TLS handshake inside PRELOGIN packets");

        let mut tls = self
            .inner
            .connect(server_name, TlsPreloginWrapper::new(stream))
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        let (wrapper, session) = tls.get_mut();
        wrapper.handshake_complete();
        tracing::debug!(
            protocol = ?session.protocol_version(),
            cipher_suite = ?session.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS handshake completed"
        );

        Ok(tls)
    }

    /// The configuration this connector was built from.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert!(TlsConnector::new(TlsConfig::default()).is_ok());
    }

    #[test]
    fn test_trust_server_certificate() {
        let connector = TlsConnector::new(TlsConfig::new().trust_server_certificate(true)).unwrap();
        assert!(connector.config().trust_server_certificate);
    }

    #[test]
    fn test_server_name_override() {
        let connector = TlsConnector::new(TlsConfig::new().with_server_name("db.example.com")).unwrap();
        let name = connector.server_name("10.0.0.5").unwrap();
        assert_eq!(name, ServerName::try_from("db.example.com").unwrap());
    }

    #[test]
    fn test_ip_address_server_name() {
        let connector = TlsConnector::new(TlsConfig::new()).unwrap();
        assert!(matches!(connector.server_name("127.0.0.1").unwrap(), ServerName::IpAddress(_)));
    }

    #[test]
    fn test_invalid_server_name() {
        let connector = TlsConnector::new(TlsConfig::new()).unwrap();
        assert!(matches!(connector.server_name("not a host!"), Err(TlsError::InvalidServerName(_))));
    }

    #[test]
    fn test_invalid_root_certificate() {
        let config = TlsConfig::new().add_root_certificate(CertificateDer::from(vec![1, 2, 3]));
        assert!(matches!(TlsConnector::new(config), Err(TlsError::InvalidCertificate(_))));
    }
}

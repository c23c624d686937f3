//! TLS handshakes wrapped in PRELOGIN packets, client against a rustls server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tdslink_tls::{TlsConfig, TlsConnector, TlsError, TlsPreloginWrapper};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_rustls::TlsAcceptor;

fn server_config() -> (Arc<ServerConfig>, CertificateDer<'static>) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.signing_key.serialize_der()));
    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_protocol_versions(&[&rustls::version::TLS12])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key)
        .unwrap();
    (Arc::new(config), cert)
}

async fn echo_server(io: DuplexStream, config: Arc<ServerConfig>) -> std::io::Result<()> {
    let mut tls = TlsAcceptor::from(config).accept(TlsPreloginWrapper::new(io)).await?;
    tls.get_mut().0.handshake_complete();
    let mut buf = [0u8; 4];
    tls.read_exact(&mut buf).await?;
    tls.write_all(&buf).await?;
    tls.flush().await
}

#[tokio::test]
async fn test_handshake_with_trusted_root() {
    let (config, cert) = server_config();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(echo_server(server_io, config));

    let connector = TlsConnector::new(TlsConfig::new().add_root_certificate(cert)).unwrap();
    let mut tls = connector.connect_with_prelogin(client_io, "localhost").await.unwrap();
    assert!(!tls.get_ref().0.is_handshaking());

    tls.write_all(b"ping").await.unwrap();
    tls.flush().await.unwrap();
    let mut reply = [0u8; 4];
    tls.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"ping");
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handshake_records_after_upgrade_are_unframed() {
    let (config, cert) = server_config();
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let acceptor = TlsAcceptor::from(config);
        let mut tls = acceptor.accept(TlsPreloginWrapper::new(&mut server_io)).await.unwrap();
        tls.get_mut().0.handshake_complete();
        drop(tls);
        // The next bytes on the wire are a bare TLS record, not a TDS header.
        let mut first = [0u8; 1];
        server_io.read_exact(&mut first).await.unwrap();
        first[0]
    });

    let connector = TlsConnector::new(TlsConfig::new().add_root_certificate(cert)).unwrap();
    let mut tls = connector.connect_with_prelogin(client_io, "localhost").await.unwrap();
    tls.write_all(b"data").await.unwrap();
    tls.flush().await.unwrap();

    // 0x17 is the TLS application data content type.
    assert_eq!(server.await.unwrap(), 0x17);
}

#[tokio::test]
async fn test_trust_server_certificate_skips_validation() {
    let (config, _cert) = server_config();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(echo_server(server_io, config));

    let connector = TlsConnector::new(TlsConfig::new().trust_server_certificate(true)).unwrap();
    let mut tls = connector.connect_with_prelogin(client_io, "some-other-name").await.unwrap();
    tls.write_all(b"pong").await.unwrap();
    tls.flush().await.unwrap();
    let mut reply = [0u8; 4];
    tls.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"pong");
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_untrusted_certificate_fails_handshake() {
    let (config, _cert) = server_config();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(echo_server(server_io, config));

    let connector = TlsConnector::new(TlsConfig::new()).unwrap();
    let err = connector.connect_with_prelogin(client_io, "localhost").await.unwrap_err();
    assert!(matches!(err, TlsError::HandshakeFailed(_)));
    assert!(server.await.unwrap().is_err());
}

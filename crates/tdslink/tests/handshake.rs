//! Handshake against the mock server: encryption policy, login and
//! login-time environment changes.

#![allow(clippy::unwrap_used)]

mod common;

use bytes::BytesMut;
use common::{PASSWORD, USER, config_for, connect};
use tdslink::{EncryptionMode, Error, Session, TdsVersion, TlsConfig};
use tdslink_protocol::Done;
use tdslink_testing::{MockResponse, MockTdsServer};

#[tokio::test]
async fn test_cleartext_login() {
    let server = MockTdsServer::builder()
        .with_credentials(USER, PASSWORD)
        .with_database("inventory")
        .build()
        .await
        .unwrap();
    let session = connect(&server).await;

    assert!(!session.is_encrypted());
    assert_eq!(session.tds_version(), TdsVersion::V7_4);
    assert_eq!(session.packet_size(), 4096);
    assert_eq!(session.transaction_descriptor(), Some(0));
    assert!(!session.in_transaction());
    assert_eq!(session.database(), Some("inventory"));
    assert_eq!(session.login_ack().prog_name, "tdslink-mock");
    assert_eq!(session.server_version().unwrap().major, 16);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    let server = MockTdsServer::builder()
        .with_credentials(USER, "something else")
        .build()
        .await
        .unwrap();
    let err = Session::connect(config_for(&server)).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { number: 18456, .. }), "{err:?}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_login_without_loginack_is_protocol_error() {
    let mut tokens = BytesMut::new();
    Done::new(None).encode(&mut tokens);
    let server = MockTdsServer::builder()
        .with_login_response(tokens.freeze())
        .build()
        .await
        .unwrap();
    let err = Session::connect(config_for(&server)).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{err:?}");
}

#[tokio::test]
async fn test_packet_size_envchange_resizes_frames() {
    let server = MockTdsServer::builder()
        .with_packet_size(8192)
        .with_default_response(MockResponse::scalar(1i32))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;
    assert_eq!(session.packet_size(), 8192);

    // Spans several 8192-byte packets once encoded as UTF-16.
    let sql = format!("SELECT 1 /* {} */", "x".repeat(20_000));
    let rows = session.query(&sql).await.unwrap();
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 1);
    assert_eq!(server.received_batches().await[0].sql, sql);
}

#[tokio::test]
async fn test_tls_with_trusted_certificate() {
    let server = MockTdsServer::builder()
        .with_tls()
        .with_response("SELECT 1", MockResponse::scalar(1i32))
        .build()
        .await
        .unwrap();
    let tls = TlsConfig::new()
        .add_root_certificate(server.certificate().unwrap())
        .with_server_name("localhost");
    let config = config_for(&server).encryption(EncryptionMode::Required).tls(tls);

    let mut session = Session::connect(config).await.unwrap();
    assert!(session.is_encrypted());
    let rows = session.query("SELECT 1").await.unwrap();
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 1);
}

#[tokio::test]
async fn test_tls_preferred_with_trust_server_certificate() {
    let server = MockTdsServer::builder().with_tls().build().await.unwrap();
    let config = config_for(&server)
        .encryption(EncryptionMode::Preferred)
        .trust_server_certificate(true);
    let session = Session::connect(config).await.unwrap();
    assert!(session.is_encrypted());
}

#[tokio::test]
async fn test_untrusted_certificate_fails() {
    let server = MockTdsServer::builder().with_tls().build().await.unwrap();
    let config = config_for(&server).encryption(EncryptionMode::Required);
    let err = Session::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Tls(_)), "{err:?}");
}

#[tokio::test]
async fn test_preferred_falls_back_to_cleartext() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let config = config_for(&server).encryption(EncryptionMode::Preferred);
    let session = Session::connect(config).await.unwrap();
    assert!(!session.is_encrypted());
}

#[tokio::test]
async fn test_required_against_cleartext_server() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let config = config_for(&server).encryption(EncryptionMode::Required);
    let err = Session::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Connect(_)), "{err:?}");
}

#[tokio::test]
async fn test_disabled_against_tls_required_server() {
    let server = MockTdsServer::builder().with_tls_required().build().await.unwrap();
    let err = Session::connect(config_for(&server)).await.unwrap_err();
    assert!(matches!(err, Error::Connect(_)), "{err:?}");
}

#[tokio::test]
async fn test_connect_refused() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let config = config_for(&server);
    drop(server);
    // Give the accept loop a moment to observe the shutdown.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let result = Session::connect(config).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_tds_7_1_session() {
    let server = MockTdsServer::builder()
        .with_tds_version(TdsVersion::V7_1)
        .with_table("dbo", "t", 0)
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;
    assert_eq!(session.tds_version(), TdsVersion::V7_1);
    assert_eq!(session.transaction_descriptor(), None);

    // Row counts arrive in the 32-bit DONE layout.
    assert_eq!(session.execute("INSERT INTO t VALUES (1), (2)").await.unwrap(), 2);
    session.begin_transaction().await.unwrap();
    let descriptor = session.transaction_descriptor();
    assert!(descriptor.is_some());
    assert_eq!(session.execute("INSERT INTO t VALUES (3)").await.unwrap(), 1);
    session.commit().await.unwrap();
    assert_eq!(session.transaction_descriptor(), None);

    let sent: Vec<_> = server
        .received_batches()
        .await
        .into_iter()
        .map(|b| b.transaction_descriptor)
        .collect();
    assert_eq!(sent, vec![None, None, descriptor, descriptor]);
    assert_eq!(server.tables().committed_rows("t").await, Some(3));
}

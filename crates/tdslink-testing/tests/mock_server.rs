//! The mock server driven by hand-built client messages.

#![allow(clippy::unwrap_used, clippy::panic)]

use tdslink_codec::Connection;
use tdslink_protocol::{
    ColMetaData, EncryptionLevel, Login7, PacketType, PreLogin, Token, TokenParser, encode_sql_batch,
};
use tdslink_testing::{MockResponse, MockTdsServer, ReceivedBatch};
use tokio::net::TcpStream;

async fn login(server: &MockTdsServer, password: &str) -> (Connection<TcpStream>, Vec<Token>) {
    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut conn = Connection::new(stream);

    let prelogin = PreLogin::new().with_encryption(EncryptionLevel::NotSupported);
    conn.send_message(PacketType::PreLogin, prelogin.encode()).await.unwrap();
    let answer = PreLogin::decode(conn.read_message().await.unwrap().payload).unwrap();
    assert_eq!(answer.encryption, EncryptionLevel::NotSupported);
    assert_eq!(answer.server_version.unwrap().major, 16);

    let login = Login7::new().with_sql_auth("sa", password).with_packet_size(4096);
    conn.send_message(PacketType::Tds7Login, login.encode()).await.unwrap();
    let tokens = read_tokens(&mut conn).await;
    (conn, tokens)
}

async fn read_tokens(conn: &mut Connection<TcpStream>) -> Vec<Token> {
    let message = conn.read_message().await.unwrap();
    assert_eq!(message.packet_type, PacketType::TabularResult);
    let mut parser = TokenParser::new(message.payload);
    let mut meta: Option<ColMetaData> = None;
    let mut tokens = Vec::new();
    while let Some(token) = parser.next_token(meta.as_ref()).unwrap() {
        if let Token::ColMetaData(m) = &token {
            meta = Some(m.clone());
        }
        tokens.push(token);
    }
    tokens
}

#[tokio::test]
async fn test_login_accepted() {
    let server = MockTdsServer::builder()
        .with_credentials("sa", "secret")
        .with_packet_size(8192)
        .build()
        .await
        .unwrap();
    let (_conn, tokens) = login(&server, "secret").await;

    let sizes: Vec<_> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::EnvChange(env) => env.packet_size().unwrap(),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![8192]);
    assert!(tokens.iter().any(|t| matches!(t, Token::LoginAck(ack) if ack.prog_name == "tdslink-mock")));
}

#[tokio::test]
async fn test_login_rejected() {
    let server = MockTdsServer::builder().with_credentials("sa", "secret").build().await.unwrap();
    let (_conn, tokens) = login(&server, "wrong").await;
    assert!(matches!(&tokens[0], Token::Error(msg) if msg.number == 18456));
    assert!(!tokens.iter().any(|t| matches!(t, Token::LoginAck(_))));
}

#[tokio::test]
async fn test_batches_are_recorded() {
    let server = MockTdsServer::builder()
        .with_response("SELECT 1", MockResponse::scalar(1i32))
        .build()
        .await
        .unwrap();
    let (mut conn, _) = login(&server, "any").await;

    conn.send_message(PacketType::SqlBatch, encode_sql_batch("SELECT 1", Some(0)))
        .await
        .unwrap();
    let tokens = read_tokens(&mut conn).await;
    assert!(matches!(&tokens[1], Token::Row(_)));

    assert_eq!(
        server.received_batches().await,
        vec![ReceivedBatch {
            sql: "SELECT 1".into(),
            transaction_descriptor: Some(0),
        }]
    );
}

#[tokio::test]
async fn test_transaction_envchanges() {
    let server = MockTdsServer::builder().with_table("dbo", "t", 0).build().await.unwrap();
    let (mut conn, _) = login(&server, "any").await;

    conn.send_message(PacketType::SqlBatch, encode_sql_batch("BEGIN TRANSACTION", Some(0)))
        .await
        .unwrap();
    let tokens = read_tokens(&mut conn).await;
    let Token::EnvChange(env) = &tokens[0] else {
        panic!("expected ENVCHANGE, got {:?}", tokens[0]);
    };
    let descriptor = env.begin_transaction_descriptor().unwrap().unwrap();
    assert_ne!(descriptor, 0);

    conn.send_message(
        PacketType::SqlBatch,
        encode_sql_batch("INSERT INTO t VALUES (1)", Some(descriptor)),
    )
    .await
    .unwrap();
    let tokens = read_tokens(&mut conn).await;
    assert_eq!(tokens[0].as_done().unwrap().rows_affected(), Some(1));
    assert_eq!(server.tables().committed_rows("t").await, Some(0));

    conn.send_message(PacketType::SqlBatch, encode_sql_batch("COMMIT TRANSACTION", Some(descriptor)))
        .await
        .unwrap();
    let tokens = read_tokens(&mut conn).await;
    assert!(matches!(&tokens[0], Token::EnvChange(env) if env.ends_transaction()));
    assert_eq!(server.tables().committed_rows("t").await, Some(1));
}

#[tokio::test]
async fn test_required_tls_refuses_cleartext_client() {
    let server = MockTdsServer::builder().with_tls_required().build().await.unwrap();
    assert!(server.certificate().is_some());

    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut conn = Connection::new(stream);
    let prelogin = PreLogin::new().with_encryption(EncryptionLevel::NotSupported);
    conn.send_message(PacketType::PreLogin, prelogin.encode()).await.unwrap();
    let answer = PreLogin::decode(conn.read_message().await.unwrap().payload).unwrap();
    assert_eq!(answer.encryption, EncryptionLevel::Required);
    assert!(conn.read_message().await.is_err());
}

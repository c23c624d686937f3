//! Mock TDS server for client tests.
//!
//! The server speaks enough of the protocol for a real client to connect:
//! PRELOGIN with optional TLS upgrade, LOGIN7 with credential checks, and
//! SQL batches answered from canned responses or the built-in
//! [`TableStore`](crate::tables::TableStore).
//!
//! ## Example
//!
//! ```rust,ignore
//! use tdslink_testing::{MockResponse, MockTdsServer};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let server = MockTdsServer::builder()
//!         .with_response("SELECT 1", MockResponse::scalar(1i32))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let addr = server.addr();
//!     // Connect your client to addr...
//! }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tdslink_codec::{CodecError, Connection, Message};
use tdslink_protocol::{
    Done, EncryptionLevel, EnvChange, EnvChangeType, Login7, LoginAck, PacketType, PreLogin,
    ServerVersion, SqlBatch, TdsVersion, TokenType,
};
use tdslink_tls::TlsPreloginWrapper;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio_rustls::TlsAcceptor;

use crate::error::{MockServerError, Result};
use crate::response::{MockResponse, server_message};
use crate::tables::{TableSession, TableStore};

/// Product version reported in PRELOGIN: 16.0.1000.
const SERVER_VERSION: u32 = 0x1000_03E8;

/// Byte stream after the optional TLS upgrade.
trait ServerIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ServerIo for T {}

/// A SQL batch as the server received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedBatch {
    /// Batch text.
    pub sql: String,
    /// Transaction descriptor from ALL_HEADERS, `None` if absent.
    pub transaction_descriptor: Option<u64>,
}

/// Server certificate and rustls configuration.
struct MockTls {
    config: Arc<ServerConfig>,
    certificate: CertificateDer<'static>,
    required: bool,
}

impl MockTls {
    /// Self-signed certificate for `localhost` and `127.0.0.1`.
    ///
    /// Only TLS 1.2 is offered. A TLS 1.3 server sends session tickets after
    /// its handshake completes, and those would arrive PRELOGIN-framed after
    /// the client has switched to raw records.
    fn generate(required: bool) -> Result<Self> {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .map_err(|e| MockServerError::Tls(e.to_string()))?;
        let certificate = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.signing_key.serialize_der()));
        let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_protocol_versions(&[&rustls::version::TLS12])
            .map_err(|e| MockServerError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], key)
            .map_err(|e| MockServerError::Tls(e.to_string()))?;
        Ok(Self {
            config: Arc::new(config),
            certificate,
            required,
        })
    }

    /// PRELOGIN answer to a client advertising `client`.
    fn answer(&self, client: EncryptionLevel) -> EncryptionLevel {
        match client {
            _ if self.required => EncryptionLevel::Required,
            EncryptionLevel::NotSupported => EncryptionLevel::NotSupported,
            _ => EncryptionLevel::On,
        }
    }
}

/// Configuration for the mock TDS server.
pub struct MockServerConfig {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    server_name: String,
    tds_version: TdsVersion,
    database: String,
    credentials: Option<(String, String)>,
    packet_size: Option<u32>,
    login_response: Option<Bytes>,
    tls: Option<MockTls>,
    tables: Vec<(String, String, u64)>,
}

/// Builder for [`MockTdsServer`].
pub struct MockServerBuilder {
    config: MockServerConfig,
    tls: Option<bool>,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockServerConfig {
                responses: HashMap::new(),
                default_response: MockResponse::empty(),
                server_name: "tdslink-mock".to_string(),
                tds_version: TdsVersion::V7_4,
                database: "master".to_string(),
                credentials: None,
                packet_size: None,
                login_response: None,
                tls: None,
                tables: Vec::new(),
            },
            tls: None,
        }
    }

    /// Answer a batch whose trimmed text equals `sql`.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(sql.into().trim().to_string(), response);
        self
    }

    /// Response for batches nothing else answers.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Program name reported in LOGINACK.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Database reported at login when the client names none.
    #[must_use]
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Highest TDS version the server speaks.
    ///
    /// LOGINACK carries the lower of this and the client's version, and
    /// every later DONE token uses that version's layout.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.config.tds_version = version;
        self
    }

    /// Reject logins that do not use these credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Packet size announced in the login ENVCHANGE. Defaults to the size
    /// the client requested.
    #[must_use]
    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.config.packet_size = Some(size);
        self
    }

    /// Answer LOGIN7 with these tokens instead of the normal response.
    #[must_use]
    pub fn with_login_response(mut self, tokens: Bytes) -> Self {
        self.config.login_response = Some(tokens);
        self
    }

    /// Offer TLS with a self-signed certificate.
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.tls = Some(false);
        self
    }

    /// Require TLS: PRELOGIN always answers REQ.
    #[must_use]
    pub fn with_tls_required(mut self) -> Self {
        self.tls = Some(true);
        self
    }

    /// Seed a table with `rows` committed rows.
    #[must_use]
    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>, rows: u64) -> Self {
        self.config.tables.push((schema.into(), table.into(), rows));
        self
    }

    /// Build and start the mock server.
    pub async fn build(mut self) -> Result<MockTdsServer> {
        if let Some(required) = self.tls {
            self.config.tls = Some(MockTls::generate(required)?);
        }
        MockTdsServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    config: MockServerConfig,
    store: Arc<TableStore>,
    batches: Mutex<Vec<ReceivedBatch>>,
    connection_count: Mutex<usize>,
}

/// A mock TDS server for testing.
///
/// Stops accepting connections when dropped.
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available loopback port.
    pub async fn start(mut config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        let store = Arc::new(TableStore::new());
        for (schema, table, rows) in config.tables.drain(..) {
            store.create(&schema, &table, rows).await;
        }
        let shared = Arc::new(Shared {
            config,
            store,
            batches: Mutex::new(Vec::new()),
            connection_count: Mutex::new(0),
        });

        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let shared = Arc::clone(&accept_shared);
                                tokio::spawn(async move {
                                    *shared.connection_count.lock().await += 1;
                                    tracing::debug!(%peer, "mock connection accepted");
                                    if let Err(e) = handle_connection(stream, &shared).await {
                                        tracing::debug!(error = %e, "mock connection failed");
                                    }
                                    let mut count = shared.connection_count.lock().await;
                                    *count = count.saturating_sub(1);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "accept failed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        tracing::debug!(%addr, "mock server listening");
        Ok(Self {
            addr,
            shutdown_tx,
            shared,
        })
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Self-signed certificate, when TLS is enabled.
    pub fn certificate(&self) -> Option<CertificateDer<'static>> {
        self.shared.config.tls.as_ref().map(|tls| tls.certificate.clone())
    }

    /// The server's table store.
    pub fn tables(&self) -> &Arc<TableStore> {
        &self.shared.store
    }

    /// Every SQL batch received so far, across all connections.
    pub async fn received_batches(&self) -> Vec<ReceivedBatch> {
        self.shared.batches.lock().await.clone()
    }

    /// Get the current connection count.
    pub async fn connection_count(&self) -> usize {
        *self.shared.connection_count.lock().await
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MockTdsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTdsServer")
            .field("addr", &self.addr)
            .field("tls", &self.shared.config.tls.is_some())
            .finish_non_exhaustive()
    }
}

fn expect_type(message: &Message, expected: PacketType) -> Result<()> {
    if message.packet_type != expected {
        return Err(MockServerError::Protocol(format!(
            "expected {expected:?}, got {:?}",
            message.packet_type
        )));
    }
    Ok(())
}

/// Handle a single client connection.
async fn handle_connection(stream: TcpStream, shared: &Shared) -> Result<()> {
    let config = &shared.config;

    let mut conn = Connection::new(stream);
    let request = conn.read_message().await?;
    expect_type(&request, PacketType::PreLogin)?;
    let prelogin = PreLogin::decode(request.payload)?;
    let answer = config
        .tls
        .as_ref()
        .map_or(EncryptionLevel::NotSupported, |tls| tls.answer(prelogin.encryption));
    let response = PreLogin::new()
        .with_encryption(answer)
        .with_server_version(ServerVersion::from_raw(SERVER_VERSION, 0));
    conn.send_message(PacketType::TabularResult, response.encode()).await?;
    tracing::debug!(client = ?prelogin.encryption, server = ?answer, "prelogin answered");

    let stream = conn.into_inner()?;
    let io: Box<dyn ServerIo> = match &config.tls {
        Some(tls) if answer.selects_encryption() && prelogin.encryption.selects_encryption() => {
            let mut tls_stream = TlsAcceptor::from(Arc::clone(&tls.config))
                .accept(TlsPreloginWrapper::new(stream))
                .await?;
            tls_stream.get_mut().0.handshake_complete();
            tracing::debug!("tls established");
            Box::new(tls_stream)
        }
        // The client is expected to hang up after a REQ it cannot honor.
        _ if answer == EncryptionLevel::Required => return Ok(()),
        _ => Box::new(stream),
    };
    let mut conn = Connection::new(io);

    let request = conn.read_message().await?;
    expect_type(&request, PacketType::Tds7Login)?;
    let login = Login7::decode(&request.payload)?;
    let version = login.tds_version.min(config.tds_version);
    if let Some(tokens) = &config.login_response {
        conn.send_message(PacketType::TabularResult, tokens.clone()).await?;
        return Ok(());
    }
    if let Some((username, password)) = &config.credentials {
        if login.username != *username || login.password != *password {
            tracing::debug!(username = %login.username, "login rejected");
            let mut tokens = BytesMut::new();
            server_message(18456, 14, &format!("Login failed for user '{}'.", login.username))
                .encode_as(TokenType::Error, &mut tokens);
            Done::new(None)
                .with_error()
                .encode_for(TokenType::Done, version, &mut tokens);
            conn.send_message(PacketType::TabularResult, tokens.freeze()).await?;
            return Ok(());
        }
    }

    let packet_size = config.packet_size.unwrap_or(login.packet_size);
    let database = if login.database.is_empty() {
        config.database.clone()
    } else {
        login.database.clone()
    };
    let mut tokens = BytesMut::new();
    EnvChange::text(EnvChangeType::Database, database, "master").encode(&mut tokens);
    EnvChange::text(
        EnvChangeType::PacketSize,
        packet_size.to_string(),
        login.packet_size.to_string(),
    )
    .encode(&mut tokens);
    LoginAck {
        interface: 1,
        tds_version: version,
        prog_name: config.server_name.clone(),
        prog_version: [16, 0, 3, 232],
    }
    .encode(&mut tokens);
    Done::new(None).encode_for(TokenType::Done, version, &mut tokens);
    conn.send_message(PacketType::TabularResult, tokens.freeze()).await?;
    conn.set_packet_size(packet_size as usize)?;
    tracing::debug!(username = %login.username, packet_size, "login accepted");

    let mut tables = TableSession::new(Arc::clone(&shared.store));
    loop {
        let request = match conn.read_message().await {
            Ok(message) => message,
            Err(CodecError::ConnectionClosed) => break,
            Err(e) => return Err(e.into()),
        };
        expect_type(&request, PacketType::SqlBatch)?;
        let batch = SqlBatch::decode(&request.payload)?;
        let descriptor = batch.headers.map(|h| h.transaction_descriptor);
        tracing::debug!(sql = %batch.sql, ?descriptor, "batch received");
        shared.batches.lock().await.push(ReceivedBatch {
            sql: batch.sql.clone(),
            transaction_descriptor: descriptor,
        });

        let mut response = match config.responses.get(batch.sql.trim()) {
            Some(response) => response.clone(),
            None => match tables.execute(&batch.sql, descriptor).await {
                Some(response) => response,
                None => config.default_response.clone(),
            },
        };
        loop {
            match response {
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
                MockResponse::Custom(f) => response = f(&batch.sql),
                MockResponse::Hang => {
                    // Swallow anything else the client sends until it leaves.
                    while conn.read_message().await.is_ok() {}
                    return Ok(());
                }
                MockResponse::Disconnect => return Ok(()),
                other => {
                    let tokens = other.encode_for(&batch.sql, version)?;
                    conn.send_message(PacketType::TabularResult, tokens).await?;
                    break;
                }
            }
        }
    }
    Ok(())
}

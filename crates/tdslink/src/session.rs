//! A single authenticated connection to the server.

use std::time::Duration;

use bytes::Bytes;
use tdslink_codec::{Connection, Message};
use tdslink_protocol::{
    ColMetaData, Done, EnvChange, LoginAck, PacketType, ProtocolError, ServerVersion, TdsVersion, Token,
    TokenParser, encode_sql_batch,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::catalog::{CATALOG_QUERY, CatalogEntry};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::CatalogVisibilityFilter;
use crate::handshake::negotiate;
use crate::result::BatchResult;
use crate::row::Row;
use crate::state::SessionState;
use crate::transport::Transport;

/// Read position inside an unfinished response.
struct PendingResponse {
    parser: TokenParser,
    metadata: Option<ColMetaData>,
    finished: bool,
}

impl PendingResponse {
    fn new() -> Self {
        Self {
            parser: TokenParser::new(Bytes::new()),
            metadata: None,
            finished: false,
        }
    }
}

/// What [`Session::drain`] saw of the discarded tokens.
#[derive(Debug, Default)]
pub(crate) struct Drained {
    pub(crate) first_done: Option<Done>,
    pub(crate) rows_affected: u64,
}

enum Step {
    Token(Token),
    NeedMessage,
    End,
    Failed(ProtocolError),
}

/// An authenticated session.
///
/// A session owns its connection and serves one request at a time: every
/// operation takes `&mut self` and a [`BatchResult`] keeps the session
/// borrowed until it is dropped. Sessions cannot be cloned.
///
/// After a fatal error (protocol violation, transport failure, timeout) the
/// session is poisoned and every later request fails with
/// [`Error::SessionPoisoned`]; reconnect to continue.
pub struct Session<S = TcpStream> {
    connection: Connection<Transport<S>>,
    state: SessionState,
    tds_version: TdsVersion,
    login_ack: LoginAck,
    server_version: Option<ServerVersion>,
    encrypted: bool,
    command_timeout: Duration,
    response: Option<PendingResponse>,
    poisoned: bool,
}

impl Session<TcpStream> {
    /// Open a TCP connection and run the handshake.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = ?config.database,
            "connecting to server"
        );

        let addr = format!("{}:{}", config.host, config.port);
        let stream = timeout(config.timeouts.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(|e| Error::Connect(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;

        Self::connect_with_stream(stream, config).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over an already open stream.
    ///
    /// The configuration is validated before anything is written.
    pub async fn connect_with_stream(stream: S, config: Config) -> Result<Self> {
        config.validate()?;
        let (connection, negotiator) = timeout(config.timeouts.login_timeout, negotiate(stream, &config))
            .await
            .map_err(|_| Error::ConnectTimeout)??;

        let login_ack = negotiator.login_ack().cloned().ok_or_else(|| {
            Error::Protocol(ProtocolError::InvalidField {
                field: "login response",
                reason: "handshake finished without LOGINACK".into(),
            })
        })?;
        let encrypted = negotiator.is_encrypted();
        let server_version = negotiator.server_version();
        let state = negotiator.into_session_state();

        tracing::info!(
            host = %config.host,
            tds_version = %login_ack.tds_version,
            packet_size = state.packet_size,
            encrypted,
            "connected"
        );

        Ok(Self {
            connection,
            tds_version: login_ack.tds_version,
            state,
            login_ack,
            server_version,
            encrypted,
            command_timeout: config.timeouts.command_timeout,
            response: None,
            poisoned: false,
        })
    }

    /// Send a SQL batch and position on its first result set.
    ///
    /// An ERROR token ahead of the first result set fails the call with
    /// [`Error::Server`]; the session stays usable unless the severity
    /// terminated the connection.
    pub async fn execute_batch(&mut self, sql: &str) -> Result<BatchResult<'_, S>> {
        self.send_batch(sql).await?;
        BatchResult::start(self).await
    }

    /// Run a batch to completion and return the rows affected.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.execute_batch(sql).await?.finish().await
    }

    /// Run a batch and collect the rows of its first result set.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.execute_batch(sql).await?.collect_rows().await
    }

    /// Send `BEGIN TRANSACTION`.
    ///
    /// The descriptor comes from the server's ENVCHANGE; the client does not
    /// assume the transaction started.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        tracing::debug!("beginning transaction");
        self.execute("BEGIN TRANSACTION").await?;
        Ok(())
    }

    /// Send `COMMIT TRANSACTION`.
    pub async fn commit(&mut self) -> Result<()> {
        tracing::debug!("committing transaction");
        self.execute("COMMIT TRANSACTION").await?;
        Ok(())
    }

    /// Send `ROLLBACK TRANSACTION`.
    pub async fn rollback(&mut self) -> Result<()> {
        tracing::debug!("rolling back transaction");
        self.execute("ROLLBACK TRANSACTION").await?;
        Ok(())
    }

    /// List the tables visible through `filter`.
    ///
    /// The filter is evaluated once per object during this pass.
    pub async fn discover_tables(&mut self, filter: &CatalogVisibilityFilter) -> Result<Vec<CatalogEntry>> {
        let rows = self.query(CATALOG_QUERY).await?;
        let total = rows.len();
        let mut entries = Vec::new();
        for row in rows {
            let entry = CatalogEntry::from_row(&row)?;
            if filter.is_visible(&entry.schema, &entry.table) {
                entries.push(entry);
            }
        }
        tracing::debug!(total, visible = entries.len(), "catalog discovery finished");
        Ok(entries)
    }

    /// Shut the connection down.
    pub async fn close(mut self) -> Result<()> {
        tracing::debug!("closing connection");
        self.connection.get_mut().shutdown().await?;
        Ok(())
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> u32 {
        self.state.packet_size
    }

    /// TDS version acknowledged by the server.
    #[must_use]
    pub fn tds_version(&self) -> TdsVersion {
        self.tds_version
    }

    /// Whether TLS is installed.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Transaction descriptor sent with the next batch.
    ///
    /// `Some(0)` is autocommit; `None` means ALL_HEADERS is omitted.
    #[must_use]
    pub fn transaction_descriptor(&self) -> Option<u64> {
        self.state.transaction_descriptor
    }

    /// Whether the server reported an open transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.in_transaction()
    }

    /// The server's LOGINACK.
    #[must_use]
    pub fn login_ack(&self) -> &LoginAck {
        &self.login_ack
    }

    /// Server product version from PRELOGIN.
    #[must_use]
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server_version
    }

    /// Current database as last reported by the server.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.state.database.as_deref()
    }

    /// Session language as last reported by the server.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.state.language.as_deref()
    }

    /// Whether a fatal error made the session unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    async fn send_batch(&mut self, sql: &str) -> Result<()> {
        if self.poisoned {
            return Err(Error::SessionPoisoned);
        }
        self.drain().await?;

        tracing::debug!(
            sql_len = sql.len(),
            descriptor = ?self.state.transaction_descriptor,
            "executing batch"
        );
        let payload = encode_sql_batch(sql, self.state.transaction_descriptor);
        match timeout(
            self.command_timeout,
            self.connection.send_message(PacketType::SqlBatch, payload),
        )
        .await
        {
            Err(_) => return Err(self.poison(Error::CommandTimeout)),
            Ok(Err(e)) => return Err(self.poison(e.into())),
            Ok(Ok(())) => {}
        }
        self.response = Some(PendingResponse::new());
        Ok(())
    }

    /// Read and discard whatever is left of the previous response.
    ///
    /// DONE tokens are still accounted for in the returned summary.
    pub(crate) async fn drain(&mut self) -> Result<Drained> {
        if self.response.is_some() {
            tracing::debug!("draining unfinished response");
        }
        let mut drained = Drained::default();
        while let Some(token) = self.next_token().await? {
            match token {
                Token::Error(msg) => {
                    tracing::debug!(number = msg.number, message = %msg.message, "discarding server error");
                }
                Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                    drained.rows_affected += done.rows_affected().unwrap_or(0);
                    drained.first_done.get_or_insert(done);
                }
                _ => {}
            }
        }
        Ok(drained)
    }

    /// Next token of the current response, pulling further messages as
    /// needed. `None` once the final DONE has been consumed.
    pub(crate) async fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            let step = match self.response.as_mut() {
                None => return Ok(None),
                Some(pending) => match pending.parser.next_token(pending.metadata.as_ref()) {
                    Ok(Some(token)) => {
                        match &token {
                            Token::ColMetaData(meta) => pending.metadata = Some(meta.clone()),
                            Token::Done(done) | Token::DoneProc(done) if !done.has_more() => {
                                pending.finished = true;
                            }
                            _ => {}
                        }
                        Step::Token(token)
                    }
                    Ok(None) if pending.finished => Step::End,
                    Ok(None) => Step::NeedMessage,
                    Err(e) => Step::Failed(e),
                },
            };

            match step {
                Step::Token(token) => {
                    if let Token::EnvChange(ref env) = token {
                        self.apply_env_change(env)?;
                    }
                    return Ok(Some(token));
                }
                Step::End => {
                    self.response = None;
                    return Ok(None);
                }
                Step::NeedMessage => {
                    let message = self.receive().await?;
                    if let Some(pending) = self.response.as_mut() {
                        pending.parser = TokenParser::with_version(message.payload, self.tds_version);
                    }
                }
                Step::Failed(e) => return Err(self.poison(e.into())),
            }
        }
    }

    async fn receive(&mut self) -> Result<Message> {
        let message = match timeout(self.command_timeout, self.connection.read_message()).await {
            Err(_) => return Err(self.poison(Error::CommandTimeout)),
            Ok(Err(e)) => return Err(self.poison(e.into())),
            Ok(Ok(message)) => message,
        };
        if message.packet_type != PacketType::TabularResult {
            let err = ProtocolError::InvalidPacketType(message.packet_type as u8);
            return Err(self.poison(err.into()));
        }
        tracing::trace!(len = message.payload.len(), packets = message.packet_count, "response message");
        Ok(message)
    }

    fn apply_env_change(&mut self, env: &EnvChange) -> Result<()> {
        if let Err(e) = self.state.apply(env) {
            return Err(self.poison(e));
        }
        let size = self.state.packet_size as usize;
        if size != self.connection.packet_size() {
            if let Err(e) = self.connection.set_packet_size(size) {
                return Err(self.poison(e.into()));
            }
        }
        Ok(())
    }

    /// Mark the session unusable if `error` is fatal, then hand it back.
    pub(crate) fn poison(&mut self, error: Error) -> Error {
        if error.is_fatal() && !self.poisoned {
            tracing::warn!(error = %error, "session poisoned");
            self.poisoned = true;
            self.response = None;
        }
        error
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tds_version", &self.tds_version)
            .field("packet_size", &self.state.packet_size)
            .field("encrypted", &self.encrypted)
            .field("transaction_descriptor", &self.state.transaction_descriptor)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

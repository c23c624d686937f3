//! Connection setup: PRELOGIN, optional TLS upgrade and LOGIN7.
//!
//! [`HandshakeNegotiator`] is a pure state machine. It builds the messages
//! to send and interprets the replies but never touches a socket, so every
//! transition can be driven from tests with hand-made payloads.
//! [`negotiate`] runs it over a real transport.
//!
//! ```text
//! Idle ──PRELOGIN──▶ PreloginSent ──┬─ server selects TLS ──▶ EncryptionNegotiated ──┐
//!                                   └─ otherwise ───────────▶ Unencrypted ───────────┤
//!                                                                                    ▼
//!                                       Authenticated ◀── LOGINACK ── Login7Sent ◀── LOGIN7
//!                                       Failed        ◀── ERROR / neither
//! ```

use bytes::Bytes;
use tdslink_codec::Connection;
use tdslink_protocol::{
    EncryptionLevel, Login7, LoginAck, PacketType, PreLogin, ProtocolError, ServerVersion, TdsVersion,
    Token, TokenParser,
};
use tdslink_tls::TlsConnector;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::config::{Config, EncryptionMode};
use crate::error::{Error, Result};
use crate::state::SessionState;
use crate::transport::Transport;

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet.
    Idle,
    /// PRELOGIN sent, waiting for the server's answer.
    PreloginSent,
    /// Both sides agreed to encrypt; TLS must be installed before LOGIN7.
    EncryptionNegotiated,
    /// The session continues in cleartext.
    Unencrypted,
    /// LOGIN7 sent, waiting for LOGINACK.
    Login7Sent,
    /// Login acknowledged.
    Authenticated,
    /// Handshake failed.
    Failed,
}

impl HandshakeState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Authenticated | Self::Failed)
    }
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct HandshakeNegotiator {
    state: HandshakeState,
    encryption: EncryptionMode,
    requested_version: TdsVersion,
    session: SessionState,
    server_version: Option<ServerVersion>,
    login_ack: Option<LoginAck>,
    encrypted: bool,
}

impl HandshakeNegotiator {
    /// Start a handshake with the given policy.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            state: HandshakeState::Idle,
            encryption: config.encryption,
            requested_version: config.tds_version,
            session: SessionState::new(config.packet_size, config.tds_version),
            server_version: None,
            login_ack: None,
            encrypted: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Build the PRELOGIN request. `Idle → PreloginSent`.
    pub fn prelogin(&mut self) -> Result<PreLogin> {
        self.expect(&[HandshakeState::Idle], "send PRELOGIN")?;

        let level = match self.encryption {
            EncryptionMode::Disabled => EncryptionLevel::NotSupported,
            EncryptionMode::Preferred | EncryptionMode::Required => EncryptionLevel::On,
        };
        self.transition(HandshakeState::PreloginSent);
        tracing::debug!(encryption = ?level, version = %self.requested_version, "sending PRELOGIN");

        Ok(PreLogin::new()
            .with_version(self.requested_version)
            .with_encryption(level))
    }

    /// Interpret the PRELOGIN response.
    ///
    /// Returns `true` when TLS must be installed before anything else is
    /// sent. `PreloginSent → EncryptionNegotiated | Unencrypted`.
    pub fn on_prelogin_response(&mut self, response: &PreLogin) -> Result<bool> {
        self.expect(&[HandshakeState::PreloginSent], "process PRELOGIN response")?;
        self.server_version = response.server_version;

        let server = response.encryption;
        tracing::debug!(
            encryption = ?server,
            server_version = ?response.server_version,
            "PRELOGIN response received"
        );

        let encrypt = match (self.encryption, server.selects_encryption()) {
            (EncryptionMode::Disabled, true) => {
                return Err(self.fail(Error::Connect(format!(
                    "server requires encryption ({server:?}) but encryption is disabled"
                ))));
            }
            (EncryptionMode::Required, false) => {
                return Err(self.fail(Error::Connect(format!(
                    "encryption required but server answered {server:?}"
                ))));
            }
            (_, selects) => selects,
        };

        if encrypt {
            self.encrypted = true;
            self.transition(HandshakeState::EncryptionNegotiated);
        } else {
            tracing::warn!("server did not agree to encryption; session will be UNENCRYPTED");
            self.transition(HandshakeState::Unencrypted);
        }
        Ok(encrypt)
    }

    /// Build the LOGIN7 request. `EncryptionNegotiated | Unencrypted → Login7Sent`.
    pub fn login7(&mut self, config: &Config) -> Result<Login7> {
        self.expect(
            &[HandshakeState::EncryptionNegotiated, HandshakeState::Unencrypted],
            "send LOGIN7",
        )?;

        let mut login = Login7::new()
            .with_tds_version(config.tds_version)
            .with_sql_auth(&config.credentials.username, &config.credentials.password)
            .with_hostname(&config.hostname)
            .with_app_name(&config.application_name)
            .with_server_name(&config.host)
            .with_packet_size(config.packet_size);
        if let Some(ref database) = config.database {
            login = login.with_database(database);
        }

        self.transition(HandshakeState::Login7Sent);
        Ok(login)
    }

    /// Interpret the token stream answering LOGIN7.
    ///
    /// ENVCHANGE tokens are applied as they are read. `Login7Sent →
    /// Authenticated | Failed`.
    pub fn on_login_response(&mut self, payload: Bytes) -> Result<()> {
        self.expect(&[HandshakeState::Login7Sent], "process login response")?;

        // Until LOGINACK names the negotiated version, DONE tokens are read
        // in the layout of the version we asked for.
        let mut parser = TokenParser::with_version(payload, self.requested_version);
        let mut error = None;
        loop {
            let token = match parser.next_token(None) {
                Ok(Some(token)) => token,
                Ok(None) => break,
                // A rejecting server may answer in an older layout; the
                // ERROR already read is the outcome.
                Err(_) if error.is_some() => break,
                Err(e) => return Err(self.fail(e.into())),
            };
            match token {
                Token::LoginAck(ack) => {
                    tracing::info!(
                        server = %ack.prog_name,
                        tds_version = %ack.tds_version,
                        "login acknowledged"
                    );
                    self.session.set_tds_version(ack.tds_version);
                    self.login_ack = Some(ack);
                }
                Token::Error(msg) => {
                    tracing::debug!(number = msg.number, message = %msg.message, "login error");
                    error.get_or_insert(msg);
                }
                Token::Info(msg) => {
                    tracing::debug!(number = msg.number, message = %msg.message, "login info");
                }
                Token::EnvChange(env) => {
                    if let Err(e) = self.session.apply(&env) {
                        return Err(self.fail(e));
                    }
                }
                _ => {}
            }
        }

        if let Some(msg) = error {
            return Err(self.fail(Error::Authentication {
                number: msg.number,
                message: msg.message,
            }));
        }
        if self.login_ack.is_none() {
            return Err(self.fail(Error::Protocol(ProtocolError::InvalidField {
                field: "login response",
                reason: "neither LOGINACK nor ERROR received".into(),
            })));
        }

        self.transition(HandshakeState::Authenticated);
        Ok(())
    }

    /// Packet size after any server change.
    #[must_use]
    pub fn packet_size(&self) -> u32 {
        self.session.packet_size
    }

    /// The LOGINACK, once authenticated.
    #[must_use]
    pub fn login_ack(&self) -> Option<&LoginAck> {
        self.login_ack.as_ref()
    }

    /// Server product version from PRELOGIN.
    #[must_use]
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server_version
    }

    /// Database named by the server during login.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.session.database.as_deref()
    }

    /// Transaction context in effect after login.
    #[must_use]
    pub fn transaction_descriptor(&self) -> Option<u64> {
        self.session.transaction_descriptor
    }

    /// Whether TLS was negotiated.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub(crate) fn into_session_state(self) -> SessionState {
        self.session
    }

    fn expect(&mut self, allowed: &[HandshakeState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let state = self.state;
        Err(self.fail(Error::Protocol(ProtocolError::InvalidField {
            field: "handshake state",
            reason: format!("cannot {action} in state {state:?}"),
        })))
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!(from = ?self.state, to = ?next, "handshake transition");
        self.state = next;
    }

    fn fail(&mut self, error: Error) -> Error {
        self.transition(HandshakeState::Failed);
        error
    }
}

/// Run the handshake over `stream`.
///
/// On success the returned connection is framed with the negotiated packet
/// size and carries TLS if it was negotiated.
pub async fn negotiate<S>(stream: S, config: &Config) -> Result<(Connection<Transport<S>>, HandshakeNegotiator)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut negotiator = HandshakeNegotiator::new(config);
    let mut connection = Connection::new(Transport::Plain(stream));

    let prelogin = negotiator.prelogin()?;
    connection.send_message(PacketType::PreLogin, prelogin.encode()).await?;

    let response = connection.read_message().await?;
    expect_tabular(response.packet_type)?;
    let response = PreLogin::decode(response.payload)?;

    if negotiator.on_prelogin_response(&response)? {
        let Transport::Plain(stream) = connection.into_inner()? else {
            return Err(Error::Connect("TLS is already installed".into()));
        };
        let connector = TlsConnector::new(config.effective_tls())?;
        let tls = timeout(
            config.timeouts.tls_timeout,
            connector.connect_with_prelogin(stream, &config.host),
        )
        .await
        .map_err(|_| Error::ConnectTimeout)??;
        connection = Connection::new(Transport::Tls(Box::new(tls)));
    }

    let login = negotiator.login7(config)?;
    tracing::debug!(
        username = %config.credentials.username,
        encrypted = connection.get_ref().is_encrypted(),
        "sending LOGIN7"
    );
    connection.send_message(PacketType::Tds7Login, login.encode()).await?;

    let response = connection.read_message().await?;
    expect_tabular(response.packet_type)?;
    negotiator.on_login_response(response.payload)?;

    connection.set_packet_size(negotiator.packet_size() as usize)?;
    Ok((connection, negotiator))
}

fn expect_tabular(packet_type: PacketType) -> Result<()> {
    if packet_type == PacketType::TabularResult {
        Ok(())
    } else {
        Err(Error::Protocol(ProtocolError::InvalidPacketType(packet_type as u8)))
    }
}

//! Session configuration.

use std::time::Duration;

use tdslink_protocol::{MAX_PACKET_SIZE, MIN_PACKET_SIZE, TdsVersion};
use tdslink_tls::TlsConfig;

use crate::error::{Error, Result};

/// Encryption policy for the session.
///
/// The PRELOGIN exchange decides whether TLS is installed; this policy
/// decides what the client advertises and which server answers it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMode {
    /// Never encrypt. Fails if the server requires encryption.
    Disabled,
    /// Encrypt when the server agrees, otherwise continue in cleartext.
    #[default]
    Preferred,
    /// Encrypt or fail.
    Required,
}

/// SQL Server login credentials.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password, sent obfuscated in LOGIN7.
    pub password: String,
}

impl Credentials {
    /// SQL Server authentication credentials.
    pub fn sql_server(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Timeouts for the phases of a session.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Time to establish the TCP connection (default: 15s).
    pub connect_timeout: Duration,
    /// Time to complete the TLS handshake (default: 10s).
    pub tls_timeout: Duration,
    /// Time to complete PRELOGIN and LOGIN7 (default: 30s).
    pub login_timeout: Duration,
    /// Time to wait for each response message of a batch (default: 30s).
    pub command_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            tls_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the TLS handshake timeout.
    #[must_use]
    pub fn tls_timeout(mut self, timeout: Duration) -> Self {
        self.tls_timeout = timeout;
        self
    }

    /// Set the login timeout.
    #[must_use]
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Set the per-response command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Initial database.
    pub database: Option<String>,
    /// Login credentials.
    pub credentials: Credentials,
    /// Application name reported to the server.
    pub application_name: String,
    /// Workstation name sent in LOGIN7.
    pub hostname: String,
    /// Requested packet size; the server may answer with another one.
    pub packet_size: u32,
    /// Requested TDS version.
    pub tds_version: TdsVersion,
    /// Encryption policy.
    pub encryption: EncryptionMode,
    /// Accept any server certificate.
    pub trust_server_certificate: bool,
    /// TLS settings used when encryption is negotiated.
    pub tls: TlsConfig,
    /// Phase timeouts.
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1433,
            database: None,
            credentials: Credentials::default(),
            application_name: "tdslink".into(),
            hostname: String::new(),
            packet_size: 4096,
            tds_version: TdsVersion::V7_4,
            encryption: EncryptionMode::Preferred,
            trust_server_certificate: false,
            tls: TlsConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an ADO.NET-style connection string.
    ///
    /// ```rust
    /// use tdslink::{Config, EncryptionMode};
    ///
    /// let config = Config::from_connection_string(
    ///     "Server=db.example.com,1444;Database=sales;User Id=app;Password=secret;Encrypt=true",
    /// )
    /// .unwrap();
    /// assert_eq!(config.port, 1444);
    /// assert_eq!(config.encryption, EncryptionMode::Required);
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" => {
                    let value = value.strip_prefix("tcp:").unwrap_or(value);
                    if let Some((host, port)) = value.split_once(',') {
                        config.host = host.trim().to_string();
                        config.port = parse_number(port.trim(), "port")?;
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => config.port = parse_number(value, "port")?,
                "database" | "initial catalog" => {
                    config.database = (!value.is_empty()).then(|| value.to_string());
                }
                "user id" | "uid" | "user" => config.credentials.username = value.to_string(),
                "password" | "pwd" => config.credentials.password = value.to_string(),
                "application name" | "app" => config.application_name = value.to_string(),
                "workstation id" | "wsid" => config.hostname = value.to_string(),
                "encrypt" => config.encryption = parse_encrypt(value)?,
                "trustservercertificate" | "trust server certificate" => {
                    config.trust_server_certificate = parse_bool(value, "TrustServerCertificate")?;
                }
                "connect timeout" | "connection timeout" => {
                    config.timeouts.connect_timeout = Duration::from_secs(parse_number(value, "timeout")?);
                }
                "command timeout" => {
                    config.timeouts.command_timeout = Duration::from_secs(parse_number(value, "timeout")?);
                }
                "packet size" => config.packet_size = parse_number(value, "packet size")?,
                "tds version" | "tdsversion" => {
                    config.tds_version = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid TDS version: {value}")))?;
                }
                _ => {
                    tracing::debug!(key = key, "ignoring unknown connection string option");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set the encryption policy.
    #[must_use]
    pub fn encryption(mut self, mode: EncryptionMode) -> Self {
        self.encryption = mode;
        self
    }

    /// Accept any server certificate.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Set the TLS settings.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set the timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Check the configuration for values the protocol cannot carry.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        let size = self.packet_size as usize;
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(Error::Config(format!(
                "packet size {size} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}"
            )));
        }
        Ok(())
    }

    /// TLS settings with the certificate trust flag folded in.
    pub(crate) fn effective_tls(&self) -> TlsConfig {
        let trust = self.trust_server_certificate || self.tls.trust_server_certificate;
        self.tls.clone().trust_server_certificate(trust)
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value.parse().map_err(|_| Error::Config(format!("invalid {what}: {value}")))
}

fn parse_bool(value: &str, what: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid {what}: {value}"))),
    }
}

fn parse_encrypt(value: &str) -> Result<EncryptionMode> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "mandatory" => Ok(EncryptionMode::Required),
        "false" | "no" | "0" | "optional" => Ok(EncryptionMode::Preferred),
        "disabled" | "notsupported" => Ok(EncryptionMode::Disabled),
        _ => Err(Error::Config(format!("invalid Encrypt value: {value}"))),
    }
}

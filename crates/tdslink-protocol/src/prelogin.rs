//! PRELOGIN negotiation message.
//!
//! The payload starts with an option table of `(token, offset, length)`
//! entries, big-endian, terminated by `0xFF`. Offsets are relative to the
//! start of the payload and point into the data that follows the table.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::ensure_remaining;
use crate::error::ProtocolError;
use crate::version::{ServerVersion, TdsVersion};

/// Size of one option table entry.
const OPTION_ENTRY_SIZE: usize = 5;

/// PRELOGIN option tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name.
    Instance = 0x02,
    /// Client thread id.
    ThreadId = 0x03,
    /// Multiple active result sets.
    Mars = 0x04,
    /// Terminator.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Map a raw token, `None` for options this client does not interpret.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Version),
            0x01 => Some(Self::Encryption),
            0x02 => Some(Self::Instance),
            0x03 => Some(Self::ThreadId),
            0x04 => Some(Self::Mars),
            0xFF => Some(Self::Terminator),
            _ => None,
        }
    }
}

/// ENCRYPTION option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt login only.
    Off = 0x00,
    /// Encryption on.
    #[default]
    On = 0x01,
    /// Encryption not supported.
    NotSupported = 0x02,
    /// Encryption required.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Decode an ENCRYPTION option byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            other => Err(ProtocolError::InvalidField {
                field: "prelogin encryption",
                reason: format!("unknown value 0x{other:02X}"),
            }),
        }
    }

    /// Whether a server answering with this level expects a TLS session.
    #[must_use]
    pub const fn selects_encryption(self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// PRELOGIN message, used for both the request and the response.
///
/// In a request `version` is the TDS version the client wants; in a response
/// it is decoded into `server_version` instead.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreLogin {
    /// Requested TDS version.
    pub version: TdsVersion,
    /// Server product version (responses only).
    pub server_version: Option<ServerVersion>,
    /// Encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name.
    pub instance: Option<String>,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS requested or enabled.
    pub mars: bool,
}

impl PreLogin {
    /// Create a request for TDS 7.4 with encryption on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_version(mut self, version: TdsVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the server version; used when encoding a response.
    #[must_use]
    pub fn with_server_version(mut self, version: ServerVersion) -> Self {
        self.server_version = Some(version);
        self
    }

    /// Encode the message.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(PreLoginOption, Vec<u8>)> = Vec::with_capacity(5);

        let (raw_version, sub_build) = match self.server_version {
            Some(v) => (
                u32::from(v.major) << 24 | u32::from(v.minor) << 16 | u32::from(v.build),
                v.sub_build,
            ),
            None => (self.version.raw(), 0),
        };
        let mut version = raw_version.to_be_bytes().to_vec();
        version.extend_from_slice(&sub_build.to_le_bytes());
        options.push((PreLoginOption::Version, version));

        options.push((PreLoginOption::Encryption, vec![self.encryption as u8]));

        if let Some(instance) = &self.instance {
            let mut data = instance.as_bytes().to_vec();
            data.push(0);
            options.push((PreLoginOption::Instance, data));
        }
        if let Some(thread_id) = self.thread_id {
            options.push((PreLoginOption::ThreadId, thread_id.to_be_bytes().to_vec()));
        }
        options.push((PreLoginOption::Mars, vec![u8::from(self.mars)]));

        let header_size = options.len() * OPTION_ENTRY_SIZE + 1;
        let data_size: usize = options.iter().map(|(_, d)| d.len()).sum();
        let mut buf = BytesMut::with_capacity(header_size + data_size);

        let mut offset = header_size;
        for (option, data) in &options {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in &options {
            buf.put_slice(data);
        }

        buf.freeze()
    }

    /// Decode a PRELOGIN message.
    ///
    /// Options this client does not interpret are skipped. An entry pointing
    /// outside the payload is a protocol error.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        let mut entries = Vec::new();
        loop {
            ensure_remaining(&src, 1)?;
            let token = src.get_u8();
            if token == PreLoginOption::Terminator as u8 {
                break;
            }
            ensure_remaining(&src, 4)?;
            let offset = src.get_u16() as usize;
            let length = src.get_u16() as usize;
            entries.push((token, offset, length));
        }

        let header_size = entries.len() * OPTION_ENTRY_SIZE + 1;
        let data = src.copy_to_bytes(src.remaining());
        let mut prelogin = Self {
            encryption: EncryptionLevel::NotSupported,
            ..Self::default()
        };

        for (token, offset, length) in entries {
            let start = offset
                .checked_sub(header_size)
                .ok_or_else(|| ProtocolError::InvalidField {
                    field: "prelogin option offset",
                    reason: format!("offset {offset} points into the option table"),
                })?;
            let value = data
                .get(start..start + length)
                .ok_or(ProtocolError::UnexpectedEof)?;

            match PreLoginOption::from_u8(token) {
                Some(PreLoginOption::Version) if length >= 6 => {
                    let raw = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                    let sub_build = u16::from_le_bytes([value[4], value[5]]);
                    prelogin.version = TdsVersion::new(raw);
                    prelogin.server_version = Some(ServerVersion::from_raw(raw, sub_build));
                }
                Some(PreLoginOption::Encryption) if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(value[0])?;
                }
                Some(PreLoginOption::Instance) => {
                    let name = value.split(|b| *b == 0).next().unwrap_or_default();
                    if !name.is_empty() {
                        prelogin.instance = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
                Some(PreLoginOption::ThreadId) if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
                }
                Some(PreLoginOption::Mars) if length >= 1 => {
                    prelogin.mars = value[0] != 0;
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

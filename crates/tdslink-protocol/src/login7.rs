//! LOGIN7 authentication record.
//!
//! A 94-byte little-endian fixed header is followed by UTF-16LE strings. The
//! header addresses each string with an `(offset, length)` pair, offsets
//! counted from the start of the record and lengths in characters. Strings
//! are laid out back to back in header order, so offsets are cumulative.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{decode_utf16_le, ensure_remaining, utf16_len, write_utf16_string};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed LOGIN7 header.
pub const LOGIN7_HEADER_SIZE: usize = 94;

bitflags! {
    /// OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags1: u8 {
        /// Big-endian integers.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC characters.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on database change.
        const USE_DB_NOTIFY = 0x20;
        /// Initial database change failure is fatal.
        const DATABASE_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG_WARN = 0x80;
    }
}

bitflags! {
    /// OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags2: u8 {
        /// Initial language change failure is fatal.
        const LANGUAGE_FATAL = 0x01;
        /// ODBC client.
        const ODBC = 0x02;
        /// Integrated security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u8 {
        /// T-SQL dialect.
        const SQL_TSQL = 0x01;
        /// OLE DB client.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags3: u8 {
        /// Change password request.
        const CHANGE_PASSWORD = 0x01;
        /// User instance.
        const USER_INSTANCE = 0x02;
        /// Unknown collations are handled by the client.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// Feature extension block present.
        const EXTENSION = 0x10;
    }
}

/// Apply the LOGIN7 password transform: swap nibbles, then XOR with `0xA5`.
#[must_use]
pub fn obfuscate_password(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b.rotate_right(4) ^ 0xA5).collect()
}

/// Undo [`obfuscate_password`]: XOR with `0xA5`, then swap nibbles.
///
/// Applying the forward transform twice yields `b ^ 0xFF`, not `b`, so the
/// inverse has to run the two steps in the opposite order.
#[must_use]
pub fn deobfuscate_password(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| (b ^ 0xA5).rotate_left(4)).collect()
}

/// LOGIN7 record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Connection id.
    pub connection_id: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Option flags 3.
    pub option_flags3: OptionFlags3,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client locale id.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password, in clear text until encoded.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client MAC address, usually zero.
    pub client_id: [u8; 6],
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1::USE_DB_NOTIFY | OptionFlags1::DATABASE_FATAL,
            option_flags2: OptionFlags2::LANGUAGE_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("tdslink"),
            server_name: String::new(),
            library_name: String::from("tdslink"),
            language: String::new(),
            database: String::new(),
            client_id: [0; 6],
        }
    }
}

impl Login7 {
    /// Create a LOGIN7 record with default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set SQL login credentials.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client host name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the record, obfuscating the password.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut var_data = BytesMut::new();
        let mut offset = LOGIN7_HEADER_SIZE;
        let mut pairs: Vec<(u16, u16)> = Vec::with_capacity(9);

        let mut push_str = |var_data: &mut BytesMut, s: &str, obfuscate: bool| {
            let chars = utf16_len(s);
            pairs.push((offset as u16, chars as u16));
            if obfuscate {
                let mut clear = BytesMut::with_capacity(chars * 2);
                write_utf16_string(&mut clear, s);
                var_data.put_slice(&obfuscate_password(&clear));
            } else {
                write_utf16_string(var_data, s);
            }
            offset += chars * 2;
        };

        push_str(&mut var_data, &self.hostname, false);
        push_str(&mut var_data, &self.username, false);
        push_str(&mut var_data, &self.password, true);
        push_str(&mut var_data, &self.app_name, false);
        push_str(&mut var_data, &self.server_name, false);
        // extension slot, unused
        push_str(&mut var_data, "", false);
        push_str(&mut var_data, &self.library_name, false);
        push_str(&mut var_data, &self.language, false);
        push_str(&mut var_data, &self.database, false);

        // SSPI, attach-db file and new password are always empty
        let trailing_offset = offset as u16;
        let total_length = offset;

        let mut buf = BytesMut::with_capacity(total_length);
        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(self.option_flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);
        for (field_offset, field_len) in &pairs {
            buf.put_u16_le(*field_offset);
            buf.put_u16_le(*field_len);
        }
        buf.put_slice(&self.client_id);
        for _ in 0..3 {
            buf.put_u16_le(trailing_offset);
            buf.put_u16_le(0);
        }
        buf.put_u32_le(0);
        debug_assert_eq!(buf.len(), LOGIN7_HEADER_SIZE);

        buf.put_slice(&var_data);
        buf.freeze()
    }

    /// Decode a LOGIN7 record, de-obfuscating the password.
    ///
    /// Servers use this; a client never receives LOGIN7.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = payload;
        ensure_remaining(&src, LOGIN7_HEADER_SIZE)?;

        let total_length = src.get_u32_le() as usize;
        if total_length > payload.len() {
            return Err(ProtocolError::IncompletePacket {
                expected: total_length,
                actual: payload.len(),
            });
        }
        let tds_version = TdsVersion::new(src.get_u32_le());
        let packet_size = src.get_u32_le();
        let client_prog_version = src.get_u32_le();
        let client_pid = src.get_u32_le();
        let connection_id = src.get_u32_le();
        let option_flags1 = OptionFlags1::from_bits_retain(src.get_u8());
        let option_flags2 = OptionFlags2::from_bits_retain(src.get_u8());
        let type_flags = TypeFlags::from_bits_retain(src.get_u8());
        let option_flags3 = OptionFlags3::from_bits_retain(src.get_u8());
        let client_timezone = src.get_i32_le();
        let client_lcid = src.get_u32_le();

        let mut fields: [&[u8]; 9] = [&[]; 9];
        for field in &mut fields {
            let offset = src.get_u16_le() as usize;
            let chars = src.get_u16_le() as usize;
            *field = payload
                .get(offset..offset + chars * 2)
                .ok_or(ProtocolError::UnexpectedEof)?;
        }
        let mut client_id = [0u8; 6];
        src.copy_to_slice(&mut client_id);

        let text = |bytes: &[u8], name| decode_utf16_le(bytes, name);
        let password_bytes = deobfuscate_password(fields[2]);

        Ok(Self {
            tds_version,
            packet_size,
            client_prog_version,
            client_pid,
            connection_id,
            option_flags1,
            option_flags2,
            type_flags,
            option_flags3,
            client_timezone,
            client_lcid,
            hostname: text(fields[0], "hostname")?,
            username: text(fields[1], "username")?,
            password: text(&password_bytes, "password")?,
            app_name: text(fields[3], "app name")?,
            server_name: text(fields[4], "server name")?,
            library_name: text(fields[6], "library name")?,
            language: text(fields[7], "language")?,
            database: text(fields[8], "database")?,
            client_id,
        })
    }
}

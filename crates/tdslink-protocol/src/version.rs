//! TDS protocol and server product versions.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// TDS protocol version.
///
/// The raw value is the one carried in LOGIN7 and LOGINACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.1 (SQL Server 2000).
    pub const V7_1: Self = Self(0x7100_0001);

    /// TDS 7.2 (SQL Server 2005).
    pub const V7_2: Self = Self(0x7209_0002);

    /// TDS 7.3A (SQL Server 2008).
    pub const V7_3A: Self = Self(0x730A_0003);

    /// TDS 7.3B (SQL Server 2008 R2).
    pub const V7_3B: Self = Self(0x730B_0003);

    /// TDS 7.4 (SQL Server 2012+).
    pub const V7_4: Self = Self(0x7400_0004);

    /// Create a version from its raw value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Major protocol number (7).
    #[must_use]
    pub const fn major(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// Minor protocol number.
    #[must_use]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 24) & 0x0F) as u8
    }

    /// SQL batches must carry the ALL_HEADERS preamble from TDS 7.2 on.
    #[must_use]
    pub const fn requires_all_headers(self) -> bool {
        self.0 >= Self::V7_2.0
    }

    /// DONE-family tokens carry a 64-bit row count from TDS 7.2 on.
    #[must_use]
    pub const fn has_wide_row_count(self) -> bool {
        self.0 >= Self::V7_2.0
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V7_3A => write!(f, "7.3A"),
            Self::V7_3B => write!(f, "7.3B"),
            other => write!(f, "{}.{}", other.major(), other.minor()),
        }
    }
}

impl FromStr for TdsVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "7.1" => Ok(Self::V7_1),
            "7.2" => Ok(Self::V7_2),
            "7.3" | "7.3A" => Ok(Self::V7_3A),
            "7.3B" => Ok(Self::V7_3B),
            "7.4" => Ok(Self::V7_4),
            other => Err(ProtocolError::InvalidField {
                field: "tds version",
                reason: format!("unsupported version '{other}'"),
            }),
        }
    }
}

/// Server product version reported in the PRELOGIN response.
///
/// This is the SQL Server build (for example 16.0.1000), not the protocol
/// version; the protocol version is only known after LOGINACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerVersion {
    /// Major product version.
    pub major: u8,
    /// Minor product version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number.
    pub sub_build: u16,
}

impl ServerVersion {
    /// Build from the big-endian PRELOGIN VERSION word and the sub-build.
    #[must_use]
    pub const fn from_raw(raw: u32, sub_build: u16) -> Self {
        Self {
            major: (raw >> 24) as u8,
            minor: (raw >> 16) as u8,
            build: raw as u16,
            sub_build,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

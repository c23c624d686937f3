//! Column data types as they appear in COLMETADATA.
//!
//! Only the representative set a batch client needs is recognized: integers,
//! bit, floating point, money, GUID, decimal/numeric, character and binary
//! strings (including `MAX` variants), XML and the date/time family. Any other
//! type byte makes the row stream unframable and is rejected.

use bytes::{Buf, BufMut};

use crate::codec::ensure_remaining;
use crate::error::ProtocolError;

/// TDS data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer (TINYINT).
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// Small datetime.
    DateTime4 = 0x3A,
    /// 32-bit float.
    Float4 = 0x3B,
    /// 8-byte money.
    Money = 0x3C,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 64-bit float.
    Float8 = 0x3E,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// Nullable GUID.
    Guid = 0x24,
    /// Nullable integer of length 1, 2, 4 or 8.
    IntN = 0x26,
    /// Date (3 bytes).
    Date = 0x28,
    /// Time with scale.
    Time = 0x29,
    /// DateTime2 with scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with scale.
    DateTimeOffset = 0x2B,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float of length 4 or 8.
    FloatN = 0x6D,
    /// Nullable money of length 4 or 8.
    MoneyN = 0x6E,
    /// Nullable datetime of length 4 or 8.
    DateTimeN = 0x6F,
    /// VARBINARY.
    BigVarBinary = 0xA5,
    /// VARCHAR.
    BigVarChar = 0xA7,
    /// BINARY.
    BigBinary = 0xAD,
    /// CHAR.
    BigChar = 0xAF,
    /// NVARCHAR.
    NVarChar = 0xE7,
    /// NCHAR.
    NChar = 0xEF,
    /// XML, always PLP.
    Xml = 0xF1,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x3A => Self::DateTime4,
            0x3B => Self::Float4,
            0x3C => Self::Money,
            0x3D => Self::DateTime,
            0x3E => Self::Float8,
            0x7A => Self::Money4,
            0x7F => Self::Int8,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0xA5 => Self::BigVarBinary,
            0xA7 => Self::BigVarChar,
            0xAD => Self::BigBinary,
            0xAF => Self::BigChar,
            0xE7 => Self::NVarChar,
            0xEF => Self::NChar,
            0xF1 => Self::Xml,
            other => return Err(ProtocolError::InvalidDataType(other)),
        })
    }

    /// Width of a fixed-length type, `None` for length-prefixed types.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::DateTime4 | Self::Float4 | Self::Money4 => Some(4),
            Self::Money | Self::DateTime | Self::Float8 | Self::Int8 => Some(8),
            _ => None,
        }
    }

    /// Whether the type carries a collation in its type info.
    #[must_use]
    pub const fn has_collation(self) -> bool {
        matches!(
            self,
            Self::BigVarChar | Self::BigChar | Self::NVarChar | Self::NChar
        )
    }

    /// Whether values are UTF-16 text.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NVarChar | Self::NChar | Self::Xml)
    }

    /// Whether the type has a two-byte maximum length in its type info.
    #[must_use]
    pub const fn is_ushort_len(self) -> bool {
        matches!(
            self,
            Self::BigVarBinary
                | Self::BigVarChar
                | Self::BigBinary
                | Self::BigChar
                | Self::NVarChar
                | Self::NChar
        )
    }
}

/// Flags attached to each column in COLMETADATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnFlags(pub u16);

impl ColumnFlags {
    /// Column may contain NULL.
    pub const NULLABLE: u16 = 0x0001;
    /// Column is an identity column.
    pub const IDENTITY: u16 = 0x0010;

    /// Whether the column is nullable.
    #[must_use]
    pub const fn is_nullable(self) -> bool {
        self.0 & Self::NULLABLE != 0
    }

    /// Whether the column is an identity column.
    #[must_use]
    pub const fn is_identity(self) -> bool {
        self.0 & Self::IDENTITY != 0
    }
}

/// Collation attached to character columns and the SQL collation ENVCHANGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collation {
    /// LCID in the low 20 bits, comparison flags and version above.
    pub info: u32,
    /// SQL sort order id, 0 for Windows collations.
    pub sort_id: u8,
}

impl Collation {
    /// Wire size of a collation.
    pub const SIZE: usize = 5;

    /// Locale identifier.
    #[must_use]
    pub const fn lcid(&self) -> u32 {
        self.info & 0x000F_FFFF
    }

    /// Whether this is a UTF-8 collation (SQL Server 2019+).
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.info & 0x0400_0000 != 0
    }

    /// Decode a collation.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure_remaining(src, Self::SIZE)?;
        Ok(Self {
            info: src.get_u32_le(),
            sort_id: src.get_u8(),
        })
    }

    /// Encode a collation.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.info);
        dst.put_u8(self.sort_id);
    }
}

/// How a column's values are length-prefixed inside a ROW token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFraming {
    /// Exactly this many bytes, never NULL.
    Fixed(usize),
    /// One-byte length, 0 means NULL.
    ByteLen,
    /// Two-byte length, 0xFFFF means NULL.
    UShortLen,
    /// Partially length-prefixed chunks (`MAX` types and XML).
    Plp,
}

/// Type information for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Data type.
    pub type_id: TypeId,
    /// Declared maximum length in bytes (0xFFFF means `MAX`).
    pub max_length: Option<u32>,
    /// Decimal precision.
    pub precision: Option<u8>,
    /// Decimal or fractional-second scale.
    pub scale: Option<u8>,
    /// Collation for character data.
    pub collation: Option<Collation>,
}

impl TypeInfo {
    /// Type info for a fixed-length or scale-less type.
    #[must_use]
    pub const fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            max_length: None,
            precision: None,
            scale: None,
            collation: None,
        }
    }

    /// Type info with a declared maximum length.
    #[must_use]
    pub const fn with_length(type_id: TypeId, max_length: u32) -> Self {
        Self {
            type_id,
            max_length: Some(max_length),
            precision: None,
            scale: None,
            collation: None,
        }
    }

    /// Attach a collation.
    #[must_use]
    pub const fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Attach precision and scale.
    #[must_use]
    pub const fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Attach a fractional-second scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: u8) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Whether this is a `MAX` type carried as PLP.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.type_id == TypeId::Xml
            || (self.type_id.is_ushort_len() && self.max_length == Some(0xFFFF))
    }

    /// How values of this column are framed inside a row.
    #[must_use]
    pub fn framing(&self) -> ValueFraming {
        if let Some(size) = self.type_id.fixed_size() {
            ValueFraming::Fixed(size)
        } else if self.is_plp() {
            ValueFraming::Plp
        } else if self.type_id.is_ushort_len() {
            ValueFraming::UShortLen
        } else {
            ValueFraming::ByteLen
        }
    }

    /// Decode the type byte and the type-specific info that follows it.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure_remaining(src, 1)?;
        let type_id = TypeId::from_u8(src.get_u8())?;

        if type_id.fixed_size().is_some() {
            return Ok(Self::new(type_id));
        }

        let info = match type_id {
            TypeId::Date => Self::new(type_id),
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                ensure_remaining(src, 1)?;
                Self::new(type_id).with_scale(src.get_u8())
            }
            TypeId::DecimalN | TypeId::NumericN => {
                ensure_remaining(src, 3)?;
                let len = src.get_u8();
                let precision = src.get_u8();
                let scale = src.get_u8();
                Self::with_length(type_id, u32::from(len)).with_precision(precision, scale)
            }
            TypeId::Xml => {
                // schema-present flag; schema-bound XML is not supported
                ensure_remaining(src, 1)?;
                if src.get_u8() != 0 {
                    return Err(ProtocolError::InvalidField {
                        field: "xml type info",
                        reason: "schema-bound XML columns are not supported".into(),
                    });
                }
                Self::new(type_id)
            }
            t if t.is_ushort_len() => {
                ensure_remaining(src, 2)?;
                let max = Self::with_length(t, u32::from(src.get_u16_le()));
                if t.has_collation() {
                    max.with_collation(Collation::decode(src)?)
                } else {
                    max
                }
            }
            _ => {
                ensure_remaining(src, 1)?;
                Self::with_length(type_id, u32::from(src.get_u8()))
            }
        };
        Ok(info)
    }

    /// Encode the type byte and type info. Used by test servers.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.type_id as u8);
        if self.type_id.fixed_size().is_some() {
            return;
        }
        match self.type_id {
            TypeId::Date => {}
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                dst.put_u8(self.scale.unwrap_or(7));
            }
            TypeId::DecimalN | TypeId::NumericN => {
                dst.put_u8(self.max_length.unwrap_or(17) as u8);
                dst.put_u8(self.precision.unwrap_or(18));
                dst.put_u8(self.scale.unwrap_or(0));
            }
            TypeId::Xml => dst.put_u8(0),
            t if t.is_ushort_len() => {
                dst.put_u16_le(self.max_length.unwrap_or(0xFFFF) as u16);
                if t.has_collation() {
                    self.collation.unwrap_or_default().encode(dst);
                }
            }
            _ => dst.put_u8(self.max_length.unwrap_or(8) as u8),
        }
    }
}

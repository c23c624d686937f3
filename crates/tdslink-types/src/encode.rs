//! Converting [`SqlValue`]s into raw column values.
//!
//! The inverse of [`decode_value`](crate::decode_value), for the
//! representative type set. Servers and test fixtures use it to build ROW
//! tokens; the client itself only sends SQL text.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{NaiveDate, NaiveTime, Timelike};
use tdslink_protocol::{Collation, TypeId, TypeInfo};

use crate::decode::{encoding_for_collation, scale_of, time_len};
use crate::error::TypeError;
use crate::value::SqlValue;

/// Collation used for text columns when none is given: Latin1_General_CI_AS.
pub const DEFAULT_COLLATION: Collation = Collation {
    info: 0x00D0_0409,
    sort_id: 0,
};

/// Column type that round-trips `value` without loss.
#[must_use]
pub fn type_info_for(value: &SqlValue) -> TypeInfo {
    match value {
        SqlValue::Null | SqlValue::Int(_) => TypeInfo::with_length(TypeId::IntN, 4),
        SqlValue::Bool(_) => TypeInfo::with_length(TypeId::BitN, 1),
        SqlValue::TinyInt(_) => TypeInfo::with_length(TypeId::IntN, 1),
        SqlValue::SmallInt(_) => TypeInfo::with_length(TypeId::IntN, 2),
        SqlValue::BigInt(_) => TypeInfo::with_length(TypeId::IntN, 8),
        SqlValue::Float(_) => TypeInfo::with_length(TypeId::FloatN, 4),
        SqlValue::Double(_) => TypeInfo::with_length(TypeId::FloatN, 8),
        SqlValue::Decimal(d) => TypeInfo::with_length(TypeId::DecimalN, 17).with_precision(38, d.scale() as u8),
        SqlValue::String(_) => TypeInfo::with_length(TypeId::NVarChar, 8000).with_collation(DEFAULT_COLLATION),
        SqlValue::Binary(_) => TypeInfo::with_length(TypeId::BigVarBinary, 8000),
        SqlValue::Xml(_) => TypeInfo::new(TypeId::Xml),
        SqlValue::Date(_) => TypeInfo::new(TypeId::Date),
        SqlValue::Time(_) => TypeInfo::new(TypeId::Time).with_scale(7),
        SqlValue::DateTime(_) => TypeInfo::new(TypeId::DateTime2).with_scale(7),
        SqlValue::DateTimeOffset(_) => TypeInfo::new(TypeId::DateTimeOffset).with_scale(7),
    }
}

/// Encode `value` as a column of type `type_info`.
///
/// Returns `None` for NULL. Integer widths follow the column type, so an
/// `Int` can be written to a BIGINT column but not to a TINYINT one.
pub fn encode_value(value: &SqlValue, type_info: &TypeInfo) -> Result<Option<Bytes>, TypeError> {
    let mut buf = BytesMut::new();
    match (value, type_info.type_id) {
        (SqlValue::Null, _) => return Ok(None),
        (SqlValue::Bool(v), TypeId::Bit | TypeId::BitN) => buf.put_u8(u8::from(*v)),
        (v, TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN) => {
            let n = v.as_i64().ok_or_else(|| mismatch("integer", v))?;
            put_int(&mut buf, n, int_width(type_info))?;
        }
        (SqlValue::Float(v), TypeId::Float4 | TypeId::FloatN) if int_width(type_info) == 4 => buf.put_f32_le(*v),
        (SqlValue::Float(v), TypeId::Float8 | TypeId::FloatN) => buf.put_f64_le(f64::from(*v)),
        (SqlValue::Double(v), TypeId::Float8 | TypeId::FloatN) if int_width(type_info) == 8 => buf.put_f64_le(*v),
        (SqlValue::Decimal(d), TypeId::DecimalN | TypeId::NumericN) => {
            let mut d = *d;
            d.rescale(u32::from(type_info.scale.unwrap_or(0)));
            let width = (type_info.max_length.unwrap_or(17).saturating_sub(1) as usize).min(16);
            let magnitude = d.mantissa().unsigned_abs().to_le_bytes();
            if magnitude[width..].iter().any(|b| *b != 0) {
                return Err(TypeError::OutOfRange { target_type: "DECIMAL" });
            }
            buf.put_u8(u8::from(!d.is_sign_negative()));
            buf.put_slice(&magnitude[..width]);
        }
        (SqlValue::String(s), TypeId::NVarChar | TypeId::NChar) | (SqlValue::Xml(s), TypeId::Xml) => {
            s.encode_utf16().for_each(|unit| buf.put_u16_le(unit));
        }
        (SqlValue::String(s), TypeId::BigVarChar | TypeId::BigChar) => {
            let encoding = encoding_for_collation(&type_info.collation.unwrap_or(DEFAULT_COLLATION));
            let (bytes, _, had_errors) = encoding.encode(s);
            if had_errors {
                return Err(TypeError::InvalidEncoding(format!("text not representable in {}", encoding.name())));
            }
            buf.put_slice(&bytes);
        }
        (SqlValue::Binary(b), TypeId::BigVarBinary | TypeId::BigBinary) => return Ok(Some(b.clone())),
        (SqlValue::Date(d), TypeId::Date) => put_date(&mut buf, *d)?,
        (SqlValue::Time(t), TypeId::Time) => put_time(&mut buf, *t, scale_of(type_info)),
        (SqlValue::DateTime(dt), TypeId::DateTime2) => {
            put_time(&mut buf, dt.time(), scale_of(type_info));
            put_date(&mut buf, dt.date())?;
        }
        (SqlValue::DateTimeOffset(dt), TypeId::DateTimeOffset) => {
            let utc = dt.naive_utc();
            put_time(&mut buf, utc.time(), scale_of(type_info));
            put_date(&mut buf, utc.date())?;
            buf.put_i16_le((dt.offset().local_minus_utc() / 60) as i16);
        }
        (v, _) => return Err(mismatch(column_type_name(type_info.type_id), v)),
    }
    Ok(Some(buf.freeze()))
}

fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    TypeError::TypeMismatch {
        expected,
        actual: value.type_name(),
    }
}

fn column_type_name(type_id: TypeId) -> &'static str {
    match type_id {
        TypeId::Bit | TypeId::BitN => "BIT",
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => "FLOAT",
        TypeId::DecimalN | TypeId::NumericN => "DECIMAL",
        TypeId::NVarChar | TypeId::NChar | TypeId::BigVarChar | TypeId::BigChar => "string",
        TypeId::BigVarBinary | TypeId::BigBinary => "binary",
        TypeId::Date | TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => "date/time",
        _ => "supported column type",
    }
}

fn int_width(type_info: &TypeInfo) -> usize {
    type_info
        .type_id
        .fixed_size()
        .unwrap_or_else(|| type_info.max_length.unwrap_or(8) as usize)
}

fn put_int(buf: &mut BytesMut, n: i64, width: usize) -> Result<(), TypeError> {
    match width {
        1 => buf.put_u8(u8::try_from(n).map_err(|_| TypeError::OutOfRange { target_type: "TINYINT" })?),
        2 => buf.put_i16_le(i16::try_from(n).map_err(|_| TypeError::OutOfRange { target_type: "SMALLINT" })?),
        4 => buf.put_i32_le(i32::try_from(n).map_err(|_| TypeError::OutOfRange { target_type: "INT" })?),
        _ => buf.put_i64_le(n),
    }
    Ok(())
}

fn put_date(buf: &mut BytesMut, date: NaiveDate) -> Result<(), TypeError> {
    let base = NaiveDate::from_ymd_opt(1, 1, 1).ok_or_else(|| TypeError::InvalidDateTime("base date".into()))?;
    let days = u32::try_from((date - base).num_days()).map_err(|_| TypeError::OutOfRange { target_type: "DATE" })?;
    buf.put_slice(&days.to_le_bytes()[..3]);
    Ok(())
}

fn put_time(buf: &mut BytesMut, time: NaiveTime, scale: u8) {
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + u64::from(time.nanosecond());
    let units = nanos / 10u64.pow(9 - u32::from(scale.min(7)));
    buf.put_slice(&units.to_le_bytes()[..time_len(scale)]);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::decode_value;

    fn round_trip(value: SqlValue) -> SqlValue {
        let info = type_info_for(&value);
        let raw = encode_value(&value, &info).unwrap();
        decode_value(raw.as_ref(), &info).unwrap()
    }

    #[test]
    fn test_representative_values_survive() {
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        for value in [
            SqlValue::Null,
            SqlValue::Int(-7),
            SqlValue::BigInt(1 << 40),
            SqlValue::Decimal(Decimal::new(-31415, 4)),
            SqlValue::String("Grüße".into()),
            SqlValue::Date(date),
            SqlValue::DateTime(date.and_hms_micro_opt(23, 59, 59, 123_456).unwrap()),
        ] {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn test_int_width_follows_column() {
        let info = TypeInfo::with_length(TypeId::IntN, 8);
        let raw = encode_value(&SqlValue::Int(5), &info).unwrap().unwrap();
        assert_eq!(&raw[..], &5i64.to_le_bytes());

        let tiny = TypeInfo::new(TypeId::Int1);
        assert_eq!(
            encode_value(&SqlValue::Int(300), &tiny),
            Err(TypeError::OutOfRange { target_type: "TINYINT" })
        );
    }

    #[test]
    fn test_decimal_layout() {
        let info = TypeInfo::with_length(TypeId::DecimalN, 5).with_precision(9, 2);
        let raw = encode_value(&SqlValue::Decimal(Decimal::new(-150, 1)), &info).unwrap().unwrap();
        assert_eq!(&raw[..], &[0, 0xDC, 0x05, 0, 0]);
    }

    #[test]
    fn test_varchar_encoding() {
        let info = TypeInfo::with_length(TypeId::BigVarChar, 10).with_collation(DEFAULT_COLLATION);
        let raw = encode_value(&SqlValue::from("café"), &info).unwrap().unwrap();
        assert_eq!(&raw[..], b"caf\xE9");
    }

    #[test]
    fn test_mismatch() {
        let info = TypeInfo::new(TypeId::Date);
        assert!(matches!(
            encode_value(&SqlValue::Int(1), &info),
            Err(TypeError::TypeMismatch { actual: "INT", .. })
        ));
    }
}

//! Converting raw column values into [`SqlValue`]s.
//!
//! The token decoder frames each column value according to COLMETADATA and
//! hands over the value bytes with the length prefix removed (`None` for
//! NULL). This module interprets those bytes for the column's type.

use bytes::{Buf, Bytes};
use chrono::{Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use encoding_rs::Encoding;
use rust_decimal::Decimal;
use tdslink_protocol::{Collation, TypeId, TypeInfo};

use crate::error::TypeError;
use crate::value::SqlValue;

/// Decode one column value.
pub fn decode_value(raw: Option<&Bytes>, type_info: &TypeInfo) -> Result<SqlValue, TypeError> {
    let Some(raw) = raw else {
        return Ok(SqlValue::Null);
    };
    let data = &raw[..];

    match type_info.type_id {
        TypeId::Null => Ok(SqlValue::Null),
        TypeId::Bit | TypeId::BitN => match data {
            [b] => Ok(SqlValue::Bool(*b != 0)),
            _ => Err(invalid_length("BIT", data)),
        },
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => decode_int(data),
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => decode_float(data),
        TypeId::DecimalN | TypeId::NumericN => decode_decimal(data, type_info.scale.unwrap_or(0)),
        TypeId::NVarChar | TypeId::NChar => Ok(SqlValue::String(decode_utf16_string(data)?)),
        TypeId::Xml => Ok(SqlValue::Xml(decode_utf16_string(data)?)),
        TypeId::BigVarChar | TypeId::BigChar => {
            Ok(SqlValue::String(decode_varchar(data, type_info.collation.as_ref())?))
        }
        TypeId::BigVarBinary | TypeId::BigBinary => Ok(SqlValue::Binary(raw.clone())),
        TypeId::Date => Ok(SqlValue::Date(decode_date(data)?)),
        TypeId::Time => Ok(SqlValue::Time(decode_time(data, scale_of(type_info))?)),
        TypeId::DateTime2 => {
            let scale = scale_of(type_info);
            let (time, date) = data
                .split_at_checked(time_len(scale))
                .ok_or_else(|| invalid_length("DATETIME2", data))?;
            Ok(SqlValue::DateTime(decode_date(date)?.and_time(decode_time(time, scale)?)))
        }
        TypeId::DateTimeOffset => decode_datetimeoffset(data, scale_of(type_info)),
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => decode_legacy_datetime(data),
        TypeId::Guid | TypeId::Money | TypeId::Money4 | TypeId::MoneyN => Err(TypeError::UnsupportedType(
            format!("{:?}", type_info.type_id),
        )),
    }
}

fn invalid_length(type_name: &'static str, data: &[u8]) -> TypeError {
    TypeError::InvalidLength {
        type_name,
        length: data.len(),
    }
}

fn decode_int(mut data: &[u8]) -> Result<SqlValue, TypeError> {
    Ok(match data.len() {
        1 => SqlValue::TinyInt(data.get_u8()),
        2 => SqlValue::SmallInt(data.get_i16_le()),
        4 => SqlValue::Int(data.get_i32_le()),
        8 => SqlValue::BigInt(data.get_i64_le()),
        _ => return Err(invalid_length("INT", data)),
    })
}

fn decode_float(mut data: &[u8]) -> Result<SqlValue, TypeError> {
    Ok(match data.len() {
        4 => SqlValue::Float(data.get_f32_le()),
        8 => SqlValue::Double(data.get_f64_le()),
        _ => return Err(invalid_length("FLOAT", data)),
    })
}

/// DECIMAL/NUMERIC: a sign byte (1 = positive) then a little-endian
/// magnitude of 4, 8, 12 or 16 bytes.
fn decode_decimal(data: &[u8], scale: u8) -> Result<SqlValue, TypeError> {
    let Some((&sign, magnitude)) = data.split_first() else {
        return Err(invalid_length("DECIMAL", data));
    };
    if magnitude.is_empty() || magnitude.len() > 16 {
        return Err(invalid_length("DECIMAL", data));
    }

    let mut bytes = [0u8; 16];
    bytes[..magnitude.len()].copy_from_slice(magnitude);
    let unsigned = u128::from_le_bytes(bytes);
    let mantissa = i128::try_from(unsigned).map_err(|_| TypeError::InvalidDecimal("magnitude overflows i128".into()))?;
    let mantissa = if sign == 0 { -mantissa } else { mantissa };

    Decimal::try_from_i128_with_scale(mantissa, u32::from(scale))
        .map(SqlValue::Decimal)
        .map_err(|e| TypeError::InvalidDecimal(e.to_string()))
}

/// Decode UTF-16LE text.
pub fn decode_utf16_string(data: &[u8]) -> Result<String, TypeError> {
    if data.len() % 2 != 0 {
        return Err(TypeError::InvalidEncoding("odd UTF-16 byte count".into()));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| TypeError::InvalidEncoding(e.to_string()))
}

fn decode_varchar(data: &[u8], collation: Option<&Collation>) -> Result<String, TypeError> {
    let encoding = collation.map_or(encoding_rs::WINDOWS_1252, encoding_for_collation);
    let (text, had_errors) = encoding.decode_without_bom_handling(data);
    if had_errors {
        return Err(TypeError::InvalidEncoding(format!(
            "VARCHAR data is not valid {}",
            encoding.name()
        )));
    }
    Ok(text.into_owned())
}

/// Encoding used for VARCHAR data under `collation`.
#[must_use]
pub fn encoding_for_collation(collation: &Collation) -> &'static Encoding {
    if collation.is_utf8() {
        return encoding_rs::UTF_8;
    }
    match code_page_for_lcid(collation.lcid()) {
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GBK,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        _ => encoding_rs::WINDOWS_1252,
    }
}

/// Windows ANSI code page of a locale, keyed on its primary language.
fn code_page_for_lcid(lcid: u32) -> u16 {
    match lcid & 0x3FF {
        0x11 => 932,
        // Simplified for PRC and Singapore, Traditional elsewhere.
        0x04 => match lcid {
            0x0804 | 0x1004 => 936,
            _ => 950,
        },
        0x12 => 949,
        0x1E => 874,
        0x2A => 1258,
        // Serbian and Bosnian Cyrillic share Croatian's primary language id.
        0x1A => match lcid {
            0x0C1A | 0x1C1A | 0x201A => 1251,
            _ => 1250,
        },
        0x05 | 0x0E | 0x15 | 0x18 | 0x1B | 0x1C | 0x24 => 1250,
        0x02 | 0x19 | 0x22 | 0x23 | 0x2F | 0x3F | 0x40 | 0x44 | 0x50 => 1251,
        0x08 => 1253,
        0x1F | 0x2C => 1254,
        0x0D => 1255,
        0x01 | 0x20 | 0x29 => 1256,
        0x25..=0x27 => 1257,
        _ => 1252,
    }
}

pub(crate) fn scale_of(type_info: &TypeInfo) -> u8 {
    type_info.scale.unwrap_or(7)
}

/// Bytes used by a TIME value of the given scale.
pub(crate) fn time_len(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

fn base_date(year: i32) -> Result<NaiveDate, TypeError> {
    NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| TypeError::InvalidDateTime(format!("base year {year}")))
}

fn add_days(base: NaiveDate, days: i64) -> Result<NaiveDate, TypeError> {
    let shifted = if days >= 0 {
        base.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        base.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| TypeError::InvalidDateTime(format!("{days} days from {base}")))
}

/// DATE: days since 0001-01-01 in three little-endian bytes.
fn decode_date(data: &[u8]) -> Result<NaiveDate, TypeError> {
    let [a, b, c] = data else {
        return Err(invalid_length("DATE", data));
    };
    let days = u32::from_le_bytes([*a, *b, *c, 0]);
    add_days(base_date(1)?, i64::from(days))
}

/// TIME: units of 10^-scale seconds since midnight.
fn decode_time(data: &[u8], scale: u8) -> Result<NaiveTime, TypeError> {
    if data.len() != time_len(scale) || scale > 7 {
        return Err(invalid_length("TIME", data));
    }
    let mut bytes = [0u8; 8];
    bytes[..data.len()].copy_from_slice(data);
    let units = u64::from_le_bytes(bytes);

    let nanos = units * 10u64.pow(9 - u32::from(scale));
    let secs = u32::try_from(nanos / 1_000_000_000).map_err(|_| TypeError::InvalidDateTime(format!("{units} time units")))?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, (nanos % 1_000_000_000) as u32)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{units} time units at scale {scale}")))
}

/// DATETIMEOFFSET: a DATETIME2 in UTC followed by the offset in minutes.
fn decode_datetimeoffset(data: &[u8], scale: u8) -> Result<SqlValue, TypeError> {
    let split = time_len(scale);
    if data.len() != split + 5 {
        return Err(invalid_length("DATETIMEOFFSET", data));
    }
    let utc = decode_date(&data[split..split + 3])?.and_time(decode_time(&data[..split], scale)?);
    let minutes = i16::from_le_bytes([data[split + 3], data[split + 4]]);
    let offset = FixedOffset::east_opt(i32::from(minutes) * 60)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("offset of {minutes} minutes")))?;
    Ok(SqlValue::DateTimeOffset(offset.from_utc_datetime(&utc)))
}

/// DATETIME (days since 1900 + 1/300 s ticks) or SMALLDATETIME (days since
/// 1900 + minutes), told apart by length.
fn decode_legacy_datetime(mut data: &[u8]) -> Result<SqlValue, TypeError> {
    let base = base_date(1900)?;
    let datetime = match data.len() {
        8 => {
            let days = data.get_i32_le();
            let ticks = data.get_u32_le();
            // Round to whole milliseconds the way the server displays them.
            let millis = (u64::from(ticks) * 1000 + 150) / 300;
            let time = NaiveTime::from_num_seconds_from_midnight_opt((millis / 1000) as u32, (millis % 1000) as u32 * 1_000_000)
                .ok_or_else(|| TypeError::InvalidDateTime(format!("{ticks} DATETIME ticks")))?;
            NaiveDateTime::new(add_days(base, i64::from(days))?, time)
        }
        4 => {
            let days = data.get_u16_le();
            let minutes = data.get_u16_le();
            let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
                .ok_or_else(|| TypeError::InvalidDateTime(format!("{minutes} SMALLDATETIME minutes")))?;
            NaiveDateTime::new(add_days(base, i64::from(days))?, time)
        }
        _ => return Err(invalid_length("DATETIME", data)),
    };
    Ok(SqlValue::DateTime(datetime))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn decode(info: &TypeInfo, bytes: &[u8]) -> Result<SqlValue, TypeError> {
        decode_value(Some(&Bytes::copy_from_slice(bytes)), info)
    }

    #[test]
    fn test_null() {
        assert_eq!(decode_value(None, &TypeInfo::new(TypeId::Int4)).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_intn_width_follows_value_length() {
        let info = TypeInfo::with_length(TypeId::IntN, 8);
        assert_eq!(decode(&info, &[0x2A]).unwrap(), SqlValue::TinyInt(42));
        assert_eq!(decode(&info, &(-2i16).to_le_bytes()).unwrap(), SqlValue::SmallInt(-2));
        assert_eq!(decode(&info, &7i32.to_le_bytes()).unwrap(), SqlValue::Int(7));
        assert_eq!(decode(&info, &i64::MIN.to_le_bytes()).unwrap(), SqlValue::BigInt(i64::MIN));
        assert!(matches!(decode(&info, &[1, 2, 3]), Err(TypeError::InvalidLength { .. })));
    }

    #[test]
    fn test_decimal() {
        let info = TypeInfo::with_length(TypeId::DecimalN, 5).with_precision(9, 2);
        let mut bytes = vec![1];
        bytes.extend_from_slice(&12345u32.to_le_bytes());
        assert_eq!(decode(&info, &bytes).unwrap(), SqlValue::Decimal(Decimal::new(12345, 2)));

        bytes[0] = 0;
        assert_eq!(decode(&info, &bytes).unwrap(), SqlValue::Decimal(Decimal::new(-12345, 2)));
    }

    #[test]
    fn test_decimal_beyond_rust_decimal_range() {
        let info = TypeInfo::with_length(TypeId::NumericN, 17).with_precision(38, 0);
        let mut bytes = vec![1];
        bytes.extend_from_slice(&(u128::MAX >> 2).to_le_bytes());
        assert!(matches!(decode(&info, &bytes), Err(TypeError::InvalidDecimal(_))));
    }

    #[test]
    fn test_nvarchar() {
        let info = TypeInfo::with_length(TypeId::NVarChar, 100);
        let bytes: Vec<u8> = "héllo".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(decode(&info, &bytes).unwrap(), SqlValue::String("héllo".into()));
        assert!(decode(&info, &[0x41]).is_err());
    }

    #[test]
    fn test_varchar_uses_collation_code_page() {
        // 0x0419 is Russian, code page 1251; 0xE0 is 'а'.
        let info = TypeInfo::with_length(TypeId::BigVarChar, 10).with_collation(Collation {
            info: 0x0419,
            sort_id: 0,
        });
        assert_eq!(decode(&info, &[0xE0]).unwrap(), SqlValue::String("а".into()));

        let latin = TypeInfo::with_length(TypeId::BigVarChar, 10).with_collation(Collation {
            info: 0x0409,
            sort_id: 0,
        });
        assert_eq!(decode(&latin, &[0xE0]).unwrap(), SqlValue::String("à".into()));
    }

    #[test]
    fn test_varchar_utf8_collation() {
        let info = TypeInfo::with_length(TypeId::BigVarChar, 10).with_collation(Collation {
            info: 0x0400_0409,
            sort_id: 0,
        });
        assert_eq!(decode(&info, "ü".as_bytes()).unwrap(), SqlValue::String("ü".into()));
    }

    #[test]
    fn test_code_pages() {
        assert_eq!(code_page_for_lcid(0x0411), 932);
        assert_eq!(code_page_for_lcid(0x0804), 936);
        assert_eq!(code_page_for_lcid(0x0404), 950);
        assert_eq!(code_page_for_lcid(0x041A), 1250);
        assert_eq!(code_page_for_lcid(0x0C1A), 1251);
        assert_eq!(code_page_for_lcid(0x0427), 1257);
        assert_eq!(code_page_for_lcid(0x0409), 1252);
    }

    #[test]
    fn test_date() {
        // 2024-01-15 is day 738_899 after 0001-01-01.
        let days = 738_899u32.to_le_bytes();
        let value = decode(&TypeInfo::new(TypeId::Date), &days[..3]).unwrap();
        assert_eq!(value, SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()));
    }

    #[test]
    fn test_time_scale_3() {
        let info = TypeInfo::new(TypeId::Time).with_scale(3);
        // 12:30:15.250 in milliseconds.
        let units = ((12 * 3600 + 30 * 60 + 15) * 1000 + 250) as u32;
        let value = decode(&info, &units.to_le_bytes()).unwrap();
        assert_eq!(value, SqlValue::Time(NaiveTime::from_hms_milli_opt(12, 30, 15, 250).unwrap()));
    }

    #[test]
    fn test_datetime2() {
        let info = TypeInfo::new(TypeId::DateTime2).with_scale(0);
        let mut bytes = 3600u32.to_le_bytes()[..3].to_vec();
        bytes.extend_from_slice(&738_899u32.to_le_bytes()[..3]);
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(1, 0, 0).unwrap();
        assert_eq!(decode(&info, &bytes).unwrap(), SqlValue::DateTime(expected));
    }

    #[test]
    fn test_datetimeoffset_is_stored_in_utc() {
        let info = TypeInfo::new(TypeId::DateTimeOffset).with_scale(0);
        let mut bytes = 3600u32.to_le_bytes()[..3].to_vec();
        bytes.extend_from_slice(&738_899u32.to_le_bytes()[..3]);
        bytes.extend_from_slice(&120i16.to_le_bytes());
        let SqlValue::DateTimeOffset(value) = decode(&info, &bytes).unwrap() else {
            panic!("expected DATETIMEOFFSET");
        };
        assert_eq!(value.offset().local_minus_utc(), 7200);
        assert_eq!(value.naive_local().to_string(), "2024-01-15 03:00:00");
    }

    #[test]
    fn test_datetime_ticks_round_to_milliseconds() {
        let info = TypeInfo::with_length(TypeId::DateTimeN, 8);
        let mut bytes = 45_000i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        let SqlValue::DateTime(value) = decode(&info, &bytes).unwrap() else {
            panic!("expected DATETIME");
        };
        assert_eq!(value.to_string(), "2023-03-17 00:00:00.007");
    }

    #[test]
    fn test_smalldatetime() {
        let info = TypeInfo::new(TypeId::DateTime4);
        let mut bytes = 45_000u16.to_le_bytes().to_vec();
        bytes.extend_from_slice(&90u16.to_le_bytes());
        let SqlValue::DateTime(value) = decode(&info, &bytes).unwrap() else {
            panic!("expected SMALLDATETIME");
        };
        assert_eq!(value.to_string(), "2023-03-17 01:30:00");
    }

    #[test]
    fn test_money_is_unsupported() {
        let info = TypeInfo::new(TypeId::Money);
        assert!(matches!(decode(&info, &[0; 8]), Err(TypeError::UnsupportedType(_))));
    }
}

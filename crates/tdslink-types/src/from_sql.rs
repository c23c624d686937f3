//! Extracting Rust values from [`SqlValue`]s.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::error::TypeError;
use crate::value::SqlValue;

/// Types that can be read out of a column value.
pub trait FromSql: Sized {
    /// Convert a non-NULL value. NULL yields [`TypeError::UnexpectedNull`].
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert a value that may be NULL.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn mismatch<T>(expected: &'static str, value: &SqlValue) -> Result<T, TypeError> {
    if value.is_null() {
        Err(TypeError::UnexpectedNull)
    } else {
        Err(TypeError::TypeMismatch {
            expected,
            actual: value.type_name(),
        })
    }
}

/// Implements `FromSql` from a list of accepted variants and conversions.
macro_rules! from_sql {
    ($ty:ty, $name:literal, { $($pat:pat => $conv:expr),* $(,)? }) => {
        impl FromSql for $ty {
            fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                match value {
                    $($pat => $conv,)*
                    other => mismatch($name, other),
                }
            }
        }
    };
}

from_sql!(bool, "bool", {
    SqlValue::Bool(v) => Ok(*v),
});

from_sql!(u8, "u8", {
    SqlValue::TinyInt(v) => Ok(*v),
});

from_sql!(i16, "i16", {
    SqlValue::SmallInt(v) => Ok(*v),
    SqlValue::TinyInt(v) => Ok(i16::from(*v)),
});

from_sql!(i32, "i32", {
    SqlValue::Int(v) => Ok(*v),
    SqlValue::SmallInt(v) => Ok(i32::from(*v)),
    SqlValue::TinyInt(v) => Ok(i32::from(*v)),
    SqlValue::BigInt(v) => i32::try_from(*v).map_err(|_| TypeError::OutOfRange { target_type: "i32" }),
});

from_sql!(i64, "i64", {
    v @ (SqlValue::BigInt(_) | SqlValue::Int(_) | SqlValue::SmallInt(_) | SqlValue::TinyInt(_)) => {
        v.as_i64().ok_or(TypeError::OutOfRange { target_type: "i64" })
    },
});

from_sql!(f32, "f32", {
    SqlValue::Float(v) => Ok(*v),
});

from_sql!(f64, "f64", {
    SqlValue::Double(v) => Ok(*v),
    SqlValue::Float(v) => Ok(f64::from(*v)),
});

from_sql!(Decimal, "Decimal", {
    SqlValue::Decimal(v) => Ok(*v),
    v @ (SqlValue::BigInt(_) | SqlValue::Int(_) | SqlValue::SmallInt(_) | SqlValue::TinyInt(_)) => {
        v.as_i64().map(Decimal::from).ok_or(TypeError::OutOfRange { target_type: "Decimal" })
    },
});

from_sql!(String, "String", {
    SqlValue::String(v) | SqlValue::Xml(v) => Ok(v.clone()),
});

from_sql!(Vec<u8>, "Vec<u8>", {
    SqlValue::Binary(v) => Ok(v.to_vec()),
});

from_sql!(Bytes, "Bytes", {
    SqlValue::Binary(v) => Ok(v.clone()),
});

from_sql!(NaiveDate, "NaiveDate", {
    SqlValue::Date(v) => Ok(*v),
    SqlValue::DateTime(v) => Ok(v.date()),
});

from_sql!(NaiveTime, "NaiveTime", {
    SqlValue::Time(v) => Ok(*v),
    SqlValue::DateTime(v) => Ok(v.time()),
});

from_sql!(NaiveDateTime, "NaiveDateTime", {
    SqlValue::DateTime(v) => Ok(*v),
});

from_sql!(DateTime<FixedOffset>, "DateTime<FixedOffset>", {
    SqlValue::DateTimeOffset(v) => Ok(*v),
});

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sql_widening() {
        assert_eq!(i64::from_sql(&SqlValue::SmallInt(-4)).unwrap(), -4);
        assert_eq!(f64::from_sql(&SqlValue::Float(0.5)).unwrap(), 0.5);
        assert_eq!(Decimal::from_sql(&SqlValue::Int(3)).unwrap(), Decimal::from(3));
    }

    #[test]
    fn test_from_sql_narrowing_checks_range() {
        assert_eq!(i32::from_sql(&SqlValue::BigInt(10)).unwrap(), 10);
        assert_eq!(
            i32::from_sql(&SqlValue::BigInt(i64::MAX)),
            Err(TypeError::OutOfRange { target_type: "i32" })
        );
    }

    #[test]
    fn test_from_sql_null() {
        assert_eq!(i32::from_sql(&SqlValue::Null), Err(TypeError::UnexpectedNull));
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Int(42)).unwrap(), Some(42));
    }

    #[test]
    fn test_from_sql_mismatch() {
        assert_eq!(
            String::from_sql(&SqlValue::Int(1)),
            Err(TypeError::TypeMismatch {
                expected: "String",
                actual: "INT"
            })
        );
    }
}

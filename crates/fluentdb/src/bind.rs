//! Encoding [`Value`] parameters for the Postgres binary protocol.
//!
//! The server decides each parameter's type when it prepares the statement. A value is
//! converted to that type when the conversion is exact (an integer into NUMERIC, a
//! date into TIMESTAMP, a string into a DATE it spells). Anything else fails on the
//! client with [`BindMismatch`] before a byte is sent.

use crate::value::Value;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::borrow::Cow;
use std::error::Error;
use std::str::FromStr;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

/// A value that has no faithful encoding for the parameter's type.
#[derive(Debug, thiserror::Error)]
#[error("cannot bind a {value} value to a parameter of type {ty}")]
pub struct BindMismatch {
    value: &'static str,
    ty: Type,
}

impl BindMismatch {
    fn new(value: &Value, ty: &Type) -> Self {
        Self {
            value: value.type_name(),
            ty: ty.clone(),
        }
    }
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    ) || matches!(ty.kind(), Kind::Enum(_))
        || ty.name() == "citext"
}

fn invalid_literal(s: &str, ty: &Type, err: impl std::fmt::Display) -> BoxError {
    format!("cannot bind '{s}' as {ty}: {err}").into()
}

impl Value {
    /// Text form used for text-typed parameters.
    fn to_text(&self) -> Option<Cow<'_, str>> {
        let text = match self {
            Value::Null | Value::Bytes(_) => return None,
            Value::Bool(v) => Cow::Borrowed(if *v { "true" } else { "false" }),
            Value::Int(v) => Cow::Owned(v.to_string()),
            Value::Float(v) => Cow::Owned(v.to_string()),
            Value::Decimal(v) => Cow::Owned(v.to_string()),
            Value::Text(v) => Cow::Borrowed(v.as_str()),
            Value::Json(v) => Cow::Owned(v.to_string()),
            Value::Uuid(v) => Cow::Owned(v.to_string()),
            Value::Date(v) => Cow::Owned(v.to_string()),
            Value::Timestamp(v) => Cow::Owned(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::TimestampTz(v) => Cow::Owned(v.to_rfc3339()),
        };
        Some(text)
    }

    /// Parse a string into the value the parameter type expects.
    fn parse_for(s: &str, ty: &Type) -> Result<Value, BoxError> {
        let t = s.trim();
        let value = match *ty {
            Type::BOOL => match t.to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Value::Bool(true),
                "f" | "false" | "n" | "no" | "off" | "0" => Value::Bool(false),
                _ => return Err(invalid_literal(s, ty, "not a boolean")),
            },
            Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
                Value::Int(t.parse().map_err(|e| invalid_literal(s, ty, e))?)
            }
            Type::FLOAT4 | Type::FLOAT8 => {
                Value::Float(t.parse().map_err(|e| invalid_literal(s, ty, e))?)
            }
            Type::NUMERIC => Value::Decimal(
                Decimal::from_str(t)
                    .or_else(|_| Decimal::from_scientific(t))
                    .map_err(|e| invalid_literal(s, ty, e))?,
            ),
            Type::UUID => Value::Uuid(Uuid::parse_str(t).map_err(|e| invalid_literal(s, ty, e))?),
            Type::DATE => Value::Date(
                NaiveDate::parse_from_str(t, "%Y-%m-%d").map_err(|e| invalid_literal(s, ty, e))?,
            ),
            Type::TIMESTAMP => {
                Value::Timestamp(parse_naive_datetime(t).ok_or_else(|| {
                    invalid_literal(s, ty, "expected YYYY-MM-DD[ HH:MM[:SS[.f]]]")
                })?)
            }
            Type::TIMESTAMPTZ => Value::TimestampTz(parse_datetime_utc(t).ok_or_else(|| {
                invalid_literal(s, ty, "expected RFC 3339 or YYYY-MM-DD[ HH:MM[:SS[.f]]][+TZ]")
            })?),
            Type::JSON | Type::JSONB => {
                Value::Json(serde_json::from_str(s).map_err(|e| invalid_literal(s, ty, e))?)
            }
            Type::BYTEA => Value::Bytes(s.as_bytes().to_vec()),
            _ => return Err(BindMismatch::new(&Value::Text(String::new()), ty).into()),
        };
        Ok(value)
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// RFC 3339, the server's own `2024-01-01 10:00:00+00` form, or a zone-less value
/// taken as UTC.
fn parse_datetime_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_naive_datetime(s).map(|dt| dt.and_utc()))
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        if is_text(ty) {
            let Some(text) = self.to_text() else {
                return Err(BindMismatch::new(self, ty).into());
            };
            return text.as_ref().to_sql(ty, out);
        }

        match (self, ty) {
            (Value::Bool(v), &Type::BOOL) => v.to_sql(ty, out),

            (Value::Int(v), &Type::INT2) => i16::try_from(*v)?.to_sql(ty, out),
            (Value::Int(v), &Type::INT4) => i32::try_from(*v)?.to_sql(ty, out),
            (Value::Int(v), &Type::INT8) => v.to_sql(ty, out),
            (Value::Int(v), &Type::OID) => u32::try_from(*v)?.to_sql(ty, out),
            (Value::Int(v), &Type::FLOAT4) => (*v as f32).to_sql(ty, out),
            (Value::Int(v), &Type::FLOAT8) => (*v as f64).to_sql(ty, out),
            (Value::Int(v), &Type::NUMERIC) => Decimal::from(*v).to_sql(ty, out),

            (Value::Float(v), &Type::FLOAT4) => (*v as f32).to_sql(ty, out),
            (Value::Float(v), &Type::FLOAT8) => v.to_sql(ty, out),
            // Shortest round-trip text, so 9.5 binds as 9.5 and 0.1 as 0.1.
            (Value::Float(v), &Type::NUMERIC) => Decimal::from_str(&v.to_string())
                .map_err(|e| invalid_literal(&v.to_string(), ty, e))?
                .to_sql(ty, out),

            (Value::Decimal(v), &Type::NUMERIC) => v.to_sql(ty, out),
            (Value::Decimal(v), &Type::FLOAT4 | &Type::FLOAT8) => match v.to_f64() {
                Some(f) => Value::Float(f).to_sql(ty, out),
                None => Err(BindMismatch::new(self, ty).into()),
            },
            (Value::Decimal(v), &Type::INT2 | &Type::INT4 | &Type::INT8 | &Type::OID)
                if v.fract().is_zero() =>
            {
                match v.to_i64() {
                    Some(i) => Value::Int(i).to_sql(ty, out),
                    None => Err(BindMismatch::new(self, ty).into()),
                }
            }

            (Value::Text(s), _) => Value::parse_for(s, ty)?.to_sql(ty, out),

            (Value::Bytes(v), &Type::BYTEA) => v.to_sql(ty, out),
            (Value::Json(v), &Type::JSON | &Type::JSONB) => v.to_sql(ty, out),
            (Value::Uuid(v), &Type::UUID) => v.to_sql(ty, out),

            (Value::Date(v), &Type::DATE) => v.to_sql(ty, out),
            (Value::Date(v), &Type::TIMESTAMP) => v.and_time(NaiveTime::MIN).to_sql(ty, out),
            (Value::Date(v), &Type::TIMESTAMPTZ) => {
                v.and_time(NaiveTime::MIN).and_utc().to_sql(ty, out)
            }
            (Value::Timestamp(v), &Type::TIMESTAMP) => v.to_sql(ty, out),
            (Value::Timestamp(v), &Type::TIMESTAMPTZ) => v.and_utc().to_sql(ty, out),
            (Value::TimestampTz(v), &Type::TIMESTAMPTZ) => v.to_sql(ty, out),
            (Value::TimestampTz(v), &Type::TIMESTAMP) => v.naive_utc().to_sql(ty, out),

            _ => Err(BindMismatch::new(self, ty).into()),
        }
    }

    /// Parameter types a `Value` can ever be encoded as. The pairing with the concrete
    /// variant is checked in `to_sql`.
    fn accepts(ty: &Type) -> bool {
        is_text(ty)
            || matches!(
                *ty,
                Type::BOOL
                    | Type::INT2
                    | Type::INT4
                    | Type::INT8
                    | Type::OID
                    | Type::FLOAT4
                    | Type::FLOAT8
                    | Type::NUMERIC
                    | Type::BYTEA
                    | Type::JSON
                    | Type::JSONB
                    | Type::UUID
                    | Type::DATE
                    | Type::TIMESTAMP
                    | Type::TIMESTAMPTZ
            )
    }

    to_sql_checked!();
}

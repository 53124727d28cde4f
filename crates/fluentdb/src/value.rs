//! Scalar values, result records and column value markers.
//!
//! [`Value`] is the single bind-parameter type: every placeholder in a compiled statement
//! corresponds to exactly one `Value`. [`Record`] is a result row with its columns in the
//! order the driver returned them. [`ColumnValue`] tags what an INSERT/UPDATE column should
//! receive, decided once at the call site instead of probing types during compilation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;

/// A scalar value bound as a statement parameter or read back from a row.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    Bool(bool),
    /// Any integer (bound as SMALLINT/INTEGER/BIGINT depending on the target column)
    Int(i64),
    /// Any float (bound as REAL/DOUBLE PRECISION depending on the target column)
    Float(f64),
    /// Exact decimal (NUMERIC)
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Value {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Decimal(v) if v.fract().is_zero() => v.to_i64(),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Decimal(v) => v.to_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Short type label used in log output and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $conv
                }
            }

            impl From<$ty> for ColumnValue {
                fn from(v: $ty) -> Self {
                    ColumnValue::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => |v| Value::Bool(v),
    i8 => |v| Value::Int(v.into()),
    i16 => |v| Value::Int(v.into()),
    i32 => |v| Value::Int(v.into()),
    i64 => |v| Value::Int(v),
    u8 => |v| Value::Int(v.into()),
    u16 => |v| Value::Int(v.into()),
    u32 => |v| Value::Int(v.into()),
    f32 => |v| Value::Float(v.into()),
    f64 => |v| Value::Float(v),
    Decimal => |v| Value::Decimal(v),
    &str => |v| Value::Text(v.to_string()),
    String => |v| Value::Text(v),
    &String => |v| Value::Text(v.clone()),
    Vec<u8> => |v| Value::Bytes(v),
    serde_json::Value => |v| Value::Json(v),
    Uuid => |v| Value::Uuid(v),
    NaiveDate => |v| Value::Date(v),
    NaiveDateTime => |v| Value::Timestamp(v),
    DateTime<Utc> => |v| Value::TimestampTz(v),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<Value> for ColumnValue {
    fn from(v: Value) -> Self {
        ColumnValue::Value(v)
    }
}

// ─── Record ─────────────────────────────────────────────────────────────────

/// A result row: column name → value, in driver column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            columns: Vec::with_capacity(n),
        }
    }

    /// Append a column. Duplicate names are kept (joins can produce them); `get` returns
    /// the first.
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// Value of the first column.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn into_first(self) -> Option<Value> {
        self.columns.into_iter().next().map(|(_, v)| v)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ─── Column value markers ───────────────────────────────────────────────────

/// What an INSERT/UPDATE column receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// Bound as a parameter
    Value(Value),
    /// Spliced verbatim (no parameters)
    Raw(String),
    /// SQL expression with `?` placeholders and its own parameters, e.g. `SHA2(?, 256)`
    Func { expr: String, params: Vec<Value> },
    /// `col = col + ?`
    Increment(Value),
    /// `col = col - ?`
    Decrement(Value),
    /// `NOW()`, optionally shifted by an interval such as `"+1 day"` or `"-2 hour"`
    Now(Option<String>),
}

impl ColumnValue {
    /// Markers that only make sense relative to an existing row.
    pub(crate) fn is_relative(&self) -> bool {
        matches!(self, ColumnValue::Increment(_) | ColumnValue::Decrement(_))
    }
}

/// Increment marker: `col = col + n`.
pub fn inc(n: impl Into<Value>) -> ColumnValue {
    ColumnValue::Increment(n.into())
}

/// Decrement marker: `col = col - n`.
pub fn dec(n: impl Into<Value>) -> ColumnValue {
    ColumnValue::Decrement(n.into())
}

/// SQL function marker with its own `?` parameters.
pub fn func(expr: impl Into<String>, params: Vec<Value>) -> ColumnValue {
    ColumnValue::Func {
        expr: expr.into(),
        params,
    }
}

/// Raw SQL expression marker.
pub fn raw(expr: impl Into<String>) -> ColumnValue {
    ColumnValue::Raw(expr.into())
}

/// `NOW()` marker. Pass `Some("+1 day")` to shift it.
pub fn now(interval: Option<&str>) -> ColumnValue {
    ColumnValue::Now(interval.map(str::to_string))
}

/// Ordered column data for INSERT/UPDATE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowData {
    columns: Vec<(String, ColumnValue)>,
}

impl RowData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column. Setting an existing column replaces its value in place.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.insert(column, value);
        self
    }

    /// Mutable counterpart of [`RowData::set`].
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<ColumnValue>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>, V: Into<ColumnValue>> FromIterator<(K, V)> for RowData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = RowData::new();
        for (k, v) in iter {
            data.insert(k, v);
        }
        data
    }
}

/// Build a [`RowData`] from `column => value` pairs.
///
/// ```ignore
/// use fluentdb::{row, inc, now};
///
/// let data = row! {
///     "username" => "alice",
///     "logins" => inc(1),
///     "updated_at" => now(None),
/// };
/// ```
#[macro_export]
macro_rules! row {
    ($($column:expr => $value:expr),* $(,)?) => {{
        let mut data = $crate::RowData::new();
        $(data.insert($column, $value);)*
        data
    }};
}

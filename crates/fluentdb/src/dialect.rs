//! Backend-specific SQL syntax.
//!
//! The compiler produces dialect-neutral fragments; only placeholders, LIMIT/OFFSET,
//! share locks, `NOW()` intervals and literal quoting differ per backend.

use crate::error::BuilderError;
use crate::value::Value;
use std::fmt::Write;

/// SQL dialect of the connected backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// `?` placeholders, `LIMIT offset, count`, `ON DUPLICATE KEY UPDATE`
    #[default]
    MySql,
    /// `$n` placeholders, `LIMIT count OFFSET offset`, `ON CONFLICT (...) DO UPDATE`
    Postgres,
}

const INTERVAL_UNITS: &[&str] = &["SECOND", "MINUTE", "HOUR", "DAY", "WEEK", "MONTH", "YEAR"];

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Write the placeholder for the `index`-th (1-based) parameter.
    pub(crate) fn write_placeholder(self, out: &mut String, index: usize) {
        match self {
            Dialect::MySql => out.push('?'),
            Dialect::Postgres => {
                out.push('$');
                let _ = write!(out, "{index}");
            }
        }
    }

    /// Render a LIMIT clause (without leading space). Limits are literals, never parameters.
    pub fn limit_clause(self, offset: Option<u64>, count: u64) -> String {
        match (self, offset) {
            (_, None) => format!("LIMIT {count}"),
            (Dialect::MySql, Some(offset)) => format!("LIMIT {offset}, {count}"),
            (Dialect::Postgres, Some(offset)) => format!("LIMIT {count} OFFSET {offset}"),
        }
    }

    pub fn share_lock(self) -> &'static str {
        match self {
            Dialect::MySql => "LOCK IN SHARE MODE",
            Dialect::Postgres => "FOR SHARE",
        }
    }

    pub fn supports_replace(self) -> bool {
        self == Dialect::MySql
    }

    /// Whether UPDATE/DELETE accept ORDER BY / LIMIT / JOIN.
    pub fn supports_mutation_limit(self) -> bool {
        self == Dialect::MySql
    }

    /// `NOW()` optionally shifted by an interval like `"+1 day"`, `"-2 hours"` or `"30 minute"`.
    pub fn now_expr(self, interval: Option<&str>) -> Result<String, BuilderError> {
        let Some(interval) = interval else {
            return Ok("NOW()".to_string());
        };
        let (sign, amount, unit) = parse_interval(interval)?;
        Ok(match self {
            Dialect::MySql => format!("NOW() {sign} INTERVAL {amount} {unit}"),
            Dialect::Postgres => format!("NOW() {sign} INTERVAL '{amount} {unit}'"),
        })
    }

    /// Escape a value as an SQL literal.
    ///
    /// Only for the explicit escape helper; compiled statements always bind parameters.
    pub fn quote_literal(self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Float(v) if v.is_finite() => v.to_string(),
            Value::Float(v) => self.quote_str(&v.to_string()),
            Value::Text(s) => self.quote_str(s),
            Value::Bytes(bytes) => {
                let mut hex = String::with_capacity(bytes.len() * 2);
                for b in bytes {
                    let _ = write!(hex, "{b:02x}");
                }
                match self {
                    Dialect::MySql => format!("X'{hex}'"),
                    Dialect::Postgres => format!("'\\x{hex}'"),
                }
            }
            Value::Json(json) => self.quote_str(&json.to_string()),
            Value::Uuid(v) => self.quote_str(&v.to_string()),
            Value::Date(v) => self.quote_str(&v.to_string()),
            Value::Timestamp(v) => self.quote_str(&v.to_string()),
            Value::TimestampTz(v) => self.quote_str(&v.to_rfc3339()),
        }
    }

    fn quote_str(self, s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('\'');
        for ch in s.chars() {
            match (self, ch) {
                (_, '\'') => out.push_str("''"),
                (Dialect::MySql, '\\') => out.push_str("\\\\"),
                (Dialect::MySql, '\0') => out.push_str("\\0"),
                (_, c) => out.push(c),
            }
        }
        out.push('\'');
        out
    }
}

fn parse_interval(interval: &str) -> Result<(char, u64, &'static str), BuilderError> {
    let s = interval.trim();
    let (sign, rest) = match s.chars().next() {
        Some('-') => ('-', &s[1..]),
        Some('+') => ('+', &s[1..]),
        _ => ('+', s),
    };
    let rest = rest.trim_start();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let amount: u64 = rest[..digits_end]
        .parse()
        .map_err(|_| BuilderError::invalid(format!("invalid interval '{interval}'")))?;
    let unit_text = rest[digits_end..].trim().to_ascii_uppercase();
    let unit_text = unit_text.strip_suffix('S').unwrap_or(&unit_text);
    let unit = INTERVAL_UNITS
        .iter()
        .find(|u| **u == unit_text)
        .ok_or_else(|| BuilderError::invalid(format!("invalid interval unit in '{interval}'")))?;
    Ok((sign, amount, *unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_forms() {
        assert_eq!(Dialect::MySql.limit_clause(None, 10), "LIMIT 10");
        assert_eq!(Dialect::MySql.limit_clause(Some(20), 10), "LIMIT 20, 10");
        assert_eq!(
            Dialect::Postgres.limit_clause(Some(20), 10),
            "LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn placeholders() {
        let mut out = String::new();
        Dialect::MySql.write_placeholder(&mut out, 3);
        Dialect::Postgres.write_placeholder(&mut out, 12);
        assert_eq!(out, "?$12");
    }

    #[test]
    fn now_intervals() {
        assert_eq!(Dialect::MySql.now_expr(None).unwrap(), "NOW()");
        assert_eq!(
            Dialect::MySql.now_expr(Some("+1 day")).unwrap(),
            "NOW() + INTERVAL 1 DAY"
        );
        assert_eq!(
            Dialect::Postgres.now_expr(Some("-2 hours")).unwrap(),
            "NOW() - INTERVAL '2 HOUR'"
        );
        assert!(Dialect::MySql.now_expr(Some("+1 fortnight")).is_err());
        assert!(Dialect::MySql.now_expr(Some("soon")).is_err());
    }

    #[test]
    fn quoting_escapes_per_dialect() {
        let v = Value::from(r"it's a \ test");
        assert_eq!(Dialect::MySql.quote_literal(&v), r"'it''s a \\ test'");
        assert_eq!(Dialect::Postgres.quote_literal(&v), r"'it''s a \ test'");
        assert_eq!(Dialect::MySql.quote_literal(&Value::Null), "NULL");
        assert_eq!(
            Dialect::MySql.quote_literal(&Value::Bytes(vec![0xab, 0x01])),
            "X'ab01'"
        );
    }
}

//! Parameter-safe SQL fragments and compiled statements.
//!
//! [`SqlFragment`] stores SQL pieces and parameters separately; placeholders are only
//! materialized when the fragment is rendered for a [`Dialect`]. Splicing one fragment
//! into another (sub-queries, join conditions) therefore never needs placeholder
//! renumbering, and parameter *i* always belongs to placeholder *i*.

use crate::dialect::Dialect;
use crate::error::BuilderError;
use crate::param::ParamList;
use crate::value::Value;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
enum SqlPart {
    Raw(String),
    Param,
}

/// Where the template scanner is.
#[derive(Clone, Copy)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// An uncompiled SQL fragment with its parameters.
#[derive(Clone, Debug, Default, PartialEq)]
#[must_use]
pub struct SqlFragment {
    parts: Vec<SqlPart>,
    params: ParamList,
}

impl SqlFragment {
    /// Create an empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fragment from raw SQL (no parameters).
    pub fn raw(sql: impl Into<String>) -> Self {
        let mut frag = Self::new();
        frag.parts.push(SqlPart::Raw(sql.into()));
        frag
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| match p {
            SqlPart::Raw(s) => s.is_empty(),
            SqlPart::Param => false,
        })
    }

    /// Append raw SQL (no parameters).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a placeholder and bind its value.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(value);
        self
    }

    /// Append `?, ?, ...` for a non-empty list of values.
    pub fn push_bind_list(&mut self, values: &[Value]) -> Result<&mut Self, BuilderError> {
        if values.is_empty() {
            return Err(BuilderError::invalid("empty value list"));
        }
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push_bind(v.clone());
        }
        Ok(self)
    }

    /// Append another fragment, consuming it. Its parameters follow ours.
    pub fn push_fragment(&mut self, mut other: SqlFragment) -> &mut Self {
        for part in other.parts.drain(..) {
            match part {
                SqlPart::Raw(s) => {
                    self.push(&s);
                }
                SqlPart::Param => self.parts.push(SqlPart::Param),
            }
        }
        self.params.append(&mut other.params);
        self
    }

    /// Append SQL containing `?` placeholders, binding `params` in order.
    ///
    /// A `?` is not a placeholder inside quotes (`'...'`, `"..."`, `` `...` ``) or
    /// comments (`-- ...`, `/* ... */`). Write `??` for a literal `?`, e.g. the
    /// Postgres jsonb operators `??`, `??|` and `??&`. The number of placeholders
    /// must equal `params.len()`.
    pub fn push_template(&mut self, sql: &str, params: &[Value]) -> Result<&mut Self, BuilderError> {
        let mut values = params.iter();
        let mut buf = String::new();
        let mut scan = Scan::Code;
        let mut found = 0usize;
        let mut chars = sql.chars().peekable();
        while let Some(ch) = chars.next() {
            buf.push(ch);
            match scan {
                Scan::Quoted(quote) => {
                    if ch == quote {
                        scan = Scan::Code;
                    }
                }
                Scan::LineComment => {
                    if ch == '\n' {
                        scan = Scan::Code;
                    }
                }
                Scan::BlockComment => {
                    if ch == '*' && chars.next_if_eq(&'/').is_some() {
                        buf.push('/');
                        scan = Scan::Code;
                    }
                }
                Scan::Code => match ch {
                    '\'' | '"' | '`' => scan = Scan::Quoted(ch),
                    '-' => {
                        if chars.next_if_eq(&'-').is_some() {
                            buf.push('-');
                            scan = Scan::LineComment;
                        }
                    }
                    '/' => {
                        if chars.next_if_eq(&'*').is_some() {
                            buf.push('*');
                            scan = Scan::BlockComment;
                        }
                    }
                    '?' => {
                        if chars.next_if_eq(&'?').is_some() {
                            continue;
                        }
                        buf.pop();
                        found += 1;
                        let Some(value) = values.next() else {
                            continue;
                        };
                        self.push(&buf);
                        buf.clear();
                        self.push_bind(value.clone());
                    }
                    _ => {}
                },
            }
        }
        self.push(&buf);
        if found != params.len() {
            return Err(BuilderError::invalid(format!(
                "`{sql}` has {found} placeholder(s) but {} parameter(s) were given",
                params.len()
            )));
        }
        Ok(self)
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[Value] {
        self.params.as_slice()
    }

    /// Render SQL text for a dialect, consuming the fragment.
    pub fn render(self, dialect: Dialect, kind: StatementKind) -> BoundStatement {
        let mut sql = String::new();
        let mut idx = 0usize;
        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => sql.push_str(s),
                SqlPart::Param => {
                    idx += 1;
                    dialect.write_placeholder(&mut sql, idx);
                }
            }
        }
        BoundStatement {
            sql,
            params: self.params.into_vec(),
            kind,
        }
    }
}

/// Statement kind, used for result shaping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    /// Caller-supplied SQL
    Raw,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Raw => "RAW",
        }
    }
}

/// Final SQL text plus its ordered bind parameters.
///
/// The number of placeholders in `sql` equals `params.len()`, and parameter *i* belongs
/// to the *i*-th placeholder from the left.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub kind: StatementKind,
}

impl BoundStatement {
    /// Statement without parameters.
    pub fn new(sql: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind,
        }
    }

    /// Caller-supplied SQL with `?` placeholders, rendered for `dialect`.
    pub fn from_template(
        dialect: Dialect,
        sql: &str,
        params: &[Value],
    ) -> Result<Self, BuilderError> {
        let mut frag = SqlFragment::new();
        frag.push_template(sql, params)?;
        Ok(frag.render(dialect, StatementKind::Raw))
    }

    /// Parameters as references for tokio-postgres.
    pub fn params_ref(&self) -> Vec<&(dyn tokio_postgres::types::ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect()
    }

    /// Whether this statement returns rows.
    pub fn returns_rows(&self) -> bool {
        match self.kind {
            StatementKind::Select => true,
            StatementKind::Raw => {
                let head = crate::sql::leading_keyword(&self.sql);
                matches!(
                    head.as_str(),
                    "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "VALUES" | "PRAGMA"
                ) || contains_keyword(&self.sql, "RETURNING")
            }
            _ => contains_keyword(&self.sql, "RETURNING"),
        }
    }
}

impl fmt::Display for BoundStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// First keyword of a statement, uppercased, skipping whitespace, comments and `(`.
pub(crate) fn leading_keyword(sql: &str) -> String {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            s = rest.find('\n').map_or("", |pos| &rest[pos + 1..]);
            continue;
        }
        if let Some(rest) = s.strip_prefix("/*") {
            s = rest.find("*/").map_or("", |pos| &rest[pos + 2..]);
            continue;
        }
        if let Some(rest) = s.strip_prefix('(') {
            s = rest;
            continue;
        }
        if s == before {
            break;
        }
    }
    s.chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn contains_keyword(sql: &str, keyword: &str) -> bool {
    sql.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word.eq_ignore_ascii_case(keyword))
}

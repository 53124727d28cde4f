//! Builder state and the pure query compiler.
//!
//! [`QueryBuilder`] accumulates WHERE/HAVING/JOIN/GROUP BY/ORDER BY/LIMIT state through
//! fluent calls. Compilation (`compile_*`) is a pure function of that state plus a
//! [`CompileContext`]; it never talks to a driver, so the compiler is fully testable on
//! its own. The facade ([`Database`](crate::Database)) takes the state with
//! `std::mem::take` on every terminal call, which is how the builder resets.
//!
//! ## Clause order
//!
//! - SELECT: `SELECT [options] cols FROM t [JOIN..] [WHERE..] [GROUP BY..] [HAVING..] [ORDER BY..] [LIMIT..] [lock]`
//! - INSERT: `INSERT [options] INTO t (cols) VALUES (..)[, (..)] [upsert] [RETURNING id]`
//! - UPDATE: `UPDATE [options] t [JOIN..] SET .. [WHERE..] [ORDER BY..] [LIMIT..]`
//! - DELETE: `DELETE [options] FROM t [WHERE..] [ORDER BY..] [LIMIT..]`
//!
//! Parameters are appended in the same pass that emits their placeholders, so join
//! parameters precede WHERE parameters, which precede HAVING and ORDER BY parameters.

mod compile;
mod fluent;

pub(crate) use fluent::impl_fluent_methods;

pub use compile::{CompileContext, InsertMode};

use crate::condition::{ConditionList, Connector, Op, Operand};
use crate::dialect::Dialect;
use crate::error::BuilderError;
use crate::sql::{SqlFragment, StatementKind};
use crate::value::{ColumnValue, Value};
use std::fmt;
use std::str::FromStr;

// ─── Clause parts ───────────────────────────────────────────────────────────

/// JOIN kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    /// `FULL OUTER JOIN` (not available on MySQL)
    Full,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
        }
    }
}

impl FromStr for JoinKind {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "INNER" => Ok(JoinKind::Inner),
            "LEFT" | "LEFT OUTER" => Ok(JoinKind::Left),
            "RIGHT" | "RIGHT OUTER" => Ok(JoinKind::Right),
            "FULL" | "FULL OUTER" => Ok(JoinKind::Full),
            _ => Err(BuilderError::invalid(format!("unknown join type '{s}'"))),
        }
    }
}

/// What a JOIN attaches: a table name (prefixed) or an aliased sub-query.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinTarget {
    Table(String),
    SubQuery(SubQuery),
}

impl From<&str> for JoinTarget {
    fn from(v: &str) -> Self {
        JoinTarget::Table(v.to_string())
    }
}

impl From<String> for JoinTarget {
    fn from(v: String) -> Self {
        JoinTarget::Table(v)
    }
}

impl From<SubQuery> for JoinTarget {
    fn from(v: SubQuery) -> Self {
        JoinTarget::SubQuery(v)
    }
}

/// One registered JOIN, kept in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub target: JoinTarget,
    pub kind: JoinKind,
    /// ON condition, may contain `?` placeholders bound to `on_params`
    pub on: String,
    pub on_params: Vec<Value>,
    /// Extra conditions added with `join_where` / `join_or_where`
    pub extra: ConditionList,
}

impl JoinSpec {
    fn matches_table(&self, table: &str) -> bool {
        match &self.target {
            JoinTarget::Table(name) => name == table,
            JoinTarget::SubQuery(sub) => sub.alias() == Some(table),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

impl FromStr for Order {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(Order::Asc),
            "DESC" => Ok(Order::Desc),
            _ => Err(BuilderError::invalid(format!("wrong order direction '{s}'"))),
        }
    }
}

/// One ORDER BY entry, kept in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub expr: String,
    pub direction: Order,
    /// Custom value order: rows whose `expr` equals `values[i]` sort at position `i`
    pub values: Vec<Value>,
}

/// LIMIT clause. Rendered as literal integers, never as parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Limit {
    /// No LIMIT clause
    #[default]
    All,
    Count(u64),
    /// `[offset, count]`
    Range { offset: u64, count: u64 },
}

impl Limit {
    pub fn count(self) -> Option<u64> {
        match self {
            Limit::All => None,
            Limit::Count(count) | Limit::Range { count, .. } => Some(count),
        }
    }

    pub fn offset(self) -> Option<u64> {
        match self {
            Limit::Range { offset, .. } => Some(offset),
            _ => None,
        }
    }

    /// Page `page` (1-based) of `page_size` rows.
    pub fn page(page: u64, page_size: u64) -> Self {
        Limit::Range {
            offset: page.saturating_sub(1).saturating_mul(page_size),
            count: page_size,
        }
    }

    pub(crate) fn is_all(self) -> bool {
        self == Limit::All
    }

    pub(crate) fn render(self, dialect: Dialect) -> Option<String> {
        match self {
            Limit::All => None,
            Limit::Count(count) => Some(dialect.limit_clause(None, count)),
            Limit::Range { offset, count } => Some(dialect.limit_clause(Some(offset), count)),
        }
    }
}

macro_rules! impl_limit_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Limit {
                fn from(count: $ty) -> Self {
                    Limit::Count(u64::try_from(count).unwrap_or(0))
                }
            }

            impl From<($ty, $ty)> for Limit {
                fn from((offset, count): ($ty, $ty)) -> Self {
                    Limit::Range {
                        offset: u64::try_from(offset).unwrap_or(0),
                        count: u64::try_from(count).unwrap_or(0),
                    }
                }
            }

            impl From<[$ty; 2]> for Limit {
                fn from([offset, count]: [$ty; 2]) -> Self {
                    Limit::from((offset, count))
                }
            }
        )*
    };
}

impl_limit_from!(i32, i64, u32, u64, usize);

impl<T: Into<Limit>> From<Option<T>> for Limit {
    fn from(v: Option<T>) -> Self {
        v.map_or(Limit::All, Into::into)
    }
}

/// Row lock appended to a SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    ForUpdate,
    /// MySQL `LOCK IN SHARE MODE`, Postgres `FOR SHARE`
    Shared,
}

/// Statement keyword options (`SQL_NO_CACHE`, `DISTINCT`, `IGNORE`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOption {
    All,
    Distinct,
    DistinctRow,
    HighPriority,
    LowPriority,
    StraightJoin,
    SqlSmallResult,
    SqlBigResult,
    SqlBufferResult,
    SqlCache,
    SqlNoCache,
    Ignore,
    Quick,
}

impl QueryOption {
    pub fn as_sql(self) -> &'static str {
        match self {
            QueryOption::All => "ALL",
            QueryOption::Distinct => "DISTINCT",
            QueryOption::DistinctRow => "DISTINCTROW",
            QueryOption::HighPriority => "HIGH_PRIORITY",
            QueryOption::LowPriority => "LOW_PRIORITY",
            QueryOption::StraightJoin => "STRAIGHT_JOIN",
            QueryOption::SqlSmallResult => "SQL_SMALL_RESULT",
            QueryOption::SqlBigResult => "SQL_BIG_RESULT",
            QueryOption::SqlBufferResult => "SQL_BUFFER_RESULT",
            QueryOption::SqlCache => "SQL_CACHE",
            QueryOption::SqlNoCache => "SQL_NO_CACHE",
            QueryOption::Ignore => "IGNORE",
            QueryOption::Quick => "QUICK",
        }
    }

    /// Whether the option is spliced into statements of this kind.
    pub fn applies_to(self, kind: StatementKind) -> bool {
        use QueryOption::*;
        match kind {
            StatementKind::Select => !matches!(self, LowPriority | Ignore | Quick),
            StatementKind::Insert => matches!(self, LowPriority | HighPriority | Ignore),
            StatementKind::Update => matches!(self, LowPriority | Ignore),
            StatementKind::Delete => matches!(self, LowPriority | Quick | Ignore),
            StatementKind::Raw => false,
        }
    }

    pub fn supported_by(self, dialect: Dialect) -> bool {
        match dialect {
            Dialect::MySql => true,
            Dialect::Postgres => matches!(self, QueryOption::All | QueryOption::Distinct),
        }
    }
}

/// Parsed form of a `set_query_option` string.
enum OptionKind {
    Keyword(QueryOption),
    Lock(Lock),
    TotalCount,
}

fn parse_query_option(s: &str) -> Result<OptionKind, BuilderError> {
    use QueryOption::*;
    let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let kind = match normalized.to_ascii_uppercase().as_str() {
        "ALL" => OptionKind::Keyword(All),
        "DISTINCT" => OptionKind::Keyword(Distinct),
        "DISTINCTROW" => OptionKind::Keyword(DistinctRow),
        "HIGH_PRIORITY" => OptionKind::Keyword(HighPriority),
        "LOW_PRIORITY" => OptionKind::Keyword(LowPriority),
        "STRAIGHT_JOIN" => OptionKind::Keyword(StraightJoin),
        "SQL_SMALL_RESULT" => OptionKind::Keyword(SqlSmallResult),
        "SQL_BIG_RESULT" => OptionKind::Keyword(SqlBigResult),
        "SQL_BUFFER_RESULT" => OptionKind::Keyword(SqlBufferResult),
        "SQL_CACHE" => OptionKind::Keyword(SqlCache),
        "SQL_NO_CACHE" => OptionKind::Keyword(SqlNoCache),
        "IGNORE" => OptionKind::Keyword(Ignore),
        "QUICK" => OptionKind::Keyword(Quick),
        "SQL_CALC_FOUND_ROWS" => OptionKind::TotalCount,
        "FOR UPDATE" => OptionKind::Lock(Lock::ForUpdate),
        "LOCK IN SHARE MODE" | "FOR SHARE" => OptionKind::Lock(Lock::Shared),
        _ => return Err(BuilderError::invalid(format!("wrong query option '{s}'"))),
    };
    Ok(kind)
}

/// Upsert column: either the value the row inserts, or an explicit replacement.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertColumn {
    /// Update `column` with the value being inserted
    Inserted(String),
    /// Update `column` with the given value marker
    Set(String, ColumnValue),
}

impl UpsertColumn {
    pub fn column(&self) -> &str {
        match self {
            UpsertColumn::Inserted(c) | UpsertColumn::Set(c, _) => c,
        }
    }
}

/// ON DUPLICATE KEY UPDATE / ON CONFLICT DO UPDATE state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Upsert {
    pub columns: Vec<UpsertColumn>,
    /// MySQL: `col = LAST_INSERT_ID(col)` so the updated row's id is reported
    pub insert_id_column: Option<String>,
    /// Postgres conflict target columns
    pub conflict_target: Vec<String>,
}

// ─── Sub-queries ────────────────────────────────────────────────────────────

/// A compiled SELECT used inside another statement.
///
/// Holds a dialect-neutral fragment, so its parameters splice into the outer statement
/// at the position its SQL text appears.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    fragment: SqlFragment,
    alias: Option<String>,
}

impl SubQuery {
    pub fn fragment(&self) -> &SqlFragment {
        &self.fragment
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn params(&self) -> &[Value] {
        self.fragment.params()
    }
}

/// Builder that compiles to a [`SubQuery`] instead of executing.
///
/// ```ignore
/// let active = db.sub_query(None);
/// let ids = active.where_("active", true).get("users", Limit::All, &["id"])?;
/// let rows = db.where_op("user_id", Op::In, ids).get("orders", Limit::All, &[]).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SubQueryBuilder {
    state: QueryBuilder,
    dialect: Dialect,
    prefix: String,
    alias: Option<String>,
}

impl SubQueryBuilder {
    pub fn new(dialect: Dialect, alias: Option<&str>) -> Self {
        Self {
            state: QueryBuilder::default(),
            dialect,
            prefix: String::new(),
            alias: alias.map(str::to_string),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn state_mut(&mut self) -> &mut QueryBuilder {
        &mut self.state
    }

    impl_fluent_methods!();

    /// Compile the accumulated SELECT into a sub-query. Resets this builder.
    pub fn get(
        &mut self,
        table: &str,
        limit: impl Into<Limit>,
        columns: &[&str],
    ) -> Result<SubQuery, BuilderError> {
        let state = std::mem::take(&mut self.state);
        let ctx = CompileContext::new(self.dialect).with_prefix(&self.prefix);
        let fragment = state.select_fragment(&ctx, table, columns, limit.into())?;
        Ok(SubQuery {
            fragment,
            alias: self.alias.clone(),
        })
    }
}

// ─── Builder state ──────────────────────────────────────────────────────────

/// Accumulated, uncompiled statement state.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    pub(crate) wheres: ConditionList,
    pub(crate) having: ConditionList,
    pub(crate) joins: Vec<JoinSpec>,
    pub(crate) group_by: Vec<String>,
    pub(crate) order_by: Vec<OrderSpec>,
    pub(crate) limit: Limit,
    pub(crate) options: Vec<QueryOption>,
    pub(crate) lock: Option<Lock>,
    pub(crate) with_total_count: bool,
    pub(crate) upsert: Option<Upsert>,
    pub(crate) allow_full_table: bool,
    pub(crate) build_error: Option<BuilderError>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no clause has been declared.
    pub fn is_empty(&self) -> bool {
        self.wheres.is_empty()
            && self.having.is_empty()
            && self.joins.is_empty()
            && self.group_by.is_empty()
            && self.order_by.is_empty()
            && self.limit.is_all()
            && self.options.is_empty()
            && self.lock.is_none()
            && !self.with_total_count
            && self.upsert.is_none()
            && !self.allow_full_table
            && self.build_error.is_none()
    }

    pub fn wants_total_count(&self) -> bool {
        self.with_total_count
    }

    fn state_mut(&mut self) -> &mut QueryBuilder {
        self
    }

    impl_fluent_methods!();

    /// Record the first build error; it is reported by the next terminal call.
    pub(crate) fn fail(&mut self, err: BuilderError) {
        if self.build_error.is_none() {
            self.build_error = Some(err);
        }
    }

    fn join_mut(&mut self, table: &str) -> Option<&mut JoinSpec> {
        self.joins.iter_mut().find(|j| j.matches_table(table))
    }

    fn upsert_mut(&mut self) -> &mut Upsert {
        self.upsert.get_or_insert_with(Upsert::default)
    }

    pub(crate) fn add_join_condition(
        &mut self,
        connector: Connector,
        table: &str,
        column: String,
        op: Op,
        operand: Operand,
    ) {
        match self.join_mut(table) {
            Some(join) => join.extra.push_leaf(connector, column, op, operand),
            None => self.fail(BuilderError::invalid(format!(
                "join_where on '{table}' which has no registered join"
            ))),
        }
    }

    pub(crate) fn apply_query_option(&mut self, option: &str) {
        match parse_query_option(option) {
            Ok(OptionKind::Keyword(opt)) => {
                if !self.options.contains(&opt) {
                    self.options.push(opt);
                }
            }
            Ok(OptionKind::Lock(lock)) => self.lock = Some(lock),
            Ok(OptionKind::TotalCount) => self.with_total_count = true,
            Err(err) => self.fail(err),
        }
    }

    pub(crate) fn set_upsert_columns(&mut self, columns: &[&str]) {
        let upsert = self.upsert_mut();
        for column in columns {
            upsert.columns.retain(|c| c.column() != *column);
            upsert
                .columns
                .push(UpsertColumn::Inserted((*column).to_string()));
        }
    }

    pub(crate) fn set_upsert_value(&mut self, column: String, value: ColumnValue) {
        let upsert = self.upsert_mut();
        upsert.columns.retain(|c| c.column() != column);
        upsert.columns.push(UpsertColumn::Set(column, value));
    }

    pub(crate) fn set_upsert_insert_id(&mut self, column: String) {
        self.upsert_mut().insert_id_column = Some(column);
    }

    pub(crate) fn set_conflict_target(&mut self, columns: &[&str]) {
        self.upsert_mut().conflict_target = columns.iter().map(|c| c.to_string()).collect();
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::All => f.write_str("all"),
            Limit::Count(count) => write!(f, "{count}"),
            Limit::Range { offset, count } => write!(f, "{offset}, {count}"),
        }
    }
}

#[cfg(test)]
mod tests;

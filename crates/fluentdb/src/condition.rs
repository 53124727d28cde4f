//! WHERE/HAVING condition trees.
//!
//! A [`ConditionList`] is an ordered list of `(connector, node)` pairs where a node is a
//! column comparison, a raw SQL template, or a nested group. Compiling a list appends SQL
//! and bind parameters to one [`SqlFragment`] in a single left-to-right pass, so the
//! parameter order always matches placeholder order.
//!
//! ```ignore
//! use fluentdb::{ConditionList, Op};
//!
//! // status = ? AND (age > ? OR vip = ?) AND id IN (?, ?, ?)
//! let cond = ConditionList::new()
//!     .and("status", "active")
//!     .and_group(|g| g.and_op("age", Op::Gt, 18).or("vip", true))
//!     .and_op("id", Op::In, vec![1, 2, 3]);
//! ```

use crate::builder::SubQuery;
use crate::error::BuilderError;
use crate::sql::SqlFragment;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    /// `IN (...)`: a non-empty list or a sub-query
    In,
    NotIn,
    /// `BETWEEN ? AND ?`: exactly two values
    Between,
    NotBetween,
    /// No value allowed
    IsNull,
    IsNotNull,
    /// `EXISTS (sub-query)`; the column is ignored
    Exists,
    NotExists,
}

impl Op {
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
            Op::Between => "BETWEEN",
            Op::NotBetween => "NOT BETWEEN",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
            Op::Exists => "EXISTS",
            Op::NotExists => "NOT EXISTS",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for Op {
    type Err = BuilderError;

    /// Parse an operator such as `">="`, `"not in"` or `"<>"` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        let op = match normalized.to_ascii_uppercase().as_str() {
            "=" => Op::Eq,
            "!=" | "<>" => Op::Ne,
            ">" => Op::Gt,
            ">=" => Op::Gte,
            "<" => Op::Lt,
            "<=" => Op::Lte,
            "LIKE" => Op::Like,
            "NOT LIKE" => Op::NotLike,
            "IN" => Op::In,
            "NOT IN" => Op::NotIn,
            "BETWEEN" => Op::Between,
            "NOT BETWEEN" => Op::NotBetween,
            "IS NULL" | "IS" => Op::IsNull,
            "IS NOT NULL" | "IS NOT" => Op::IsNotNull,
            "EXISTS" => Op::Exists,
            "NOT EXISTS" => Op::NotExists,
            _ => return Err(BuilderError::invalid(format!("unknown operator '{s}'"))),
        };
        Ok(op)
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No value (`IS NULL`, `IS NOT NULL`)
    None,
    Value(Value),
    List(Vec<Value>),
    /// Spliced verbatim, never parameterized
    Raw(String),
    SubQuery(SubQuery),
}

impl Operand {
    /// Raw SQL operand, e.g. `Operand::raw("NOW()")`.
    pub fn raw(sql: impl Into<String>) -> Self {
        Operand::Raw(sql.into())
    }

    pub fn list<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        Operand::List(values.into_iter().map(Into::into).collect())
    }

    fn kind(&self) -> &'static str {
        match self {
            Operand::None => "no value",
            Operand::Value(_) => "a single value",
            Operand::List(_) => "a list",
            Operand::Raw(_) => "a raw expression",
            Operand::SubQuery(_) => "a sub-query",
        }
    }
}

macro_rules! impl_operand_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

// `Vec<u8>` is deliberately absent: a `Vec` operand is always a list.
impl_operand_from!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    Decimal,
    &str,
    String,
    &String,
    serde_json::Value,
    Uuid,
    NaiveDate,
    NaiveDateTime,
    DateTime<Utc>,
);

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Operand {
    fn from(v: Option<T>) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(v: Vec<T>) -> Self {
        Operand::list(v)
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Operand {
    fn from(v: [T; N]) -> Self {
        Operand::list(v)
    }
}

impl From<()> for Operand {
    fn from(_: ()) -> Self {
        Operand::None
    }
}

impl From<SubQuery> for Operand {
    fn from(v: SubQuery) -> Self {
        Operand::SubQuery(v)
    }
}

/// Boolean connector placed before a condition. Ignored for the first condition of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ConditionNode {
    Leaf {
        column: String,
        op: Op,
        operand: Operand,
    },
    Raw {
        sql: String,
        params: Vec<Value>,
    },
    Group(ConditionList),
}

/// Ordered list of conditions joined by AND/OR.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use]
pub struct ConditionList {
    items: Vec<(Connector, ConditionNode)>,
}

impl ConditionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn first_connector(&self) -> Option<Connector> {
        self.items.first().map(|(connector, _)| *connector)
    }

    /// `AND column = value`
    pub fn and(self, column: impl Into<String>, value: impl Into<Operand>) -> Self {
        self.and_op(column, Op::Eq, value)
    }

    /// `OR column = value`
    pub fn or(self, column: impl Into<String>, value: impl Into<Operand>) -> Self {
        self.or_op(column, Op::Eq, value)
    }

    /// `AND column <op> value`
    pub fn and_op(mut self, column: impl Into<String>, op: Op, value: impl Into<Operand>) -> Self {
        self.push_leaf(Connector::And, column, op, value);
        self
    }

    /// `OR column <op> value`
    pub fn or_op(mut self, column: impl Into<String>, op: Op, value: impl Into<Operand>) -> Self {
        self.push_leaf(Connector::Or, column, op, value);
        self
    }

    /// `AND <sql>`, where `sql` may contain `?` placeholders bound to `params`.
    pub fn and_raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.push_raw(Connector::And, sql, params);
        self
    }

    pub fn or_raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.push_raw(Connector::Or, sql, params);
        self
    }

    /// `AND ( ... )`
    pub fn and_group(mut self, f: impl FnOnce(ConditionList) -> ConditionList) -> Self {
        self.push_group(Connector::And, f(ConditionList::new()));
        self
    }

    /// `OR ( ... )`
    pub fn or_group(mut self, f: impl FnOnce(ConditionList) -> ConditionList) -> Self {
        self.push_group(Connector::Or, f(ConditionList::new()));
        self
    }

    pub(crate) fn push_leaf(
        &mut self,
        connector: Connector,
        column: impl Into<String>,
        op: Op,
        value: impl Into<Operand>,
    ) {
        self.items.push((
            connector,
            ConditionNode::Leaf {
                column: column.into(),
                op,
                operand: value.into(),
            },
        ));
    }

    pub(crate) fn push_raw(&mut self, connector: Connector, sql: impl Into<String>, params: Vec<Value>) {
        self.items.push((
            connector,
            ConditionNode::Raw {
                sql: sql.into(),
                params,
            },
        ));
    }

    pub(crate) fn push_group(&mut self, connector: Connector, group: ConditionList) {
        self.items.push((connector, ConditionNode::Group(group)));
    }

    /// Append the compiled conditions (without a leading keyword) to `out`.
    pub fn compile_into(&self, out: &mut SqlFragment) -> Result<(), BuilderError> {
        for (i, (connector, node)) in self.items.iter().enumerate() {
            if i > 0 {
                out.push(" ");
                out.push(connector.as_sql());
                out.push(" ");
            }
            match node {
                ConditionNode::Leaf {
                    column,
                    op,
                    operand,
                } => compile_leaf(column, *op, operand, out)?,
                ConditionNode::Raw { sql, params } => {
                    out.push_template(sql, params)?;
                }
                ConditionNode::Group(group) => {
                    if group.is_empty() {
                        return Err(BuilderError::invalid("empty condition group"));
                    }
                    out.push("(");
                    group.compile_into(out)?;
                    out.push(")");
                }
            }
        }
        Ok(())
    }

    /// Compile into a standalone fragment.
    pub fn compile(&self) -> Result<SqlFragment, BuilderError> {
        let mut out = SqlFragment::new();
        self.compile_into(&mut out)?;
        Ok(out)
    }
}

fn compile_leaf(column: &str, op: Op, operand: &Operand, out: &mut SqlFragment) -> Result<(), BuilderError> {
    let arity_error = || {
        BuilderError::invalid(format!(
            "operator {op} on '{column}' does not accept {}",
            operand.kind()
        ))
    };

    if matches!(op, Op::Exists | Op::NotExists) {
        let Operand::SubQuery(sub) = operand else {
            return Err(arity_error());
        };
        out.push(op.as_sql()).push(" (");
        out.push_fragment(sub.fragment().clone());
        out.push(")");
        return Ok(());
    }

    let column = column.trim();
    if column.is_empty() {
        return Err(BuilderError::invalid(format!("operator {op} requires a column")));
    }
    out.push(column).push(" ").push(op.as_sql());

    match (op, operand) {
        (Op::IsNull | Op::IsNotNull, Operand::None) => {}
        (Op::IsNull | Op::IsNotNull, _) => return Err(arity_error()),

        (Op::In | Op::NotIn, Operand::List(values)) => {
            if values.is_empty() {
                return Err(BuilderError::invalid(format!(
                    "{op} on '{column}' requires a non-empty list"
                )));
            }
            out.push(" (");
            out.push_bind_list(values)?;
            out.push(")");
        }
        (Op::Between | Op::NotBetween, Operand::List(values)) => {
            let [from, to] = values.as_slice() else {
                return Err(BuilderError::invalid(format!(
                    "{op} on '{column}' requires exactly 2 values, got {}",
                    values.len()
                )));
            };
            out.push(" ").push_bind(from.clone());
            out.push(" AND ").push_bind(to.clone());
        }
        (Op::Between | Op::NotBetween, _) => return Err(arity_error()),

        (_, Operand::Value(value)) if !matches!(op, Op::In | Op::NotIn) => {
            out.push(" ").push_bind(value.clone());
        }
        (_, Operand::Raw(sql)) => {
            if matches!(op, Op::In | Op::NotIn) {
                out.push(" (").push(sql).push(")");
            } else {
                out.push(" ").push(sql);
            }
        }
        (_, Operand::SubQuery(sub)) => {
            out.push(" (");
            out.push_fragment(sub.fragment().clone());
            out.push(")");
        }
        _ => return Err(arity_error()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::sql::StatementKind;

    fn render(list: &ConditionList) -> (String, Vec<Value>) {
        let stmt = list
            .compile()
            .unwrap()
            .render(Dialect::MySql, StatementKind::Select);
        (stmt.sql, stmt.params)
    }

    #[test]
    fn parses_operators() {
        assert_eq!("not  in".parse::<Op>().unwrap(), Op::NotIn);
        assert_eq!("<>".parse::<Op>().unwrap(), Op::Ne);
        assert_eq!("between".parse::<Op>().unwrap(), Op::Between);
        assert!("~~".parse::<Op>().is_err());
    }

    #[test]
    fn first_connector_is_ignored() {
        let list = ConditionList::new().or("a", 1).and("b", 2);
        assert_eq!(render(&list).0, "a = ? AND b = ?");
    }

    #[test]
    fn groups_are_parenthesized_in_order() {
        let list = ConditionList::new()
            .and("status", "active")
            .and_group(|g| g.and_op("age", Op::Gt, 18).or("vip", true))
            .or_op("id", Op::In, vec![7, 8, 9]);
        let (sql, params) = render(&list);
        assert_eq!(
            sql,
            "status = ? AND (age > ? OR vip = ?) OR id IN (?, ?, ?)"
        );
        assert_eq!(
            params,
            vec![
                Value::from("active"),
                Value::Int(18),
                Value::Bool(true),
                Value::Int(7),
                Value::Int(8),
                Value::Int(9),
            ]
        );
    }

    #[test]
    fn empty_in_list_is_rejected() {
        let list = ConditionList::new().and_op("id", Op::In, Vec::<i64>::new());
        assert!(matches!(
            list.compile(),
            Err(BuilderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn between_requires_a_pair() {
        let ok = ConditionList::new().and_op("age", Op::Between, [18, 30]);
        assert_eq!(render(&ok).0, "age BETWEEN ? AND ?");

        let bad = ConditionList::new().and_op("age", Op::Between, [18, 30, 40]);
        assert!(bad.compile().is_err());
        let bad = ConditionList::new().and_op("age", Op::Between, 18);
        assert!(bad.compile().is_err());
    }

    #[test]
    fn is_null_forbids_a_value() {
        let ok = ConditionList::new().and_op("deleted_at", Op::IsNull, ());
        assert_eq!(render(&ok).0, "deleted_at IS NULL");

        let bad = ConditionList::new().and_op("deleted_at", Op::IsNull, 1);
        assert!(bad.compile().is_err());
    }

    #[test]
    fn raw_operands_bypass_parameters() {
        let list = ConditionList::new()
            .and_op("created_at", Op::Lt, Operand::raw("NOW()"))
            .and_raw("LOWER(email) = LOWER(?)", vec![Value::from("A@B.C")]);
        let (sql, params) = render(&list);
        assert_eq!(sql, "created_at < NOW() AND LOWER(email) = LOWER(?)");
        assert_eq!(params, vec![Value::from("A@B.C")]);
    }

    #[test]
    fn empty_group_is_rejected() {
        let list = ConditionList::new().and_group(|g| g);
        assert!(list.compile().is_err());
    }
}

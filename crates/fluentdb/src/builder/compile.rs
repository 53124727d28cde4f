//! Clause assemblers and the statement compiler.

use super::{JoinKind, JoinTarget, Limit, Lock, QueryBuilder, Upsert, UpsertColumn};
use crate::dialect::Dialect;
use crate::error::BuilderError;
use crate::sql::{BoundStatement, SqlFragment, StatementKind};
use crate::value::{ColumnValue, RowData, Value};

/// Everything the compiler needs besides the builder state.
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub dialect: Dialect,
    /// Prepended to the statement table and to joined tables
    pub prefix: &'a str,
    /// Postgres: single-row inserts end in `RETURNING *` so this column can be read
    /// back as the insert id. Tables without it simply report no id.
    pub insert_id_column: Option<&'a str>,
    /// Compile WHERE-less UPDATE/DELETE without `allow_full_table()`
    pub allow_unfiltered: bool,
}

impl<'a> CompileContext<'a> {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            prefix: "",
            insert_id_column: None,
            allow_unfiltered: false,
        }
    }

    pub fn with_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn with_insert_id_column(mut self, column: Option<&'a str>) -> Self {
        self.insert_id_column = column;
        self
    }

    pub fn allow_unfiltered(mut self, allow: bool) -> Self {
        self.allow_unfiltered = allow;
        self
    }

    fn table(&self, table: &str) -> Result<String, BuilderError> {
        let table = table.trim();
        if table.is_empty() {
            return Err(BuilderError::invalid("table name is empty"));
        }
        Ok(format!("{}{}", self.prefix, table))
    }

    fn unsupported(&self, what: &str) -> BuilderError {
        BuilderError::invalid(format!("{what} is not supported by {}", self.dialect.name()))
    }
}

/// INSERT flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    /// MySQL `REPLACE INTO`
    Replace,
}

impl InsertMode {
    fn keyword(self) -> &'static str {
        match self {
            InsertMode::Insert => "INSERT",
            InsertMode::Replace => "REPLACE",
        }
    }
}

impl QueryBuilder {
    /// Compile a SELECT. A non-`All` `limit` overrides the one set with `.limit()`.
    pub fn compile_select(
        &self,
        ctx: &CompileContext<'_>,
        table: &str,
        columns: &[&str],
        limit: Limit,
    ) -> Result<BoundStatement, BuilderError> {
        let frag = self.select_fragment(ctx, table, columns, limit)?;
        Ok(frag.render(ctx.dialect, StatementKind::Select))
    }

    /// Compile the statement reporting the total row count of the last SELECT.
    ///
    /// MySQL reads `FOUND_ROWS()` (the SELECT carries `SQL_CALC_FOUND_ROWS`); Postgres
    /// counts over the same FROM/JOIN/WHERE/GROUP BY/HAVING.
    pub fn compile_count(
        &self,
        ctx: &CompileContext<'_>,
        table: &str,
    ) -> Result<BoundStatement, BuilderError> {
        self.check()?;
        if ctx.dialect == Dialect::MySql {
            return Ok(BoundStatement::new("SELECT FOUND_ROWS()", StatementKind::Select));
        }
        let mut out = SqlFragment::raw("SELECT COUNT(*) FROM (SELECT 1 FROM ");
        out.push(&ctx.table(table)?);
        self.push_joins(ctx, &mut out)?;
        self.push_where(&mut out)?;
        self.push_group_having(&mut out)?;
        out.push(") AS total_rows");
        Ok(out.render(ctx.dialect, StatementKind::Select))
    }

    pub(crate) fn select_fragment(
        &self,
        ctx: &CompileContext<'_>,
        table: &str,
        columns: &[&str],
        limit: Limit,
    ) -> Result<SqlFragment, BuilderError> {
        self.check()?;
        let mut out = SqlFragment::raw("SELECT");
        self.push_options(ctx, StatementKind::Select, &mut out)?;
        if self.with_total_count && ctx.dialect == Dialect::MySql {
            out.push(" SQL_CALC_FOUND_ROWS");
        }
        out.push(" ");
        if columns.is_empty() {
            out.push("*");
        } else {
            out.push(&columns.join(", "));
        }
        out.push(" FROM ").push(&ctx.table(table)?);
        self.push_joins(ctx, &mut out)?;
        self.push_where(&mut out)?;
        self.push_group_having(&mut out)?;
        self.push_order_by(&mut out)?;
        self.push_limit(ctx, limit, &mut out);
        if let Some(lock) = self.lock {
            out.push(" ").push(match lock {
                Lock::ForUpdate => "FOR UPDATE",
                Lock::Shared => ctx.dialect.share_lock(),
            });
        }
        Ok(out)
    }

    /// Compile a single- or multi-row INSERT (or REPLACE).
    ///
    /// Every row must carry the same column set as the first; rows are emitted in input
    /// order with columns in the first row's order.
    pub fn compile_insert(
        &self,
        ctx: &CompileContext<'_>,
        table: &str,
        rows: &[RowData],
        mode: InsertMode,
    ) -> Result<BoundStatement, BuilderError> {
        self.check()?;
        let statement = mode.keyword();
        if mode == InsertMode::Replace && !ctx.dialect.supports_replace() {
            return Err(ctx.unsupported("REPLACE"));
        }
        let Some(first) = rows.first().filter(|row| !row.is_empty()) else {
            return Err(BuilderError::EmptyData { statement });
        };
        let columns: Vec<&str> = first.columns().collect();

        let target = ctx.table(table)?;
        let mut out = SqlFragment::raw(statement);
        self.push_options(ctx, StatementKind::Insert, &mut out)?;
        out.push(" INTO ").push(&target);
        out.push(" (").push(&columns.join(", ")).push(") VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(schema_mismatch(i, &columns, row));
            }
            if i > 0 {
                out.push(", ");
            }
            out.push("(");
            for (j, column) in columns.iter().enumerate() {
                let Some(value) = row.get(column) else {
                    return Err(schema_mismatch(i, &columns, row));
                };
                if j > 0 {
                    out.push(", ");
                }
                push_column_value(ctx, column, value, Existing::Forbidden, &mut out)?;
            }
            out.push(")");
        }

        if let Some(upsert) = &self.upsert {
            if mode == InsertMode::Replace {
                return Err(BuilderError::invalid("REPLACE cannot be combined with on_duplicate"));
            }
            push_upsert(ctx, &target, upsert, rows, &mut out)?;
        }

        if mode == InsertMode::Insert && ctx.dialect == Dialect::Postgres && rows.len() == 1 {
            if ctx.insert_id_column.is_some() {
                out.push(" RETURNING *");
            }
        }
        Ok(out.render(ctx.dialect, StatementKind::Insert))
    }

    /// Compile an UPDATE. Refuses to run without WHERE unless opted in.
    pub fn compile_update(
        &self,
        ctx: &CompileContext<'_>,
        table: &str,
        data: &RowData,
        limit: Limit,
    ) -> Result<BoundStatement, BuilderError> {
        self.check()?;
        if data.is_empty() {
            return Err(BuilderError::EmptyData { statement: "UPDATE" });
        }
        self.check_filtered(ctx, "UPDATE")?;
        let limit = self.effective_limit(limit);
        self.check_mutation_clauses(ctx, "UPDATE", limit)?;

        let mut out = SqlFragment::raw("UPDATE");
        self.push_options(ctx, StatementKind::Update, &mut out)?;
        out.push(" ").push(&ctx.table(table)?);
        self.push_joins(ctx, &mut out)?;
        out.push(" SET ");
        for (i, (column, value)) in data.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.push(column).push(" = ");
            push_column_value(ctx, column, value, Existing::Column, &mut out)?;
        }
        self.push_where(&mut out)?;
        self.push_order_by(&mut out)?;
        self.push_limit(ctx, limit, &mut out);
        Ok(out.render(ctx.dialect, StatementKind::Update))
    }

    /// Compile a DELETE. Refuses to run without WHERE unless opted in.
    pub fn compile_delete(
        &self,
        ctx: &CompileContext<'_>,
        table: &str,
        limit: Limit,
    ) -> Result<BoundStatement, BuilderError> {
        self.check()?;
        self.check_filtered(ctx, "DELETE")?;
        let limit = self.effective_limit(limit);
        self.check_mutation_clauses(ctx, "DELETE", limit)?;

        let table = ctx.table(table)?;
        let mut out = SqlFragment::raw("DELETE");
        self.push_options(ctx, StatementKind::Delete, &mut out)?;
        if !self.joins.is_empty() {
            // Multi-table form: delete from the statement table (or its alias) only.
            let target = table.split_whitespace().last().unwrap_or(&table);
            out.push(" ").push(target);
        }
        out.push(" FROM ").push(&table);
        self.push_joins(ctx, &mut out)?;
        self.push_where(&mut out)?;
        self.push_order_by(&mut out)?;
        self.push_limit(ctx, limit, &mut out);
        Ok(out.render(ctx.dialect, StatementKind::Delete))
    }

    // ── Assemblers ──

    fn check(&self) -> Result<(), BuilderError> {
        match &self.build_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn check_filtered(&self, ctx: &CompileContext<'_>, statement: &'static str) -> Result<(), BuilderError> {
        if self.wheres.is_empty() && !self.allow_full_table && !ctx.allow_unfiltered {
            return Err(BuilderError::MissingWhere { statement });
        }
        Ok(())
    }

    fn check_mutation_clauses(
        &self,
        ctx: &CompileContext<'_>,
        statement: &str,
        limit: Limit,
    ) -> Result<(), BuilderError> {
        if ctx.dialect.supports_mutation_limit() {
            return Ok(());
        }
        if !self.joins.is_empty() {
            return Err(ctx.unsupported(&format!("{statement} with JOIN")));
        }
        if !self.order_by.is_empty() || !limit.is_all() {
            return Err(ctx.unsupported(&format!("{statement} with ORDER BY/LIMIT")));
        }
        Ok(())
    }

    fn effective_limit(&self, limit: Limit) -> Limit {
        if limit.is_all() { self.limit } else { limit }
    }

    fn push_options(
        &self,
        ctx: &CompileContext<'_>,
        kind: StatementKind,
        out: &mut SqlFragment,
    ) -> Result<(), BuilderError> {
        for option in self.options.iter().filter(|o| o.applies_to(kind)) {
            if !option.supported_by(ctx.dialect) {
                return Err(ctx.unsupported(&format!("query option {}", option.as_sql())));
            }
            out.push(" ").push(option.as_sql());
        }
        Ok(())
    }

    fn push_joins(&self, ctx: &CompileContext<'_>, out: &mut SqlFragment) -> Result<(), BuilderError> {
        for join in &self.joins {
            if join.kind == JoinKind::Full && ctx.dialect == Dialect::MySql {
                return Err(ctx.unsupported("FULL OUTER JOIN"));
            }
            out.push(" ").push(join.kind.as_sql()).push(" ");
            match &join.target {
                JoinTarget::Table(name) => {
                    out.push(&ctx.table(name)?);
                }
                JoinTarget::SubQuery(sub) => {
                    let Some(alias) = sub.alias() else {
                        return Err(BuilderError::invalid("a joined sub-query needs an alias"));
                    };
                    out.push("(").push_fragment(sub.fragment().clone());
                    out.push(") ").push(alias);
                }
            }
            if join.on.trim().is_empty() {
                return Err(BuilderError::invalid("JOIN requires an ON condition"));
            }
            out.push(" ON ");
            match join.extra.first_connector() {
                None => {
                    out.push_template(&join.on, &join.on_params)?;
                }
                Some(connector) => {
                    out.push("(");
                    out.push_template(&join.on, &join.on_params)?;
                    out.push(") ").push(connector.as_sql()).push(" ");
                    join.extra.compile_into(out)?;
                }
            }
        }
        Ok(())
    }

    fn push_where(&self, out: &mut SqlFragment) -> Result<(), BuilderError> {
        if !self.wheres.is_empty() {
            out.push(" WHERE ");
            self.wheres.compile_into(out)?;
        }
        Ok(())
    }

    fn push_group_having(&self, out: &mut SqlFragment) -> Result<(), BuilderError> {
        if !self.group_by.is_empty() {
            out.push(" GROUP BY ").push(&self.group_by.join(", "));
        }
        if !self.having.is_empty() {
            out.push(" HAVING ");
            self.having.compile_into(out)?;
        }
        Ok(())
    }

    fn push_order_by(&self, out: &mut SqlFragment) -> Result<(), BuilderError> {
        for (i, order) in self.order_by.iter().enumerate() {
            out.push(if i == 0 { " ORDER BY " } else { ", " });
            if order.expr.trim().is_empty() {
                return Err(BuilderError::invalid("ORDER BY expression is empty"));
            }
            if order.values.is_empty() {
                out.push(&order.expr);
            } else {
                out.push("CASE ").push(&order.expr);
                for (pos, value) in order.values.iter().enumerate() {
                    out.push(" WHEN ").push_bind(value.clone());
                    out.push(&format!(" THEN {pos}"));
                }
                out.push(&format!(" ELSE {} END", order.values.len()));
            }
            out.push(" ").push(order.direction.as_sql());
        }
        Ok(())
    }

    fn push_limit(&self, ctx: &CompileContext<'_>, limit: Limit, out: &mut SqlFragment) {
        if let Some(clause) = self.effective_limit(limit).render(ctx.dialect) {
            out.push(" ").push(&clause);
        }
    }
}

fn schema_mismatch(row: usize, expected: &[&str], found: &RowData) -> BuilderError {
    BuilderError::SchemaMismatch {
        row,
        expected: expected.iter().map(|c| c.to_string()).collect(),
        found: found.columns().map(str::to_string).collect(),
    }
}

/// How increment/decrement markers refer to the current column value.
#[derive(Debug, Clone, Copy)]
enum Existing<'t> {
    /// INSERT values: there is no current row
    Forbidden,
    /// `col + ?`
    Column,
    /// `table.col + ?`, for Postgres `DO UPDATE` where a bare name is ambiguous
    Qualified(&'t str),
}

/// Emit the right-hand side for one INSERT/UPDATE column.
fn push_column_value(
    ctx: &CompileContext<'_>,
    column: &str,
    value: &ColumnValue,
    existing: Existing<'_>,
    out: &mut SqlFragment,
) -> Result<(), BuilderError> {
    if value.is_relative() && matches!(existing, Existing::Forbidden) {
        return Err(BuilderError::invalid(format!(
            "increment/decrement on '{column}' only applies to UPDATE"
        )));
    }
    match value {
        ColumnValue::Value(v) => {
            out.push_bind(v.clone());
        }
        ColumnValue::Raw(sql) => {
            out.push(sql);
        }
        ColumnValue::Func { expr, params } => {
            out.push_template(expr, params)?;
        }
        ColumnValue::Increment(n) | ColumnValue::Decrement(n) => {
            if !matches!(n, Value::Int(_) | Value::Float(_) | Value::Decimal(_)) {
                return Err(BuilderError::invalid(format!(
                    "increment/decrement on '{column}' needs a number, got {}",
                    n.type_name()
                )));
            }
            let sign = if matches!(value, ColumnValue::Increment(_)) { " + " } else { " - " };
            if let Existing::Qualified(table) = existing {
                out.push(table).push(".");
            }
            out.push(column).push(sign).push_bind(n.clone());
        }
        ColumnValue::Now(interval) => {
            out.push(&ctx.dialect.now_expr(interval.as_deref())?);
        }
    }
    Ok(())
}

/// ON DUPLICATE KEY UPDATE (MySQL) / ON CONFLICT ... DO UPDATE (Postgres).
///
/// A single-row insert re-binds the inserted values after the VALUES parameters; a
/// multi-row insert references them through `VALUES(col)` / `EXCLUDED.col`.
fn push_upsert(
    ctx: &CompileContext<'_>,
    target: &str,
    upsert: &Upsert,
    rows: &[RowData],
    out: &mut SqlFragment,
) -> Result<(), BuilderError> {
    let single = rows.len() == 1;
    let mut first = true;
    // Postgres names the existing row by the unqualified table name.
    let existing = match ctx.dialect {
        Dialect::MySql => Existing::Column,
        Dialect::Postgres => Existing::Qualified(target.rsplit('.').next().unwrap_or(target)),
    };

    match ctx.dialect {
        Dialect::MySql => {
            if upsert.columns.is_empty() && upsert.insert_id_column.is_none() {
                return Err(BuilderError::invalid("on_duplicate needs at least one column to update"));
            }
            out.push(" ON DUPLICATE KEY UPDATE ");
            if let Some(id) = &upsert.insert_id_column {
                out.push(id).push(" = LAST_INSERT_ID(").push(id).push(")");
                first = false;
            }
        }
        Dialect::Postgres => {
            if upsert.conflict_target.is_empty() {
                return Err(BuilderError::invalid(
                    "postgres upsert needs a conflict target (on_conflict_target)",
                ));
            }
            out.push(" ON CONFLICT (").push(&upsert.conflict_target.join(", ")).push(")");
            if upsert.columns.is_empty() {
                out.push(" DO NOTHING");
                return Ok(());
            }
            out.push(" DO UPDATE SET ");
        }
    }

    for column in &upsert.columns {
        if !first {
            out.push(", ");
        }
        first = false;
        match column {
            UpsertColumn::Inserted(name) => {
                let Some(inserted) = rows.first().and_then(|row| row.get(name)) else {
                    return Err(BuilderError::invalid(format!(
                        "on_duplicate column '{name}' is not part of the inserted row"
                    )));
                };
                out.push(name).push(" = ");
                match (single, ctx.dialect) {
                    (true, _) => push_column_value(ctx, name, inserted, Existing::Forbidden, out)?,
                    (false, Dialect::MySql) => {
                        out.push("VALUES(").push(name).push(")");
                    }
                    (false, Dialect::Postgres) => {
                        out.push("EXCLUDED.").push(name);
                    }
                }
            }
            UpsertColumn::Set(name, value) => {
                out.push(name).push(" = ");
                push_column_value(ctx, name, value, existing, out)?;
            }
        }
    }
    Ok(())
}

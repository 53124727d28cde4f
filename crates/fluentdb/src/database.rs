//! The fluent facade and execution engine.
//!
//! A [`Database`] owns one [`Driver`], the pending builder state, the transaction state
//! and the bookkeeping of the last statement (row count, insert id, last error).
//!
//! Every terminal call (`get`, `insert`, `update`, `delete`, `raw_query`, ...) takes the
//! builder state, so the next chain always starts empty, whether the call succeeded or
//! not.
//!
//! ```ignore
//! use fluentdb::{row, Database, DbConfig, Op, Order, PgDriver};
//!
//! let driver = PgDriver::connect_url("postgres://postgres@localhost/app").await?;
//! let mut db = Database::with_config(driver, DbConfig::new().table_prefix("app_"));
//!
//! let id = db.insert("users", row! { "username" => "alice", "email" => "a@x.io" }).await?;
//! let users = db
//!     .where_op("id", Op::Gte, 10)
//!     .order_by("id", Order::Desc)
//!     .get("users", 20, &["id", "username"])
//!     .await?;
//! ```

use crate::builder::{
    CompileContext, InsertMode, Limit, QueryBuilder, SubQueryBuilder, impl_fluent_methods,
};
use crate::config::{DangerousDmlPolicy, DbConfig};
use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::error::{
    BuilderError, DbError, DbResult, DriverError, StatementError, TransactionError,
};
use crate::lazy::{LazyRows, StreamFailure};
use crate::sql::{BoundStatement, StatementKind};
use crate::trace;
use crate::transaction::{TransactionState, TxPhase, validate_savepoint_name};
use crate::value::{Record, RowData, Value};
use std::future::Future;
use std::time::{Duration, Instant};

/// Why a driver call did not produce a result.
enum Failure {
    Driver(DriverError),
    Timeout(Duration),
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    future: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, Failure> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, future).await {
            Ok(result) => result.map_err(Failure::Driver),
            Err(_) => Err(Failure::Timeout(timeout)),
        },
        None => future.await.map_err(Failure::Driver),
    }
}

/// Single-connection database helper with a fluent query builder.
pub struct Database<D: Driver> {
    driver: D,
    config: DbConfig,
    builder: QueryBuilder,
    tx: TransactionState,
    last_error: Option<StatementError>,
    last_query: Option<String>,
    row_count: u64,
    last_insert_id: Option<Value>,
    total_count: Option<u64>,
    total_pages: Option<u64>,
    stream_failure: StreamFailure,
}

impl<D: Driver> Database<D> {
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, DbConfig::default())
    }

    pub fn with_config(driver: D, config: DbConfig) -> Self {
        Self {
            driver,
            config,
            builder: QueryBuilder::default(),
            tx: TransactionState::default(),
            last_error: None,
            last_query: None,
            row_count: 0,
            last_insert_id: None,
            total_count: None,
            total_pages: None,
            stream_failure: StreamFailure::default(),
        }
    }

    /// A fresh instance over another connection, with the same configuration and no
    /// builder, transaction or last-statement state.
    pub fn copy<E: Driver>(&self, driver: E) -> Database<E> {
        Database::with_config(driver, self.config.clone())
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    pub fn set_table_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.config.table_prefix = prefix.into();
        self
    }

    pub fn table_prefix(&self) -> &str {
        &self.config.table_prefix
    }

    /// Pending (uncompiled) builder state.
    pub fn pending(&self) -> &QueryBuilder {
        &self.builder
    }

    /// Discard pending builder state without running anything.
    pub fn reset(&mut self) -> &mut Self {
        self.builder = QueryBuilder::default();
        self
    }

    /// Start a sub-query in this instance's dialect and table prefix.
    pub fn sub_query(&self, alias: Option<&str>) -> SubQueryBuilder {
        SubQueryBuilder::new(self.dialect(), alias).with_prefix(self.config.table_prefix.clone())
    }

    fn state_mut(&mut self) -> &mut QueryBuilder {
        &mut self.builder
    }

    impl_fluent_methods!();

    // ── Last statement ──

    /// The last statement the driver rejected, cleared by the next success.
    pub fn last_error(&self) -> Option<&StatementError> {
        self.last_error.as_ref()
    }

    pub fn last_error_code(&self) -> Option<&str> {
        self.last_error.as_ref().and_then(|e| e.code.as_deref())
    }

    /// Rendered SQL of the last compiled statement.
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Rows returned by the last SELECT, or rows affected by the last write.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn last_insert_id(&self) -> Option<&Value> {
        self.last_insert_id.as_ref()
    }

    /// Set by a SELECT declared `with_total_count()` and by [`Database::paginate`].
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn total_pages(&self) -> Option<u64> {
        self.total_pages
    }

    pub fn transaction(&self) -> &TransactionState {
        &self.tx
    }

    /// Escape a value as an SQL literal with the driver's quoting rules.
    ///
    /// Builder methods always bind parameters; this is only for SQL assembled by hand.
    pub fn escape(&self, value: impl Into<Value>) -> String {
        self.driver.quote(&value.into())
    }

    // ── SELECT ──

    /// Run the pending SELECT. A non-`All` `limit` overrides `.limit()`.
    pub async fn get(
        &mut self,
        table: &str,
        limit: impl Into<Limit>,
        columns: &[&str],
    ) -> DbResult<Vec<Record>> {
        let state = self.take_state();
        let compiled = state.compile_select(&self.ctx(), table, columns, limit.into());
        let stmt = self.accept(compiled)?;
        let rows = self.run_query(&stmt).await?;
        self.row_count = rows.len() as u64;

        if state.wants_total_count() {
            let compiled = state.compile_count(&self.ctx(), table);
            let count_stmt = compiled.map_err(DbError::from)?;
            let counted = self.run_query(&count_stmt).await?;
            let total = counted
                .into_iter()
                .next()
                .and_then(Record::into_first)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| DbError::decode("total_count", "count query returned no number"))?;
            self.total_count = Some(u64::try_from(total).unwrap_or(0));
        }
        Ok(rows)
    }

    /// First row of the pending SELECT, or `None`.
    pub async fn get_one(&mut self, table: &str, columns: &[&str]) -> DbResult<Option<Record>> {
        let rows = self.get(table, 1, columns).await?;
        Ok(rows.into_iter().next())
    }

    /// First column of the first row.
    pub async fn get_value(&mut self, table: &str, column: &str) -> DbResult<Option<Value>> {
        let row = self.get_one(table, &[column]).await?;
        Ok(row.and_then(Record::into_first))
    }

    /// Whether the pending SELECT matches at least one row.
    pub async fn has(&mut self, table: &str) -> DbResult<bool> {
        let rows = self.get(table, 1, &["1"]).await?;
        Ok(!rows.is_empty())
    }

    /// Page `page` (1-based) of `page_size` rows; also sets `total_count` and
    /// `total_pages`.
    pub async fn paginate(
        &mut self,
        table: &str,
        page: u64,
        page_size: u64,
        columns: &[&str],
    ) -> DbResult<Vec<Record>> {
        if page == 0 || page_size == 0 {
            self.builder = QueryBuilder::default();
            return Err(BuilderError::invalid("page and page_size start at 1").into());
        }
        self.builder.with_total_count = true;
        let rows = self.get(table, Limit::page(page, page_size), columns).await?;
        self.total_pages = self.total_count.map(|total| total.div_ceil(page_size));
        Ok(rows)
    }

    /// Run the pending SELECT and pull rows one at a time.
    pub async fn get_lazy(
        &mut self,
        table: &str,
        limit: impl Into<Limit>,
        columns: &[&str],
    ) -> DbResult<LazyRows> {
        let state = self.take_state();
        let compiled = state.compile_select(&self.ctx(), table, columns, limit.into());
        let stmt = self.accept(compiled)?;
        self.open_lazy(stmt).await
    }

    // ── Writes ──

    /// Insert one row and return the generated id, if the backend reports one.
    ///
    /// Postgres reads the configured `insert_id_column` from the `RETURNING *` row and
    /// reports `None` when the table has no such column. MySQL uses `LAST_INSERT_ID()`.
    pub async fn insert(&mut self, table: &str, data: RowData) -> DbResult<Option<Value>> {
        let state = self.take_state();
        let ctx = self.ctx();
        let compiled = state.compile_insert(&ctx, table, std::slice::from_ref(&data), InsertMode::Insert);
        let stmt = self.accept(compiled)?;

        let id = if stmt.returns_rows() {
            let rows = self.run_query(&stmt).await?;
            self.row_count = rows.len() as u64;
            let row = rows.into_iter().next();
            self.config
                .insert_id_column
                .as_deref()
                .and_then(|column| row?.get(column).cloned())
        } else {
            self.row_count = self.run_execute(&stmt).await?;
            self.fetch_insert_id(&stmt).await?
        };
        self.last_insert_id = id.clone();
        Ok(id)
    }

    /// Insert many rows in one statement. Every row must have the same columns.
    ///
    /// `on_duplicate` lists the columns to refresh from the new values when a row
    /// collides (`ON DUPLICATE KEY UPDATE` / `ON CONFLICT DO UPDATE`). Returns the
    /// affected row count.
    pub async fn insert_batch(
        &mut self,
        table: &str,
        rows: &[RowData],
        on_duplicate: Option<&[&str]>,
    ) -> DbResult<u64> {
        let mut state = self.take_state();
        if let Some(columns) = on_duplicate {
            state.set_upsert_columns(columns);
        }
        let ctx = self.ctx().with_insert_id_column(None);
        let compiled = state.compile_insert(&ctx, table, rows, InsertMode::Insert);
        let stmt = self.accept(compiled)?;
        self.row_count = self.run_execute(&stmt).await?;
        self.last_insert_id = self.fetch_insert_id(&stmt).await?;
        Ok(self.row_count)
    }

    /// `REPLACE INTO` (MySQL only).
    pub async fn replace(&mut self, table: &str, data: RowData) -> DbResult<u64> {
        let state = self.take_state();
        let ctx = self.ctx();
        let compiled = state.compile_insert(&ctx, table, std::slice::from_ref(&data), InsertMode::Replace);
        let stmt = self.accept(compiled)?;
        self.row_count = self.run_execute(&stmt).await?;
        self.last_insert_id = self.fetch_insert_id(&stmt).await?;
        Ok(self.row_count)
    }

    /// Run the pending UPDATE and return the affected row count.
    ///
    /// Without a WHERE clause this fails with [`BuilderError::MissingWhere`] unless
    /// `allow_full_table()` was called or the configured policy allows it.
    pub async fn update(
        &mut self,
        table: &str,
        data: RowData,
        limit: impl Into<Limit>,
    ) -> DbResult<u64> {
        let state = self.take_state();
        self.warn_unfiltered(&state, "UPDATE", table);
        let compiled = state.compile_update(&self.ctx(), table, &data, limit.into());
        let stmt = self.accept(compiled)?;
        self.row_count = self.run_execute(&stmt).await?;
        Ok(self.row_count)
    }

    /// Run the pending DELETE and return the affected row count.
    ///
    /// Same WHERE rule as [`Database::update`].
    pub async fn delete(&mut self, table: &str, limit: impl Into<Limit>) -> DbResult<u64> {
        let state = self.take_state();
        self.warn_unfiltered(&state, "DELETE", table);
        let compiled = state.compile_delete(&self.ctx(), table, limit.into());
        let stmt = self.accept(compiled)?;
        self.row_count = self.run_execute(&stmt).await?;
        Ok(self.row_count)
    }

    // ── Raw SQL ──

    /// Run caller-written SQL with `?` placeholders.
    ///
    /// Marks inside quotes and comments are left alone; write `??` for a literal `?`
    /// (see [`SqlFragment::push_template`](crate::SqlFragment::push_template)).
    /// Statements that return rows yield them; others yield an empty list and set
    /// `row_count` to the affected rows. Pending builder state is discarded.
    pub async fn raw_query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Record>> {
        let stmt = self.accept_raw(sql, params)?;
        if stmt.returns_rows() {
            let rows = self.run_query(&stmt).await?;
            self.row_count = rows.len() as u64;
            Ok(rows)
        } else {
            self.row_count = self.run_execute(&stmt).await?;
            Ok(Vec::new())
        }
    }

    pub async fn raw_query_one(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Record>> {
        let rows = self.raw_query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// First column of the first row.
    pub async fn raw_query_value(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        let row = self.raw_query_one(sql, params).await?;
        Ok(row.and_then(Record::into_first))
    }

    /// Run caller-written SQL and return the affected row count.
    pub async fn raw_execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let stmt = self.accept_raw(sql, params)?;
        self.row_count = self.run_execute(&stmt).await?;
        Ok(self.row_count)
    }

    pub async fn raw_query_lazy(&mut self, sql: &str, params: &[Value]) -> DbResult<LazyRows> {
        let stmt = self.accept_raw(sql, params)?;
        self.open_lazy(stmt).await
    }

    // ── Transactions ──

    /// Fails with [`TransactionError::AlreadyActive`] inside a transaction.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        self.tx.ensure_can_begin()?;
        self.stream_failure.take();
        let result = with_timeout(self.config.query_timeout, self.driver.begin()).await;
        result.map_err(|f| self.record_failure(&control_stmt("BEGIN"), f))?;
        self.tx.begin();
        trace::transaction("begin", None);
        Ok(())
    }

    /// Commit. A dirty transaction is rolled back instead and reported as
    /// [`TransactionError::Dirty`] carrying the failure that made it dirty.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.tx.ensure_active()?;
        self.absorb_stream_failure();
        if self.tx.is_dirty() {
            return self.rollback_dirty().await;
        }
        let result = with_timeout(self.config.query_timeout, self.driver.commit()).await;
        match result {
            Ok(()) => {
                self.tx.finish(TxPhase::Committed);
                trace::transaction("commit", None);
                Ok(())
            }
            Err(failure) => {
                // The backend ends the transaction when COMMIT fails.
                self.tx.finish(TxPhase::RolledBack);
                Err(self.record_failure(&control_stmt("COMMIT"), failure))
            }
        }
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        self.tx.ensure_active()?;
        self.stream_failure.take();
        let result = with_timeout(self.config.query_timeout, self.driver.rollback()).await;
        self.tx.finish(TxPhase::RolledBack);
        result.map_err(|f| self.record_failure(&control_stmt("ROLLBACK"), f))?;
        trace::transaction("rollback", None);
        Ok(())
    }

    pub async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        validate_savepoint_name(name)?;
        self.tx.ensure_active()?;
        self.absorb_stream_failure();
        let result = with_timeout(self.config.query_timeout, self.driver.savepoint(name)).await;
        result.map_err(|f| self.record_failure(&control_stmt(&format!("SAVEPOINT {name}")), f))?;
        self.tx.push_savepoint(name);
        trace::transaction("savepoint", Some(name));
        Ok(())
    }

    /// Undo everything after `name`. The savepoint itself stays open.
    pub async fn rollback_to(&mut self, name: &str) -> DbResult<()> {
        let index = self.tx.find_savepoint(name)?;
        self.absorb_stream_failure();
        let result = with_timeout(
            self.config.query_timeout,
            self.driver.rollback_to_savepoint(name),
        )
        .await;
        result.map_err(|f| {
            self.record_failure(&control_stmt(&format!("ROLLBACK TO SAVEPOINT {name}")), f)
        })?;
        self.tx.rolled_back_to(index);
        trace::transaction("rollback to savepoint", Some(name));
        Ok(())
    }

    pub async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        let index = self.tx.find_savepoint(name)?;
        self.absorb_stream_failure();
        let result =
            with_timeout(self.config.query_timeout, self.driver.release_savepoint(name)).await;
        result.map_err(|f| {
            self.record_failure(&control_stmt(&format!("RELEASE SAVEPOINT {name}")), f)
        })?;
        self.tx.released(index);
        trace::transaction("release savepoint", Some(name));
        Ok(())
    }

    /// Roll back if a statement failed inside the active transaction.
    ///
    /// Returns [`TransactionError::Dirty`] with the original failure when it did.
    pub async fn check_transaction_status(&mut self) -> DbResult<()> {
        self.absorb_stream_failure();
        if self.tx.is_active() && self.tx.is_dirty() {
            return self.rollback_dirty().await;
        }
        Ok(())
    }

    async fn rollback_dirty(&mut self) -> DbResult<()> {
        let result = with_timeout(self.config.query_timeout, self.driver.rollback()).await;
        let cause = self.tx.finish(TxPhase::RolledBack);
        trace::auto_rollback(cause.as_ref());
        result.map_err(|f| self.record_failure(&control_stmt("ROLLBACK"), f))?;
        Err(TransactionError::Dirty { cause }.into())
    }

    /// Fold a failure seen by a lazy sequence into the transaction state.
    fn absorb_stream_failure(&mut self) {
        if let Some(cause) = self.stream_failure.take() {
            trace::statement_failed(&cause, self.config.max_logged_sql);
            self.tx.mark_dirty(&cause);
        }
    }

    // ── Engine ──

    fn take_state(&mut self) -> QueryBuilder {
        std::mem::take(&mut self.builder)
    }

    fn ctx(&self) -> CompileContext<'_> {
        CompileContext::new(self.driver.dialect())
            .with_prefix(&self.config.table_prefix)
            .with_insert_id_column(self.config.insert_id_column.as_deref())
            .allow_unfiltered(self.config.unfiltered_mutations.allows())
    }

    fn warn_unfiltered(&self, state: &QueryBuilder, statement: &str, table: &str) {
        if self.config.unfiltered_mutations == DangerousDmlPolicy::Warn
            && state.wheres.is_empty()
            && !state.allow_full_table
        {
            trace::unfiltered(statement, table);
        }
    }

    /// Record a compiled statement as the last query.
    fn accept(&mut self, compiled: Result<BoundStatement, BuilderError>) -> DbResult<BoundStatement> {
        let stmt = compiled?;
        self.last_query = Some(stmt.sql.clone());
        Ok(stmt)
    }

    fn accept_raw(&mut self, sql: &str, params: &[Value]) -> DbResult<BoundStatement> {
        self.builder = QueryBuilder::default();
        let compiled = BoundStatement::from_template(self.driver.dialect(), sql, params);
        self.accept(compiled)
    }

    async fn run_execute(&mut self, stmt: &BoundStatement) -> DbResult<u64> {
        let start = Instant::now();
        let result = with_timeout(self.config.query_timeout, self.driver.execute(stmt)).await;
        trace::statement(stmt, start.elapsed(), self.config.max_logged_sql);
        self.settle(stmt, result).await
    }

    async fn run_query(&mut self, stmt: &BoundStatement) -> DbResult<Vec<Record>> {
        let start = Instant::now();
        let result = with_timeout(self.config.query_timeout, self.driver.query(stmt)).await;
        trace::statement(stmt, start.elapsed(), self.config.max_logged_sql);
        self.settle(stmt, result).await
    }

    async fn open_lazy(&mut self, stmt: BoundStatement) -> DbResult<LazyRows> {
        let start = Instant::now();
        let result = with_timeout(self.config.query_timeout, self.driver.query_stream(&stmt)).await;
        trace::statement(&stmt, start.elapsed(), self.config.max_logged_sql);
        let stream = self.settle(&stmt, result).await?;
        self.row_count = 0;
        Ok(LazyRows::new(stream, stmt, self.stream_failure.clone()))
    }

    async fn fetch_insert_id(&mut self, stmt: &BoundStatement) -> DbResult<Option<Value>> {
        let result = with_timeout(self.config.query_timeout, self.driver.last_insert_id()).await;
        let id = self.settle(stmt, result).await?;
        // MySQL reports 0 when the statement generated no id.
        Ok(id.filter(|v| v.as_i64() != Some(0)))
    }

    /// Book-keep the outcome of a driver call.
    async fn settle<T>(&mut self, stmt: &BoundStatement, result: Result<T, Failure>) -> DbResult<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Ok(value)
            }
            Err(failure) => {
                self.absorb_stream_failure();
                let err = self.record_failure(stmt, failure);
                if let Some(cause) = &self.last_error {
                    self.tx.mark_dirty(cause);
                }
                if self.config.auto_rollback && self.tx.is_active() {
                    // The statement error is what the caller sees.
                    let _ = self.check_transaction_status().await;
                }
                Err(err)
            }
        }
    }

    fn record_failure(&mut self, stmt: &BoundStatement, failure: Failure) -> DbError {
        let (recorded, err) = match failure {
            Failure::Driver(e) => {
                let recorded = e.into_statement_error(&stmt.sql, &stmt.params);
                (recorded.clone(), DbError::Statement(recorded))
            }
            Failure::Timeout(timeout) => {
                self.driver.cancel();
                let recorded = DriverError::new(format!("statement timed out after {timeout:?}"))
                    .into_statement_error(&stmt.sql, &stmt.params);
                (recorded, DbError::Timeout(timeout))
            }
        };
        trace::statement_failed(&recorded, self.config.max_logged_sql);
        self.last_error = Some(recorded);
        err
    }
}

fn control_stmt(sql: &str) -> BoundStatement {
    BoundStatement::new(sql, StatementKind::Raw)
}

impl<D: Driver + std::fmt::Debug> std::fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.driver)
            .field("config", &self.config)
            .field("pending", &self.builder)
            .field("transaction", &self.tx)
            .field("last_query", &self.last_query)
            .finish_non_exhaustive()
    }
}

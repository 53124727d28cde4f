//! The driver collaborator.
//!
//! A [`Driver`] wraps one live connection. It runs compiled [`BoundStatement`]s (preparing
//! them as it sees fit), returns rows as [`Record`]s, and controls transactions. The
//! [`Database`](crate::Database) facade owns exactly one driver.

use crate::dialect::Dialect;
use crate::error::DriverError;
use crate::sql::{BoundStatement, StatementKind};
use crate::value::{Record, Value};
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A connection that can run compiled statements.
pub trait Driver: Send + Sync {
    /// SQL dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &self,
        stmt: &BoundStatement,
    ) -> impl Future<Output = Result<u64, DriverError>> + Send;

    /// Run a statement and return all rows, in driver order.
    fn query(
        &self,
        stmt: &BoundStatement,
    ) -> impl Future<Output = Result<Vec<Record>, DriverError>> + Send;

    /// Run a statement and return an open cursor over its rows.
    ///
    /// Dropping the stream must release the cursor.
    fn query_stream(
        &self,
        stmt: &BoundStatement,
    ) -> impl Future<Output = Result<RowStream, DriverError>> + Send;

    /// Id generated by the last INSERT on this connection, if the backend reports one
    /// out of band (MySQL `LAST_INSERT_ID()`).
    ///
    /// Drivers that return ids from the INSERT itself (`RETURNING`) keep the default.
    fn last_insert_id(&self) -> impl Future<Output = Result<Option<Value>, DriverError>> + Send {
        async { Ok(None) }
    }

    fn begin(&self) -> impl Future<Output = Result<(), DriverError>> + Send {
        run_control(self, "BEGIN".to_string())
    }

    fn commit(&self) -> impl Future<Output = Result<(), DriverError>> + Send {
        run_control(self, "COMMIT".to_string())
    }

    fn rollback(&self) -> impl Future<Output = Result<(), DriverError>> + Send {
        run_control(self, "ROLLBACK".to_string())
    }

    /// `name` has already been validated as an identifier.
    fn savepoint(&self, name: &str) -> impl Future<Output = Result<(), DriverError>> + Send {
        run_control(self, format!("SAVEPOINT {name}"))
    }

    fn rollback_to_savepoint(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<(), DriverError>> + Send {
        run_control(self, format!("ROLLBACK TO SAVEPOINT {name}"))
    }

    fn release_savepoint(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<(), DriverError>> + Send {
        run_control(self, format!("RELEASE SAVEPOINT {name}"))
    }

    /// Ask the backend to abort whatever statement is running. Called after a timeout.
    fn cancel(&self) {}

    /// Escape a value as an SQL literal. Only used by the explicit escape helper.
    fn quote(&self, value: &Value) -> String {
        self.dialect().quote_literal(value)
    }
}

/// Run a transaction-control statement through [`Driver::execute`].
async fn run_control<D: Driver + ?Sized>(driver: &D, sql: String) -> Result<(), DriverError> {
    let stmt = BoundStatement::new(sql, StatementKind::Raw);
    driver.execute(&stmt).await.map(|_| ())
}

/// A stream of result records.
///
/// This is a type-erased wrapper so that different drivers can return a uniform cursor
/// type. Dropping it releases the underlying cursor.
#[must_use]
pub struct RowStream {
    inner: Pin<Box<dyn Stream<Item = Result<Record, DriverError>> + Send>>,
}

impl RowStream {
    /// Create a new `RowStream` from any compatible stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Record, DriverError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for RowStream {
    type Item = Result<Record, DriverError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream").finish_non_exhaustive()
    }
}

//! Lazy row sequences.

use crate::driver::RowStream;
use crate::error::{DbError, DbResult, StatementError};
use crate::sql::BoundStatement;
use crate::value::Record;
use futures_core::Stream;
use futures_core::stream::FusedStream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// First failure seen by any lazy sequence opened from one `Database`.
///
/// The facade drains it before transaction control, so a cursor that failed mid-stream
/// still makes the enclosing transaction dirty.
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamFailure(Arc<Mutex<Option<StatementError>>>);

impl StreamFailure {
    fn set(&self, err: &StatementError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert_with(|| err.clone());
        }
    }

    pub(crate) fn take(&self) -> Option<StatementError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// A pull-driven, single-pass sequence of records.
///
/// Rows are fetched from the driver cursor one at a time as the caller polls. The
/// cursor is released as soon as the sequence ends, yields an error, is
/// [`close`](LazyRows::close)d, or is dropped.
///
/// Failures while pulling are returned in the stream and are not recorded in
/// [`Database::last_error`](crate::Database::last_error). They do mark an active
/// transaction dirty: the next `commit` rolls back and reports the failure.
#[must_use = "streams do nothing unless polled"]
pub struct LazyRows {
    inner: Option<RowStream>,
    stmt: BoundStatement,
    fetched: u64,
    failure: StreamFailure,
}

impl LazyRows {
    pub(crate) fn new(stream: RowStream, stmt: BoundStatement, failure: StreamFailure) -> Self {
        Self {
            inner: Some(stream),
            stmt,
            fetched: 0,
            failure,
        }
    }

    /// Rows pulled so far.
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn sql(&self) -> &str {
        &self.stmt.sql
    }

    /// Release the cursor now. Further polls yield `None`.
    pub fn close(&mut self) {
        self.inner = None;
    }
}

impl Stream for LazyRows {
    type Item = DbResult<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(inner).poll_next(cx) {
            Poll::Ready(Some(Ok(record))) => {
                this.fetched += 1;
                Poll::Ready(Some(Ok(record)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.inner = None;
                let err = e.into_statement_error(&this.stmt.sql, &this.stmt.params);
                this.failure.set(&err);
                Poll::Ready(Some(Err(DbError::Statement(err))))
            }
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for LazyRows {
    fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}

impl Drop for LazyRows {
    fn drop(&mut self) {
        if self.inner.is_some() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                target: "fluentdb.sql",
                fetched = self.fetched,
                "lazy row sequence dropped before it was exhausted; releasing cursor"
            );
        }
    }
}

impl std::fmt::Debug for LazyRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRows")
            .field("sql", &self.stmt.sql)
            .field("fetched", &self.fetched)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

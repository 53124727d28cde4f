//! In-memory driver that records statements and replays scripted replies.

#![allow(dead_code)]

use fluentdb::{BoundStatement, Dialect, Driver, DriverError, Record, RowStream, Value};
use futures_util::stream::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

/// What the next driver call answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<Record>),
    Affected(u64),
    Fail(DriverError),
    /// Stream the rows, then fail on the next fetch
    RowsThenFail(Vec<Record>, DriverError),
}

#[derive(Debug, Default)]
pub struct MockState {
    pub statements: Vec<BoundStatement>,
    pub replies: VecDeque<Reply>,
    pub open_cursors: usize,
    pub next_insert_id: Option<i64>,
    pub delay: Option<Duration>,
    pub cancelled: usize,
}

/// Cloning shares the recorded state, so a test can keep a handle after moving the
/// driver into a `Database`.
#[derive(Debug, Clone)]
pub struct MockDriver {
    dialect: Dialect,
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn mysql() -> Self {
        Self::new(Dialect::MySql)
    }

    pub fn postgres() -> Self {
        Self::new(Dialect::Postgres)
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn reply(&self, reply: Reply) -> &Self {
        self.state().replies.push_back(reply);
        self
    }

    pub fn reply_rows(&self, rows: Vec<Record>) -> &Self {
        self.reply(Reply::Rows(rows))
    }

    pub fn reply_affected(&self, n: u64) -> &Self {
        self.reply(Reply::Affected(n))
    }

    pub fn reply_error(&self, code: &str, message: &str) -> &Self {
        self.reply(Reply::Fail(DriverError::with_code(code, message)))
    }

    pub fn reply_rows_then_error(&self, rows: Vec<Record>, code: &str, message: &str) -> &Self {
        self.reply(Reply::RowsThenFail(rows, DriverError::with_code(code, message)))
    }

    pub fn set_insert_id(&self, id: i64) {
        self.state().next_insert_id = Some(id);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// SQL text of every statement received, in order.
    pub fn sqls(&self) -> Vec<String> {
        self.state().statements.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn last(&self) -> BoundStatement {
        self.state()
            .statements
            .last()
            .cloned()
            .expect("no statement recorded")
    }

    pub fn open_cursors(&self) -> usize {
        self.state().open_cursors
    }

    async fn receive(&self, stmt: &BoundStatement) -> Option<Reply> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.statements.push(stmt.clone());
        state.replies.pop_front()
    }
}

impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, stmt: &BoundStatement) -> Result<u64, DriverError> {
        match self.receive(stmt).await {
            Some(Reply::Fail(err) | Reply::RowsThenFail(_, err)) => Err(err),
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Rows(rows)) => Ok(rows.len() as u64),
            None => Ok(0),
        }
    }

    async fn query(&self, stmt: &BoundStatement) -> Result<Vec<Record>, DriverError> {
        match self.receive(stmt).await {
            Some(Reply::Fail(err) | Reply::RowsThenFail(_, err)) => Err(err),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Affected(_)) | None => Ok(Vec::new()),
        }
    }

    async fn query_stream(&self, stmt: &BoundStatement) -> Result<RowStream, DriverError> {
        let rows: VecDeque<_> = match self.receive(stmt).await {
            Some(Reply::Fail(err)) => return Err(err),
            Some(Reply::Rows(rows)) => rows.into_iter().map(Ok).collect(),
            Some(Reply::RowsThenFail(rows, err)) => {
                rows.into_iter().map(Ok).chain(std::iter::once(Err(err))).collect()
            }
            Some(Reply::Affected(_)) | None => VecDeque::new(),
        };
        self.state().open_cursors += 1;
        Ok(RowStream::new(CursorStream {
            rows,
            state: Arc::clone(&self.state),
        }))
    }

    async fn last_insert_id(&self) -> Result<Option<Value>, DriverError> {
        Ok(self.state().next_insert_id.map(Value::Int))
    }

    fn cancel(&self) {
        self.state().cancelled += 1;
    }
}

/// Counts as an open cursor until dropped.
struct CursorStream {
    rows: VecDeque<Result<Record, DriverError>>,
    state: Arc<Mutex<MockState>>,
}

impl Stream for CursorStream {
    type Item = Result<Record, DriverError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.rows.pop_front())
    }
}

impl Drop for CursorStream {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_cursors -= 1;
        }
    }
}

pub fn record(pairs: &[(&str, Value)]) -> Record {
    pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
}

pub fn id_rows(ids: &[i64]) -> Vec<Record> {
    ids.iter().map(|id| record(&[("id", Value::Int(*id))])).collect()
}

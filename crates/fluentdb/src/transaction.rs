//! Transaction state machine.
//!
//! `Idle → Active → {Committed, RolledBack}`, with named savepoints nested inside
//! `Active`. The state only tracks what the backend has been told; the
//! [`Database`](crate::Database) facade issues the driver calls and moves the state
//! forward once they succeed.
//!
//! A failed statement inside an active transaction makes it *dirty*. A dirty
//! transaction refuses to commit: `commit` rolls back instead and reports
//! [`TransactionError::Dirty`] with the original failure.

use crate::error::{BuilderError, StatementError, TransactionError};

/// Lifecycle phase of the current (or last) transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxPhase {
    #[default]
    Idle,
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq)]
struct DirtyMark {
    cause: StatementError,
    /// Number of open savepoints when the statement failed
    depth: usize,
}

/// Transaction bookkeeping for one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionState {
    phase: TxPhase,
    savepoints: Vec<String>,
    dirty: Option<DirtyMark>,
}

impl TransactionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TxPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == TxPhase::Active
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// The first statement failure since the transaction (or the enclosing savepoint) began.
    pub fn dirty_cause(&self) -> Option<&StatementError> {
        self.dirty.as_ref().map(|d| &d.cause)
    }

    /// Open savepoints, oldest first.
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    pub(crate) fn ensure_can_begin(&self) -> Result<(), TransactionError> {
        if self.is_active() {
            return Err(TransactionError::AlreadyActive);
        }
        Ok(())
    }

    pub(crate) fn ensure_active(&self) -> Result<(), TransactionError> {
        if !self.is_active() {
            return Err(TransactionError::NotActive);
        }
        Ok(())
    }

    pub(crate) fn begin(&mut self) {
        self.phase = TxPhase::Active;
        self.savepoints.clear();
        self.dirty = None;
    }

    /// Close the transaction and hand back the failure that made it dirty, if any.
    pub(crate) fn finish(&mut self, phase: TxPhase) -> Option<StatementError> {
        self.phase = phase;
        self.savepoints.clear();
        self.dirty.take().map(|d| d.cause)
    }

    /// Record a failed statement. The first failure is kept as the cause.
    pub(crate) fn mark_dirty(&mut self, cause: &StatementError) {
        if self.is_active() && self.dirty.is_none() {
            self.dirty = Some(DirtyMark {
                cause: cause.clone(),
                depth: self.savepoints.len(),
            });
        }
    }

    pub(crate) fn push_savepoint(&mut self, name: &str) {
        self.savepoints.push(name.to_string());
    }

    /// Position of the most recent savepoint called `name`.
    pub(crate) fn find_savepoint(&self, name: &str) -> Result<usize, TransactionError> {
        self.ensure_active()?;
        self.savepoints
            .iter()
            .rposition(|sp| sp == name)
            .ok_or_else(|| TransactionError::UnknownSavepoint(name.to_string()))
    }

    /// `ROLLBACK TO` keeps the savepoint itself and discards everything after it,
    /// including a failure that happened after it was created.
    pub(crate) fn rolled_back_to(&mut self, index: usize) {
        self.savepoints.truncate(index + 1);
        if self.dirty.as_ref().is_some_and(|d| d.depth > index) {
            self.dirty = None;
        }
    }

    /// `RELEASE` removes the savepoint and every later one. A failure inside them now
    /// belongs to the enclosing scope.
    pub(crate) fn released(&mut self, index: usize) {
        self.savepoints.truncate(index);
        if let Some(dirty) = self.dirty.as_mut() {
            dirty.depth = dirty.depth.min(index);
        }
    }
}

/// Savepoint names are spliced into SQL, so only plain identifiers are accepted.
pub(crate) fn validate_savepoint_name(name: &str) -> Result<(), BuilderError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic());
    if !valid_start || !chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric()) {
        return Err(BuilderError::invalid(format!(
            "invalid savepoint name '{name}'"
        )));
    }
    Ok(())
}

//! Error types for fluentdb.
//!
//! Errors fall into four families:
//!
//! - [`DbError::Connection`]: no live handle, nothing can proceed.
//! - [`DbError::Builder`]: the accumulated builder state cannot compile into valid SQL.
//!   Detected before anything reaches the driver.
//! - [`DbError::Statement`]: the driver rejected a compiled statement. Also recorded as
//!   the instance's last error; the instance stays usable.
//! - [`DbError::Transaction`]: transaction misuse (double begin, dirty commit, unknown savepoint).

use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// Result type alias for fluentdb operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for database operations
#[derive(Debug, Error)]
pub enum DbError {
    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Builder state could not be compiled
    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),

    /// The driver rejected a statement
    #[error("Statement error: {0}")]
    Statement(StatementError),

    /// Transaction state machine violation
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Statement did not finish within the configured timeout
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),
}

impl DbError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Operational failures the caller can recover from on the same instance.
    ///
    /// Only statement errors and timeouts qualify; everything else indicates either a dead
    /// connection or a logic error in the calling code.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Statement(_) | Self::Timeout(_))
    }

    /// Check if this is a builder error
    pub fn is_builder_error(&self) -> bool {
        matches!(self, Self::Builder(_))
    }

    /// The structured statement error, if this is one.
    pub fn as_statement_error(&self) -> Option<&StatementError> {
        match self {
            Self::Statement(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors raised while compiling builder state into SQL.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuilderError {
    /// A condition, option or value marker is malformed (wrong arity, empty IN list, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Rows of a batch insert do not share the same column set
    #[error("Schema mismatch in row {row}: expected columns [{}], found [{}]", .expected.join(", "), .found.join(", "))]
    SchemaMismatch {
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// UPDATE/DELETE without WHERE and without an explicit opt-in
    #[error("{statement} without WHERE refused; call allow_full_table() to confirm")]
    MissingWhere { statement: &'static str },

    /// INSERT/UPDATE called with no column data
    #[error("{statement} requires at least one column")]
    EmptyData { statement: &'static str },
}

impl BuilderError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Transaction logic errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionError {
    /// `begin_transaction` while a transaction is already active
    #[error("a transaction is already active")]
    AlreadyActive,

    /// commit/rollback/savepoint without an active transaction
    #[error("no active transaction")]
    NotActive,

    /// A statement failed inside the transaction; it was rolled back instead of committed
    #[error("transaction rolled back after a failed statement{}", .cause.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
    Dirty { cause: Option<StatementError> },

    /// Savepoint was never created or has already been released
    #[error("unknown savepoint '{0}'")]
    UnknownSavepoint(String),
}

/// Structured record of a statement the driver rejected.
///
/// This is what [`Database::last_error`](crate::Database::last_error) returns.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementError {
    /// Driver/SQLSTATE error code, when the driver reports one
    pub code: Option<String>,
    pub message: String,
    /// Rendered SQL that was sent
    pub sql: String,
    pub params: Vec<Value>,
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StatementError {}

/// Error reported by a [`Driver`](crate::Driver) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Attach the statement that failed.
    pub(crate) fn into_statement_error(self, sql: &str, params: &[Value]) -> StatementError {
        StatementError {
            code: self.code,
            message: self.message,
            sql: sql.to_string(),
            params: params.to_vec(),
        }
    }
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        let code = err.code().map(|c| c.code().to_string());
        let message = match err.as_db_error() {
            Some(db_err) => db_err.message().to_string(),
            None => err.to_string(),
        };
        Self { code, message }
    }
}

//! `tracing` events under the `fluentdb.sql` target.
//!
//! Compiled out entirely without the `tracing` feature.

#[cfg(feature = "tracing")]
pub(crate) use enabled::*;

#[cfg(not(feature = "tracing"))]
pub(crate) use disabled::*;

/// Longest char-boundary prefix of `sql` that fits in `max_bytes`.
pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

pub(crate) fn display_sql(sql: &str, max: Option<usize>) -> String {
    match max {
        Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
        _ => sql.to_string(),
    }
}

#[cfg(feature = "tracing")]
mod enabled {
    use super::display_sql;
    use crate::error::StatementError;
    use crate::sql::BoundStatement;
    use std::time::Duration;

    pub(crate) fn statement(stmt: &BoundStatement, elapsed: Duration, max: Option<usize>) {
        tracing::debug!(
            target: "fluentdb.sql",
            kind = stmt.kind.as_str(),
            params = stmt.params.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            sql = %display_sql(&stmt.sql, max),
            "statement"
        );
    }

    pub(crate) fn statement_failed(err: &StatementError, max: Option<usize>) {
        tracing::warn!(
            target: "fluentdb.sql",
            code = err.code.as_deref().unwrap_or("-"),
            sql = %display_sql(&err.sql, max),
            error = %err.message,
            "statement failed"
        );
    }

    pub(crate) fn unfiltered(statement: &str, table: &str) {
        tracing::warn!(
            target: "fluentdb.sql",
            statement,
            table,
            "running without WHERE; every row is affected"
        );
    }

    pub(crate) fn transaction(event: &'static str, savepoint: Option<&str>) {
        tracing::info!(
            target: "fluentdb.sql",
            savepoint = savepoint.unwrap_or("-"),
            "transaction {event}"
        );
    }

    pub(crate) fn auto_rollback(cause: Option<&StatementError>) {
        tracing::warn!(
            target: "fluentdb.sql",
            cause = cause.map(|c| c.message.as_str()).unwrap_or("-"),
            "dirty transaction rolled back"
        );
    }
}

#[cfg(not(feature = "tracing"))]
mod disabled {
    use crate::error::StatementError;
    use crate::sql::BoundStatement;
    use std::time::Duration;

    pub(crate) fn statement(_stmt: &BoundStatement, _elapsed: Duration, _max: Option<usize>) {}

    pub(crate) fn statement_failed(_err: &StatementError, _max: Option<usize>) {}

    pub(crate) fn unfiltered(_statement: &str, _table: &str) {}

    pub(crate) fn transaction(_event: &'static str, _savepoint: Option<&str>) {}

    pub(crate) fn auto_rollback(_cause: Option<&StatementError>) {}
}

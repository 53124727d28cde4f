//! # fluentdb
//!
//! A single-connection SQL helper with a fluent, parameter-safe query builder.
//!
//! ## Features
//!
//! - **Fluent builder**: chain `where_`/`join`/`group_by`/`order_by`/`limit`, then run
//!   `get`/`insert`/`update`/`delete`. The pending state resets after every terminal call.
//! - **Always parameterized**: every value becomes a placeholder (`?` on MySQL, `$n` on
//!   Postgres) bound in textual order. Raw SQL only enters through explicit markers.
//! - **Pure compiler**: [`QueryBuilder`] compiles to a [`BoundStatement`] without a driver,
//!   so statements can be inspected and tested on their own.
//! - **Safe defaults**: UPDATE/DELETE without WHERE are refused unless opted in.
//! - **Transactions**: begin/commit/rollback plus named savepoints; a failed statement
//!   makes the transaction dirty and blocks a silent commit.
//! - **Lazy rows**: stream large results one row at a time with [`LazyRows`].
//!
//! ## Example
//!
//! ```ignore
//! use fluentdb::{row, inc, now, Database, Op, PgDriver};
//!
//! let mut db = Database::new(PgDriver::connect_url("postgres://postgres@localhost/app").await?);
//!
//! let id = db
//!     .insert("users", row! { "username" => "alice", "created_at" => now(None) })
//!     .await?;
//!
//! db.where_("id", id.clone()).update("users", row! { "logins" => inc(1) }, None::<u64>).await?;
//!
//! let recent = db
//!     .where_op("created_at", Op::Gt, "2024-01-01")
//!     .get("users", 10, &["id", "username"])
//!     .await?;
//! ```

pub mod builder;
pub mod condition;
pub mod config;
pub mod database;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod lazy;
pub mod param;
pub mod postgres;
pub mod sql;
pub mod transaction;
pub mod value;

mod bind;
mod trace;

pub use builder::{
    CompileContext, InsertMode, JoinKind, JoinTarget, Limit, Lock, Order, QueryBuilder,
    QueryOption, SubQuery, SubQueryBuilder,
};
pub use condition::{ConditionList, Connector, Op, Operand};
pub use config::{ConnectParams, DangerousDmlPolicy, DbConfig};
pub use database::Database;
pub use dialect::Dialect;
pub use driver::{Driver, RowStream};
pub use error::{
    BuilderError, DbError, DbResult, DriverError, StatementError, TransactionError,
};
pub use lazy::LazyRows;
pub use param::ParamList;
pub use postgres::PgDriver;
pub use sql::{BoundStatement, SqlFragment, StatementKind};
pub use transaction::{TransactionState, TxPhase};
pub use value::{ColumnValue, Record, RowData, Value, dec, func, inc, now, raw};

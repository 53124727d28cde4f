//! PostgreSQL driver built on tokio-postgres.

use crate::config::ConnectParams;
use crate::dialect::Dialect;
use crate::driver::{Driver, RowStream};
use crate::error::{DbError, DbResult, DriverError};
use crate::sql::BoundStatement;
use crate::value::{Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_core::Stream;
use rust_decimal::Decimal;
use std::error::Error;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

/// A single tokio-postgres connection.
pub struct PgDriver {
    client: Client,
}

impl PgDriver {
    /// Open a connection and drive it on the current tokio runtime.
    pub async fn connect(params: &ConnectParams) -> DbResult<Self> {
        let (client, connection) = params
            .to_pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(_e) = connection.await {
                #[cfg(feature = "tracing")]
                tracing::warn!(target: "fluentdb.sql", error = %_e, "postgres connection closed");
            }
        });
        Ok(Self { client })
    }

    /// Open a connection from a `postgres://` URL.
    pub async fn connect_url(url: &str) -> DbResult<Self> {
        Self::connect(&ConnectParams::from_url(url)?).await
    }

    /// Wrap a client whose connection task is already running.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl std::fmt::Debug for PgDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDriver")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

impl Driver for PgDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&self, stmt: &BoundStatement) -> Result<u64, DriverError> {
        if stmt.params.is_empty() {
            // Simple protocol: allows multi-statement text and transaction control.
            let messages = self.client.simple_query(&stmt.sql).await?;
            return Ok(messages
                .iter()
                .filter_map(|m| match m {
                    tokio_postgres::SimpleQueryMessage::CommandComplete(n) => Some(*n),
                    _ => None,
                })
                .sum());
        }
        Ok(self.client.execute(stmt.sql.as_str(), &stmt.params_ref()).await?)
    }

    async fn query(&self, stmt: &BoundStatement) -> Result<Vec<Record>, DriverError> {
        let rows = self
            .client
            .query(stmt.sql.as_str(), &stmt.params_ref())
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn query_stream(&self, stmt: &BoundStatement) -> Result<RowStream, DriverError> {
        let stream = self
            .client
            .query_raw(stmt.sql.as_str(), stmt.params.iter())
            .await?;
        Ok(RowStream::new(MapPgRowStream::new(stream)))
    }

    async fn begin(&self) -> Result<(), DriverError> {
        Ok(self.client.batch_execute("BEGIN").await?)
    }

    async fn commit(&self) -> Result<(), DriverError> {
        Ok(self.client.batch_execute("COMMIT").await?)
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }

    fn cancel(&self) {
        let token = self.client.cancel_token();
        tokio::spawn(async move {
            let _ = token.cancel_query(NoTls).await;
        });
    }
}

struct MapPgRowStream<S> {
    inner: Pin<Box<S>>,
}

impl<S> MapPgRowStream<S> {
    fn new(stream: S) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl<S> Stream for MapPgRowStream<S>
where
    S: Stream<Item = Result<Row, tokio_postgres::Error>> + Send + 'static,
{
    type Item = Result<Record, DriverError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(row_to_record(&row))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Decode every column of a row, keeping the driver's column order.
fn row_to_record(row: &Row) -> Result<Record, DriverError> {
    let mut record = Record::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_()).map_err(|e| {
            DriverError::new(format!(
                "failed to decode column '{}' ({}): {e}",
                column.name(),
                column.type_()
            ))
        })?;
        record.push(column.name(), value);
    }
    Ok(record)
}

fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx)
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> Result<Value, Box<dyn Error + Sync + Send>> {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::CHAR => get::<i8>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(Value::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(Value::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(Value::Json),
        Type::UUID => get::<Uuid>(row, idx)?.map(Value::Uuid),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(Value::TimestampTz),
        _ => match ty.kind() {
            Kind::Enum(_) => get::<EnumLabel>(row, idx)?.map(|l| Value::Text(l.0)),
            _ if ty.name() == "citext" => get::<String>(row, idx)?.map(Value::Text),
            _ => return Err(format!("unsupported column type {}", ty.name()).into()),
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Enum labels travel as plain UTF-8 in the binary protocol.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(EnumLabel(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

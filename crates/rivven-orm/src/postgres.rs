//! PostgreSQL backend for rivven-orm
//!
//! Provides PostgreSQL-specific implementations:
//! - Connection over tokio-postgres (`NoTls`), with the driver task spawned on tokio
//! - Transactions via `BEGIN` / `COMMIT` / `ROLLBACK` on the same session
//! - Parameter binding that adapts integer widths and NULLs to the column type

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tracing::warn;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// A rivven Value bound as a tokio-postgres parameter.
///
/// The server decides parameter types from the statement, so integers are
/// narrowed or widened to the column's width and NULL is accepted for any
/// type.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int8(n) => int_to_sql(i64::from(*n), ty, out),
            Value::Int16(n) => int_to_sql(i64::from(*n), ty, out),
            Value::Int32(n) => int_to_sql(i64::from(*n), ty, out),
            Value::Int64(n) => int_to_sql(*n, ty, out),
            Value::Float32(n) if *ty == Type::FLOAT8 => f64::from(*n).to_sql(ty, out),
            Value::Float32(n) => n.to_sql(ty, out),
            Value::Float64(n) if *ty == Type::FLOAT4 => (*n as f32).to_sql(ty, out),
            Value::Float64(n) => n.to_sql(ty, out),
            Value::String(s) => s.to_sql(ty, out),
            Value::Bytes(b) => b.to_sql(ty, out),
            Value::Date(d) => d.to_sql(ty, out),
            Value::Time(t) => t.to_sql(ty, out),
            Value::DateTime(dt) => dt.to_sql(ty, out),
            Value::DateTimeTz(dt) => dt.to_sql(ty, out),
            Value::Uuid(u) => u.to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(n: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(n)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(n)?.to_sql(ty, out),
        Type::FLOAT4 => (n as f32).to_sql(ty, out),
        Type::FLOAT8 => (n as f64).to_sql(ty, out),
        Type::BOOL => (n != 0).to_sql(ty, out),
        _ => n.to_sql(ty, out),
    }
}

/// Convert a tokio-postgres row to a rivven Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row> {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect::<Result<Vec<Value>>>()?;

    Ok(Row::new(columns, values))
}

/// Read column `idx` as `T`; NULL becomes `Value::Null`, a decode failure
/// is a [`Error::TypeConversion`]
fn read<'a, T>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: impl FnOnce(T) -> Value,
) -> Result<Value>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(value) => Ok(value.map(wrap).unwrap_or(Value::Null)),
        Err(e) => {
            let column = &row.columns()[idx];
            Err(Error::type_conversion(format!(
                "cannot decode column {} ({}): {}",
                column.name(),
                column.type_(),
                e
            )))
        }
    }
}

/// Convert a PostgreSQL value to a rivven Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Result<Value> {
    match *pg_type {
        Type::BOOL => read(row, idx, Value::Bool),
        Type::CHAR => read(row, idx, Value::Int8),
        Type::INT2 => read(row, idx, Value::Int16),
        Type::INT4 => read(row, idx, Value::Int32),
        Type::INT8 => read(row, idx, Value::Int64),
        Type::FLOAT4 => read(row, idx, Value::Float32),
        Type::FLOAT8 => read(row, idx, Value::Float64),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => read(row, idx, Value::String),
        Type::BYTEA => read(row, idx, Value::Bytes),
        Type::DATE => read(row, idx, Value::Date),
        Type::TIME => read(row, idx, Value::Time),
        Type::TIMESTAMP => read(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => read(row, idx, Value::DateTimeTz),
        Type::UUID => read(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => read(row, idx, Value::Json),
        // Other types only load when they decode as text (enums, citext, ...)
        _ => read(row, idx, Value::String),
    }
}

async fn run_query(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>> {
    let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
    let param_refs: Vec<&(dyn ToSql + Sync)> =
        params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let pg_rows = client
        .query(sql, &param_refs)
        .await
        .map_err(|e| Error::query_with_source(sql, e))?;

    pg_rows.iter().map(pg_row_to_row).collect()
}

async fn run_execute(client: &tokio_postgres::Client, sql: &str, params: &[Value]) -> Result<u64> {
    let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
    let param_refs: Vec<&(dyn ToSql + Sync)> =
        params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    client
        .execute(sql, &param_refs)
        .await
        .map_err(|e| Error::query_with_source(sql, e))
}

async fn run_control(client: &tokio_postgres::Client, sql: &str) -> Result<()> {
    client
        .batch_execute(sql)
        .await
        .map_err(Error::transaction_with_source)
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
    created_at: Instant,
}

impl PgConnection {
    /// Wrap a connected client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    /// Get connection age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        run_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        run_execute(&self.client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        run_control(&self.client, "BEGIN").await?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
        }))
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        run_execute(&self.client, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        run_control(&self.client, "COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        run_control(&self.client, "ROLLBACK").await
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::connection_with_source("invalid PostgreSQL target", e))?;
        pg_config.connect_timeout(std::time::Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection terminated");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

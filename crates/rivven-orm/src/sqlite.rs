//! SQLite backend for rivven-orm
//!
//! Each pooled connection is a `tokio_rusqlite::Connection`, i.e. one
//! rusqlite handle on its own background thread. The target is handed to
//! SQLite as-is, so `file:` URIs with query options work. Transactions start
//! with `BEGIN IMMEDIATE` so the write lock is taken up front and a busy
//! database fails at `begin` rather than at the first write.

use async_trait::async_trait;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::ErrorCode;
use std::time::{Duration, Instant};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, ExecuteResult, Transaction,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Connection property holding the busy timeout in milliseconds
pub const BUSY_TIMEOUT_PROPERTY: &str = "busy_timeout_ms";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Convert a rivven Value to an owned SQLite value
fn value_to_sql(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int8(n) => SqliteValue::Integer(i64::from(*n)),
        Value::Int16(n) => SqliteValue::Integer(i64::from(*n)),
        Value::Int32(n) => SqliteValue::Integer(i64::from(*n)),
        Value::Int64(n) => SqliteValue::Integer(*n),
        Value::Float32(n) => SqliteValue::Real(f64::from(*n)),
        Value::Float64(n) => SqliteValue::Real(*n),
        Value::String(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Date(d) => SqliteValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => SqliteValue::Text(t.format("%H:%M:%S%.f").to_string()),
        Value::DateTime(dt) => SqliteValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::DateTimeTz(dt) => SqliteValue::Text(dt.to_rfc3339()),
        Value::Uuid(u) => SqliteValue::Text(u.to_string()),
        Value::Json(j) => SqliteValue::Text(j.to_string()),
    }
}

/// Convert a SQLite storage value to a rivven Value.
///
/// SQLite only knows its five storage classes; typed decoding of text
/// columns (dates, UUIDs) is left to the entry reading the row.
fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int64(n),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => match std::str::from_utf8(t) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(t.to_vec()),
        },
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn query_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqliteValue],
) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(value_from_sql))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(Row::new(columns.clone(), values));
    }
    Ok(out)
}

fn execute_statement(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqliteValue],
) -> rusqlite::Result<ExecuteResult> {
    let mut stmt = conn.prepare_cached(sql)?;
    let changed = stmt.execute(rusqlite::params_from_iter(params.iter()))?;
    let rowid = conn.last_insert_rowid();

    Ok(ExecuteResult {
        rows_affected: changed as u64,
        last_insert_id: (changed > 0 && rowid > 0).then_some(rowid),
    })
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Map a statement failure; lock waits that ran out become timeouts
fn statement_error(sql: &str, e: rusqlite::Error) -> Error {
    if is_busy(&e) {
        return Error::timeout(format!("database is busy: {}", e));
    }
    Error::query_with_source(sql, e)
}

fn control_error(e: rusqlite::Error) -> Error {
    if is_busy(&e) {
        return Error::timeout(format!("database is busy: {}", e));
    }
    Error::transaction_with_source(e)
}

/// Run `op` on the connection's background thread
async fn call<R, F>(conn: &tokio_rusqlite::Connection, op: F) -> Result<rusqlite::Result<R>>
where
    F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
{
    conn.call(move |c| Ok::<_, rusqlite::Error>(op(c)))
        .await
        .map_err(|e: tokio_rusqlite::Error<rusqlite::Error>| {
            Error::connection_with_source("SQLite connection unavailable", e)
        })
}

async fn run_query(conn: &tokio_rusqlite::Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let owned_sql = sql.to_string();
    let params: Vec<SqliteValue> = params.iter().map(value_to_sql).collect();
    call(conn, move |c| query_rows(c, &owned_sql, &params))
        .await?
        .map_err(|e| statement_error(sql, e))
}

async fn run_execute(
    conn: &tokio_rusqlite::Connection,
    sql: &str,
    params: &[Value],
) -> Result<ExecuteResult> {
    let owned_sql = sql.to_string();
    let params: Vec<SqliteValue> = params.iter().map(value_to_sql).collect();
    call(conn, move |c| execute_statement(c, &owned_sql, &params))
        .await?
        .map_err(|e| statement_error(sql, e))
}

async fn run_control(conn: &tokio_rusqlite::Connection, sql: &'static str) -> Result<()> {
    call(conn, move |c| c.execute_batch(sql))
        .await?
        .map_err(control_error)
}

/// SQLite connection implementation
pub struct SqliteConnection {
    conn: tokio_rusqlite::Connection,
    created_at: Instant,
}

impl SqliteConnection {
    /// Open the database named by `config.url`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(Error::config("SQLite target is empty"));
        }
        let busy_timeout = match config.properties.get(BUSY_TIMEOUT_PROPERTY) {
            Some(ms) => Duration::from_millis(ms.parse().map_err(|_| {
                Error::config(format!("invalid {}: {}", BUSY_TIMEOUT_PROPERTY, ms))
            })?),
            None => DEFAULT_BUSY_TIMEOUT,
        };

        let conn = tokio_rusqlite::Connection::open(config.url.clone())
            .await
            .map_err(|e| Error::connection_with_source("failed to open SQLite database", e))?;

        call(&conn, move |c| {
            c.busy_timeout(busy_timeout)?;
            c.pragma_update(None, "foreign_keys", "ON")
        })
        .await?
        .map_err(|e| Error::connection_with_source("failed to configure SQLite connection", e))?;

        Ok(Self {
            conn,
            created_at: Instant::now(),
        })
    }

    /// Get connection age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run_query(&self.conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(run_execute(&self.conn, sql, params).await?.rows_affected)
    }

    async fn execute_with_result(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        run_execute(&self.conn, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        run_control(&self.conn, "BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteTransaction {
            conn: self.conn.clone(),
        }))
    }

    async fn is_valid(&self) -> bool {
        matches!(
            call(&self.conn, |c| c.query_row("SELECT 1", [], |_| Ok(()))).await,
            Ok(Ok(()))
        )
    }

    async fn close(&self) -> Result<()> {
        self.conn
            .clone()
            .close()
            .await
            .map_err(|e| Error::connection_with_source("failed to close SQLite connection", e))
    }
}

/// SQLite transaction on the handle that began it
pub struct SqliteTransaction {
    conn: tokio_rusqlite::Connection,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run_query(&self.conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(run_execute(&self.conn, sql, params).await?.rows_affected)
    }

    async fn execute_with_result(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        run_execute(&self.conn, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        run_control(&self.conn, "COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        run_control(&self.conn, "ROLLBACK").await
    }
}

/// SQLite connection factory
#[derive(Debug, Clone, Default)]
pub struct SqliteConnectionFactory;

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection::connect(config).await?))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

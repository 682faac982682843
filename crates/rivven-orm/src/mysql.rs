//! MySQL backend for rivven-orm
//!
//! Sessions are opened with `CLIENT_FOUND_ROWS` so an UPDATE reports the
//! rows it matched rather than the rows it changed. Transactions are driven
//! with plain `BEGIN` / `COMMIT` / `ROLLBACK` on the session they started on.

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, ExecuteResult, Transaction,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Convert a rivven Value to a MySQL parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int8(n) => mysql_async::Value::from(*n),
        Value::Int16(n) => mysql_async::Value::from(*n),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        Value::String(s) => mysql_async::Value::from(s.as_str()),
        Value::Bytes(b) => mysql_async::Value::from(b.as_slice()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => datetime_to_sql(dt),
        Value::DateTimeTz(dt) => datetime_to_sql(&dt.naive_utc()),
        Value::Uuid(u) => mysql_async::Value::from(u.to_string()),
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
    }
}

fn datetime_to_sql(dt: &chrono::NaiveDateTime) -> mysql_async::Value {
    mysql_async::Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.nanosecond() / 1000,
    )
}

fn invalid_temporal(kind: &str, value: &mysql_async::Value) -> Error {
    Error::type_conversion(format!("invalid MySQL {} value {:?}", kind, value))
}

/// Convert a MySQL value to a rivven Value
fn mysql_value_to_value(val: mysql_async::Value) -> Result<Value> {
    let value = match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => Value::Int64(i64::try_from(n).map_err(|_| {
            Error::type_conversion(format!("unsigned value {} exceeds i64", n))
        })?),
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        // Zero dates are MySQL's "no date"
        mysql_async::Value::Date(0, 0, 0, 0, 0, 0, 0) => Value::Null,
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .ok_or_else(|| invalid_temporal("date", &val))?;
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                return Ok(Value::Date(date));
            }
            let time =
                chrono::NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                    .ok_or_else(|| invalid_temporal("datetime", &val))?;
            Value::DateTime(date.and_time(time))
        }
        // TIME columns may hold durations; only time-of-day values map to Time
        mysql_async::Value::Time(false, 0, hour, min, sec, micro) => {
            chrono::NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                .map(Value::Time)
                .ok_or_else(|| invalid_temporal("time", &val))?
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => Value::String(format!(
            "{}{}:{:02}:{:02}.{:06}",
            if neg { "-" } else { "" },
            days * 24 + u32::from(hour),
            min,
            sec,
            micro
        )),
    };
    Ok(value)
}

fn mysql_row_to_row(mut row: mysql_async::Row) -> Result<Row> {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();

    let values = (0..row.len())
        .map(|i| match row.take::<mysql_async::Value, _>(i) {
            Some(value) => mysql_value_to_value(value),
            None => Err(Error::type_conversion(format!(
                "column {} missing from result row",
                columns[i]
            ))),
        })
        .collect::<Result<Vec<Value>>>()?;

    Ok(Row::new(columns, values))
}

fn query_error(sql: &str, e: mysql_async::Error) -> Error {
    if let mysql_async::Error::Server(server) = &e {
        // ER_LOCK_DEADLOCK
        if server.code == 1213 {
            return Error::Deadlock;
        }
    }
    Error::query_with_source(sql, e)
}

type SharedConn = Arc<Mutex<Option<Conn>>>;

async fn run_query(conn: &SharedConn, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut guard = conn.lock().await;
    let conn = guard
        .as_mut()
        .ok_or_else(|| Error::connection("connection is closed"))?;

    let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
    let rows: Vec<mysql_async::Row> = conn
        .exec(sql, mysql_params)
        .await
        .map_err(|e| query_error(sql, e))?;

    rows.into_iter().map(mysql_row_to_row).collect()
}

async fn run_execute(conn: &SharedConn, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
    let mut guard = conn.lock().await;
    let conn = guard
        .as_mut()
        .ok_or_else(|| Error::connection("connection is closed"))?;

    let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
    conn.exec_drop(sql, mysql_params)
        .await
        .map_err(|e| query_error(sql, e))?;

    Ok(ExecuteResult {
        rows_affected: conn.affected_rows(),
        last_insert_id: conn
            .last_insert_id()
            .filter(|id| *id > 0)
            .and_then(|id| i64::try_from(id).ok()),
    })
}

async fn run_control(conn: &SharedConn, sql: &str) -> Result<()> {
    let mut guard = conn.lock().await;
    let conn = guard
        .as_mut()
        .ok_or_else(|| Error::transaction("connection is closed"))?;

    conn.query_drop(sql)
        .await
        .map_err(Error::transaction_with_source)
}

/// MySQL connection implementation
pub struct MySqlConnection {
    conn: SharedConn,
    database: String,
    created_at: Instant,
}

impl MySqlConnection {
    /// Wrap an open session
    pub fn new(conn: Conn, database: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            database,
            created_at: Instant::now(),
        }
    }

    /// Open a session for `config`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = mysql_async::Opts::from_url(&config.url)
            .map_err(|e| Error::config(format!("invalid MySQL target: {}", e)))?;
        let database = opts.db_name().unwrap_or_default().to_string();

        let opts = OptsBuilder::from_opts(opts).client_found_rows(true);
        let conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            Conn::new(opts),
        )
        .await
        .map_err(|_| Error::timeout("connecting to MySQL"))?
        .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        Ok(Self::new(conn, database))
    }

    /// Database the session is using
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Get connection age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[async_trait]
impl Connection for MySqlConnection {
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
        run_control(&self.conn, "BEGIN").await?;
        Ok(Box::new(MySqlTransaction {
            conn: Arc::clone(&self.conn),
        }))
    }

    async fn is_valid(&self) -> bool {
        match self.conn.lock().await.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("failed to close connection", e))?;
        }
        Ok(())
    }
}

/// MySQL transaction on the session that began it
pub struct MySqlTransaction {
    conn: SharedConn,
}

#[async_trait]
impl Transaction for MySqlTransaction {
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

/// MySQL connection factory
#[derive(Debug, Clone, Default)]
pub struct MySqlConnectionFactory;

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MySqlConnection::connect(config).await?))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

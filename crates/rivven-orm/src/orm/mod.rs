//! Command engines
//!
//! [`Orm`] is the operation set every engine implements. An engine wraps
//! either the connection pool or one open transaction; the same operations
//! work on both, so engine code never cares which.
//!
//! | Engine | Identity after insert | Locked read | Upsert detection | Offset without limit |
//! |--------|-----------------------|-------------|------------------|----------------------|
//! | [`MySqlOrm`] | `last_insert_id` | `FOR UPDATE` | locked read | `LIMIT 4294967295` |
//! | [`PostgresOrm`] | `RETURNING` | `FOR UPDATE` | locked read | native |
//! | [`SqliteOrm`] | `last_insert_rowid` | plain read | row count | `LIMIT 4294967295` |
//! | [`SqlServerOrm`] | `OUTPUT INSERTED` | `WITH (XLOCK, ROWLOCK)` | locked read | `OFFSET .. FETCH` |
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_orm::prelude::*;
//!
//! let orm = rivven_orm::connect(&DatabaseConfig::sqlite("file:app.db")).await?;
//!
//! let mut account = Account { email: "a@example.com".into(), ..Default::default() };
//! orm.create(&mut account).await?;
//!
//! orm.with_transaction(&mut transaction(move |tx| {
//!     Box::pin(async move {
//!         let mut account = Account { id, ..Default::default() };
//!         tx.get_with_lock(&mut account).await?;
//!         account.balance += 10;
//!         tx.update(&mut account).await
//!     })
//! }))
//! .await?;
//! ```

mod executor;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlserver")]
mod sqlserver;

#[cfg(feature = "mysql")]
pub use mysql::MySqlOrm;
#[cfg(feature = "postgres")]
pub use postgres::PostgresOrm;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteOrm;
#[cfg(feature = "sqlserver")]
pub use sqlserver::SqlServerOrm;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sea_query::{Alias, Cond, Condition, Order, SelectStatement};
use std::sync::Arc;
use tracing::info;

use crate::config::{DatabaseConfig, DatabaseDriver};
use crate::connection::{redact_target, ExecuteResult};
use crate::dialect::{self, SqlDialect, Statement};
use crate::entry::{Entry, EntrySink};
use crate::error::{Error, Result};
use crate::pool::SimpleConnectionPool;
use crate::target;
use crate::types::Row;

/// Limit substituted when only an offset is given, for dialects that need both
pub const UNBOUNDED_LIMIT: u64 = u32::MAX as u64;

/// Filter, ordering and pagination of a multi-row query
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Table to read
    pub table: String,
    /// Row filter
    pub filter: Condition,
    /// Ordering, applied in sequence
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of rows
    pub limit: Option<u32>,
    /// Rows to skip
    pub offset: Option<u32>,
}

impl QueryParams {
    /// All rows of `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Cond::all(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Set the row filter
    pub fn filter(mut self, filter: Condition) -> Self {
        self.filter = filter;
        self
    }

    /// Append an ordering column
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    /// Set the row limit
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the row offset
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether an ordering was requested
    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Filtered, ordered select without pagination
    pub(crate) fn select_unpaginated(&self) -> SelectStatement {
        let mut stmt = dialect::select_statement(&self.table, self.filter.clone());
        for (column, order) in &self.order_by {
            stmt.order_by(Alias::new(column.as_str()), order.clone());
        }
        stmt
    }

    /// Filtered, ordered, paginated select.
    ///
    /// With `limit_with_offset`, an offset without limit is paired with
    /// [`UNBOUNDED_LIMIT`].
    pub(crate) fn select(&self, limit_with_offset: bool) -> SelectStatement {
        let mut stmt = self.select_unpaginated();
        match (self.limit, self.offset) {
            (Some(limit), _) => {
                stmt.limit(u64::from(limit));
            }
            (None, Some(_)) if limit_with_offset => {
                stmt.limit(UNBOUNDED_LIMIT);
            }
            _ => {}
        }
        if let Some(offset) = self.offset {
            stmt.offset(u64::from(offset));
        }
        stmt
    }
}

/// Work run inside one transaction by [`Orm::with_transaction`]
#[async_trait]
pub trait TransactionBody: Send {
    /// Run against the transactional handle
    async fn run(&mut self, tx: &dyn Orm) -> Result<()>;
}

/// [`TransactionBody`] backed by a closure, see [`transaction`]
pub struct FnBody<F>(F);

#[async_trait]
impl<F> TransactionBody for FnBody<F>
where
    F: for<'a> FnMut(&'a dyn Orm) -> BoxFuture<'a, Result<()>> + Send,
{
    async fn run(&mut self, tx: &dyn Orm) -> Result<()> {
        (self.0)(tx).await
    }
}

/// Wrap a closure as a [`TransactionBody`].
///
/// The closure may run more than once when the engine retries transactions.
pub fn transaction<F>(body: F) -> FnBody<F>
where
    F: for<'a> FnMut(&'a dyn Orm) -> BoxFuture<'a, Result<()>> + Send,
{
    FnBody(body)
}

struct CreateOrUpdate<'e> {
    entry: &'e mut dyn Entry,
}

#[async_trait]
impl TransactionBody for CreateOrUpdate<'_> {
    async fn run(&mut self, tx: &dyn Orm) -> Result<()> {
        if tx.exists_with_lock(&*self.entry).await? {
            tx.update(&mut *self.entry).await
        } else {
            tx.create(&mut *self.entry).await
        }
    }
}

/// Operation set shared by every command engine
#[async_trait]
pub trait Orm: Send + Sync {
    /// Dialect statements are rendered with
    fn dialect(&self) -> &dyn SqlDialect;

    /// Whether this handle runs inside an open transaction
    fn in_transaction(&self) -> bool;

    /// Insert the entry; write the generated identity back when the entry
    /// accepts one.
    async fn create(&self, entry: &mut dyn Entry) -> Result<()>;

    /// Load the row selected by the entry. Fails with [`Error::NotFound`].
    async fn get(&self, entry: &mut dyn Entry) -> Result<()>;

    /// [`Orm::get`] holding an exclusive row lock until the enclosing
    /// transaction ends.
    async fn get_with_lock(&self, entry: &mut dyn Entry) -> Result<()>;

    /// Load every row matching `params` into `sink`
    async fn query(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()>;

    /// [`Orm::query`] holding exclusive locks on the returned rows
    async fn query_with_lock(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()>;

    /// Rows of `table` matching `filter`
    async fn count(&self, table: &str, filter: Condition) -> Result<i64>;

    /// Write every column of the entry to its selected row.
    /// Fails with [`Error::UpdateNotApplied`] when no row matched.
    async fn update(&self, entry: &mut dyn Entry) -> Result<()>;

    /// Read the entry's row the way [`Orm::create_or_update`] decides
    /// between insert and update; locks it where the engine supports locks.
    async fn exists_with_lock(&self, entry: &dyn Entry) -> Result<bool>;

    /// Insert the entry, or update it when its row exists, in one transaction
    async fn create_or_update(&self, entry: &mut dyn Entry) -> Result<()> {
        self.with_transaction(&mut CreateOrUpdate { entry }).await
    }

    /// Delete the entry's row. Fails with [`Error::NotFound`].
    async fn delete(&self, entry: &dyn Entry) -> Result<()>;

    /// Run `body` in a transaction: commit when it succeeds, roll back and
    /// return its error otherwise. On a transactional handle the body runs in
    /// the open transaction.
    async fn with_transaction(&self, body: &mut dyn TransactionBody) -> Result<()>;

    /// Run a raw statement on this handle, inside the open transaction when
    /// there is one. Placeholders follow [`Orm::dialect`].
    async fn execute(&self, stmt: &Statement) -> Result<ExecuteResult>;

    /// Run a raw query on this handle, inside the open transaction when
    /// there is one
    async fn fetch(&self, stmt: &Statement) -> Result<Vec<Row>>;

    /// Close the pool behind the engine
    async fn close(&self) -> Result<()>;
}

/// Build the engine selected by `config.driver`
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Orm>> {
    config.check()?;
    let target = target::resolve(config)?;
    info!(
        driver = %config.driver,
        target = %redact_target(&target),
        "Connecting command engine"
    );
    let pool_config = config.pool_config(target);

    match config.driver {
        #[cfg(feature = "mysql")]
        DatabaseDriver::MySql => {
            let pool = SimpleConnectionPool::new(
                pool_config,
                Arc::new(crate::mysql::MySqlConnectionFactory),
            )
            .await?;
            Ok(Arc::new(MySqlOrm::new(pool)))
        }
        #[cfg(feature = "postgres")]
        DatabaseDriver::Postgres => {
            let pool =
                SimpleConnectionPool::new(pool_config, Arc::new(crate::postgres::PgConnectionFactory))
                    .await?;
            Ok(Arc::new(PostgresOrm::new(pool)))
        }
        #[cfg(feature = "sqlite")]
        DatabaseDriver::Sqlite3 => {
            let pool = SimpleConnectionPool::new(
                pool_config,
                Arc::new(crate::sqlite::SqliteConnectionFactory),
            )
            .await?;
            Ok(Arc::new(SqliteOrm::new(pool, config.serializer_config())))
        }
        #[cfg(feature = "sqlserver")]
        DatabaseDriver::SqlServer => {
            let pool = SimpleConnectionPool::new(
                pool_config,
                Arc::new(crate::sqlserver::SqlServerConnectionFactory),
            )
            .await?;
            Ok(Arc::new(SqlServerOrm::new(pool)))
        }
        #[allow(unreachable_patterns)]
        other => Err(Error::unsupported(format!(
            "driver {} is not enabled in this build",
            other
        ))),
    }
}

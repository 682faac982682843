//! Statement execution shared by the engines
//!
//! An [`Executor`] runs rendered statements either on a pooled connection
//! or inside one open transaction. The transaction, and the connection it
//! runs on, live in a [`TransactionScope`] that ends with
//! [`TransactionScope::finish`]. A scope dropped before that (the caller's
//! future was cancelled) rolls back on a background task and only then
//! gives the connection back to the pool.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::{ExecuteResult, Transaction};
use crate::dialect::{Statement, COUNT_COLUMN};
use crate::entry::{Entry, EntrySink};
use crate::error::{Error, Result};
use crate::orm::{Orm, TransactionBody};
use crate::pool::{ConnectionPool, PooledConnection, SimpleConnectionPool};
use crate::types::Row;

/// Where an engine sends its statements
#[derive(Clone)]
pub(crate) enum Executor {
    /// A fresh pooled connection per statement
    Pool(Arc<SimpleConnectionPool>),
    /// The open transaction of one `with_transaction` body
    Transaction(Arc<TransactionScope>),
}

impl Executor {
    pub(crate) fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    pub(crate) async fn query(&self, stmt: &Statement) -> Result<Vec<Row>> {
        debug!(sql = %stmt.sql, params = stmt.values.len(), "Executing query");
        match self {
            Self::Pool(pool) => {
                let conn = pool.get().await?;
                conn.query(&stmt.sql, &stmt.values).await
            }
            Self::Transaction(scope) => scope.query(stmt).await,
        }
    }

    pub(crate) async fn execute(&self, stmt: &Statement) -> Result<ExecuteResult> {
        debug!(sql = %stmt.sql, params = stmt.values.len(), "Executing statement");
        match self {
            Self::Pool(pool) => {
                let conn = pool.get().await?;
                conn.execute_with_result(&stmt.sql, &stmt.values).await
            }
            Self::Transaction(scope) => scope.execute(stmt).await,
        }
    }

    /// Load the first row into `entry`, or fail with [`Error::NotFound`]
    pub(crate) async fn fetch_entry(&self, stmt: &Statement, entry: &mut dyn Entry) -> Result<()> {
        let rows = self.query(stmt).await?;
        let row = rows.first().ok_or(Error::NotFound)?;
        entry.load_row(row)
    }

    /// Load every row into `sink`
    pub(crate) async fn fetch_into(&self, stmt: &Statement, sink: &mut dyn EntrySink) -> Result<()> {
        for row in self.query(stmt).await? {
            sink.push_row(&row)?;
        }
        Ok(())
    }

    /// Whether the statement returns at least one row
    pub(crate) async fn exists(&self, stmt: &Statement) -> Result<bool> {
        Ok(!self.query(stmt).await?.is_empty())
    }

    /// Read the scalar of a count statement
    pub(crate) async fn count(&self, stmt: &Statement) -> Result<i64> {
        let rows = self.query(stmt).await?;
        rows.first()
            .and_then(|row| row.get_by_name(COUNT_COLUMN).or_else(|| row.get(0)))
            .and_then(|value| value.as_i64())
            .ok_or_else(|| Error::query_with_sql("count returned no value", &stmt.sql))
    }

    /// Run an update, failing with [`Error::UpdateNotApplied`] when no row matched
    pub(crate) async fn apply_update(&self, stmt: &Statement) -> Result<()> {
        match self.execute(stmt).await?.rows_affected {
            0 => Err(Error::UpdateNotApplied),
            _ => Ok(()),
        }
    }

    /// Run a delete, failing with [`Error::NotFound`] when no row matched
    pub(crate) async fn apply_delete(&self, stmt: &Statement) -> Result<()> {
        match self.execute(stmt).await?.rows_affected {
            0 => Err(Error::NotFound),
            _ => Ok(()),
        }
    }

    /// Open a transaction on a pooled connection
    pub(crate) async fn begin(&self) -> Result<Executor> {
        match self {
            Self::Pool(pool) => Ok(Self::Transaction(TransactionScope::begin(pool).await?)),
            Self::Transaction(_) => Err(Error::transaction("transaction already open")),
        }
    }

    /// Run `body` against the engine `handle` builds: in the open transaction
    /// when there is one, otherwise in a new transaction that is committed or
    /// rolled back according to the body's result.
    pub(crate) async fn run_transaction<O, F>(
        &self,
        body: &mut dyn TransactionBody,
        handle: F,
    ) -> Result<()>
    where
        O: Orm,
        F: FnOnce(Executor) -> O + Send,
    {
        if self.is_transaction() {
            return body.run(&handle(self.clone())).await;
        }

        let tx = self.begin().await?;
        let result = body.run(&handle(tx.clone())).await;
        tx.finish(result).await
    }

    /// Commit on `Ok`, roll back on `Err`; a no-op outside a transaction
    pub(crate) async fn finish(&self, result: Result<()>) -> Result<()> {
        match self {
            Self::Pool(_) => result,
            Self::Transaction(scope) => scope.finish(result).await,
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        match self {
            Self::Pool(pool) => pool.close().await,
            Self::Transaction(_) => Ok(()),
        }
    }
}

/// One open transaction and the connection it runs on
pub(crate) struct TransactionScope {
    tx: Mutex<Option<Box<dyn Transaction>>>,
    conn: Option<PooledConnection>,
}

impl TransactionScope {
    async fn begin(pool: &Arc<SimpleConnectionPool>) -> Result<Arc<Self>> {
        let conn = pool.get().await?;
        let tx = conn.begin().await?;
        debug!("Transaction started");
        Ok(Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            conn: Some(conn),
        }))
    }

    async fn query(&self, stmt: &Statement) -> Result<Vec<Row>> {
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or_else(finished)?;
        tx.query(&stmt.sql, &stmt.values).await
    }

    async fn execute(&self, stmt: &Statement) -> Result<ExecuteResult> {
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or_else(finished)?;
        tx.execute_with_result(&stmt.sql, &stmt.values).await
    }

    async fn finish(&self, result: Result<()>) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        match result {
            Ok(()) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(())
            }
            Err(err) => {
                match tx.rollback().await {
                    Ok(()) => debug!(error = %err, "Transaction rolled back"),
                    Err(rollback_err) => warn!(
                        error = %err,
                        rollback_error = %rollback_err,
                        "Rollback after failed transaction body failed"
                    ),
                }
                Err(err)
            }
        }
    }
}

fn finished() -> Error {
    Error::transaction("transaction already finished")
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.get_mut().take() {
            let conn = self.conn.take();
            tokio::spawn(async move {
                match tx.rollback().await {
                    Ok(()) => debug!("Abandoned transaction rolled back"),
                    Err(e) => {
                        warn!(error = %e, "Rollback of abandoned transaction failed");
                        if let Some(conn) = conn {
                            conn.discard().await;
                        }
                    }
                }
            });
        }
    }
}

//! SQLite command engine
//!
//! SQLite has no row locks, so the locked reads are plain reads and upsert
//! detection is a row count. Isolation comes from the [`Serializer`]: every
//! transaction either holds the engine's [`WriteLock`] or is retried with
//! jittered backoff when the database is busy.

use async_trait::async_trait;
use sea_query::Condition;
use std::sync::Arc;
use tracing::warn;

use super::executor::Executor;
use super::{Orm, QueryParams, TransactionBody};
use crate::connection::ExecuteResult;
use crate::dialect::{self, SqlDialect, SqliteDialect, Statement};
use crate::entry::{self, Entry, EntrySink};
use crate::error::{Error, Result};
use crate::pool::SimpleConnectionPool;
use crate::serializer::{Serializer, SerializerConfig, WriteLock};
use crate::types::Row;

const DIALECT: SqliteDialect = SqliteDialect;

/// Command engine for SQLite
#[derive(Clone)]
pub struct SqliteOrm {
    executor: Executor,
    serializer: Serializer,
}

impl SqliteOrm {
    /// Create an engine over `pool` with its own write lock
    pub fn new(pool: Arc<SimpleConnectionPool>, config: SerializerConfig) -> Self {
        Self {
            executor: Executor::Pool(pool),
            serializer: Serializer::new(config),
        }
    }

    /// Share `lock` with other engines writing the same database file
    pub fn with_write_lock(mut self, lock: WriteLock) -> Self {
        self.serializer = self.serializer.with_write_lock(lock);
        self
    }

    /// Write lock serializing this engine's transactions
    pub fn write_lock(&self) -> &WriteLock {
        self.serializer.write_lock()
    }

    /// Transaction strategy
    pub fn serializer_config(&self) -> SerializerConfig {
        self.serializer.config()
    }

    fn in_scope(&self, executor: Executor) -> Self {
        Self {
            executor,
            serializer: self.serializer.clone(),
        }
    }
}

#[async_trait]
impl Orm for SqliteOrm {
    fn dialect(&self) -> &dyn SqlDialect {
        &DIALECT
    }

    fn in_transaction(&self) -> bool {
        self.executor.is_transaction()
    }

    async fn create(&self, entry: &mut dyn Entry) -> Result<()> {
        entry::run_create_hook(entry);
        let table = entry::table_name_of(entry)?;
        let identity = entry::generated_identity_column(entry)?;
        let stmt = dialect::insert_statement(&table, entry.insert_values())?;
        let built = DIALECT.build_insert(&stmt);
        let result = self.executor.execute(&built).await?;

        if identity.is_none() {
            return Ok(());
        }
        let id = result.last_insert_id.ok_or_else(|| {
            Error::query_with_sql("insert reported no rowid", &built.sql)
        })?;
        if let Some(target) = entry.as_identity_assignable() {
            target.assign_identity(id);
        }
        Ok(())
    }

    async fn get(&self, entry: &mut dyn Entry) -> Result<()> {
        let table = entry::table_name_of(entry)?;
        let cond = entry::selection_predicate_of(entry)?;

        let mut stmt = dialect::select_statement(&table, cond);
        stmt.limit(1);
        self.executor
            .fetch_entry(&DIALECT.build_select(&stmt), entry)
            .await
    }

    async fn get_with_lock(&self, entry: &mut dyn Entry) -> Result<()> {
        self.get(entry).await
    }

    async fn query(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()> {
        let stmt = params.select(DIALECT.requires_limit_with_offset());
        self.executor
            .fetch_into(&DIALECT.build_select(&stmt), sink)
            .await
    }

    async fn query_with_lock(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()> {
        self.query(params, sink).await
    }

    async fn count(&self, table: &str, filter: Condition) -> Result<i64> {
        let stmt = dialect::count_statement(table, filter);
        self.executor.count(&DIALECT.build_select(&stmt)).await
    }

    async fn update(&self, entry: &mut dyn Entry) -> Result<()> {
        entry::run_update_hook(entry);
        let table = entry::table_name_of(entry)?;
        let cond = entry::selection_predicate_of(entry)?;

        let stmt = dialect::update_statement(&table, cond, entry.update_values());
        self.executor
            .apply_update(&DIALECT.build_update(&stmt))
            .await
    }

    async fn exists_with_lock(&self, entry: &dyn Entry) -> Result<bool> {
        let table = entry::table_name_of(entry)?;
        let cond = entry::selection_predicate_of(entry)?;
        Ok(self.count(&table, cond).await? > 0)
    }

    async fn delete(&self, entry: &dyn Entry) -> Result<()> {
        let table = entry::table_name_of(entry)?;
        let cond = entry::selection_predicate_of(entry)?;

        let stmt = dialect::delete_statement(&table, cond);
        self.executor
            .apply_delete(&DIALECT.build_delete(&stmt))
            .await
    }

    async fn with_transaction(&self, body: &mut dyn TransactionBody) -> Result<()> {
        // Nested bodies run in the open transaction, already serialized
        if self.executor.is_transaction() {
            return body.run(self).await;
        }

        let _guard = self.serializer.enter().await;
        let mut attempt = 1;
        loop {
            let tx = self.executor.begin().await;
            let result = match tx {
                Ok(tx) => {
                    let result = body.run(&self.in_scope(tx.clone())).await;
                    tx.finish(result).await
                }
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            match self.serializer.retry_after(attempt, &err) {
                Some(delay) => {
                    warn!(
                        attempt,
                        max_attempts = self.serializer.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "SQLite transaction failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            }
        }
    }

    async fn execute(&self, stmt: &Statement) -> Result<ExecuteResult> {
        self.executor.execute(stmt).await
    }

    async fn fetch(&self, stmt: &Statement) -> Result<Vec<Row>> {
        self.executor.query(stmt).await
    }

    async fn close(&self) -> Result<()> {
        self.executor.close().await
    }
}

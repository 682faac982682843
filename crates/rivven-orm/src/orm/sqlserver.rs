//! SQL Server command engine
//!
//! Statements are rendered by the PostgreSQL backend and patched for T-SQL
//! by [`crate::rewrite`]: the row-lock hint, the `OUTPUT INSERTED` clause
//! for generated identities and `OFFSET .. FETCH` pagination.

use async_trait::async_trait;
use sea_query::Condition;
use std::sync::Arc;

use super::executor::Executor;
use super::{Orm, QueryParams, TransactionBody};
use crate::connection::ExecuteResult;
use crate::dialect::{self, SqlDialect, SqlServerDialect, Statement};
use crate::entry::{self, Entry, EntrySink};
use crate::error::{Error, Result};
use crate::pool::SimpleConnectionPool;
use crate::rewrite;
use crate::types::Row;

const DIALECT: SqlServerDialect = SqlServerDialect;

/// Command engine for SQL Server
#[derive(Clone)]
pub struct SqlServerOrm {
    executor: Executor,
}

impl SqlServerOrm {
    /// Create an engine over `pool`
    pub fn new(pool: Arc<SimpleConnectionPool>) -> Self {
        Self {
            executor: Executor::Pool(pool),
        }
    }

    fn select_by(entry: &dyn Entry, lock: bool) -> Result<Statement> {
        let table = entry::table_name_of(entry)?;
        let cond = entry::selection_predicate_of(entry)?;

        let mut built = DIALECT.build_select(&dialect::select_statement(&table, cond));
        if lock {
            built.sql = rewrite::lock_hint(&built.sql);
        }
        Ok(built)
    }

    fn select_params(params: &QueryParams, lock: bool) -> Statement {
        let mut built = DIALECT.build_select(&params.select_unpaginated());
        if lock {
            built.sql = rewrite::lock_hint(&built.sql);
        }
        built.sql = rewrite::paginate(
            &built.sql,
            params.is_ordered(),
            params.limit.map(u64::from),
            params.offset.map(u64::from),
        );
        built
    }
}

#[async_trait]
impl Orm for SqlServerOrm {
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
        let mut built = DIALECT.build_insert(&stmt);

        let Some(column) = identity else {
            self.executor.execute(&built).await?;
            return Ok(());
        };

        built.sql = rewrite::output_identity(&built.sql, &column);
        let rows = self.executor.query(&built).await?;
        let id = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(|value| value.as_i64())
            .ok_or_else(|| {
                Error::query_with_sql("insert returned no generated identity", &built.sql)
            })?;

        if let Some(target) = entry.as_identity_assignable() {
            target.assign_identity(id);
        }
        Ok(())
    }

    async fn get(&self, entry: &mut dyn Entry) -> Result<()> {
        let stmt = Self::select_by(entry, false)?;
        self.executor.fetch_entry(&stmt, entry).await
    }

    async fn get_with_lock(&self, entry: &mut dyn Entry) -> Result<()> {
        let stmt = Self::select_by(entry, true)?;
        self.executor.fetch_entry(&stmt, entry).await
    }

    async fn query(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()> {
        self.executor
            .fetch_into(&Self::select_params(params, false), sink)
            .await
    }

    async fn query_with_lock(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()> {
        self.executor
            .fetch_into(&Self::select_params(params, true), sink)
            .await
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
        let stmt = Self::select_by(entry, true)?;
        self.executor.exists(&stmt).await
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
        self.executor
            .run_transaction(body, |executor| Self { executor })
            .await
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

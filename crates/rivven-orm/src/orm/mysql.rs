//! MySQL command engine

use async_trait::async_trait;
use sea_query::Condition;
use std::sync::Arc;

use super::executor::Executor;
use super::{Orm, QueryParams, TransactionBody};
use crate::connection::ExecuteResult;
use crate::dialect::{self, MySqlDialect, SqlDialect, Statement};
use crate::entry::{self, Entry, EntrySink};
use crate::error::{Error, Result};
use crate::pool::SimpleConnectionPool;
use crate::types::Row;

const DIALECT: MySqlDialect = MySqlDialect;

/// Command engine for MySQL and MariaDB.
///
/// Generated identities are read from the insert's last insert id; locked
/// reads use `SELECT ... FOR UPDATE`, which waits for competing lockers. An
/// offset without limit is paired with an unbounded limit.
#[derive(Clone)]
pub struct MySqlOrm {
    executor: Executor,
}

impl MySqlOrm {
    /// Create an engine over `pool`
    pub fn new(pool: Arc<SimpleConnectionPool>) -> Self {
        Self {
            executor: Executor::Pool(pool),
        }
    }

    async fn select_entry(&self, entry: &mut dyn Entry, lock: bool) -> Result<()> {
        let table = entry::table_name_of(entry)?;
        let cond = entry::selection_predicate_of(entry)?;

        let mut stmt = dialect::select_statement(&table, cond);
        stmt.limit(1);
        if lock {
            stmt.lock_exclusive();
        }
        self.executor
            .fetch_entry(&DIALECT.build_select(&stmt), entry)
            .await
    }

    async fn select_into(
        &self,
        params: &QueryParams,
        sink: &mut dyn EntrySink,
        lock: bool,
    ) -> Result<()> {
        let mut stmt = params.select(DIALECT.requires_limit_with_offset());
        if lock {
            stmt.lock_exclusive();
        }
        self.executor
            .fetch_into(&DIALECT.build_select(&stmt), sink)
            .await
    }
}

#[async_trait]
impl Orm for MySqlOrm {
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
            Error::query_with_sql("insert reported no last insert id", &built.sql)
        })?;
        if let Some(target) = entry.as_identity_assignable() {
            target.assign_identity(id);
        }
        Ok(())
    }

    async fn get(&self, entry: &mut dyn Entry) -> Result<()> {
        self.select_entry(entry, false).await
    }

    async fn get_with_lock(&self, entry: &mut dyn Entry) -> Result<()> {
        self.select_entry(entry, true).await
    }

    async fn query(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()> {
        self.select_into(params, sink, false).await
    }

    async fn query_with_lock(&self, params: &QueryParams, sink: &mut dyn EntrySink) -> Result<()> {
        self.select_into(params, sink, true).await
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

        let mut stmt = dialect::select_statement(&table, cond);
        stmt.limit(1).lock_exclusive();
        self.executor.exists(&DIALECT.build_select(&stmt)).await
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

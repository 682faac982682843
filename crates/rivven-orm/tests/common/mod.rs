//! Entries and fixtures shared by the rivven-orm test suites

#![allow(dead_code)]

use rivven_orm::connection::{Connection, ConnectionConfig};
use rivven_orm::prelude::*;
use rivven_orm::sqlite::SqliteConnection;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const SCHEMA: &str = r#"
CREATE TABLE accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    balance INTEGER NOT NULL DEFAULT 0,
    created_hooks INTEGER NOT NULL DEFAULT 0,
    updated_hooks INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE ranked (
    id INTEGER PRIMARY KEY,
    rank INTEGER NOT NULL
);
CREATE TABLE memberships (
    id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    PRIMARY KEY (user_id, group_id)
);
CREATE TABLE tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT
);
"#;

/// Account with a generated identity and both hooks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub balance: i64,
    pub created_hooks: i64,
    pub updated_hooks: i64,
}

impl Account {
    pub fn new(email: &str, balance: i64) -> Self {
        Self {
            email: email.into(),
            balance,
            ..Default::default()
        }
    }

    pub fn with_id(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

impl TableName for Account {
    fn table_name(&self) -> &str {
        "accounts"
    }
}

impl Identity for Account {
    fn identity(&self) -> (&str, i64) {
        ("id", self.id)
    }
}

impl IdentityAssignable for Account {
    fn assign_identity(&mut self, id: i64) {
        self.id = id;
    }
}

impl OnCreateHook for Account {
    fn on_create(&mut self) {
        self.created_hooks += 1;
    }
}

impl OnUpdateHook for Account {
    fn on_update(&mut self) {
        self.updated_hooks += 1;
    }
}

impl Entry for Account {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("email", self.email.clone().into()),
            ("balance", self.balance.into()),
            ("created_hooks", self.created_hooks.into()),
            ("updated_hooks", self.updated_hooks.into()),
        ]
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        self.id = row.try_get("id")?;
        self.email = row.try_get("email")?;
        self.balance = row.try_get("balance")?;
        self.created_hooks = row.try_get("created_hooks")?;
        self.updated_hooks = row.try_get("updated_hooks")?;
        Ok(())
    }

    fn as_table_name(&self) -> Option<&dyn TableName> {
        Some(self)
    }

    fn as_identity(&self) -> Option<&dyn Identity> {
        Some(self)
    }

    fn as_identity_assignable(&mut self) -> Option<&mut dyn IdentityAssignable> {
        Some(self)
    }

    fn as_on_create(&mut self) -> Option<&mut dyn OnCreateHook> {
        Some(self)
    }

    fn as_on_update(&mut self) -> Option<&mut dyn OnUpdateHook> {
        Some(self)
    }
}

/// Row with a caller-chosen identity and an ordering key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranked {
    pub id: i64,
    pub rank: i64,
}

impl TableName for Ranked {
    fn table_name(&self) -> &str {
        "ranked"
    }
}

impl Identity for Ranked {
    fn identity(&self) -> (&str, i64) {
        ("id", self.id)
    }
}

impl Entry for Ranked {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        vec![("id", self.id.into()), ("rank", self.rank.into())]
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        self.id = row.try_get("id")?;
        self.rank = row.try_get("rank")?;
        Ok(())
    }

    fn as_table_name(&self) -> Option<&dyn TableName> {
        Some(self)
    }

    fn as_identity(&self) -> Option<&dyn Identity> {
        Some(self)
    }
}

/// Composite-key row: selected by (user_id, group_id), never by `id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Membership {
    pub id: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub role: String,
}

impl TableName for Membership {
    fn table_name(&self) -> &str {
        "memberships"
    }
}

impl Identity for Membership {
    fn identity(&self) -> (&str, i64) {
        ("id", self.id)
    }
}

impl UniqueSelector for Membership {
    fn unique_selector(&self) -> Condition {
        Cond::all()
            .add(Expr::col(Alias::new("user_id")).eq(self.user_id))
            .add(Expr::col(Alias::new("group_id")).eq(self.group_id))
    }
}

impl Entry for Membership {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("user_id", self.user_id.into()),
            ("group_id", self.group_id.into()),
            ("role", self.role.clone().into()),
        ]
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        self.id = row.try_get("id")?;
        self.user_id = row.try_get("user_id")?;
        self.group_id = row.try_get("group_id")?;
        self.role = row.try_get("role")?;
        Ok(())
    }

    fn as_table_name(&self) -> Option<&dyn TableName> {
        Some(self)
    }

    fn as_identity(&self) -> Option<&dyn Identity> {
        Some(self)
    }

    fn as_unique_selector(&self) -> Option<&dyn UniqueSelector> {
        Some(self)
    }
}

/// Entry exposing no capabilities at all
#[derive(Debug, Default)]
pub struct Anonymous;

impl Entry for Anonymous {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    fn load_row(&mut self, _row: &Row) -> Result<()> {
        Ok(())
    }
}

/// Entry with a table but no way to select its row
#[derive(Debug, Default)]
pub struct LogLine {
    pub message: String,
}

impl TableName for LogLine {
    fn table_name(&self) -> &str {
        "log_lines"
    }
}

impl Entry for LogLine {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        vec![("message", self.message.clone().into())]
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        self.message = row.try_get("message")?;
        Ok(())
    }

    fn as_table_name(&self) -> Option<&dyn TableName> {
        Some(self)
    }
}

/// Row whose only column is its generated identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ticket {
    pub id: i64,
}

impl TableName for Ticket {
    fn table_name(&self) -> &str {
        "tickets"
    }
}

impl Identity for Ticket {
    fn identity(&self) -> (&str, i64) {
        ("id", self.id)
    }
}

impl IdentityAssignable for Ticket {
    fn assign_identity(&mut self, id: i64) {
        self.id = id;
    }
}

impl Entry for Ticket {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        self.id = row.try_get("id")?;
        Ok(())
    }

    fn as_table_name(&self) -> Option<&dyn TableName> {
        Some(self)
    }

    fn as_identity(&self) -> Option<&dyn Identity> {
        Some(self)
    }

    fn as_identity_assignable(&mut self) -> Option<&mut dyn IdentityAssignable> {
        Some(self)
    }
}

/// Accepts a generated identity without naming its column
#[derive(Debug, Default)]
pub struct Receipt {
    pub id: i64,
}

impl TableName for Receipt {
    fn table_name(&self) -> &str {
        "tickets"
    }
}

impl IdentityAssignable for Receipt {
    fn assign_identity(&mut self, id: i64) {
        self.id = id;
    }
}

impl Entry for Receipt {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    fn load_row(&mut self, row: &Row) -> Result<()> {
        self.id = row.try_get("id")?;
        Ok(())
    }

    fn as_table_name(&self) -> Option<&dyn TableName> {
        Some(self)
    }

    fn as_identity_assignable(&mut self) -> Option<&mut dyn IdentityAssignable> {
        Some(self)
    }
}

/// A database file in a temporary directory, with the test schema applied
pub struct TestDatabase {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestDatabase {
    pub async fn create() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orm.db");

        let conn = SqliteConnection::connect(&ConnectionConfig::new(path.to_string_lossy()))
            .await
            .unwrap();
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            conn.execute(statement, &[]).await.unwrap();
        }
        conn.close().await.unwrap();

        Self { dir, path }
    }

    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub async fn connect(&self, config: DatabaseConfig) -> Arc<dyn Orm> {
        rivven_orm::connect(&config.with_url(self.url())).await.unwrap()
    }

    pub async fn mutex_engine(&self) -> Arc<dyn Orm> {
        self.connect(DatabaseConfig::sqlite("").with_sqlite_mutex())
            .await
    }

    pub async fn retry_engine(&self) -> Arc<dyn Orm> {
        self.connect(DatabaseConfig::sqlite("").with_sqlite_retry(50, 5, 4))
            .await
    }
}

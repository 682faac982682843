//! # rivven-orm
//!
//! Dialect-aware command engines for relational storage: CRUD on entries,
//! locked reads, upsert, filtered/paginated queries and transactions over
//! MySQL, PostgreSQL, SQLite and SQL Server behind one [`orm::Orm`] trait.
//!
//! ## Features
//!
//! - **Connection Targets**: [`config::DatabaseConfig`] (YAML/JSON) resolved to each driver's target
//! - **Entry Capabilities**: table name, identity, unique selector and hooks, each opt-in
//! - **SQL Generation**: statements built with sea-query, patched where T-SQL differs
//! - **Transactions**: nested calls reuse the open transaction; cancelled ones roll back
//! - **Embedded Serialization**: SQLite transactions run under a write lock or a retry policy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_orm::prelude::*;
//!
//! let config = DatabaseConfig::from_yaml_file("database.yaml")?;
//! let orm = rivven_orm::connect(&config).await?;
//!
//! let mut order = Order { state: "open".into(), ..Default::default() };
//! orm.create(&mut order).await?;
//!
//! let mut open: Vec<Order> = Vec::new();
//! let params = QueryParams::new("orders")
//!     .filter(Cond::all().add(Expr::col(Alias::new("state")).eq("open")))
//!     .order_by("created_at", SortOrder::Desc)
//!     .limit(20);
//! orm.query(&params, &mut open).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `mysql` - MySQL/MariaDB support via mysql_async
//! - `sqlserver` - SQL Server support via tiberius
//! - `sqlite` - SQLite support via rusqlite / tokio-rusqlite
//! - `full` - All backends (also the default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dialect;
pub mod entry;
pub mod error;
pub mod orm;
pub mod pool;
pub mod rewrite;
pub mod serializer;
pub mod target;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{FromValue, Row, Value};

    // Configuration
    pub use crate::config::{DatabaseConfig, DatabaseDriver, SqliteTransactionMode};

    // Entries
    pub use crate::entry::{
        Entry, EntrySink, Identity, IdentityAssignable, OnCreateHook, OnUpdateHook, TableName,
        UniqueSelector,
    };

    // Raw statements
    pub use crate::connection::ExecuteResult;
    pub use crate::dialect::{SqlDialect, Statement};

    // Engines
    pub use crate::orm::{connect, transaction, Orm, QueryParams, TransactionBody};

    #[cfg(feature = "mysql")]
    pub use crate::orm::MySqlOrm;
    #[cfg(feature = "postgres")]
    pub use crate::orm::PostgresOrm;
    #[cfg(feature = "sqlite")]
    pub use crate::orm::SqliteOrm;
    #[cfg(feature = "sqlserver")]
    pub use crate::orm::SqlServerOrm;

    // Embedded transaction strategy
    pub use crate::serializer::{RetryPolicy, SerializerConfig, WriteLock};

    // Query building
    pub use sea_query::{Alias, Cond, Condition, Expr, Order as SortOrder};
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use orm::{connect, Orm};
pub use types::Value;

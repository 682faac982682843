//! Error types for rivven-orm
//!
//! Errors fall into four groups, and callers usually branch on the group
//! rather than the variant:
//! - Caller input (missing entry capabilities, incomplete configuration)
//! - Domain outcomes (`NotFound`, `UpdateNotApplied`)
//! - Driver and storage failures, carried with their source
//! - Pool and configuration failures

use std::fmt;
use thiserror::Error;

/// Result type for rivven-orm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Query execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Constraint violation (not retriable)
    Constraint,
    /// Type conversion errors (not retriable)
    TypeConversion,
    /// Timeout errors (retriable)
    Timeout,
    /// Deadlock detected (retriable)
    Deadlock,
    /// Configuration error
    Configuration,
    /// Pool exhausted (retriable with backoff)
    PoolExhausted,
    /// The entry handed to an engine is unusable
    Entry,
    /// Expected outcome of a row-targeted command (no row, no update)
    Outcome,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Timeout | Self::Deadlock | Self::PoolExhausted
        )
    }
}

/// Main error type for rivven-orm
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// No entry was supplied
    #[error("entry is nil")]
    NilEntry,

    /// The row-targeted command matched no row
    #[error("not found")]
    NotFound,

    /// The update matched no row
    #[error("update not applied")]
    UpdateNotApplied,

    /// Entry does not expose its table name
    #[error("entry does not expose a table name")]
    TableNameCapabilityMissing,

    /// Entry does not expose an identity column
    #[error("entry does not expose an identity")]
    IdentityCapabilityMissing,

    /// Entry exposes neither a unique selector nor an identity
    #[error("entry exposes neither a unique selector nor an identity")]
    SelectionCapabilityMissing,

    /// Required configuration field is empty
    #[error("{field} is not provided")]
    MissingField { field: &'static str },

    /// Unknown driver tag
    #[error("invalid driver type: {driver}")]
    InvalidDriver { driver: String },

    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Constraint violation (PK, FK, unique, check)
    #[error("constraint violation: {constraint_name} - {message}")]
    Constraint {
        constraint_name: String,
        message: String,
    },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Deadlock detected
    #[error("deadlock detected")]
    Deadlock,

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Connection pool exhausted
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Column not present in a result row
    #[error("column not found: {column}")]
    ColumnNotFound { column: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NilEntry
            | Self::TableNameCapabilityMissing
            | Self::IdentityCapabilityMissing
            | Self::SelectionCapabilityMissing => ErrorCategory::Entry,
            Self::NotFound | Self::UpdateNotApplied => ErrorCategory::Outcome,
            Self::MissingField { .. } | Self::InvalidDriver { .. } | Self::Configuration { .. } => {
                ErrorCategory::Configuration
            }
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } | Self::ColumnNotFound { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Deadlock => ErrorCategory::Deadlock,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Unsupported { .. } | Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error is an entry-level outcome rather than contention.
    ///
    /// The embedded engine's retry loop stops immediately on these.
    pub fn is_entry_outcome(&self) -> bool {
        matches!(self, Self::NilEntry | Self::NotFound | Self::UpdateNotApplied)
    }

    /// Whether the caller handed in something unusable
    pub fn is_caller_input(&self) -> bool {
        self.category() == ErrorCategory::Entry
            || matches!(self, Self::MissingField { .. } | Self::InvalidDriver { .. })
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a query error carrying the driver error and the failing SQL
    pub fn query_with_source(
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: source.to_string(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transaction error with source
    pub fn transaction_with_source(
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transaction {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a missing-field configuration error
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<sea_query::error::Error> for Error {
    fn from(err: sea_query::error::Error) -> Self {
        Self::query(err.to_string())
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Constraint => write!(f, "constraint"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::Configuration => write!(f, "configuration"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Entry => write!(f, "entry"),
            Self::Outcome => write!(f, "outcome"),
            Self::Other => write!(f, "other"),
        }
    }
}

//! Entry capabilities and metadata lookup
//!
//! An entry is any value a caller persists. Instead of one fixed shape,
//! entries opt into capabilities:
//!
//! | Capability | Purpose |
//! |------------|---------|
//! | [`TableName`] | destination table (required) |
//! | [`Identity`] | identity column and value; default selection |
//! | [`IdentityAssignable`] | receives the generated identity after insert |
//! | [`UniqueSelector`] | predicate for natural/composite keys; wins over [`Identity`] |
//! | [`OnCreateHook`] / [`OnUpdateHook`] | mutate the entry before the statement is built |
//!
//! An [`Entry`] advertises each capability through its `as_*` accessor.
//!
//! ```rust,ignore
//! #[derive(Default)]
//! struct Account { id: i64, email: String }
//!
//! impl TableName for Account {
//!     fn table_name(&self) -> &str { "accounts" }
//! }
//!
//! impl Identity for Account {
//!     fn identity(&self) -> (&str, i64) { ("id", self.id) }
//! }
//!
//! impl IdentityAssignable for Account {
//!     fn assign_identity(&mut self, id: i64) { self.id = id; }
//! }
//!
//! impl Entry for Account {
//!     fn insert_values(&self) -> Vec<(&'static str, Value)> {
//!         vec![("email", self.email.clone().into())]
//!     }
//!
//!     fn load_row(&mut self, row: &Row) -> Result<()> {
//!         self.id = row.try_get("id")?;
//!         self.email = row.try_get("email")?;
//!         Ok(())
//!     }
//!
//!     fn as_table_name(&self) -> Option<&dyn TableName> { Some(self) }
//!     fn as_identity(&self) -> Option<&dyn Identity> { Some(self) }
//!     fn as_identity_assignable(&mut self) -> Option<&mut dyn IdentityAssignable> { Some(self) }
//! }
//! ```

use sea_query::{Alias, Cond, Condition, Expr};

use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Destination table of an entry
pub trait TableName {
    /// Table the entry is stored in
    fn table_name(&self) -> &str;
}

/// Integer identity column of an entry
pub trait Identity {
    /// Identity column name and current value
    fn identity(&self) -> (&str, i64);
}

/// Receives the identity generated by an insert.
///
/// Entries with this capability must also implement [`Identity`]: engines
/// read the generated column's name from it, and `create` fails with
/// [`Error::IdentityCapabilityMissing`] before touching the database when
/// it is absent.
pub trait IdentityAssignable {
    /// Store the generated identity
    fn assign_identity(&mut self, id: i64);
}

/// Arbitrary predicate identifying the entry's row
pub trait UniqueSelector {
    /// Predicate matching exactly the entry's row
    fn unique_selector(&self) -> Condition;
}

/// Runs before every create
pub trait OnCreateHook {
    /// Mutate the entry ahead of the insert
    fn on_create(&mut self);
}

/// Runs before every update
pub trait OnUpdateHook {
    /// Mutate the entry ahead of the update
    fn on_update(&mut self);
}

/// A value persisted by the command engines
pub trait Entry: Send + Sync {
    /// Columns written by an insert
    fn insert_values(&self) -> Vec<(&'static str, Value)>;

    /// Columns written by an update
    fn update_values(&self) -> Vec<(&'static str, Value)> {
        self.insert_values()
    }

    /// Populate the entry from a result row
    fn load_row(&mut self, row: &Row) -> Result<()>;

    /// [`TableName`] capability
    fn as_table_name(&self) -> Option<&dyn TableName> {
        None
    }

    /// [`Identity`] capability
    fn as_identity(&self) -> Option<&dyn Identity> {
        None
    }

    /// [`IdentityAssignable`] capability
    fn as_identity_assignable(&mut self) -> Option<&mut dyn IdentityAssignable> {
        None
    }

    /// [`UniqueSelector`] capability
    fn as_unique_selector(&self) -> Option<&dyn UniqueSelector> {
        None
    }

    /// [`OnCreateHook`] capability
    fn as_on_create(&mut self) -> Option<&mut dyn OnCreateHook> {
        None
    }

    /// [`OnUpdateHook`] capability
    fn as_on_update(&mut self) -> Option<&mut dyn OnUpdateHook> {
        None
    }
}

/// Destination of a multi-row query
pub trait EntrySink: Send {
    /// Append one row
    fn push_row(&mut self, row: &Row) -> Result<()>;
}

impl<E: Entry + Default> EntrySink for Vec<E> {
    fn push_row(&mut self, row: &Row) -> Result<()> {
        let mut entry = E::default();
        entry.load_row(row)?;
        self.push(entry);
        Ok(())
    }
}

/// Unwrap an optional entry, rejecting `None` as [`Error::NilEntry`]
pub fn require_entry<E>(entry: Option<E>) -> Result<E> {
    entry.ok_or(Error::NilEntry)
}

/// Table name of an entry
pub fn table_name_of(entry: &dyn Entry) -> Result<String> {
    entry
        .as_table_name()
        .map(|t| t.table_name().to_string())
        .ok_or(Error::TableNameCapabilityMissing)
}

/// Identity column and value of an entry
pub fn identity_of(entry: &dyn Entry) -> Result<(String, i64)> {
    entry
        .as_identity()
        .map(|i| {
            let (column, value) = i.identity();
            (column.to_string(), value)
        })
        .ok_or(Error::IdentityCapabilityMissing)
}

/// Column an insert should report back, for entries accepting a generated
/// identity. `None` when the entry takes no identity.
pub fn generated_identity_column(entry: &mut dyn Entry) -> Result<Option<String>> {
    if entry.as_identity_assignable().is_none() {
        return Ok(None);
    }
    identity_of(entry).map(|(column, _)| Some(column))
}

/// Predicate selecting the entry's row.
///
/// The unique selector wins; otherwise `identity column = identity value`.
pub fn selection_predicate_of(entry: &dyn Entry) -> Result<Condition> {
    if let Some(selector) = entry.as_unique_selector() {
        return Ok(selector.unique_selector());
    }

    match identity_of(entry) {
        Ok((column, value)) => Ok(Cond::all().add(Expr::col(Alias::new(column)).eq(value))),
        Err(_) => Err(Error::SelectionCapabilityMissing),
    }
}

/// Run the create hook, if the entry has one
pub fn run_create_hook(entry: &mut dyn Entry) {
    if let Some(hook) = entry.as_on_create() {
        hook.on_create();
    }
}

/// Run the update hook, if the entry has one
pub fn run_update_hook(entry: &mut dyn Entry) {
    if let Some(hook) = entry.as_on_update() {
        hook.on_update();
    }
}

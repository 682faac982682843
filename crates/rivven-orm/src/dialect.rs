//! SQL dialect abstraction for rivven-orm
//!
//! Statements are assembled once with sea-query and rendered per dialect:
//!
//! - PostgreSQL, MySQL and SQLite render with their sea-query backends.
//! - SQL Server has no sea-query backend. It renders with the PostgreSQL
//!   backend (double-quoted identifiers), has its `$n` placeholders renamed
//!   to `@Pn` and its `TRUE`/`FALSE` predicates spelled as comparisons;
//!   engine-specific clauses are spliced by [`crate::rewrite`].
//!
//! Rendering always yields parameterized SQL plus the bound [`Value`]s.

use sea_query::{
    Alias, Asterisk, Condition, DeleteStatement, Expr, InsertStatement, MysqlQueryBuilder,
    PostgresQueryBuilder, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder, UpdateStatement,
    Values,
};

use crate::error::Result;
use crate::rewrite;
use crate::types::Value;

/// Column alias of [`count_statement`]
pub const COUNT_COLUMN: &str = "count";

/// Rendered SQL text and its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Parameterized SQL
    pub sql: String,
    /// Parameters in placeholder order
    pub values: Vec<Value>,
}

impl Statement {
    /// Statement with dialect-specific placeholders and their values
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    fn from_parts((sql, values): (String, Values)) -> Self {
        Self {
            sql,
            values: values.0.into_iter().map(from_sea_value).collect(),
        }
    }
}

/// SQL dialect for vendor-specific rendering
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Whether OFFSET is only valid alongside LIMIT
    fn requires_limit_with_offset(&self) -> bool;

    /// Render a SELECT
    fn build_select(&self, stmt: &SelectStatement) -> Statement;

    /// Render an INSERT
    fn build_insert(&self, stmt: &InsertStatement) -> Statement;

    /// Render an UPDATE
    fn build_update(&self, stmt: &UpdateStatement) -> Statement;

    /// Render a DELETE
    fn build_delete(&self, stmt: &DeleteStatement) -> Statement;
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn requires_limit_with_offset(&self) -> bool {
        false
    }

    fn build_select(&self, stmt: &SelectStatement) -> Statement {
        Statement::from_parts(stmt.build(PostgresQueryBuilder))
    }

    fn build_insert(&self, stmt: &InsertStatement) -> Statement {
        Statement::from_parts(stmt.build(PostgresQueryBuilder))
    }

    fn build_update(&self, stmt: &UpdateStatement) -> Statement {
        Statement::from_parts(stmt.build(PostgresQueryBuilder))
    }

    fn build_delete(&self, stmt: &DeleteStatement) -> Statement {
        Statement::from_parts(stmt.build(PostgresQueryBuilder))
    }
}

// ===========================================================================
// MySQL
// ===========================================================================

/// MySQL dialect
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn requires_limit_with_offset(&self) -> bool {
        true
    }

    fn build_select(&self, stmt: &SelectStatement) -> Statement {
        Statement::from_parts(stmt.build(MysqlQueryBuilder))
    }

    fn build_insert(&self, stmt: &InsertStatement) -> Statement {
        Statement::from_parts(stmt.build(MysqlQueryBuilder))
    }

    fn build_update(&self, stmt: &UpdateStatement) -> Statement {
        Statement::from_parts(stmt.build(MysqlQueryBuilder))
    }

    fn build_delete(&self, stmt: &DeleteStatement) -> Statement {
        Statement::from_parts(stmt.build(MysqlQueryBuilder))
    }
}

// ===========================================================================
// SQLite
// ===========================================================================

/// SQLite dialect
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn requires_limit_with_offset(&self) -> bool {
        true
    }

    fn build_select(&self, stmt: &SelectStatement) -> Statement {
        Statement::from_parts(stmt.build(SqliteQueryBuilder))
    }

    fn build_insert(&self, stmt: &InsertStatement) -> Statement {
        Statement::from_parts(stmt.build(SqliteQueryBuilder))
    }

    fn build_update(&self, stmt: &UpdateStatement) -> Statement {
        Statement::from_parts(stmt.build(SqliteQueryBuilder))
    }

    fn build_delete(&self, stmt: &DeleteStatement) -> Statement {
        Statement::from_parts(stmt.build(SqliteQueryBuilder))
    }
}

// ===========================================================================
// SQL Server: PostgreSQL rendering with `@Pn` placeholders
// ===========================================================================

/// SQL Server dialect
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlServerDialect {
    fn finish(parts: (String, Values)) -> Statement {
        let mut stmt = Statement::from_parts(parts);
        stmt.sql = rewrite::boolean_predicates(&rewrite::numbered_placeholders(&stmt.sql));
        stmt
    }
}

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn requires_limit_with_offset(&self) -> bool {
        false
    }

    fn build_select(&self, stmt: &SelectStatement) -> Statement {
        Self::finish(stmt.build(PostgresQueryBuilder))
    }

    fn build_insert(&self, stmt: &InsertStatement) -> Statement {
        Self::finish(stmt.build(PostgresQueryBuilder))
    }

    fn build_update(&self, stmt: &UpdateStatement) -> Statement {
        Self::finish(stmt.build(PostgresQueryBuilder))
    }

    fn build_delete(&self, stmt: &DeleteStatement) -> Statement {
        Self::finish(stmt.build(PostgresQueryBuilder))
    }
}

// ---------------------------------------------------------------------------
// Statement assembly shared by every engine
// ---------------------------------------------------------------------------

/// `SELECT * FROM table WHERE cond`
pub fn select_statement(table: &str, cond: Condition) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.column(Asterisk).from(Alias::new(table)).cond_where(cond);
    stmt
}

/// `SELECT COUNT(*) AS count FROM table WHERE cond`
pub fn count_statement(table: &str, cond: Condition) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.expr_as(Expr::col(Asterisk).count(), Alias::new(COUNT_COLUMN))
        .from(Alias::new(table))
        .cond_where(cond);
    stmt
}

/// `INSERT INTO table (columns) VALUES (values)`.
///
/// Without values (an entry whose only column is generated) the row is
/// inserted with every column defaulted.
pub fn insert_statement(table: &str, values: Vec<(&'static str, Value)>) -> Result<InsertStatement> {
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table));
    if values.is_empty() {
        stmt.or_default_values();
        return Ok(stmt);
    }

    let (columns, exprs): (Vec<_>, Vec<SimpleExpr>) = values
        .into_iter()
        .map(|(column, value)| (Alias::new(column), SimpleExpr::from(value)))
        .unzip();
    stmt.columns(columns).values(exprs)?;
    Ok(stmt)
}

/// `UPDATE table SET columns = values WHERE cond`
pub fn update_statement(
    table: &str,
    cond: Condition,
    values: Vec<(&'static str, Value)>,
) -> UpdateStatement {
    let mut stmt = Query::update();
    stmt.table(Alias::new(table))
        .values(
            values
                .into_iter()
                .map(|(column, value)| (Alias::new(column), SimpleExpr::from(value))),
        )
        .cond_where(cond);
    stmt
}

/// `DELETE FROM table WHERE cond`
pub fn delete_statement(table: &str, cond: Condition) -> DeleteStatement {
    let mut stmt = Query::delete();
    stmt.from_table(Alias::new(table)).cond_where(cond);
    stmt
}

// ---------------------------------------------------------------------------
// Value <-> sea-query conversion
// ---------------------------------------------------------------------------

/// Convert a rivven Value into a sea-query value
pub fn to_sea_value(value: Value) -> sea_query::Value {
    use sea_query::Value as Sea;

    match value {
        Value::Null => Sea::String(None),
        Value::Bool(b) => Sea::Bool(Some(b)),
        Value::Int8(n) => Sea::TinyInt(Some(n)),
        Value::Int16(n) => Sea::SmallInt(Some(n)),
        Value::Int32(n) => Sea::Int(Some(n)),
        Value::Int64(n) => Sea::BigInt(Some(n)),
        Value::Float32(n) => Sea::Float(Some(n)),
        Value::Float64(n) => Sea::Double(Some(n)),
        Value::String(s) => Sea::String(Some(Box::new(s))),
        Value::Bytes(b) => Sea::Bytes(Some(Box::new(b))),
        Value::Date(d) => Sea::ChronoDate(Some(Box::new(d))),
        Value::Time(t) => Sea::ChronoTime(Some(Box::new(t))),
        Value::DateTime(dt) => Sea::ChronoDateTime(Some(Box::new(dt))),
        Value::DateTimeTz(dt) => Sea::ChronoDateTimeUtc(Some(Box::new(dt))),
        Value::Uuid(u) => Sea::Uuid(Some(Box::new(u))),
        Value::Json(j) => Sea::Json(Some(Box::new(j))),
    }
}

/// Convert a bound sea-query value back into a rivven Value
pub fn from_sea_value(value: sea_query::Value) -> Value {
    use sea_query::Value as Sea;

    match value {
        Sea::Bool(Some(b)) => Value::Bool(b),
        Sea::TinyInt(Some(n)) => Value::Int8(n),
        Sea::SmallInt(Some(n)) => Value::Int16(n),
        Sea::Int(Some(n)) => Value::Int32(n),
        Sea::BigInt(Some(n)) => Value::Int64(n),
        Sea::TinyUnsigned(Some(n)) => Value::Int16(i16::from(n)),
        Sea::SmallUnsigned(Some(n)) => Value::Int32(i32::from(n)),
        Sea::Unsigned(Some(n)) => Value::Int64(i64::from(n)),
        Sea::BigUnsigned(Some(n)) => Value::Int64(i64::try_from(n).unwrap_or(i64::MAX)),
        Sea::Float(Some(n)) => Value::Float32(n),
        Sea::Double(Some(n)) => Value::Float64(n),
        Sea::String(Some(s)) => Value::String(*s),
        Sea::Char(Some(c)) => Value::String(c.to_string()),
        Sea::Bytes(Some(b)) => Value::Bytes(*b),
        Sea::Json(Some(j)) => Value::Json(*j),
        Sea::ChronoDate(Some(d)) => Value::Date(*d),
        Sea::ChronoTime(Some(t)) => Value::Time(*t),
        Sea::ChronoDateTime(Some(dt)) => Value::DateTime(*dt),
        Sea::ChronoDateTimeUtc(Some(dt)) => Value::DateTimeTz(*dt),
        Sea::ChronoDateTimeLocal(Some(dt)) => Value::DateTimeTz(dt.with_timezone(&chrono::Utc)),
        Sea::ChronoDateTimeWithTimeZone(Some(dt)) => {
            Value::DateTimeTz(dt.with_timezone(&chrono::Utc))
        }
        Sea::Uuid(Some(u)) => Value::Uuid(*u),
        _ => Value::Null,
    }
}

impl From<Value> for sea_query::Value {
    fn from(value: Value) -> Self {
        to_sea_value(value)
    }
}

// `From<Value> for SimpleExpr` is provided by sea_query's blanket
// `impl<T: Into<sea_query::Value>> From<T> for SimpleExpr`.

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{Cond, Order};

    fn by_id(id: i64) -> Condition {
        Cond::all().add(Expr::col(Alias::new("id")).eq(id))
    }

    #[test]
    fn test_dialect_names() {
        assert_eq!(PostgresDialect.name(), "PostgreSQL");
        assert_eq!(MySqlDialect.name(), "MySQL");
        assert_eq!(SqliteDialect.name(), "SQLite");
        assert_eq!(SqlServerDialect.name(), "SQL Server");
    }

    #[test]
    fn test_offset_pairing() {
        assert!(MySqlDialect.requires_limit_with_offset());
        assert!(SqliteDialect.requires_limit_with_offset());
        assert!(!PostgresDialect.requires_limit_with_offset());
        assert!(!SqlServerDialect.requires_limit_with_offset());
    }

    #[test]
    fn test_postgres_select_for_update() {
        let mut stmt = select_statement("users", by_id(7));
        stmt.lock_exclusive();
        let built = PostgresDialect.build_select(&stmt);
        assert_eq!(
            built.sql,
            r#"SELECT * FROM "users" WHERE "id" = $1 FOR UPDATE"#
        );
        assert_eq!(built.values, vec![Value::Int64(7)]);
    }

    #[test]
    fn test_mysql_select_with_pagination() {
        let mut stmt = select_statement("users", Cond::all());
        stmt.order_by(Alias::new("id"), Order::Desc)
            .limit(10)
            .offset(20);
        let built = MySqlDialect.build_select(&stmt);
        assert_eq!(
            built.sql,
            "SELECT * FROM `users` WHERE TRUE ORDER BY `id` DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(built.values, vec![Value::Int64(10), Value::Int64(20)]);
    }

    #[test]
    fn test_postgres_insert_returning() {
        let mut stmt = insert_statement(
            "users",
            vec![("name", "ann".into()), ("age", Value::Int32(3))],
        )
        .unwrap();
        stmt.returning_col(Alias::new("id"));
        let built = PostgresDialect.build_insert(&stmt);
        assert_eq!(
            built.sql,
            r#"INSERT INTO "users" ("name", "age") VALUES ($1, $2) RETURNING "id""#
        );
        assert_eq!(
            built.values,
            vec![Value::String("ann".into()), Value::Int32(3)]
        );
    }

    #[test]
    fn test_insert_without_values_defaults_every_column() {
        let stmt = insert_statement("tickets", Vec::new()).unwrap();
        assert_eq!(
            SqliteDialect.build_insert(&stmt).sql,
            r#"INSERT INTO "tickets" DEFAULT VALUES"#
        );

        let mut returning = insert_statement("tickets", Vec::new()).unwrap();
        returning.returning_col(Alias::new("id"));
        assert_eq!(
            PostgresDialect.build_insert(&returning).sql,
            r#"INSERT INTO "tickets" DEFAULT VALUES RETURNING "id""#
        );
    }

    #[test]
    fn test_sqlite_update_and_delete() {
        let update = update_statement("users", by_id(1), vec![("name", "bo".into())]);
        assert_eq!(
            SqliteDialect.build_update(&update).sql,
            r#"UPDATE "users" SET "name" = ? WHERE "id" = ?"#
        );

        let delete = delete_statement("users", by_id(1));
        assert_eq!(
            SqliteDialect.build_delete(&delete).sql,
            r#"DELETE FROM "users" WHERE "id" = ?"#
        );
    }

    #[test]
    fn test_sqlserver_renders_numbered_placeholders() {
        let update = update_statement(
            "users",
            by_id(9),
            vec![("name", "cy".into()), ("age", Value::Int32(4))],
        );
        let built = SqlServerDialect.build_update(&update);
        assert_eq!(
            built.sql,
            r#"UPDATE "users" SET "name" = @P1, "age" = @P2 WHERE "id" = @P3"#
        );
        assert_eq!(built.values.len(), 3);
    }

    #[test]
    fn test_count_statement() {
        let built = PostgresDialect.build_select(&count_statement("users", by_id(1)));
        assert_eq!(
            built.sql,
            r#"SELECT COUNT(*) AS "count" FROM "users" WHERE "id" = $1"#
        );
    }

    #[test]
    fn test_null_round_trip() {
        assert_eq!(from_sea_value(to_sea_value(Value::Null)), Value::Null);
        assert_eq!(
            from_sea_value(sea_query::Value::BigUnsigned(Some(u64::from(u32::MAX)))),
            Value::Int64(i64::from(u32::MAX))
        );
    }
}

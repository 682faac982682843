//! PostgreSQL command engine against a real server
//!
//! Requires Docker: `cargo test -p rivven-orm-integration-tests --test postgres_engine -- --ignored`

use anyhow::Result;
use rivven_orm::prelude::{Error, Statement, Value};
use rivven_orm_integration_tests::*;

const SCHEMA: &[&str] = &[
    "CREATE TABLE accounts (
        id BIGSERIAL PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        balance BIGINT NOT NULL DEFAULT 0,
        created_hooks BIGINT NOT NULL DEFAULT 0,
        updated_hooks BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE scored (id BIGINT PRIMARY KEY, score BIGINT NOT NULL)",
];

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_engine() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    pg.apply_schema(SCHEMA).await?;
    let orm = pg.engine().await?;

    identity_round_trip(orm.as_ref()).await?;
    missing_rows(orm.as_ref()).await?;
    unchanged_update_applies(orm.as_ref()).await?;
    create_or_update(orm.as_ref()).await?;
    rollback_on_error(orm.as_ref()).await?;
    raw_statements(orm.as_ref()).await?;
    concurrent_increments(orm.clone(), 32).await?;
    pagination(orm.as_ref()).await?;

    orm.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_dialect() -> Result<()> {
    init_tracing();

    let pg = TestPostgres::start().await?;
    let orm = pg.engine().await?;
    assert_eq!(orm.dialect().name(), "PostgreSQL");

    let rows = orm
        .fetch(&Statement::new(
            "SELECT $1::BIGINT + 1 AS next",
            vec![Value::Int64(41)],
        ))
        .await?;
    assert_eq!(rows[0].try_get::<i64>("next")?, 42);

    let undecodable = orm
        .fetch(&Statement::new("SELECT '1 day'::INTERVAL AS span", vec![]))
        .await;
    assert!(matches!(undecodable, Err(Error::TypeConversion { .. })));
    Ok(())
}

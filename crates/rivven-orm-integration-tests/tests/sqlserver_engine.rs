//! SQL Server command engine against a real server
//!
//! Requires Docker: `cargo test -p rivven-orm-integration-tests --test sqlserver_engine -- --ignored`

use anyhow::Result;
use rivven_orm::prelude::{Error, Statement};
use rivven_orm_integration_tests::*;

const SCHEMA: &[&str] = &[
    "CREATE TABLE accounts (
        id BIGINT IDENTITY(1,1) PRIMARY KEY,
        email NVARCHAR(255) NOT NULL UNIQUE,
        balance BIGINT NOT NULL DEFAULT 0,
        created_hooks BIGINT NOT NULL DEFAULT 0,
        updated_hooks BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE scored (id BIGINT PRIMARY KEY, score BIGINT NOT NULL)",
];

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sqlserver_engine() -> Result<()> {
    init_tracing();

    let mssql = TestSqlServer::start().await?;
    mssql.apply_schema(SCHEMA).await?;
    let orm = mssql.engine().await?;

    identity_round_trip(orm.as_ref()).await?;
    missing_rows(orm.as_ref()).await?;
    unchanged_update_applies(orm.as_ref()).await?;
    create_or_update(orm.as_ref()).await?;
    rollback_on_error(orm.as_ref()).await?;
    raw_statements(orm.as_ref()).await?;
    concurrent_increments(orm.clone(), 16).await?;
    pagination(orm.as_ref()).await?;

    let undecodable = orm
        .fetch(&Statement::new("SELECT CAST('<a/>' AS XML) AS doc", vec![]))
        .await;
    assert!(matches!(undecodable, Err(Error::TypeConversion { .. })));

    orm.close().await?;
    Ok(())
}

//! Entries and engine scenarios shared by the per-engine test files

use anyhow::{ensure, Result};
use rivven_orm::dialect;
use rivven_orm::prelude::*;
use std::sync::Arc;

/// Initialize tracing for tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rivven_orm=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Account with a server-generated identity
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

    fn load_row(&mut self, row: &Row) -> Result<(), Error> {
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
pub struct Scored {
    pub id: i64,
    pub score: i64,
}

impl TableName for Scored {
    fn table_name(&self) -> &str {
        "scored"
    }
}

impl Identity for Scored {
    fn identity(&self) -> (&str, i64) {
        ("id", self.id)
    }
}

impl Entry for Scored {
    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        vec![("id", self.id.into()), ("score", self.score.into())]
    }

    fn load_row(&mut self, row: &Row) -> Result<(), Error> {
        self.id = row.try_get("id")?;
        self.score = row.try_get("score")?;
        Ok(())
    }

    fn as_table_name(&self) -> Option<&dyn TableName> {
        Some(self)
    }

    fn as_identity(&self) -> Option<&dyn Identity> {
        Some(self)
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// A created entry reads back equal, and identities increase
pub async fn identity_round_trip(orm: &dyn Orm) -> Result<()> {
    let mut first = Account::new("first@example.com", 10);
    orm.create(&mut first).await?;
    ensure!(first.id > 0, "identity not assigned");
    ensure!(first.created_hooks == 1, "create hook ran {} times", first.created_hooks);

    let mut loaded = Account::with_id(first.id);
    orm.get(&mut loaded).await?;
    ensure!(loaded == first, "read back {:?}, wrote {:?}", loaded, first);

    let mut second = Account::new("second@example.com", 0);
    orm.create(&mut second).await?;
    ensure!(second.id > first.id, "identities not increasing");
    Ok(())
}

/// Missing rows surface as NotFound / UpdateNotApplied without side effects
pub async fn missing_rows(orm: &dyn Orm) -> Result<()> {
    let mut ghost = Account::with_id(987_654);
    ensure!(matches!(orm.get(&mut ghost).await, Err(Error::NotFound)));
    ensure!(matches!(orm.get_with_lock(&mut ghost).await, Err(Error::NotFound)));
    ensure!(matches!(orm.delete(&ghost).await, Err(Error::NotFound)));

    let before = orm.count("accounts", Cond::all()).await?;
    let mut ghost = Account {
        id: 987_654,
        email: "ghost@example.com".into(),
        ..Default::default()
    };
    ensure!(matches!(orm.update(&mut ghost).await, Err(Error::UpdateNotApplied)));
    ensure!(orm.count("accounts", Cond::all()).await? == before);
    Ok(())
}

/// Writing unchanged values to an existing row still counts as applied
pub async fn unchanged_update_applies(orm: &dyn Orm) -> Result<()> {
    let mut row = Scored { id: 500, score: 1 };
    orm.create(&mut row).await?;
    orm.update(&mut row).await?;
    orm.update(&mut row).await?;
    orm.delete(&row).await?;
    Ok(())
}

/// Insert-then-update through create_or_update runs each hook once
pub async fn create_or_update(orm: &dyn Orm) -> Result<()> {
    let mut account = Account::new("upsert@example.com", 1);
    orm.create_or_update(&mut account).await?;
    ensure!(account.id > 0);
    ensure!((account.created_hooks, account.updated_hooks) == (1, 0));

    account.balance = 2;
    orm.create_or_update(&mut account).await?;
    ensure!((account.created_hooks, account.updated_hooks) == (1, 1));

    let mut stored = Account::with_id(account.id);
    orm.get(&mut stored).await?;
    ensure!(stored.balance == 2 && stored.updated_hooks == 1);

    let matching = Cond::all().add(Expr::col(Alias::new("email")).eq("upsert@example.com"));
    ensure!(orm.count("accounts", matching).await? == 1);
    Ok(())
}

/// Concurrent locked read-modify-write loses no increments
pub async fn concurrent_increments(orm: Arc<dyn Orm>, writers: i64) -> Result<()> {
    let mut account = Account::new("counter@example.com", 0);
    orm.create(&mut account).await?;
    let id = account.id;

    let mut handles = Vec::new();
    for _ in 0..writers {
        let orm = Arc::clone(&orm);
        handles.push(tokio::spawn(async move {
            orm.with_transaction(&mut transaction(move |tx| {
                Box::pin(async move {
                    let mut account = Account::with_id(id);
                    tx.get_with_lock(&mut account).await?;
                    account.balance += 1;
                    tx.update(&mut account).await
                })
            }))
            .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let mut stored = Account::with_id(id);
    orm.get(&mut stored).await?;
    ensure!(
        stored.balance == writers,
        "lost updates: balance {} after {} increments",
        stored.balance,
        writers
    );
    Ok(())
}

/// A failing body leaves nothing behind
pub async fn rollback_on_error(orm: &dyn Orm) -> Result<()> {
    let before = orm.count("accounts", Cond::all()).await?;
    let result = orm
        .with_transaction(&mut transaction(|tx| {
            Box::pin(async move {
                tx.create(&mut Account::new("rolled-back@example.com", 0))
                    .await?;
                Err(Error::UpdateNotApplied)
            })
        }))
        .await;

    ensure!(matches!(result, Err(Error::UpdateNotApplied)));
    ensure!(orm.count("accounts", Cond::all()).await? == before);
    Ok(())
}

/// Raw statements share the transaction of the handle they run on
pub async fn raw_statements(orm: &dyn Orm) -> Result<()> {
    let before = orm.count("scored", Cond::all()).await?;
    let insert = orm.dialect().build_insert(&dialect::insert_statement(
        "scored",
        vec![("id", Value::Int64(900)), ("score", Value::Int64(3))],
    )?);
    let select = orm.dialect().build_select(&dialect::select_statement(
        "scored",
        Cond::all().add(Expr::col(Alias::new("id")).eq(900)),
    ));

    let result = orm
        .with_transaction(&mut transaction(|tx| {
            let (insert, select) = (insert.clone(), select.clone());
            Box::pin(async move {
                tx.execute(&insert).await?;
                match tx.fetch(&select).await?.len() {
                    1 => Err(Error::UpdateNotApplied),
                    n => Err(Error::internal(format!("raw insert visible {} times", n))),
                }
            })
        }))
        .await;

    ensure!(matches!(result, Err(Error::UpdateNotApplied)), "{:?}", result);
    ensure!(orm.count("scored", Cond::all()).await? == before);
    ensure!(orm.fetch(&select).await?.is_empty());

    ensure!(orm.execute(&insert).await?.rows_affected == 1);
    let rows = orm.fetch(&select).await?;
    ensure!(rows.len() == 1 && rows[0].try_get::<i64>("score")? == 3);
    orm.delete(&Scored { id: 900, score: 3 }).await?;
    Ok(())
}

/// Pages of an ordered query concatenate to the unpaginated result
pub async fn pagination(orm: &dyn Orm) -> Result<()> {
    for (id, score) in [(1, 1), (2, 1), (3, 1), (4, 10), (5, 10)] {
        orm.create(&mut Scored { id, score }).await?;
    }
    let ordered = || {
        QueryParams::new("scored")
            .order_by("score", SortOrder::Desc)
            .order_by("id", SortOrder::Desc)
    };

    let mut all: Vec<Scored> = Vec::new();
    orm.query(&ordered(), &mut all).await?;
    let ids: Vec<i64> = all.iter().map(|s| s.id).collect();
    ensure!(ids == vec![5, 4, 3, 2, 1], "unexpected order {:?}", ids);

    for (k, expected) in all.iter().enumerate() {
        let mut page: Vec<Scored> = Vec::new();
        orm.query(&ordered().offset(k as u32).limit(1), &mut page)
            .await?;
        ensure!(page.as_slice() == std::slice::from_ref(expected), "page {}", k);
    }

    let mut tail: Vec<Scored> = Vec::new();
    orm.query(&ordered().offset(3), &mut tail).await?;
    ensure!(tail.iter().map(|s| s.id).collect::<Vec<_>>() == vec![2, 1]);

    let top = Cond::all().add(Expr::col(Alias::new("score")).gte(10));
    orm.with_transaction(&mut transaction(|tx| {
        let params = ordered().filter(top.clone());
        Box::pin(async move {
            let mut locked: Vec<Scored> = Vec::new();
            tx.query_with_lock(&params, &mut locked).await?;
            match locked.len() {
                2 => Ok(()),
                n => Err(Error::internal(format!("locked {} rows, expected 2", n))),
            }
        })
    }))
    .await?;
    Ok(())
}

//! Command-engine tests for rivven-orm against real SQLite files
//!
//! Every behavioural check runs under both embedded transaction strategies.

mod common;

use common::{Account, Anonymous, LogLine, Membership, Ranked, Receipt, TestDatabase, Ticket};
use rivven_orm::connection::ConnectionConfig;
use rivven_orm::entry::require_entry;
use rivven_orm::pool::{PoolConfig, SimpleConnectionPool};
use rivven_orm::prelude::*;
use rivven_orm::sqlite::SqliteConnectionFactory;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn count_accounts(orm: &dyn Orm) -> i64 {
    orm.count("accounts", Cond::all()).await.unwrap()
}

async fn seed_ranked(orm: &dyn Orm) {
    for (id, rank) in [(1, 1), (2, 1), (3, 1), (4, 10), (5, 10)] {
        orm.create(&mut Ranked { id, rank }).await.unwrap();
    }
}

fn ranked_desc() -> QueryParams {
    QueryParams::new("ranked")
        .order_by("rank", SortOrder::Desc)
        .order_by("id", SortOrder::Desc)
}

// ==================== Identity Round-Trip ====================

async fn identity_round_trip(orm: Arc<dyn Orm>) {
    let mut account = Account::new("a@example.com", 10);
    orm.create(&mut account).await.unwrap();

    assert_ne!(account.id, 0);
    assert_eq!(account.created_hooks, 1);
    assert_eq!(account.updated_hooks, 0);

    let mut loaded = Account::with_id(account.id);
    orm.get(&mut loaded).await.unwrap();
    assert_eq!(loaded, account);

    let mut second = Account::new("b@example.com", 0);
    orm.create(&mut second).await.unwrap();
    assert!(second.id > account.id);
}

#[tokio::test]
async fn test_identity_round_trip_mutex() {
    let db = TestDatabase::create().await;
    identity_round_trip(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_identity_round_trip_retry() {
    let db = TestDatabase::create().await;
    identity_round_trip(db.retry_engine().await).await;
}

// ==================== Selection Precedence ====================

async fn unique_selector_wins(orm: Arc<dyn Orm>) {
    let mut stored = Membership {
        id: 7,
        user_id: 1,
        group_id: 2,
        role: "member".into(),
    };
    orm.create(&mut stored).await.unwrap();

    // The identity points nowhere; the composite key finds the row
    let mut lookup = Membership {
        id: 999,
        user_id: 1,
        group_id: 2,
        ..Default::default()
    };
    orm.get(&mut lookup).await.unwrap();
    assert_eq!(lookup, stored);

    let mut promoted = Membership {
        id: 7,
        role: "owner".into(),
        ..stored.clone()
    };
    orm.update(&mut promoted).await.unwrap();

    let mut reloaded = Membership {
        id: 0,
        user_id: 1,
        group_id: 2,
        ..Default::default()
    };
    orm.get(&mut reloaded).await.unwrap();
    assert_eq!(reloaded.role, "owner");

    let victim = Membership {
        id: 12345,
        user_id: 1,
        group_id: 2,
        ..Default::default()
    };
    orm.delete(&victim).await.unwrap();
    assert_eq!(orm.count("memberships", Cond::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unique_selector_wins_mutex() {
    let db = TestDatabase::create().await;
    unique_selector_wins(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_unique_selector_wins_retry() {
    let db = TestDatabase::create().await;
    unique_selector_wins(db.retry_engine().await).await;
}

// ==================== Generated-Only Rows ====================

async fn generated_only_entry(orm: Arc<dyn Orm>) {
    let mut first = Ticket::default();
    orm.create(&mut first).await.unwrap();
    let mut second = Ticket::default();
    orm.create(&mut second).await.unwrap();

    assert!(first.id > 0);
    assert!(second.id > first.id);

    let mut loaded = Ticket { id: second.id };
    orm.get(&mut loaded).await.unwrap();
    assert_eq!(loaded, second);
    assert_eq!(orm.count("tickets", Cond::all()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_generated_only_entry_mutex() {
    let db = TestDatabase::create().await;
    generated_only_entry(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_generated_only_entry_retry() {
    let db = TestDatabase::create().await;
    generated_only_entry(db.retry_engine().await).await;
}

#[tokio::test]
async fn test_assignable_identity_requires_identity_column() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;

    let mut receipt = Receipt::default();
    assert!(matches!(
        orm.create(&mut receipt).await,
        Err(Error::IdentityCapabilityMissing)
    ));
    assert_eq!(receipt.id, 0);
    assert_eq!(orm.count("tickets", Cond::all()).await.unwrap(), 0);
}

// ==================== Not Found / Update Not Applied ====================

async fn missing_rows(orm: Arc<dyn Orm>) {
    let mut ghost = Account::with_id(41);
    assert!(matches!(orm.get(&mut ghost).await, Err(Error::NotFound)));
    assert!(matches!(
        orm.get_with_lock(&mut ghost).await,
        Err(Error::NotFound)
    ));
    assert!(matches!(orm.delete(&ghost).await, Err(Error::NotFound)));

    let mut ghost = Account {
        id: 42,
        email: "ghost@example.com".into(),
        ..Default::default()
    };
    assert!(matches!(
        orm.update(&mut ghost).await,
        Err(Error::UpdateNotApplied)
    ));
    assert_eq!(count_accounts(orm.as_ref()).await, 0);

    let mut account = Account::new("c@example.com", 1);
    orm.create(&mut account).await.unwrap();
    orm.delete(&account).await.unwrap();
    assert!(matches!(orm.delete(&account).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_missing_rows_mutex() {
    let db = TestDatabase::create().await;
    missing_rows(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_missing_rows_retry() {
    let db = TestDatabase::create().await;
    missing_rows(db.retry_engine().await).await;
}

#[tokio::test]
async fn test_update_without_changes_still_applies() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;

    let mut account = Account::new("same@example.com", 3);
    orm.create(&mut account).await.unwrap();

    // on_update bumps the hook counter, so write the same values twice
    orm.update(&mut account).await.unwrap();
    orm.update(&mut account).await.unwrap();
    assert_eq!(account.updated_hooks, 2);
}

// ==================== Create Or Update ====================

async fn create_or_update_branches(orm: Arc<dyn Orm>) {
    let mut account = Account::new("d@example.com", 5);
    orm.create_or_update(&mut account).await.unwrap();
    assert_ne!(account.id, 0);
    assert_eq!((account.created_hooks, account.updated_hooks), (1, 0));
    assert_eq!(count_accounts(orm.as_ref()).await, 1);

    account.balance = 50;
    orm.create_or_update(&mut account).await.unwrap();
    assert_eq!((account.created_hooks, account.updated_hooks), (1, 1));
    assert_eq!(count_accounts(orm.as_ref()).await, 1);

    let mut stored = Account::with_id(account.id);
    orm.get(&mut stored).await.unwrap();
    assert_eq!(stored.balance, 50);
    assert_eq!(stored.updated_hooks, 1);
}

#[tokio::test]
async fn test_create_or_update_mutex() {
    let db = TestDatabase::create().await;
    create_or_update_branches(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_create_or_update_retry() {
    let db = TestDatabase::create().await;
    create_or_update_branches(db.retry_engine().await).await;
}

// ==================== Lost-Update Freedom ====================

async fn concurrent_increments(orm: Arc<dyn Orm>, writers: i64) {
    let mut account = Account::new("counter@example.com", 0);
    orm.create(&mut account).await.unwrap();
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
        handle.await.unwrap().unwrap();
    }

    let mut stored = Account::with_id(id);
    orm.get(&mut stored).await.unwrap();
    assert_eq!(stored.balance, writers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_mutex() {
    let db = TestDatabase::create().await;
    concurrent_increments(db.mutex_engine().await, 64).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_retry() {
    let db = TestDatabase::create().await;
    concurrent_increments(db.retry_engine().await, 64).await;
}

// ==================== Pagination ====================

async fn pagination(orm: Arc<dyn Orm>) {
    seed_ranked(orm.as_ref()).await;

    let mut all: Vec<Ranked> = Vec::new();
    orm.query(&ranked_desc(), &mut all).await.unwrap();
    let ids: Vec<i64> = all.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![5, 4, 3, 2, 1]);

    for (k, expected) in all.iter().enumerate() {
        let mut page: Vec<Ranked> = Vec::new();
        let params = ranked_desc().offset(k as u32).limit(1);
        orm.query(&params, &mut page).await.unwrap();
        assert_eq!(page.as_slice(), std::slice::from_ref(expected));
    }

    let mut page: Vec<Ranked> = Vec::new();
    orm.query(&ranked_desc().offset(3).limit(1), &mut page).await.unwrap();
    assert_eq!(page, vec![Ranked { id: 2, rank: 1 }]);

    let mut tail: Vec<Ranked> = Vec::new();
    orm.query(&ranked_desc().offset(3), &mut tail).await.unwrap();
    assert_eq!(tail.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);

    let mut beyond: Vec<Ranked> = Vec::new();
    orm.query(&ranked_desc().offset(10).limit(1), &mut beyond)
        .await
        .unwrap();
    assert!(beyond.is_empty());
}

#[tokio::test]
async fn test_pagination_mutex() {
    let db = TestDatabase::create().await;
    pagination(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_pagination_retry() {
    let db = TestDatabase::create().await;
    pagination(db.retry_engine().await).await;
}

#[tokio::test]
async fn test_filtered_query_and_count() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;
    seed_ranked(orm.as_ref()).await;

    let top = Cond::all().add(Expr::col(Alias::new("rank")).gte(10));
    assert_eq!(orm.count("ranked", top.clone()).await.unwrap(), 2);
    assert_eq!(orm.count("ranked", Cond::all()).await.unwrap(), 5);

    let mut rows: Vec<Ranked> = Vec::new();
    let params = QueryParams::new("ranked")
        .filter(top)
        .order_by("id", SortOrder::Asc);
    orm.query_with_lock(&params, &mut rows).await.unwrap();
    assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4, 5]);
}

// ==================== Transactions ====================

async fn rollback_on_error(orm: Arc<dyn Orm>) {
    let result = orm
        .with_transaction(&mut transaction(|tx| {
            Box::pin(async move {
                tx.create(&mut Account::new("doomed@example.com", 1)).await?;
                tx.create(&mut Account::new("doomed2@example.com", 1)).await?;
                Err(Error::NotFound)
            })
        }))
        .await;

    assert!(matches!(result, Err(Error::NotFound)));
    assert_eq!(count_accounts(orm.as_ref()).await, 0);
}

#[tokio::test]
async fn test_rollback_on_error_mutex() {
    let db = TestDatabase::create().await;
    rollback_on_error(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_rollback_on_error_retry() {
    let db = TestDatabase::create().await;
    rollback_on_error(db.retry_engine().await).await;
}

#[tokio::test]
async fn test_nested_transaction_reuses_handle() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;
    assert!(!orm.in_transaction());

    let result = orm
        .with_transaction(&mut transaction(|tx| {
            Box::pin(async move {
                assert!(tx.in_transaction());
                tx.with_transaction(&mut transaction(|inner| {
                    Box::pin(async move {
                        assert!(inner.in_transaction());
                        inner.create(&mut Account::new("inner@example.com", 0)).await
                    })
                }))
                .await?;

                // The inner create is visible inside the outer transaction
                assert_eq!(tx.count("accounts", Cond::all()).await?, 1);
                Err(Error::UpdateNotApplied)
            })
        }))
        .await;

    assert!(matches!(result, Err(Error::UpdateNotApplied)));
    assert_eq!(count_accounts(orm.as_ref()).await, 0);
}

#[tokio::test]
async fn test_create_or_update_inside_transaction() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;

    orm.with_transaction(&mut transaction(|tx| {
        Box::pin(async move {
            let mut account = Account::new("nested@example.com", 1);
            tx.create_or_update(&mut account).await?;
            account.balance = 2;
            tx.create_or_update(&mut account).await
        })
    }))
    .await
    .unwrap();

    let mut rows: Vec<Account> = Vec::new();
    orm.query(&QueryParams::new("accounts"), &mut rows)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].balance, 2);
}

#[tokio::test]
async fn test_cancelled_transaction_rolls_back() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;

    let mut body = transaction(|tx| {
        Box::pin(async move {
            tx.create(&mut Account::new("stalled@example.com", 0)).await?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
    });
    let stalled = orm.with_transaction(&mut body);
    assert!(tokio::time::timeout(Duration::from_millis(200), stalled)
        .await
        .is_err());

    // The write lock and the database lock are both released again
    let mut account = Account::new("after@example.com", 0);
    orm.create_or_update(&mut account).await.unwrap();

    let mut rows: Vec<Account> = Vec::new();
    orm.query(&QueryParams::new("accounts"), &mut rows)
        .await
        .unwrap();
    assert_eq!(
        rows.iter().map(|a| a.email.as_str()).collect::<Vec<_>>(),
        vec!["after@example.com"]
    );
}

// ==================== Raw Statements ====================

async fn raw_statements(orm: Arc<dyn Orm>) {
    let insert = |id: i64, rank: i64| {
        Statement::new(
            "INSERT INTO ranked (id, rank) VALUES (?, ?)",
            vec![Value::Int64(id), Value::Int64(rank)],
        )
    };

    let result = orm.execute(&insert(1, 7)).await.unwrap();
    assert_eq!(result.rows_affected, 1);

    let rows = orm
        .fetch(&Statement::new(
            "SELECT rank FROM ranked WHERE id = ?",
            vec![Value::Int64(1)],
        ))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].try_get::<i64>("rank").unwrap(), 7);

    let result = orm
        .with_transaction(&mut transaction(|tx| {
            Box::pin(async move {
                tx.execute(&insert(2, 8)).await?;
                let seen = tx
                    .fetch(&Statement::new("SELECT id FROM ranked", Vec::new()))
                    .await?;
                assert_eq!(seen.len(), 2);
                Err(Error::UpdateNotApplied)
            })
        }))
        .await;

    assert!(matches!(result, Err(Error::UpdateNotApplied)));
    assert_eq!(orm.count("ranked", Cond::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_raw_statements_mutex() {
    let db = TestDatabase::create().await;
    raw_statements(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_raw_statements_retry() {
    let db = TestDatabase::create().await;
    raw_statements(db.retry_engine().await).await;
}

// ==================== Retry Strategy ====================

#[tokio::test]
async fn test_retry_stops_on_entry_outcome() {
    let db = TestDatabase::create().await;
    let orm = db.retry_engine().await;
    let attempts = AtomicUsize::new(0);

    let result = orm
        .with_transaction(&mut transaction(|tx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let mut ghost = Account::with_id(404);
                tx.get(&mut ghost).await
            })
        }))
        .await;

    assert!(matches!(result, Err(Error::NotFound)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_exhausts_attempts() {
    let db = TestDatabase::create().await;
    let orm = db
        .connect(DatabaseConfig::sqlite("").with_sqlite_retry(3, 1, 0))
        .await;
    let attempts = AtomicUsize::new(0);

    let result = orm
        .with_transaction(&mut transaction(|tx| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tx.create(&mut Account::new(&format!("try{}@example.com", attempt), 0))
                    .await?;
                Err(Error::timeout("simulated contention"))
            })
        }))
        .await;

    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(count_accounts(orm.as_ref()).await, 0);
}

#[tokio::test]
async fn test_mutex_never_retries() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;
    let attempts = AtomicUsize::new(0);

    let result = orm
        .with_transaction(&mut transaction(|_tx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err(Error::timeout("simulated contention")) })
        }))
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

// ==================== Write Lock Sharing ====================

#[tokio::test]
async fn test_engines_share_injected_write_lock() {
    let db = TestDatabase::create().await;
    let factory = Arc::new(SqliteConnectionFactory);

    let pool_a = SimpleConnectionPool::new(PoolConfig::new(db.url()), factory.clone())
        .await
        .unwrap();
    let pool_b = SimpleConnectionPool::new(PoolConfig::new(db.url()), factory)
        .await
        .unwrap();

    let a = SqliteOrm::new(pool_a, SerializerConfig::Mutex);
    let b = SqliteOrm::new(pool_b, SerializerConfig::Mutex).with_write_lock(a.write_lock().clone());
    let c = SqliteOrm::new(
        SimpleConnectionPool::new(
            PoolConfig {
                connection: ConnectionConfig::new(db.url()),
                ..Default::default()
            },
            Arc::new(SqliteConnectionFactory),
        )
        .await
        .unwrap(),
        SerializerConfig::Mutex,
    );

    assert!(a.write_lock().same_as(b.write_lock()));
    assert!(!a.write_lock().same_as(c.write_lock()));
    assert_eq!(b.serializer_config(), SerializerConfig::Mutex);

    let mut account = Account::new("shared@example.com", 0);
    a.create(&mut account).await.unwrap();
    b.create_or_update(&mut account).await.unwrap();
    assert_eq!(c.count("accounts", Cond::all()).await.unwrap(), 1);
}

// ==================== Caller Input ====================

async fn caller_input_errors(orm: Arc<dyn Orm>) {
    assert!(matches!(
        orm.create(&mut Anonymous).await,
        Err(Error::TableNameCapabilityMissing)
    ));
    assert!(matches!(
        orm.get(&mut LogLine::default()).await,
        Err(Error::SelectionCapabilityMissing)
    ));
    assert!(matches!(
        orm.delete(&LogLine::default()).await,
        Err(Error::SelectionCapabilityMissing)
    ));
    assert!(matches!(
        orm.create_or_update(&mut Anonymous).await,
        Err(Error::TableNameCapabilityMissing)
    ));

    let missing: Option<Account> = None;
    assert!(matches!(require_entry(missing), Err(Error::NilEntry)));
}

#[tokio::test]
async fn test_caller_input_errors_mutex() {
    let db = TestDatabase::create().await;
    caller_input_errors(db.mutex_engine().await).await;
}

#[tokio::test]
async fn test_caller_input_errors_retry() {
    let db = TestDatabase::create().await;
    caller_input_errors(db.retry_engine().await).await;
}

#[tokio::test]
async fn test_retry_surfaces_caller_input_immediately() {
    let db = TestDatabase::create().await;
    let orm = db
        .connect(DatabaseConfig::sqlite("").with_sqlite_retry(5, 200, 0))
        .await;
    let attempts = AtomicUsize::new(0);

    let started = std::time::Instant::now();
    let result = orm
        .with_transaction(&mut transaction(|tx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { tx.create(&mut Anonymous).await })
        }))
        .await;

    assert!(matches!(result, Err(Error::TableNameCapabilityMissing)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    assert!(matches!(
        orm.create_or_update(&mut Anonymous).await,
        Err(Error::TableNameCapabilityMissing)
    ));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_close_drains_pool() {
    let db = TestDatabase::create().await;
    let orm = db.mutex_engine().await;
    orm.create(&mut Account::new("x@example.com", 0)).await.unwrap();

    orm.close().await.unwrap();
    assert!(orm.count("accounts", Cond::all()).await.is_err());
}

//! Tests for the rivven-orm value model

use chrono::{NaiveDate, Utc};
use rivven_orm::prelude::*;
use uuid::Uuid;

fn row() -> Row {
    Row::new(
        vec![
            "id".into(),
            "Email".into(),
            "balance".into(),
            "active".into(),
            "nickname".into(),
        ],
        vec![
            Value::Int64(7),
            Value::String("a@example.com".into()),
            Value::Int32(-15),
            Value::Int64(1),
            Value::Null,
        ],
    )
}

// ==================== Value Tests ====================

#[test]
fn test_value_null() {
    let v = Value::Null;
    assert!(v.is_null());
    assert_eq!(v.as_str(), None);
    assert_eq!(v.as_i64(), None);
    assert_eq!(v.as_bool(), None);
    assert_eq!(v.sql_type(), "NULL");
}

#[test]
fn test_value_integer_widening() {
    assert_eq!(Value::Int8(42).as_i64(), Some(42));
    assert_eq!(Value::Int16(-100).as_i64(), Some(-100));
    assert_eq!(Value::Int32(1_000_000).as_i64(), Some(1_000_000));
    assert_eq!(Value::Bool(true).as_i64(), Some(1));
    assert_eq!(Value::String("12".into()).as_i64(), Some(12));
    assert_eq!(Value::Float64(f64::NAN).as_i64(), None);
}

#[test]
fn test_value_lenient_bool() {
    assert_eq!(Value::Int64(0).as_bool(), Some(false));
    assert_eq!(Value::Int8(1).as_bool(), Some(true));
    assert_eq!(Value::String("Yes".into()).as_bool(), Some(true));
    assert_eq!(Value::String("maybe".into()).as_bool(), None);
}

#[test]
fn test_value_text_forms() {
    let id = Uuid::new_v4();
    assert_eq!(Value::String(id.to_string()).as_uuid(), Some(id));
    assert_eq!(Value::Bytes(b"abc".to_vec()).as_string(), Some("abc".into()));
    assert_eq!(
        Value::String(r#"{"k":1}"#.into()).as_json(),
        Some(serde_json::json!({"k": 1}))
    );

    let stored = Value::String("2024-03-01 12:30:00".into());
    let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 30, 0)
        .unwrap();
    assert_eq!(stored.as_datetime(), Some(expected));
    assert_eq!(stored.as_datetime_utc(), Some(expected.and_utc()));
}

#[test]
fn test_value_from_option() {
    assert_eq!(Value::from(Some(5_i64)), Value::Int64(5));
    assert_eq!(Value::from(None::<String>), Value::Null);
    assert_eq!(Value::from("x"), Value::String("x".into()));
    assert_eq!(
        Value::from(Utc::now().date_naive()).sql_type(),
        "DATE"
    );
}

// ==================== Row Tests ====================

#[test]
fn test_row_lookup_is_case_insensitive() {
    let row = row();
    assert_eq!(row.len(), 5);
    assert_eq!(row.get_by_name("EMAIL"), Some(&Value::String("a@example.com".into())));
    assert_eq!(row.get(0), Some(&Value::Int64(7)));
    assert_eq!(row.get(9), None);
}

#[test]
fn test_row_try_get() {
    let row = row();
    assert_eq!(row.try_get::<i64>("id").unwrap(), 7);
    assert_eq!(row.try_get::<i32>("balance").unwrap(), -15);
    assert_eq!(row.try_get::<String>("email").unwrap(), "a@example.com");
    assert!(row.try_get::<bool>("active").unwrap());
    assert_eq!(row.try_get::<Option<String>>("nickname").unwrap(), None);
    assert_eq!(row.try_get::<Option<i64>>("id").unwrap(), Some(7));
}

#[test]
fn test_row_try_get_errors() {
    let row = row();
    assert!(matches!(
        row.try_get::<i64>("missing"),
        Err(Error::ColumnNotFound { .. })
    ));
    assert!(matches!(
        row.try_get::<u32>("balance"),
        Err(Error::TypeConversion { .. })
    ));
    assert!(matches!(
        row.try_get::<String>("nickname"),
        Err(Error::TypeConversion { .. })
    ));
}

#[test]
fn test_row_into_map() {
    let map = row().into_map();
    assert_eq!(map.get("Email"), Some(&Value::String("a@example.com".into())));
    assert_eq!(map.len(), 5);
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use dayplanner_lib::auto_migrate::migrate_on_startup;
use dayplanner_lib::backup::{
    export_backup, parse_backup, restore_backup, CURRENT_SCHEMA_VERSION,
};
use dayplanner_lib::version::SchemaVersion;
use dayplanner_lib::version_store::MemoryVersionStore;
use dayplanner_lib::APP_VERSION;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use util::temp_pool;

async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    migrate_on_startup(&pool, &MemoryVersionStore::new())
        .await
        .unwrap();
    pool
}

async fn seed(pool: &SqlitePool) {
    for sql in [
        "INSERT INTO tasks (id, title, done, due_at, created_at, updated_at, priority)
         VALUES ('t1', 'Water plants', 1, 1714557600000, 1, 2, 'low')",
        "INSERT INTO notes (id, title, body, created_at, updated_at, pinned)
         VALUES ('n1', 'Groceries', 'milk, eggs', 1, 1, 1)",
        "INSERT INTO transactions (id, amount, kind, description, occurred_at, created_at, category)
         VALUES ('x1', 12.5, 'expense', 'lunch', 1714557600000, 1, 'food')",
        "INSERT INTO settings (key, value) VALUES ('theme', 'dark')",
    ] {
        sqlx::query(sql).execute(pool).await.unwrap();
    }
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

fn v1_backup() -> Value {
    json!({
        "appName": "dayplanner",
        "appVersion": "0.0.1",
        "exportTimestamp": "2024-05-01T10:00:00.000Z",
        "tables": {
            "tasks": [
                { "id": "t9", "title": "Old task", "done": false, "created_at": 1, "updated_at": 1 }
            ],
            "notes": [
                { "id": "n9", "title": "Old note", "body": "", "created_at": 1, "updated_at": 1 }
            ],
            "transactions": [
                { "id": "x9", "amount": 3.0, "kind": "income", "occurred_at": 5, "created_at": 5 }
            ],
            "settings": []
        }
    })
}

#[tokio::test]
async fn export_then_restore_round_trips_rows() {
    let pool = migrated_pool().await;
    seed(&pool).await;

    let payload = export_backup(&pool).await.unwrap();
    assert_eq!(payload.app_name, "dayplanner");
    assert_eq!(payload.app_version, *APP_VERSION);
    assert_eq!(payload.schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(payload.tables.tasks[0]["done"], json!(true));
    assert_eq!(payload.tables.tasks[0]["priority"], json!("low"));
    assert_eq!(payload.tables.notes[0]["pinned"], json!(true));
    assert_eq!(payload.tables.transactions[0]["amount"], json!(12.5));

    let target = migrated_pool().await;
    sqlx::query("INSERT INTO tasks (id, title, created_at, updated_at) VALUES ('stale', 'x', 1, 1)")
        .execute(&target)
        .await
        .unwrap();

    let report = restore_backup(&target, serde_json::to_value(&payload).unwrap())
        .await
        .unwrap();
    assert_eq!(report.source_schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(report.tables["tasks"], 1);
    assert_eq!(report.tables["settings"], 1);

    let again = export_backup(&target).await.unwrap();
    assert_eq!(again.tables, payload.tables);
}

#[tokio::test]
async fn settings_values_keep_their_json_type() {
    let pool = migrated_pool().await;
    let settings = json!([
        { "key": "layout", "value": { "theme": "dark", "weekStart": 1 } },
        { "key": "compact", "value": true },
        { "key": "tags", "value": ["a", "b"] },
        { "key": "name", "value": "Sam" },
        { "key": "digits", "value": "123" },
        { "key": "zoom", "value": 1.25 },
        { "key": "cleared", "value": null }
    ]);
    let mut raw = v1_backup();
    raw["schemaVersion"] = json!(CURRENT_SCHEMA_VERSION.get());
    raw["tables"]["settings"] = settings.clone();

    restore_backup(&pool, raw).await.unwrap();
    let exported = export_backup(&pool).await.unwrap();

    assert_eq!(serde_json::to_value(&exported.tables.settings).unwrap(), settings);

    // A second pass through restore and export is stable.
    let target = migrated_pool().await;
    restore_backup(&target, serde_json::to_value(&exported).unwrap())
        .await
        .unwrap();
    let again = export_backup(&target).await.unwrap();
    assert_eq!(again.tables.settings, exported.tables.settings);
}

#[tokio::test]
async fn missing_table_is_rejected_before_anything_is_cleared() {
    let pool = migrated_pool().await;
    seed(&pool).await;

    let mut raw = v1_backup();
    raw["tables"].as_object_mut().unwrap().remove("transactions");

    let err = restore_backup(&pool, raw).await.unwrap_err();
    assert_eq!(err.code(), "BACKUP/INVALID_FORMAT");
    assert!(err.context()["reason"].contains("transactions"));
    for table in ["tasks", "notes", "transactions", "settings"] {
        assert_eq!(count(&pool, table).await, 1, "table `{table}` was touched");
    }
}

#[tokio::test]
async fn v1_backup_is_upgraded_before_restore() {
    let pool = migrated_pool().await;

    let report = restore_backup(&pool, v1_backup()).await.unwrap();
    assert_eq!(report.source_schema_version, SchemaVersion::INITIAL);
    assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION);

    let priority: String = sqlx::query_scalar("SELECT priority FROM tasks WHERE id = 't9'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(priority, "medium");
    let category: String =
        sqlx::query_scalar("SELECT category FROM transactions WHERE id = 'x9'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(category, "other");
    let pinned: i64 = sqlx::query_scalar("SELECT pinned FROM notes WHERE id = 'n9'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(pinned, 0);
}

#[tokio::test]
async fn unknown_record_fields_are_not_stored() {
    let pool = migrated_pool().await;
    let mut raw = v1_backup();
    raw["tables"]["tasks"][0]["mood"] = json!("sunny");
    raw["tables"]["habits"] = json!([{ "id": "h1" }]);

    // The parsed payload still carries the extras.
    let parsed = parse_backup(raw.clone()).unwrap();
    assert_eq!(parsed.tables.tasks[0]["mood"], json!("sunny"));
    assert!(parsed.tables.extra.contains_key("habits"));

    restore_backup(&pool, raw).await.unwrap();
    let exported = export_backup(&pool).await.unwrap();
    assert!(!exported.tables.tasks[0].contains_key("mood"));
    assert!(exported.tables.extra.is_empty());
}

#[tokio::test]
async fn newer_schema_is_refused() {
    let pool = migrated_pool().await;
    seed(&pool).await;
    let mut raw = v1_backup();
    raw["schemaVersion"] = json!(CURRENT_SCHEMA_VERSION.get() + 1);

    let err = restore_backup(&pool, raw).await.unwrap_err();
    assert_eq!(err.code(), "BACKUP/SCHEMA_TOO_NEW");
    assert_eq!(count(&pool, "tasks").await, 1);
}

#[tokio::test]
async fn failing_insert_rolls_back_whole_restore() {
    let pool = migrated_pool().await;
    seed(&pool).await;
    let mut raw = v1_backup();
    // `title` is NOT NULL.
    raw["tables"]["notes"][0]["title"] = Value::Null;

    let err = restore_backup(&pool, raw).await.unwrap_err();
    assert_eq!(err.code(), "DB/NOT_NULL");
    assert_eq!(err.context().get("table").map(String::as_str), Some("notes"));
    for table in ["tasks", "notes", "transactions", "settings"] {
        assert_eq!(count(&pool, table).await, 1, "table `{table}` was touched");
    }
    let title: String = sqlx::query_scalar("SELECT title FROM tasks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(title, "Water plants");
}

#[tokio::test]
async fn restore_into_unmigrated_store_reports_missing_table() {
    let pool = temp_pool().await;
    let err = restore_backup(&pool, v1_backup()).await.unwrap_err();
    assert_eq!(err.code(), "BACKUP/TABLE_MISSING");
}

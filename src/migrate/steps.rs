//! Built-in schema steps. Append only: never edit or reorder a shipped step.
//!
//! Every step checks before it mutates (`IF NOT EXISTS`, or a column probe
//! before `ALTER TABLE ... ADD COLUMN`) so a batch that failed halfway can be
//! replayed from its first step.

use futures::future::BoxFuture;
use sqlx::SqliteConnection;
use tracing::info;

use super::MigrationStep;
use crate::version::SemVer;

pub static BUILTIN: &[MigrationStep] = &[
    MigrationStep::new(SemVer::new(0, 0, 1), "create_core_tables", create_core_tables),
    MigrationStep::new(SemVer::new(0, 0, 2), "add_task_priority", add_task_priority),
    MigrationStep::new(
        SemVer::new(0, 0, 3),
        "add_transaction_category",
        add_transaction_category,
    ),
    MigrationStep::new(SemVer::new(0, 0, 4), "add_note_pinned", add_note_pinned),
];

const CORE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        done INTEGER NOT NULL DEFAULT 0,
        due_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        amount REAL NOT NULL,
        kind TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        occurred_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value
    )",
];

fn preview(sql: &str) -> String {
    let one_line = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.len() > 160 {
        let cut = one_line
            .char_indices()
            .nth(160)
            .map(|(i, _)| i)
            .unwrap_or(one_line.len());
        format!("{}…", &one_line[..cut])
    } else {
        one_line
    }
}

pub(crate) async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> sqlx::Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")
            .bind(table)
            .bind(column)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

async fn exec(conn: &mut SqliteConnection, sql: &str) -> anyhow::Result<()> {
    info!(target: "dayplanner", event = "migration_stmt", sql = %preview(sql));
    sqlx::query(sql).execute(&mut *conn).await?;
    Ok(())
}

async fn add_column_if_missing(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> anyhow::Result<()> {
    if column_exists(conn, table, column).await? {
        info!(
            target: "dayplanner",
            event = "migration_stmt_skip",
            table,
            column,
            reason = "column_exists"
        );
        return Ok(());
    }
    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {definition}");
    exec(conn, &sql).await
}

fn create_core_tables(conn: &mut SqliteConnection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        for sql in CORE_TABLES {
            exec(conn, sql).await?;
        }
        Ok(())
    })
}

fn add_task_priority(conn: &mut SqliteConnection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        add_column_if_missing(conn, "tasks", "priority", "TEXT NOT NULL DEFAULT 'medium'").await
    })
}

fn add_transaction_category(conn: &mut SqliteConnection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        add_column_if_missing(
            conn,
            "transactions",
            "category",
            "TEXT NOT NULL DEFAULT 'other'",
        )
        .await?;
        exec(
            conn,
            "CREATE INDEX IF NOT EXISTS idx_transactions_occurred_at ON transactions(occurred_at)",
        )
        .await
    })
}

fn add_note_pinned(conn: &mut SqliteConnection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        add_column_if_missing(conn, "notes", "pinned", "INTEGER NOT NULL DEFAULT 0").await
    })
}

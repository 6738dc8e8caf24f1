use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Sqlite, Transaction};
use tracing::{error, info, warn};

use crate::version_store::VersionStore;
use crate::{AppError, AppResult};

pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            error!(
                target: "dayplanner",
                event = "data_dir_create_failed",
                path = %parent.display(),
                error = %e
            );
            e
        })?;
    }
    info!(target: "dayplanner", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .with_context(|| format!("open {}", db_path.display()))?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    info!(
        target: "dayplanner",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "dayplanner",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, E, F>(pool: &Pool<Sqlite>, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(
        &'c mut Transaction<'static, Sqlite>,
    ) -> futures::future::BoxFuture<'c, Result<R, E>>,
{
    let mut tx = pool.begin().await.map_err(E::from)?;
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "dayplanner", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "dayplanner", event = "db_tx_rollback");
            }
            Err(e)
        }
    }
}

/// Developer-only: forget the installed version and delete the store files so
/// the next start behaves like a fresh install. Refused in release builds.
///
/// Close every pool on `db_path` before calling this.
pub fn dev_reset(versions: &dyn VersionStore, db_path: &Path) -> AppResult<()> {
    if !cfg!(debug_assertions) {
        return Err(AppError::new(
            "DEV/RESET_DISABLED",
            "Resetting the local store is only available in development builds",
        ));
    }
    versions.clear()?;
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        match std::fs::remove_file(&name) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AppError::from(err)
                    .with_context("operation", "dev_reset")
                    .with_context("path", Path::new(&name).display().to_string()))
            }
        }
    }
    warn!(
        target: "dayplanner",
        event = "dev_reset",
        path = %db_path.display()
    );
    Ok(())
}

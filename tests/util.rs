#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use dayplanner_lib::version_store::{MemoryVersionStore, VersionMarker, VersionStore};
use dayplanner_lib::{AppError, AppResult};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1")
            .bind(name)
            .fetch_optional(pool)
            .await
            .unwrap();
    exists.is_some()
}

pub async fn columns(pool: &SqlitePool, table: &str) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .bind(table)
        .fetch_all(pool)
        .await
        .unwrap()
}

/// Version store whose writes fail until `heal` is called.
#[derive(Default)]
pub struct FlakyVersionStore {
    inner: MemoryVersionStore,
    healed: AtomicBool,
}

impl FlakyVersionStore {
    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }
}

impl VersionStore for FlakyVersionStore {
    fn read(&self) -> Option<VersionMarker> {
        self.inner.read()
    }

    fn write(&self, marker: &VersionMarker) -> AppResult<()> {
        if !self.healed.load(Ordering::SeqCst) {
            return Err(AppError::new("IO/StorageFull", "quota exceeded"));
        }
        self.inner.write(marker)
    }

    fn clear(&self) -> AppResult<()> {
        self.inner.clear()
    }
}

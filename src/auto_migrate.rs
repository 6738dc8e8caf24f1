//! Startup migration entry point.
//!
//! `Idle -> Checking -> (FastPath | Migrating) -> Idle`. The fast path only
//! compares the stored marker with the running release and never loads the
//! registry. The migrating path selects pending steps, runs them, and only
//! then advances the marker.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::migrate::{run_migrations, MigrationError, MigrationRegistry};
use crate::time::now_utc;
use crate::version::{compare, SemVer};
use crate::version_store::{VersionMarker, VersionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Idle,
    Checking,
    FastPath,
    Migrating,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    pub was_needed: bool,
    /// Marker version before this call; `0.0.0` on a fresh install.
    pub previous_version: SemVer,
    pub current_version: SemVer,
    /// `version name` of every step applied, in order.
    pub applied: Vec<String>,
}

fn enter(phase: MigrationPhase) {
    info!(target: "dayplanner", event = "migration_phase", phase = ?phase);
}

/// Bring the store up to `target`.
///
/// `load_registry` is only called when the marker is absent or differs from
/// `target`. On a runner failure the marker is left untouched, so the next
/// call recomputes and retries the same batch.
pub async fn auto_migrate<F>(
    pool: &SqlitePool,
    versions: &dyn VersionStore,
    load_registry: F,
    target: &SemVer,
) -> Result<MigrationOutcome, MigrationError>
where
    F: FnOnce() -> MigrationRegistry,
{
    enter(MigrationPhase::Checking);
    if !versions.needs_check(target) {
        enter(MigrationPhase::FastPath);
        let current = versions
            .read()
            .map(|m| m.installed_version)
            .unwrap_or(*target);
        info!(
            target: "dayplanner",
            event = "migration_fast_path",
            installed_version = %current
        );
        enter(MigrationPhase::Idle);
        return Ok(MigrationOutcome {
            was_needed: false,
            previous_version: current,
            current_version: current,
            applied: Vec::new(),
        });
    }

    enter(MigrationPhase::Migrating);
    let installed = versions.read().map(|m| m.installed_version);
    let previous = installed.unwrap_or(SemVer::ZERO);
    let registry = load_registry();
    let pending = registry.select_pending(&previous, target);
    info!(
        target: "dayplanner",
        event = "migration_check",
        previous_version = %previous,
        target_version = %target,
        pending = pending.len()
    );

    if pending.is_empty() {
        // The marker only moves forward. A store already marked past this
        // release keeps its marker.
        let current = match installed {
            Some(v) if compare(target, &v).is_le() => {
                warn!(
                    target: "dayplanner",
                    event = "migration_marker_ahead",
                    installed_version = %v,
                    target_version = %target
                );
                v
            }
            _ => {
                write_marker(versions, target)?;
                *target
            }
        };
        enter(MigrationPhase::Idle);
        return Ok(MigrationOutcome {
            was_needed: false,
            previous_version: previous,
            current_version: current,
            applied: Vec::new(),
        });
    }

    if let Err(err) = run_migrations(pool, &pending).await {
        warn!(
            target: "dayplanner",
            event = "migration_batch_aborted",
            previous_version = %previous,
            target_version = %target,
            error = %err
        );
        enter(MigrationPhase::Idle);
        return Err(err);
    }

    write_marker(versions, target)?;
    let applied = pending
        .iter()
        .map(|s| format!("{} {}", s.version, s.name))
        .collect();
    info!(
        target: "dayplanner",
        event = "migration_batch_complete",
        previous_version = %previous,
        current_version = %target
    );
    enter(MigrationPhase::Idle);
    Ok(MigrationOutcome {
        was_needed: true,
        previous_version: previous,
        current_version: *target,
        applied,
    })
}

/// The builtin registry against the running release.
pub async fn migrate_on_startup(
    pool: &SqlitePool,
    versions: &dyn VersionStore,
) -> Result<MigrationOutcome, MigrationError> {
    auto_migrate(pool, versions, MigrationRegistry::builtin, &crate::APP_VERSION).await
}

fn write_marker(versions: &dyn VersionStore, target: &SemVer) -> Result<(), MigrationError> {
    versions
        .write(&VersionMarker::new(*target, now_utc()))
        .map_err(MigrationError::MarkerWrite)
}

//! Versioned schema migrations for the planner store.
//!
//! A [`MigrationRegistry`] is an immutable list of [`MigrationStep`]s. The
//! steps that fall strictly after the installed version and at or before the
//! target version are selected, sorted, and applied one after another by
//! [`run_migrations`]. There are no down-migrations.

use std::fmt;

use futures::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{error, info};

use crate::version::{compare, SemVer};
use crate::AppError;

pub mod steps;

/// Mutation applied by a step. It runs inside the step's own transaction and
/// must be safe to run again against a store that already has its effect.
pub type ApplyFn = for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, anyhow::Result<()>>;

#[derive(Clone, Copy)]
pub struct MigrationStep {
    pub version: SemVer,
    pub name: &'static str,
    pub apply: ApplyFn,
}

impl MigrationStep {
    pub const fn new(version: SemVer, name: &'static str, apply: ApplyFn) -> Self {
        Self {
            version,
            name,
            apply,
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    pub fn new(steps: Vec<MigrationStep>) -> Self {
        Self { steps }
    }

    /// The registry shipped with this build.
    pub fn builtin() -> Self {
        Self::new(steps::BUILTIN.to_vec())
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Highest version any registered step targets.
    pub fn latest_version(&self) -> Option<SemVer> {
        self.steps.iter().map(|s| s.version).max()
    }

    pub fn select_pending(&self, current: &SemVer, target: &SemVer) -> Vec<MigrationStep> {
        select_pending(&self.steps, current, target)
    }
}

/// Steps with `current < version <= target`, ascending by version.
/// Registration order does not matter.
pub fn select_pending(
    all: &[MigrationStep],
    current: &SemVer,
    target: &SemVer,
) -> Vec<MigrationStep> {
    let mut pending: Vec<MigrationStep> = all
        .iter()
        .filter(|step| compare(&step.version, current).is_gt())
        .filter(|step| compare(&step.version, target).is_le())
        .copied()
        .collect();
    pending.sort_by(|a, b| compare(&a.version, &b.version));
    pending
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {version} ({name}) failed: {source:#}")]
    StepFailed {
        version: SemVer,
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("migrations applied but the version marker could not be saved: {0}")]
    MarkerWrite(#[source] AppError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Shown to users when startup migration fails.
pub const MANUAL_INTERVENTION_HINT: &str =
    "The local database could not be upgraded. Export a backup if possible and contact support before continuing.";

impl From<MigrationError> for AppError {
    fn from(error: MigrationError) -> Self {
        let message = error.to_string();
        match error {
            MigrationError::StepFailed {
                version,
                name,
                source,
            } => AppError::new("MIGRATION/STEP_FAILED", message)
                .with_context("version", version.to_string())
                .with_context("name", name)
                .with_context("hint", MANUAL_INTERVENTION_HINT)
                .with_cause(source),
            MigrationError::MarkerWrite(cause) => AppError::new("MIGRATION/MARKER_WRITE", message)
                .with_context("hint", MANUAL_INTERVENTION_HINT)
                .with_cause(cause),
            MigrationError::Database(err) => AppError::new("MIGRATION/DATABASE", message)
                .with_context("hint", MANUAL_INTERVENTION_HINT)
                .with_cause(err),
        }
    }
}

/// Apply `pending` strictly in order. Stops at the first failing step and
/// leaves earlier steps committed. Never touches the version marker.
pub async fn run_migrations(
    pool: &SqlitePool,
    pending: &[MigrationStep],
) -> Result<(), MigrationError> {
    for step in pending {
        info!(
            target: "dayplanner",
            event = "migration_step_begin",
            version = %step.version,
            name = step.name
        );
        let mut tx = pool.begin().await?;
        if let Err(source) = (step.apply)(&mut *tx).await {
            error!(
                target: "dayplanner",
                event = "migration_step_failed",
                version = %step.version,
                name = step.name,
                error = %format!("{source:#}")
            );
            if let Err(rb) = tx.rollback().await {
                error!(target: "dayplanner", event = "migration_rollback_failed", error = %rb);
            }
            return Err(MigrationError::StepFailed {
                version: step.version,
                name: step.name,
                source,
            });
        }
        tx.commit().await?;
        info!(
            target: "dayplanner",
            event = "migration_step_applied",
            version = %step.version,
            name = step.name
        );
    }
    Ok(())
}

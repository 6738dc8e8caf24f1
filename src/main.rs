use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlx::SqlitePool;

use dayplanner_lib::auto_migrate::{migrate_on_startup, MigrationOutcome};
use dayplanner_lib::backup::{self, CURRENT_SCHEMA_VERSION};
use dayplanner_lib::config::AppConfig;
use dayplanner_lib::migrate::{MigrationRegistry, MANUAL_INTERVENTION_HINT};
use dayplanner_lib::version::SemVer;
use dayplanner_lib::version_store::{FileVersionStore, VersionStore};
use dayplanner_lib::{db, logging, time, AppError, APP_VERSION};

#[derive(Debug, Parser)]
#[command(name = "dayplanner", about = "Day planner local store maintenance", version)]
struct Cli {
    /// Data directory holding the database and version marker.
    #[arg(long, value_name = "PATH", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the installed version and any pending schema steps.
    Status {
        /// Emit a JSON object instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Bring the local store up to this release.
    Migrate,
    /// List every registered schema step with its applied/pending state.
    Pending,
    /// Write a JSON backup of all planner tables.
    Export {
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },
    /// Replace all planner tables with the contents of a JSON backup.
    Restore {
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
    /// DEV-ONLY: forget the installed version and delete the local store.
    DevReset,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    let guard = logging::init(&config);
    tracing::debug!(target: "dayplanner", "cli booted");

    let code = match run(cli.command, &config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    drop(guard);
    process::exit(code);
}

async fn run(command: Command, config: &AppConfig) -> Result<i32> {
    let versions = FileVersionStore::new(config.version_marker_path());
    match command {
        Command::Status { json } => status(&versions, json),
        Command::Migrate => {
            let pool = open_pool(&config.db_path()).await?;
            let code = match migrate(&pool, &versions).await {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    0
                }
                Err(code) => code,
            };
            pool.close().await;
            Ok(code)
        }
        Command::Pending => {
            pending(&versions);
            Ok(0)
        }
        Command::Export { out } => {
            let pool = open_pool(&config.db_path()).await?;
            let result = async {
                if let Err(code) = migrate(&pool, &versions).await {
                    return Ok(code);
                }
                let payload = backup::export_backup(&pool).await?;
                backup::write_backup_file(&out, &payload)?;
                println!("Wrote backup to {}", out.display());
                Ok::<_, AppError>(0)
            }
            .await;
            pool.close().await;
            result.map_err(anyhow::Error::from)
        }
        Command::Restore { file } => {
            let raw = backup::read_backup_file(&file)?;
            let pool = open_pool(&config.db_path()).await?;
            let result = async {
                if let Err(code) = migrate(&pool, &versions).await {
                    return Ok(code);
                }
                let report = backup::restore_backup(&pool, raw).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok::<_, AppError>(0)
            }
            .await;
            pool.close().await;
            result.map_err(anyhow::Error::from)
        }
        Command::DevReset => {
            db::dev_reset(&versions, &config.db_path())?;
            println!("Local store reset; next start is a fresh install.");
            Ok(0)
        }
    }
}

async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    db::open_sqlite_pool(db_path)
        .await
        .context("open local store")
}

/// Runs startup migration and prints the failure for the user. `Err` carries
/// the exit code.
async fn migrate(pool: &SqlitePool, versions: &dyn VersionStore) -> Result<MigrationOutcome, i32> {
    match migrate_on_startup(pool, versions).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            let app: AppError = err.into();
            eprintln!("Error: {app}");
            eprintln!("{MANUAL_INTERVENTION_HINT}");
            Err(1)
        }
    }
}

fn status(versions: &dyn VersionStore, as_json: bool) -> Result<i32> {
    let marker = versions.read();
    let installed = marker.as_ref().map(|m| m.installed_version);
    let needs_check = versions.needs_check(&APP_VERSION);
    let registry = MigrationRegistry::builtin();
    let pending: Vec<String> = registry
        .select_pending(&installed.unwrap_or(SemVer::ZERO), &APP_VERSION)
        .iter()
        .map(|s| format!("{} {}", s.version, s.name))
        .collect();

    if as_json {
        let value = json!({
            "installedVersion": installed.map(|v| v.to_string()),
            "migratedAt": marker.as_ref().map(|m| time::to_rfc3339(&m.migrated_at)),
            "targetVersion": APP_VERSION.to_string(),
            "backupSchemaVersion": CURRENT_SCHEMA_VERSION.get(),
            "needsCheck": needs_check,
            "pending": pending,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        match &marker {
            Some(m) => println!(
                "Installed version: {} (migrated {})",
                m.installed_version,
                time::to_rfc3339(&m.migrated_at)
            ),
            None => println!("Installed version: none (fresh install)"),
        }
        println!("Target version:    {}", *APP_VERSION);
        println!("Needs check:       {}", if needs_check { "yes" } else { "no" });
        if pending.is_empty() {
            println!("Pending steps:     none");
        } else {
            println!("Pending steps:");
            for p in &pending {
                println!("  {p}");
            }
        }
    }
    Ok(0)
}

fn pending(versions: &dyn VersionStore) {
    let installed = versions
        .read()
        .map(|m| m.installed_version)
        .unwrap_or(SemVer::ZERO);
    let mut steps = MigrationRegistry::builtin().steps().to_vec();
    steps.sort_by(|a, b| a.version.cmp(&b.version));
    for step in steps {
        let state = if step.version <= installed {
            "applied"
        } else {
            "pending"
        };
        println!("{:<10} {:<8} {}", step.version.to_string(), state, step.name);
    }
}

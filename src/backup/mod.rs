//! JSON backups of the planner tables.
//!
//! A backup is a single JSON document:
//!
//! ```json
//! { "appName": "dayplanner", "appVersion": "0.0.4", "schemaVersion": 4,
//!   "exportTimestamp": "2024-05-01T10:00:00.000Z",
//!   "tables": { "tasks": [], "notes": [], "transactions": [], "settings": [] } }
//! ```
//!
//! Restore always validates the raw document first, upgrades it to the
//! current record shape, and only then replaces table contents in a single
//! transaction.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::version::{SchemaVersion, SemVer};
use crate::{db, time, AppError, AppResult};

pub mod upgrade;

pub use upgrade::{upgrade, CURRENT_SCHEMA_VERSION};

pub const APP_NAME: &str = "dayplanner";

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    pub app_name: String,
    pub app_version: SemVer,
    #[serde(default)]
    pub schema_version: SchemaVersion,
    /// RFC 3339, kept verbatim.
    pub export_timestamp: String,
    pub tables: BackupTables,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupTables {
    pub tasks: Vec<Record>,
    pub notes: Vec<Record>,
    pub transactions: Vec<Record>,
    pub settings: Vec<Record>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BackupTables {
    pub fn get(&self, table: &str) -> Option<&[Record]> {
        match table {
            "tasks" => Some(self.tasks.as_slice()),
            "notes" => Some(self.notes.as_slice()),
            "transactions" => Some(self.transactions.as_slice()),
            "settings" => Some(self.settings.as_slice()),
            _ => None,
        }
    }

    fn get_mut(&mut self, table: &str) -> Option<&mut Vec<Record>> {
        match table {
            "tasks" => Some(&mut self.tasks),
            "notes" => Some(&mut self.notes),
            "transactions" => Some(&mut self.transactions),
            "settings" => Some(&mut self.settings),
            _ => None,
        }
    }
}

struct TableSpec {
    name: &'static str,
    /// Stored as 0/1, exported as JSON booleans.
    bool_columns: &'static [&'static str],
    /// Untyped columns holding any JSON value, stored as JSON text.
    json_columns: &'static [&'static str],
}

impl TableSpec {
    fn is_json_column(&self, column: &str) -> bool {
        self.json_columns.iter().any(|c| *c == column)
    }
}

const TABLES: &[TableSpec] = &[
    TableSpec {
        name: "tasks",
        bool_columns: &["done"],
        json_columns: &[],
    },
    TableSpec {
        name: "notes",
        bool_columns: &["pinned"],
        json_columns: &[],
    },
    TableSpec {
        name: "transactions",
        bool_columns: &[],
        json_columns: &[],
    },
    TableSpec {
        name: "settings",
        bool_columns: &[],
        json_columns: &["value"],
    },
];

pub const TABLE_NAMES: [&str; 4] = ["tasks", "notes", "transactions", "settings"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackupFormatError {
    #[error("backup is not a JSON object")]
    NotAnObject,
    #[error("missing or invalid field `{0}`")]
    InvalidField(&'static str),
    #[error("table `{0}` is missing")]
    MissingTable(&'static str),
    #[error("table `{0}` is not an array")]
    TableNotArray(&'static str),
    #[error("schemaVersion must be a positive integer, found {0}")]
    InvalidSchemaVersion(String),
    #[error("backup could not be decoded: {0}")]
    Decode(String),
}

impl From<BackupFormatError> for AppError {
    fn from(error: BackupFormatError) -> Self {
        AppError::new("BACKUP/INVALID_FORMAT", "The backup file is not in a recognised format")
            .with_context("reason", error.to_string())
    }
}

/// Structural validation of a raw backup document.
///
/// All four tables must be present and be arrays. `schemaVersion` may be
/// absent (treated as 1) but, when present, must be a positive integer.
pub fn parse_backup(raw: Value) -> Result<BackupPayload, BackupFormatError> {
    let root = raw.as_object().ok_or(BackupFormatError::NotAnObject)?;

    if !root.get("appName").is_some_and(Value::is_string) {
        return Err(BackupFormatError::InvalidField("appName"));
    }
    let app_version = root
        .get("appVersion")
        .and_then(Value::as_str)
        .ok_or(BackupFormatError::InvalidField("appVersion"))?;
    if SemVer::parse(app_version).is_err() {
        return Err(BackupFormatError::InvalidField("appVersion"));
    }
    let exported = root
        .get("exportTimestamp")
        .and_then(Value::as_str)
        .ok_or(BackupFormatError::InvalidField("exportTimestamp"))?;
    if DateTime::parse_from_rfc3339(exported).is_err() {
        return Err(BackupFormatError::InvalidField("exportTimestamp"));
    }

    if let Some(v) = root.get("schemaVersion") {
        let ok = v
            .as_u64()
            .is_some_and(|n| n >= 1 && n <= u64::from(u32::MAX));
        if !ok {
            return Err(BackupFormatError::InvalidSchemaVersion(v.to_string()));
        }
    }

    let tables = root
        .get("tables")
        .and_then(Value::as_object)
        .ok_or(BackupFormatError::InvalidField("tables"))?;
    for name in TABLE_NAMES {
        match tables.get(name) {
            None => return Err(BackupFormatError::MissingTable(name)),
            Some(v) if !v.is_array() => return Err(BackupFormatError::TableNotArray(name)),
            Some(_) => {}
        }
    }

    serde_json::from_value(raw).map_err(|err| BackupFormatError::Decode(err.to_string()))
}

pub fn read_backup_file(path: &Path) -> AppResult<Value> {
    let bytes = fs::read(path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "read_backup")
            .with_context("path", path.display().to_string())
    })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "read_backup")
            .with_context("path", path.display().to_string())
    })
}

fn tmp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    final_path.with_file_name(name)
}

/// Write `payload` as pretty JSON. The file only appears once fully written.
pub fn write_backup_file(path: &Path, payload: &BackupPayload) -> AppResult<()> {
    let ctx = |err: AppError| {
        err.with_context("operation", "write_backup")
            .with_context("path", path.display().to_string())
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ctx(e.into()))?;
    }
    let bytes = serde_json::to_vec_pretty(payload).map_err(|e| ctx(e.into()))?;
    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp).map_err(|e| ctx(e.into()))?;
    file.write_all(&bytes).map_err(|e| ctx(e.into()))?;
    file.sync_all().map_err(|e| ctx(e.into()))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| ctx(e.into()))?;
    Ok(())
}

fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn json_path_for_column(column: &str) -> String {
    let escaped = column.replace('\\', "\\\\");
    let escaped = escaped.replace('"', "\\\"");
    let escaped = escaped.replace('\'', "''");
    format!("'$.\"{}\"'", escaped)
}

/// Scalar columns take the SQL value of the field. JSON columns keep the
/// field's JSON text so objects, arrays and booleans survive a round trip.
fn value_expr_for_column(spec: &TableSpec, column: &str) -> String {
    let path = json_path_for_column(column);
    if spec.is_json_column(column) {
        format!("(?1 -> {path})")
    } else {
        format!("json_extract(?1, {path})")
    }
}

/// Undo JSON-text storage. Text that is not JSON predates the convention and
/// is exported as a plain string.
fn decode_json_column(value: &mut Value) {
    let parsed = match value {
        Value::String(text) => serde_json::from_str::<Value>(text).ok(),
        _ => None,
    };
    if let Some(parsed) = parsed {
        *value = parsed;
    }
}

async fn table_columns(conn: &mut SqliteConnection, table: &str) -> AppResult<Vec<String>> {
    let columns: Vec<String> =
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(&mut *conn)
            .await?;
    if columns.is_empty() {
        return Err(AppError::new(
            "BACKUP/TABLE_MISSING",
            "The local store has not been migrated yet",
        )
        .with_context("table", table));
    }
    Ok(columns)
}

/// Read every planner table into a payload stamped with the running release
/// and the current schema version.
pub async fn export_backup(pool: &SqlitePool) -> AppResult<BackupPayload> {
    let mut conn = pool.acquire().await?;
    let mut tables = BackupTables::default();

    for spec in TABLES {
        let columns = table_columns(&mut conn, spec.name).await?;
        let pairs = columns
            .iter()
            .map(|c| format!("'{}', {}", c.replace('\'', "''"), quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT json_object({pairs}) FROM {} ORDER BY rowid",
            quote_ident(spec.name)
        );
        let rows: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&mut *conn).await?;

        let records = tables
            .get_mut(spec.name)
            .ok_or_else(|| AppError::new("BACKUP/UNKNOWN_TABLE", spec.name))?;
        for row in rows {
            let mut record: Record = serde_json::from_str(&row)?;
            for column in spec.bool_columns {
                if let Some(v) = record.get_mut(*column) {
                    if let Some(n) = v.as_i64() {
                        *v = Value::Bool(n != 0);
                    }
                }
            }
            for column in spec.json_columns {
                if let Some(v) = record.get_mut(*column) {
                    decode_json_column(v);
                }
            }
            records.push(record);
        }
    }

    let payload = BackupPayload {
        app_name: APP_NAME.to_string(),
        app_version: *crate::APP_VERSION,
        schema_version: CURRENT_SCHEMA_VERSION,
        export_timestamp: time::to_rfc3339(&time::now_utc()),
        tables,
        extra: Map::new(),
    };
    info!(
        target: "dayplanner",
        event = "backup_export_complete",
        tasks = payload.tables.tasks.len(),
        notes = payload.tables.notes.len(),
        transactions = payload.tables.transactions.len(),
        settings = payload.tables.settings.len()
    );
    Ok(payload)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub source_schema_version: SchemaVersion,
    pub schema_version: SchemaVersion,
    pub tables: BTreeMap<String, u64>,
}

/// Validate, upgrade and load a backup, replacing the four planner tables.
///
/// Nothing is cleared unless the document validates. Record fields without a
/// matching column are not stored.
pub async fn restore_backup(pool: &SqlitePool, raw: Value) -> AppResult<RestoreReport> {
    let payload = parse_backup(raw)?;
    if payload.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(AppError::new(
            "BACKUP/SCHEMA_TOO_NEW",
            "The backup was written by a newer version of the app",
        )
        .with_context("schema_version", payload.schema_version.to_string())
        .with_context("supported", CURRENT_SCHEMA_VERSION.to_string()));
    }
    let source_schema_version = payload.schema_version;
    let upgraded = upgrade(&payload, CURRENT_SCHEMA_VERSION);

    let tables = db::run_in_tx(pool, |tx| {
        Box::pin(async move {
            let mut counts = BTreeMap::new();
            for spec in TABLES {
                let columns = table_columns(tx, spec.name).await?;
                sqlx::query(&format!("DELETE FROM {}", quote_ident(spec.name)))
                    .execute(&mut **tx)
                    .await?;
                let records = upgraded.tables.get(spec.name).unwrap_or_default();
                let mut inserted = 0_u64;
                for record in records {
                    insert_record(tx, spec, &columns, record).await?;
                    inserted += 1;
                }
                counts.insert(spec.name.to_string(), inserted);
            }
            Ok::<_, AppError>(counts)
        })
    })
    .await?;

    info!(
        target: "dayplanner",
        event = "backup_restore_complete",
        source_schema_version = %source_schema_version,
        schema_version = %CURRENT_SCHEMA_VERSION,
        tables = ?tables
    );
    Ok(RestoreReport {
        source_schema_version,
        schema_version: CURRENT_SCHEMA_VERSION,
        tables,
    })
}

async fn insert_record(
    conn: &mut SqliteConnection,
    spec: &TableSpec,
    columns: &[String],
    record: &Record,
) -> AppResult<()> {
    let table = spec.name;
    let known: Vec<&String> = columns.iter().filter(|c| record.contains_key(*c)).collect();
    if known.is_empty() {
        return Err(AppError::new("BACKUP/EMPTY_RECORD", "Backup record has no known fields")
            .with_context("table", table));
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        known
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        known
            .iter()
            .map(|c| value_expr_for_column(spec, c))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let payload = serde_json::to_string(record)?;
    sqlx::query(&sql)
        .bind(payload)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("table", table))?;
    Ok(())
}

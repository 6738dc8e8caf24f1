//! Coded errors returned by the store, migration and backup paths.
//!
//! Codes are `AREA/REASON` strings such as `MIGRATION/STEP_FAILED`,
//! `BACKUP/INVALID_FORMAT` or `DB/NOT_NULL`. Context keys name the table,
//! path or version involved; the cause chain keeps the lower-level error.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde_json::error::Category;
use sqlx::error::ErrorKind;

use crate::version::VersionError;

/// Code for errors that arrive through `anyhow` without one of our own.
const UNCLASSIFIED: &str = "APP/UNCLASSIFIED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    code: String,
    message: String,
    context: BTreeMap<String, String>,
    cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        for (key, value) in &self.context {
            write!(f, "; {key}={value}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Each link of the `anyhow` chain becomes one nested cause. An `AppError`
/// found in the chain is kept whole and ends the walk.
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        let mut links = Vec::new();
        for link in error.chain() {
            if let Some(app) = link.downcast_ref::<AppError>() {
                links.push(app.clone());
                break;
            }
            links.push(AppError::new(UNCLASSIFIED, link.to_string()));
        }
        links
            .into_iter()
            .rev()
            .reduce(|inner, outer| outer.with_cause(inner))
            .unwrap_or_else(|| AppError::new(UNCLASSIFIED, error.to_string()))
    }
}

impl From<io::Error> for AppError {
    fn from(error: io::Error) -> Self {
        let app = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app.with_context("os_code", os_code.to_string()),
            None => app,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        let code = match error.classify() {
            Category::Io => "JSON/IO",
            Category::Syntax => "JSON/SYNTAX",
            Category::Data => "JSON/DATA",
            Category::Eof => "JSON/EOF",
        };
        let app = AppError::new(code, error.to_string());
        if error.line() == 0 {
            return app;
        }
        app.with_context("line", error.line().to_string())
            .with_context("column", error.column().to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(db) => {
                let code = match db.kind() {
                    ErrorKind::NotNullViolation => "DB/NOT_NULL",
                    ErrorKind::UniqueViolation => "DB/UNIQUE",
                    ErrorKind::ForeignKeyViolation => "DB/FOREIGN_KEY",
                    ErrorKind::CheckViolation => "DB/CHECK",
                    _ => "DB/SQLITE",
                };
                let app = AppError::new(code, db.message());
                match db.code() {
                    Some(sqlite_code) => app.with_context("sqlite_code", sqlite_code),
                    None => app,
                }
            }
            sqlx::Error::Io(err) => AppError::from(err).with_context("layer", "sqlite"),
            sqlx::Error::PoolTimedOut => {
                AppError::new("DB/BUSY", "Timed out waiting for the local store")
            }
            sqlx::Error::PoolClosed => AppError::new("DB/CLOSED", "The local store is closed"),
            other => AppError::new("DB/ERROR", other.to_string()),
        }
    }
}

impl From<VersionError> for AppError {
    fn from(error: VersionError) -> Self {
        let VersionError::Invalid { input, .. } = &error;
        let input = input.clone();
        AppError::new("VERSION/INVALID", error.to_string()).with_context("input", input)
    }
}

use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "DAYPLANNER_DATA_DIR";
pub const LOG_FILTER_ENV: &str = "DAYPLANNER_LOG";
pub const DEFAULT_LOG_FILTER: &str = "dayplanner=info,sqlx=warn";

const APP_IDENTIFIER: &str = "com.dayplanner.app";
const DB_FILE_NAME: &str = "dayplanner.sqlite3";

/// Key the version marker lives under, outside the main store.
pub const VERSION_MARKER_KEY: &str = "dayplanner_db_version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub log_filter: String,
}

impl AppConfig {
    /// Resolve configuration from the environment, falling back to the
    /// platform data directory and then the working directory.
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::data_dir().map(|base| base.join(APP_IDENTIFIER)))
            .unwrap_or_else(|| PathBuf::from("."));
        let log_filter =
            std::env::var(LOG_FILTER_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        Self {
            data_dir,
            log_filter,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn version_marker_path(&self) -> PathBuf {
        self.data_dir.join(format!("{VERSION_MARKER_KEY}.json"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

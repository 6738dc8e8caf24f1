//! Persistence for the installed-version marker.
//!
//! The marker lives outside the SQLite store so that migration need can be
//! decided before the store is opened, and so a corrupt store never hides it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::version::SemVer;
use crate::{AppError, AppResult};

/// "Migrations have been applied up to `installed_version`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMarker {
    pub installed_version: SemVer,
    pub migrated_at: DateTime<Utc>,
}

impl VersionMarker {
    pub fn new(installed_version: SemVer, migrated_at: DateTime<Utc>) -> Self {
        Self {
            installed_version,
            migrated_at,
        }
    }
}

pub trait VersionStore: Send + Sync {
    /// Returns the stored marker. Missing or unreadable markers are reported
    /// as `None`, never as an error.
    fn read(&self) -> Option<VersionMarker>;

    /// Replaces the stored marker wholesale.
    fn write(&self, marker: &VersionMarker) -> AppResult<()>;

    /// Removes the marker so the next start looks like a fresh install.
    fn clear(&self) -> AppResult<()>;

    /// True when no marker exists or the installed release differs from
    /// `current`. Plain equality, no ordering.
    fn needs_check(&self, current: &SemVer) -> bool {
        match self.read() {
            Some(marker) => marker.installed_version != *current,
            None => true,
        }
    }
}

/// Marker stored as a flat JSON object in `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        self.path.with_file_name(name)
    }
}

impl VersionStore for FileVersionStore {
    fn read(&self) -> Option<VersionMarker> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(
                    target: "dayplanner",
                    event = "version_marker_read_failed",
                    path = %self.path.display(),
                    error = %err
                );
                return None;
            }
        };
        match serde_json::from_str::<VersionMarker>(&raw) {
            Ok(marker) => Some(marker),
            Err(err) => {
                warn!(
                    target: "dayplanner",
                    event = "version_marker_unparsable",
                    path = %self.path.display(),
                    error = %err
                );
                None
            }
        }
    }

    fn write(&self, marker: &VersionMarker) -> AppResult<()> {
        let with_path = |err: AppError| {
            err.with_context("operation", "version_marker_write")
                .with_context("path", self.path.display().to_string())
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| with_path(e.into()))?;
        }
        let payload = serde_json::to_vec(marker).map_err(|e| with_path(e.into()))?;
        let tmp = self.tmp_path();
        let mut file = fs::File::create(&tmp).map_err(|e| with_path(e.into()))?;
        file.write_all(&payload).map_err(|e| with_path(e.into()))?;
        file.sync_all().map_err(|e| with_path(e.into()))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| with_path(e.into()))?;
        info!(
            target: "dayplanner",
            event = "version_marker_written",
            installed_version = %marker.installed_version,
            path = %self.path.display()
        );
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::from(err)
                .with_context("operation", "version_marker_clear")
                .with_context("path", self.path.display().to_string())),
        }
    }
}

/// Process-local store, used by tests and tooling that should not touch disk.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    marker: Mutex<Option<VersionMarker>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(marker: VersionMarker) -> Self {
        Self {
            marker: Mutex::new(Some(marker)),
        }
    }
}

impl VersionStore for MemoryVersionStore {
    fn read(&self) -> Option<VersionMarker> {
        self.marker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn write(&self, marker: &VersionMarker) -> AppResult<()> {
        *self.marker.lock().unwrap_or_else(|e| e.into_inner()) = Some(marker.clone());
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        *self.marker.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn marker(v: &str) -> VersionMarker {
        VersionMarker::new(SemVer::parse(v).unwrap(), Utc::now())
    }

    #[test]
    fn missing_file_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = FileVersionStore::new(dir.path().join("dayplanner_db_version.json"));
        assert!(store.read().is_none());
        assert!(store.needs_check(&SemVer::new(0, 0, 1)));
    }

    #[test]
    fn garbage_reads_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dayplanner_db_version.json");
        fs::write(&path, "{not json").unwrap();
        let store = FileVersionStore::new(&path);
        assert!(store.read().is_none());

        fs::write(&path, r#"{"installedVersion":"zero","migratedAt":"2024-01-01T00:00:00Z"}"#)
            .unwrap();
        assert!(store.read().is_none());
    }

    #[test]
    fn unreadable_marker_reads_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dayplanner_db_version.json");
        fs::create_dir(&path).unwrap();
        let store = FileVersionStore::new(&path);

        assert!(store.read().is_none());
        assert!(store.needs_check(&SemVer::new(0, 0, 4)));
    }

    #[test]
    fn write_then_read_and_overwrite() {
        let dir = tempdir().unwrap();
        let store = FileVersionStore::new(dir.path().join("nested/marker.json"));
        let first = marker("0.0.1");
        store.write(&first).unwrap();
        assert_eq!(store.read(), Some(first));

        let second = marker("0.0.2");
        store.write(&second).unwrap();
        assert_eq!(store.read(), Some(second));
        assert!(!dir.path().join("nested/marker.json.partial").exists());
    }

    #[test]
    fn marker_is_a_flat_camel_case_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("marker.json");
        let store = FileVersionStore::new(&path);
        store.write(&marker("0.0.2")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["installedVersion"], "0.0.2");
        assert!(raw["migratedAt"].is_string());
        assert_eq!(raw.as_object().unwrap().len(), 2);
    }

    #[test]
    fn needs_check_is_plain_equality() {
        let store = MemoryVersionStore::with_marker(marker("0.0.3"));
        assert!(!store.needs_check(&SemVer::new(0, 0, 3)));
        assert!(store.needs_check(&SemVer::new(0, 0, 4)));
        // An older release also differs, so it still asks for a check.
        assert!(store.needs_check(&SemVer::new(0, 0, 2)));
    }

    #[test]
    fn clear_removes_marker_and_tolerates_absence() {
        let dir = tempdir().unwrap();
        let store = FileVersionStore::new(dir.path().join("marker.json"));
        store.clear().unwrap();
        store.write(&marker("0.0.1")).unwrap();
        store.clear().unwrap();
        assert!(store.read().is_none());
    }
}

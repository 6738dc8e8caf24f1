use once_cell::sync::Lazy;

pub mod auto_migrate;
pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod time;
pub mod version;
pub mod version_store;

pub use error::{AppError, AppResult};
pub use version::{SchemaVersion, SemVer};

/// Release version of this build; the target every startup migrates to.
pub static APP_VERSION: Lazy<SemVer> = Lazy::new(|| {
    SemVer::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|err| {
        // Cargo guarantees a semver package version; a pre-release suffix is
        // the only way to land here.
        tracing::error!(target: "dayplanner", event = "app_version_invalid", error = %err);
        SemVer::ZERO
    })
});

//! Version types and their comparators.
//!
//! Two independent version axes live here: release [`SemVer`]s, which key the
//! live schema migrations, and integer [`SchemaVersion`]s, which describe the
//! record shape inside backup files. They are deliberately not unified.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version `{input}`: {reason}")]
    Invalid { input: String, reason: String },
}

/// A `major.minor.patch` release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const ZERO: SemVer = SemVer::new(0, 0, 0);

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses a plain `major.minor.patch` string. Pre-release and build
    /// suffixes are rejected.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let parsed = semver::Version::parse(input.trim()).map_err(|err| VersionError::Invalid {
            input: input.to_string(),
            reason: err.to_string(),
        })?;
        if !parsed.pre.is_empty() || !parsed.build.is_empty() {
            return Err(VersionError::Invalid {
                input: input.to_string(),
                reason: "pre-release and build metadata are not supported".to_string(),
            });
        }
        Ok(Self::new(parsed.major, parsed.minor, parsed.patch))
    }
}

/// Orders two release versions by major, then minor, then patch.
pub fn compare(a: &SemVer, b: &SemVer) -> Ordering {
    match a.major.cmp(&b.major) {
        Ordering::Equal => {}
        other => return other,
    }
    match a.minor.cmp(&b.minor) {
        Ordering::Equal => {}
        other => return other,
    }
    a.patch.cmp(&b.patch)
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemVer::parse(s)
    }
}

impl Serialize for SemVer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemVer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SemVer::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Shape version of exported backup records. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    /// Assumed for backups written before the field existed.
    pub const INITIAL: SchemaVersion = SchemaVersion(1);

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Orders two backup schema versions.
pub fn compare_schema(a: SchemaVersion, b: SchemaVersion) -> Ordering {
    a.0.cmp(&b.0)
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_schema(*self, *other)
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Configuration version marker parsing and comparison.
//!
//! The generator stamps every server configuration with a comment line of the
//! form `# 2025-01-01 00:00:00 #`. The first line matching that pattern is the
//! configuration's version.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

static TIMESTAMP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#[ \t]*(\d{4}-\d{2}-\d{2})[ \t]+(\d{2}:\d{2}:\d{2})").expect("valid regex")
});

/// Point in time a configuration bundle was generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ConfigTimestamp(NaiveDateTime);

impl ConfigTimestamp {
    /// Seconds since the epoch, reading the marker as wall-clock time of the
    /// generating host. Both sides of a comparison use the same reading.
    pub fn instant(&self) -> i64 {
        self.0.and_utc().timestamp()
    }
}

impl fmt::Display for ConfigTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Extract the version marker from configuration text.
///
/// Only the first matching line is considered; a marker that is not a real
/// calendar instant yields `None` rather than falling through to a later line.
pub fn extract_timestamp(content: &str) -> Option<ConfigTimestamp> {
    let caps = TIMESTAMP_MARKER.captures(content)?;
    let text = format!("{} {}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(ConfigTimestamp)
}

/// Version of the configuration currently installed on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstalledVersion {
    Absent,
    Unstamped,
    Stamped(ConfigTimestamp),
}

impl InstalledVersion {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(InstalledVersion::Absent);
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read installed config: {}", path.display()))?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(match extract_timestamp(&content) {
            Some(ts) => InstalledVersion::Stamped(ts),
            None => InstalledVersion::Unstamped,
        })
    }

    pub fn timestamp(&self) -> Option<ConfigTimestamp> {
        match self {
            InstalledVersion::Stamped(ts) => Some(*ts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionAdvisory {
    /// Installed configuration carries no marker; proceeding anyway
    InstalledTimestampMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDecision {
    Newer { advisory: Option<VersionAdvisory> },
    NotNewer,
}

/// Decide whether the candidate should replace what is installed.
///
/// Only a strictly newer candidate proceeds; equal markers are a no-op.
pub fn compare(candidate: ConfigTimestamp, installed: InstalledVersion) -> VersionDecision {
    match installed {
        InstalledVersion::Absent => VersionDecision::Newer { advisory: None },
        InstalledVersion::Unstamped => VersionDecision::Newer {
            advisory: Some(VersionAdvisory::InstalledTimestampMissing),
        },
        InstalledVersion::Stamped(current) => {
            if candidate.instant() <= current.instant() {
                VersionDecision::NotNewer
            } else {
                VersionDecision::Newer { advisory: None }
            }
        }
    }
}

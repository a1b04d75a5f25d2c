//! Error taxonomy for a deployment run.
//!
//! Every fatal condition maps to a [`Stage`] and a distinct process exit code,
//! so callers never have to interpret a bare success flag.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Step of the reconciliation pipeline an outcome belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Probe,
    Validation,
    Inspect,
    Packages,
    StopService,
    Backup,
    Install,
    Firewall,
    Network,
    StartService,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Probe => "probe",
            Stage::Validation => "validation",
            Stage::Inspect => "inspect",
            Stage::Packages => "packages",
            Stage::StopService => "stop-service",
            Stage::Backup => "backup",
            Stage::Install => "install",
            Stage::Firewall => "firewall",
            Stage::Network => "network",
            Stage::StartService => "start-service",
            Stage::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Host cannot run a deployment at all
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("unsupported host: {0}")]
    UnsupportedHost(String),

    #[error("insufficient privilege: run as root (Linux) or from an elevated prompt (Windows)")]
    InsufficientPrivilege,

    #[error("missing required dependency: {0}")]
    MissingDependency(String),

    #[error("failed to inspect host: {0:#}")]
    Inspect(anyhow::Error),
}

/// Candidate bundle is missing or unusable
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no configuration bundle found at {}", .0.display())]
    BundleNotFound(PathBuf),

    #[error("no timestamp marker found in {}", .0.display())]
    NoTimestampFound(PathBuf),

    #[error("invalid port '{value}' in {}", .path.display())]
    InvalidPort { path: PathBuf, value: String },

    #[error("unsupported protocol '{value}' in {}", .path.display())]
    InvalidProtocol { path: PathBuf, value: String },

    #[error("failed to read {}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract bundle archive {}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

/// Fatal result of a deployment run
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{stage} step failed: {cause:#}")]
    Operational { stage: Stage, cause: anyhow::Error },

    #[error("service '{service}' failed to start: {reason}")]
    ServiceStartFailed { service: String, reason: String },
}

impl DeployError {
    pub fn operational(stage: Stage) -> impl FnOnce(anyhow::Error) -> DeployError {
        move |cause| DeployError::Operational { stage, cause }
    }

    pub fn stage(&self) -> Stage {
        match self {
            DeployError::Environment(_) => Stage::Probe,
            DeployError::Validation(_) => Stage::Validation,
            DeployError::Operational { stage, .. } => *stage,
            DeployError::ServiceStartFailed { .. } => Stage::Verify,
        }
    }

    /// Machine-readable reason code
    pub fn reason_code(&self) -> &'static str {
        match self {
            DeployError::Environment(EnvironmentError::UnsupportedHost(_)) => "unsupported-host",
            DeployError::Environment(EnvironmentError::InsufficientPrivilege) => {
                "insufficient-privilege"
            }
            DeployError::Environment(EnvironmentError::MissingDependency(_)) => {
                "missing-dependency"
            }
            DeployError::Environment(EnvironmentError::Inspect(_)) => "host-inspection-failed",
            DeployError::Validation(ValidationError::BundleNotFound(_)) => "bundle-not-found",
            DeployError::Validation(ValidationError::NoTimestampFound(_)) => "no-timestamp-found",
            DeployError::Validation(_) => "invalid-bundle",
            DeployError::Operational { .. } => "operational-error",
            DeployError::ServiceStartFailed { .. } => "service-start-failed",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            DeployError::Environment(_) => 2,
            DeployError::Validation(_) => 3,
            DeployError::Operational { .. } => 4,
            DeployError::ServiceStartFailed { .. } => 5,
        }
    }
}

//! Host platform variants.
//!
//! Each variant bundles the probe, package, service, firewall and network
//! capabilities of one kind of host. The orchestrator only ever talks to the
//! [`HostPlatform`] trait.

mod linux;
mod windows;

pub use linux::{Firewalld, LinuxPlatform, Systemd};
pub use windows::{NetshFirewall, WindowsPlatform, WindowsServices};

use crate::config::DeployConfig;
use crate::error::EnvironmentError;
use crate::exec::CommandExecutor;
use crate::firewall::Firewall;
use crate::probe::EnvironmentProfile;
use crate::service::ServiceManager;
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Linux,
    Windows,
}

impl PlatformKind {
    /// Platform this binary was built for
    pub fn detect() -> Self {
        if cfg!(windows) {
            PlatformKind::Windows
        } else {
            PlatformKind::Linux
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Linux => f.write_str("linux"),
            PlatformKind::Windows => f.write_str("windows"),
        }
    }
}

/// Capabilities of the host being deployed to
pub trait HostPlatform {
    fn kind(&self) -> PlatformKind;

    /// Establish that the host can run a deployment
    fn probe(&self) -> Result<EnvironmentProfile, EnvironmentError>;

    /// Install the VPN software if it is missing
    fn ensure_packages(&self, profile: &EnvironmentProfile) -> Result<()>;

    fn services(&self) -> &dyn ServiceManager;

    fn firewall(&self) -> &dyn Firewall;

    /// Routing prerequisites beyond the firewall rule
    fn prepare_network(&self) -> Result<()>;
}

/// Construct the platform variant for `kind`
pub fn build(
    kind: PlatformKind,
    exec: Rc<dyn CommandExecutor>,
    config: &DeployConfig,
    dry_run: bool,
) -> Box<dyn HostPlatform> {
    match kind {
        PlatformKind::Linux => Box::new(LinuxPlatform::new(exec, config, dry_run)),
        PlatformKind::Windows => Box::new(WindowsPlatform::new(exec, config)),
    }
}

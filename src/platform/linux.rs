use super::{HostPlatform, PlatformKind};
use crate::config::DeployConfig;
use crate::error::EnvironmentError;
use crate::exec::CommandExecutor;
use crate::firewall::{Firewall, OpenPorts, PortRule};
use crate::probe::{self, EnvironmentProfile, LinuxProbe};
use crate::service::{ServiceManager, ServiceState};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::rc::Rc;

const OS_RELEASE: &str = "/etc/os-release";
const SELINUX_CONFIG: &str = "/etc/selinux/config";
const OPENVPN_PACKAGE: &str = "openvpn";

/// systemd + firewalld host
pub struct LinuxPlatform {
    exec: Rc<dyn CommandExecutor>,
    services: Systemd,
    firewall: Firewalld,
    os_release: PathBuf,
    selinux_config: PathBuf,
    dry_run: bool,
}

impl LinuxPlatform {
    pub fn new(exec: Rc<dyn CommandExecutor>, config: &DeployConfig, dry_run: bool) -> Self {
        Self {
            services: Systemd::new(exec.clone(), &config.service.name),
            firewall: Firewalld::new(exec.clone()),
            exec,
            os_release: PathBuf::from(OS_RELEASE),
            selinux_config: PathBuf::from(SELINUX_CONFIG),
            dry_run,
        }
    }
}

impl HostPlatform for LinuxPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Linux
    }

    fn probe(&self) -> Result<EnvironmentProfile, EnvironmentError> {
        probe::probe_linux(
            self.exec.as_ref(),
            &LinuxProbe {
                os_release: &self.os_release,
                selinux_config: &self.selinux_config,
                dry_run: self.dry_run,
            },
        )
    }

    fn ensure_packages(&self, profile: &EnvironmentProfile) -> Result<()> {
        if self.exec.check_command_exists(OPENVPN_PACKAGE) {
            tracing::debug!("openvpn already installed");
            return Ok(());
        }
        let manager = profile
            .package_manager
            .context("No supported package manager found. Please install openvpn manually.")?;
        tracing::info!(
            package_manager = manager.display_name(),
            "installing openvpn"
        );
        manager.install_packages(self.exec.as_ref(), &[OPENVPN_PACKAGE])?;
        Ok(())
    }

    fn services(&self) -> &dyn ServiceManager {
        &self.services
    }

    fn firewall(&self) -> &dyn Firewall {
        &self.firewall
    }

    fn prepare_network(&self) -> Result<()> {
        Ok(())
    }
}

/// A systemd unit driven through `systemctl`
pub struct Systemd {
    exec: Rc<dyn CommandExecutor>,
    unit: String,
}

impl Systemd {
    pub fn new(exec: Rc<dyn CommandExecutor>, unit: &str) -> Self {
        Self {
            exec,
            unit: unit.to_string(),
        }
    }

    fn systemctl(&self, verb: &str) -> Result<()> {
        self.exec
            .execute_checked("systemctl", &[verb, &self.unit])
            .with_context(|| format!("Failed to {} {}", verb, self.unit))?;
        Ok(())
    }
}

impl ServiceManager for Systemd {
    fn name(&self) -> &str {
        &self.unit
    }

    fn state(&self) -> Result<ServiceState> {
        // is-active exits non-zero for anything but "active"; its stdout still names the state
        let active = self.exec.execute("systemctl", &["is-active", &self.unit])?;
        match active.stdout_trimmed() {
            "active" | "reloading" => return Ok(ServiceState::Running),
            "activating" => return Ok(ServiceState::Starting),
            "failed" => return Ok(ServiceState::Failed),
            "inactive" | "deactivating" => {}
            _ => return Ok(ServiceState::Unknown),
        }

        let enabled = self.exec.execute("systemctl", &["is-enabled", &self.unit])?;
        Ok(match enabled.stdout_trimmed() {
            "enabled" | "enabled-runtime" => ServiceState::Enabled,
            "disabled" | "masked" => ServiceState::Disabled,
            _ => ServiceState::Stopped,
        })
    }

    fn stop(&self) -> Result<()> {
        self.systemctl("stop")
    }

    fn disable_autostart(&self) -> Result<()> {
        self.systemctl("disable")
    }

    fn enable_autostart(&self) -> Result<()> {
        self.systemctl("enable")
    }

    fn start(&self) -> Result<()> {
        self.systemctl("start")
    }

    fn restart(&self) -> Result<()> {
        self.systemctl("restart")
    }
}

/// firewalld default zone driven through `firewall-cmd`
pub struct Firewalld {
    exec: Rc<dyn CommandExecutor>,
}

impl Firewalld {
    pub fn new(exec: Rc<dyn CommandExecutor>) -> Self {
        Self { exec }
    }
}

impl Firewall for Firewalld {
    fn open_ports(&self) -> Result<Vec<OpenPorts>> {
        let output = self
            .exec
            .execute_checked("firewall-cmd", &["--list-ports"])
            .context("Failed to list firewalld ports (is firewalld running?)")?;
        Ok(output
            .stdout
            .split_whitespace()
            .filter_map(OpenPorts::parse)
            .collect())
    }

    fn add_persistent(&self, rule: PortRule) -> Result<()> {
        let arg = format!("--add-port={}", rule);
        self.exec
            .execute_checked("firewall-cmd", &["--permanent", &arg])
            .with_context(|| format!("Failed to add firewalld rule {}", rule))?;
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.exec
            .execute_checked("firewall-cmd", &["--reload"])
            .context("Failed to reload firewalld")?;
        Ok(())
    }
}

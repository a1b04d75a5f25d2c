//! Host capability detection.
//!
//! Probing gates every run: each failure is terminal and nothing on the host
//! is changed before it passes. The one exception is the SELinux downgrade on
//! RHEL-family hosts, which is part of preparing the host and is skipped in
//! dry-run mode.

use crate::error::EnvironmentError;
use crate::exec::CommandExecutor;
use crate::platform::PlatformKind;
use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static SELINUX_ENFORCING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^SELINUX=enforcing[ \t]*$").expect("valid regex"));

const LINUX_DEPENDENCIES: &[&str] = &["systemctl", "firewall-cmd"];
const WINDOWS_DEPENDENCIES: &[&str] = &["powershell", "schtasks", "reg", "netsh"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
}

impl PackageManager {
    /// Install packages non-interactively
    pub fn install_packages(
        &self,
        exec: &dyn CommandExecutor,
        packages: &[&str],
    ) -> anyhow::Result<()> {
        match self {
            PackageManager::Apt => {
                exec.execute_checked("apt-get", &["update"])?;
                let mut args = vec!["install", "-y"];
                args.extend(packages.iter().copied());
                exec.execute_checked("apt-get", &args)?;
            }
            PackageManager::Dnf | PackageManager::Yum => {
                let program = if *self == PackageManager::Dnf { "dnf" } else { "yum" };
                let mut args = vec!["install", "-y"];
                args.extend(packages.iter().copied());
                exec.execute_checked(program, &args)?;
            }
        }
        Ok(())
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt (Debian/Ubuntu)",
            PackageManager::Dnf => "dnf (Fedora/RHEL)",
            PackageManager::Yum => "yum (RHEL/CentOS)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinuxFamily {
    Debian,
    RedHat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub id: String,
    pub family: LinuxFamily,
}

/// What the host offers, as established by a successful probe
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentProfile {
    pub platform: PlatformKind,
    pub distribution: Option<Distribution>,
    pub package_manager: Option<PackageManager>,
    /// Non-fatal findings worth telling the operator about
    pub advisories: Vec<String>,
}

fn os_release_value<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let (k, v) = line.trim().split_once('=')?;
        (k == key).then(|| v.trim().trim_matches(|c| c == '"' || c == '\''))
    })
}

/// Determine the distribution family from `/etc/os-release` content
pub fn classify_distribution(os_release: &str) -> Result<Distribution, EnvironmentError> {
    let id = os_release_value(os_release, "ID").unwrap_or("").to_ascii_lowercase();
    let like = os_release_value(os_release, "ID_LIKE")
        .unwrap_or("")
        .to_ascii_lowercase();

    let family_of = |token: &str| match token {
        "debian" | "ubuntu" => Some(LinuxFamily::Debian),
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" => Some(LinuxFamily::RedHat),
        _ => None,
    };

    let family = std::iter::once(id.as_str())
        .chain(like.split_whitespace())
        .find_map(family_of);

    match family {
        Some(family) => Ok(Distribution { id, family }),
        None if id.is_empty() => Err(EnvironmentError::UnsupportedHost(
            "cannot identify Linux distribution (no ID in os-release)".to_string(),
        )),
        None => Err(EnvironmentError::UnsupportedHost(format!(
            "unsupported Linux distribution '{}'",
            id
        ))),
    }
}

/// Paths the Linux probe reads, overridable for tests
#[derive(Debug, Clone)]
pub struct LinuxProbe<'a> {
    pub os_release: &'a Path,
    pub selinux_config: &'a Path,
    pub dry_run: bool,
}

pub fn probe_linux(
    exec: &dyn CommandExecutor,
    paths: &LinuxProbe<'_>,
) -> Result<EnvironmentProfile, EnvironmentError> {
    if !exec.check_command_exists("systemctl") {
        return Err(EnvironmentError::UnsupportedHost(
            "systemd (systemctl) is required".to_string(),
        ));
    }
    require_privilege(exec)?;
    require_commands(exec, LINUX_DEPENDENCIES)?;

    let os_release = fs::read_to_string(paths.os_release)
        .with_context(|| format!("Failed to read {}", paths.os_release.display()))
        .map_err(EnvironmentError::Inspect)?;
    let distribution = classify_distribution(&os_release)?;

    let package_manager = match distribution.family {
        LinuxFamily::Debian => PackageManager::Apt,
        LinuxFamily::RedHat if exec.check_command_exists("dnf") => PackageManager::Dnf,
        LinuxFamily::RedHat => PackageManager::Yum,
    };
    tracing::debug!(
        distro = %distribution.id,
        package_manager = package_manager.display_name(),
        "classified host"
    );

    let mut advisories = Vec::new();
    if distribution.family == LinuxFamily::RedHat {
        relax_selinux(exec, paths.selinux_config, paths.dry_run, &mut advisories)
            .map_err(EnvironmentError::Inspect)?;
    }

    Ok(EnvironmentProfile {
        platform: PlatformKind::Linux,
        distribution: Some(distribution),
        package_manager: Some(package_manager),
        advisories,
    })
}

/// Put SELinux into permissive mode now and across reboots.
///
/// Already permissive or disabled hosts are left alone.
fn relax_selinux(
    exec: &dyn CommandExecutor,
    config_path: &Path,
    dry_run: bool,
    advisories: &mut Vec<String>,
) -> anyhow::Result<()> {
    if !exec.check_command_exists("getenforce") {
        tracing::debug!("getenforce not available, skipping SELinux check");
        return Ok(());
    }

    let mode = exec.execute("getenforce", &[])?;
    if mode.stdout_trimmed().eq_ignore_ascii_case("enforcing") {
        if dry_run {
            advisories.push("SELinux is enforcing and would be set to permissive".to_string());
        } else {
            exec.execute_checked("setenforce", &["0"])?;
            advisories.push("SELinux switched to permissive for this boot".to_string());
        }
    }

    if !config_path.exists() {
        return Ok(());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    if !SELINUX_ENFORCING.is_match(&content) {
        return Ok(());
    }
    if dry_run {
        advisories.push(format!(
            "{} would be changed to SELINUX=permissive",
            config_path.display()
        ));
        return Ok(());
    }

    let updated = SELINUX_ENFORCING.replace_all(&content, "SELINUX=permissive");
    fs::write(config_path, updated.as_bytes())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    advisories.push(format!(
        "SELINUX=permissive written to {}; reboot recommended",
        config_path.display()
    ));
    Ok(())
}

pub fn probe_windows(exec: &dyn CommandExecutor) -> Result<EnvironmentProfile, EnvironmentError> {
    if !exec.check_command_exists("powershell") {
        return Err(EnvironmentError::UnsupportedHost(
            "PowerShell service cmdlets are required".to_string(),
        ));
    }
    require_privilege(exec)?;
    require_commands(exec, WINDOWS_DEPENDENCIES)?;

    Ok(EnvironmentProfile {
        platform: PlatformKind::Windows,
        distribution: None,
        package_manager: None,
        advisories: Vec::new(),
    })
}

fn require_privilege(exec: &dyn CommandExecutor) -> Result<(), EnvironmentError> {
    match exec.is_privileged() {
        Ok(true) => Ok(()),
        Ok(false) => Err(EnvironmentError::InsufficientPrivilege),
        Err(e) => Err(EnvironmentError::Inspect(e)),
    }
}

fn require_commands(exec: &dyn CommandExecutor, commands: &[&str]) -> Result<(), EnvironmentError> {
    match commands.iter().find(|c| !exec.check_command_exists(c)) {
        Some(missing) => Err(EnvironmentError::MissingDependency(missing.to_string())),
        None => Ok(()),
    }
}

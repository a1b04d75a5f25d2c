use super::{HostPlatform, PlatformKind};
use crate::bundle::Transport;
use crate::config::DeployConfig;
use crate::error::EnvironmentError;
use crate::exec::{CommandExecutor, CommandOutput};
use crate::firewall::{Firewall, OpenPorts, PortRule};
use crate::probe::{self, EnvironmentProfile};
use crate::service::{ServiceManager, ServiceState};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

const TCPIP_PARAMETERS: &str = r"HKLM\SYSTEM\CurrentControlSet\Services\Tcpip\Parameters";

/// Quote a value for a single-quoted PowerShell string
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn powershell(exec: &dyn CommandExecutor, script: &str) -> Result<CommandOutput> {
    exec.execute(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
    )
}

fn powershell_checked(exec: &dyn CommandExecutor, script: &str) -> Result<CommandOutput> {
    exec.execute_checked(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
    )
}

fn query_service_status(exec: &dyn CommandExecutor, name: &str) -> Result<ServiceState> {
    let script = format!(
        "(Get-Service -Name {} -ErrorAction Stop).Status",
        ps_quote(name)
    );
    let output = powershell(exec, &script)?;
    if !output.success() {
        return Ok(ServiceState::Unknown);
    }
    Ok(match output.stdout_trimmed() {
        "Running" => ServiceState::Running,
        "StartPending" => ServiceState::Starting,
        "Stopped" => ServiceState::Stopped,
        _ => ServiceState::Unknown,
    })
}

/// Windows host with the OpenVPN service, a boot task and netsh firewall
pub struct WindowsPlatform {
    exec: Rc<dyn CommandExecutor>,
    services: WindowsServices,
    firewall: NetshFirewall,
    routing_service: String,
}

impl WindowsPlatform {
    pub fn new(exec: Rc<dyn CommandExecutor>, config: &DeployConfig) -> Self {
        Self {
            services: WindowsServices::new(exec.clone(), config),
            firewall: NetshFirewall::new(exec.clone(), &config.firewall.rule_prefix),
            routing_service: config.service.routing_service.clone(),
            exec,
        }
    }
}

impl HostPlatform for WindowsPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Windows
    }

    fn probe(&self) -> Result<EnvironmentProfile, EnvironmentError> {
        probe::probe_windows(self.exec.as_ref())
    }

    fn ensure_packages(&self, _profile: &EnvironmentProfile) -> Result<()> {
        Ok(())
    }

    fn services(&self) -> &dyn ServiceManager {
        &self.services
    }

    fn firewall(&self) -> &dyn Firewall {
        &self.firewall
    }

    /// Enable IP forwarding and the routing service so clients reach the LAN
    fn prepare_network(&self) -> Result<()> {
        let exec = self.exec.as_ref();
        exec.execute_checked(
            "reg",
            &[
                "add",
                TCPIP_PARAMETERS,
                "/v",
                "IPEnableRouter",
                "/t",
                "REG_DWORD",
                "/d",
                "1",
                "/f",
            ],
        )
        .context("Failed to enable IP routing")?;
        tracing::info!("enabled IP routing");

        if self.routing_service.is_empty() {
            return Ok(());
        }
        let name = ps_quote(&self.routing_service);
        powershell_checked(
            exec,
            &format!("Set-Service -Name {} -StartupType Automatic", name),
        )
        .with_context(|| format!("Failed to set {} to automatic", self.routing_service))?;

        if !query_service_status(exec, &self.routing_service)?.is_running() {
            powershell_checked(exec, &format!("Start-Service -Name {}", name))
                .with_context(|| format!("Failed to start {}", self.routing_service))?;
        }
        tracing::info!(service = %self.routing_service, "routing service running");
        Ok(())
    }
}

/// The OpenVPN Windows service plus its boot-time scheduled task
pub struct WindowsServices {
    exec: Rc<dyn CommandExecutor>,
    name: String,
    task: String,
    launcher: PathBuf,
    install_dir: PathBuf,
    config_file: String,
    openvpn_exe: PathBuf,
}

impl WindowsServices {
    pub fn new(exec: Rc<dyn CommandExecutor>, config: &DeployConfig) -> Self {
        Self {
            exec,
            name: config.service.name.clone(),
            task: config.service.boot_task.clone(),
            launcher: config.install_dir.join(&config.service.launcher),
            install_dir: config.install_dir.clone(),
            config_file: config.config_file.clone(),
            openvpn_exe: config.service.openvpn_exe.clone(),
        }
    }

    fn cmdlet(&self, verb: &str, extra: &str) -> Result<()> {
        let script = format!("{}-Service -Name {}{}", verb, ps_quote(&self.name), extra);
        powershell_checked(self.exec.as_ref(), &script)
            .with_context(|| format!("Failed to {} service {}", verb.to_lowercase(), self.name))?;
        Ok(())
    }

    /// Batch file the boot task runs; it leaves a running service alone
    fn launcher_script(&self) -> String {
        format!(
            "@echo off\r\n\
             sc query \"{service}\" | find \"RUNNING\" >nul && exit /b 0\r\n\
             cd /d \"{dir}\"\r\n\
             \"{exe}\" --config \"{config}\"\r\n",
            service = self.name,
            dir = self.install_dir.display(),
            exe = self.openvpn_exe.display(),
            config = self.config_file,
        )
    }

    fn install_boot_task(&self) -> Result<()> {
        if self.task.is_empty() {
            return Ok(());
        }
        fs::write(&self.launcher, self.launcher_script())
            .with_context(|| format!("Failed to write launcher: {}", self.launcher.display()))?;

        // A stale task from an earlier deployment may or may not exist
        let deleted = self
            .exec
            .execute("schtasks", &["/Delete", "/TN", &self.task, "/F"])?;
        if !deleted.success() {
            tracing::debug!(task = %self.task, "no existing boot task to delete");
        }

        let action = format!("\"{}\"", self.launcher.display());
        self.exec
            .execute_checked(
                "schtasks",
                &[
                    "/Create", "/TN", &self.task, "/TR", &action, "/SC", "ONSTART", "/RU",
                    "SYSTEM", "/RL", "HIGHEST", "/F",
                ],
            )
            .with_context(|| format!("Failed to create boot task '{}'", self.task))?;
        Ok(())
    }
}

impl ServiceManager for WindowsServices {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> Result<ServiceState> {
        query_service_status(self.exec.as_ref(), &self.name)
    }

    fn stop(&self) -> Result<()> {
        self.cmdlet("Stop", " -Force")
    }

    fn disable_autostart(&self) -> Result<()> {
        self.cmdlet("Set", " -StartupType Manual")?;
        if !self.task.is_empty() {
            let disabled = self
                .exec
                .execute("schtasks", &["/Change", "/TN", &self.task, "/DISABLE"])?;
            if !disabled.success() {
                tracing::debug!(task = %self.task, "no boot task to disable");
            }
        }
        Ok(())
    }

    fn enable_autostart(&self) -> Result<()> {
        self.cmdlet("Set", " -StartupType Automatic")?;
        self.install_boot_task()
    }

    fn start(&self) -> Result<()> {
        self.cmdlet("Start", "")
    }

    fn restart(&self) -> Result<()> {
        self.cmdlet("Restart", " -Force")
    }
}

/// Windows Defender Firewall driven through `netsh advfirewall`
pub struct NetshFirewall {
    exec: Rc<dyn CommandExecutor>,
    prefix: String,
}

impl NetshFirewall {
    pub fn new(exec: Rc<dyn CommandExecutor>, prefix: &str) -> Self {
        Self {
            exec,
            prefix: prefix.to_string(),
        }
    }

    pub fn rule_name(&self, rule: PortRule) -> String {
        format!("{}-{}-{}", self.prefix, rule.port, rule.protocol)
    }
}

#[derive(Default)]
struct RuleBlock {
    enabled: bool,
    inbound: bool,
    allow: bool,
    protocol: Option<Transport>,
    ports: Vec<(u16, u16)>,
}

impl RuleBlock {
    fn into_open_ports(self) -> Vec<OpenPorts> {
        let Some(protocol) = self.protocol else {
            return Vec::new();
        };
        if !(self.enabled && self.inbound && self.allow) {
            return Vec::new();
        }
        self.ports
            .into_iter()
            .map(|(start, end)| OpenPorts {
                start,
                end,
                protocol,
            })
            .collect()
    }
}

/// Extract enabled inbound allow rules from `netsh advfirewall firewall show rule` output
fn parse_netsh_rules(output: &str) -> Vec<OpenPorts> {
    let mut open = Vec::new();
    let mut current: Option<RuleBlock> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Rule Name" => {
                if let Some(block) = current.take() {
                    open.extend(block.into_open_ports());
                }
                current = Some(RuleBlock::default());
            }
            "Enabled" => {
                if let Some(b) = current.as_mut() {
                    b.enabled = value.eq_ignore_ascii_case("yes");
                }
            }
            "Direction" => {
                if let Some(b) = current.as_mut() {
                    b.inbound = value.eq_ignore_ascii_case("in");
                }
            }
            "Action" => {
                if let Some(b) = current.as_mut() {
                    b.allow = value.eq_ignore_ascii_case("allow");
                }
            }
            "Protocol" => {
                if let Some(b) = current.as_mut() {
                    b.protocol = Transport::parse(value);
                }
            }
            "LocalPort" => {
                if let Some(b) = current.as_mut() {
                    b.ports = value.split(',').filter_map(parse_port_span).collect();
                }
            }
            _ => {}
        }
    }
    if let Some(block) = current {
        open.extend(block.into_open_ports());
    }
    open
}

fn parse_port_span(token: &str) -> Option<(u16, u16)> {
    let token = token.trim();
    match token.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let port = token.parse().ok()?;
            Some((port, port))
        }
    }
}

impl Firewall for NetshFirewall {
    fn open_ports(&self) -> Result<Vec<OpenPorts>> {
        let output = self
            .exec
            .execute_checked(
                "netsh",
                &["advfirewall", "firewall", "show", "rule", "name=all", "dir=in"],
            )
            .context("Failed to list Windows firewall rules")?;
        Ok(parse_netsh_rules(&output.stdout))
    }

    fn add_persistent(&self, rule: PortRule) -> Result<()> {
        let name = format!("name={}", self.rule_name(rule));
        let protocol = format!("protocol={}", rule.protocol.as_str().to_uppercase());
        let port = format!("localport={}", rule.port);
        self.exec
            .execute_checked(
                "netsh",
                &[
                    "advfirewall",
                    "firewall",
                    "add",
                    "rule",
                    &name,
                    "dir=in",
                    "action=allow",
                    &protocol,
                    &port,
                ],
            )
            .with_context(|| format!("Failed to add firewall rule {}", rule))?;
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        // netsh rules are active as soon as they are added
        Ok(())
    }
}

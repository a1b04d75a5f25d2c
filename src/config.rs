use crate::bundle::Transport;
use crate::platform::PlatformKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "ovpn-deploy";
const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "OVPN_DEPLOY_";

/// Which protocol the firewall rule is opened for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPolicy {
    /// Mirror the configuration's `proto` directive
    #[default]
    Declared,
    Udp,
    Tcp,
}

impl ProtocolPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "declared" => Some(ProtocolPolicy::Declared),
            "udp" => Some(ProtocolPolicy::Udp),
            "tcp" => Some(ProtocolPolicy::Tcp),
            _ => None,
        }
    }

    pub fn resolve(&self, declared: Transport) -> Transport {
        match self {
            ProtocolPolicy::Declared => declared,
            ProtocolPolicy::Udp => Transport::Udp,
            ProtocolPolicy::Tcp => Transport::Tcp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSettings {
    /// VPN service (systemd unit or Windows service name)
    pub name: String,
    /// Windows only: boot-time scheduled task
    pub boot_task: String,
    /// Windows only: launcher script written into the install directory
    pub launcher: String,
    /// Windows only: OpenVPN executable the launcher invokes
    pub openvpn_exe: PathBuf,
    /// Windows only: routing service enabled alongside IP forwarding
    pub routing_service: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirewallSettings {
    pub protocol: ProtocolPolicy,
    /// Windows only: prefix for created rule names
    pub rule_prefix: String,
}

/// Deployment settings for one host
#[derive(Debug, Clone, Serialize)]
pub struct DeployConfig {
    pub install_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub config_file: String,
    pub routes_dir: String,
    pub pool_file: String,
    pub log_files: Vec<String>,
    pub service: ServiceSettings,
    pub firewall: FirewallSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    install_dir: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    config_file: Option<String>,
    routes_dir: Option<String>,
    pool_file: Option<String>,
    log_files: Option<Vec<String>>,
    service: Option<ServiceFile>,
    firewall: Option<FirewallFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceFile {
    name: Option<String>,
    boot_task: Option<String>,
    launcher: Option<String>,
    openvpn_exe: Option<PathBuf>,
    routing_service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FirewallFile {
    protocol: Option<ProtocolPolicy>,
    rule_prefix: Option<String>,
}

impl DeployConfig {
    pub fn defaults(kind: PlatformKind) -> Self {
        let common_logs = vec!["openvpn.log".to_string(), "openvpn-status.log".to_string()];
        match kind {
            PlatformKind::Linux => Self {
                install_dir: PathBuf::from("/etc/openvpn/server"),
                backup_dir: PathBuf::from("/etc/openvpn/server_backups"),
                config_file: "server.conf".to_string(),
                routes_dir: "ccd".to_string(),
                pool_file: "ipp.txt".to_string(),
                log_files: common_logs,
                service: ServiceSettings {
                    name: "openvpn-server@server".to_string(),
                    boot_task: String::new(),
                    launcher: String::new(),
                    openvpn_exe: PathBuf::from("/usr/sbin/openvpn"),
                    routing_service: String::new(),
                },
                firewall: FirewallSettings {
                    protocol: ProtocolPolicy::Declared,
                    rule_prefix: String::new(),
                },
            },
            PlatformKind::Windows => Self {
                install_dir: PathBuf::from(r"C:\Program Files\OpenVPN\config\server"),
                backup_dir: PathBuf::from(r"C:\Program Files\OpenVPN\config\server_backups"),
                config_file: "server.ovpn".to_string(),
                routes_dir: "ccd".to_string(),
                pool_file: "ipp.txt".to_string(),
                log_files: common_logs,
                service: ServiceSettings {
                    name: "OpenVPNService".to_string(),
                    boot_task: "OpenVPN Server".to_string(),
                    launcher: "start_openvpn.bat".to_string(),
                    openvpn_exe: PathBuf::from(r"C:\Program Files\OpenVPN\bin\openvpn.exe"),
                    routing_service: "RemoteAccess".to_string(),
                },
                firewall: FirewallSettings {
                    protocol: ProtocolPolicy::Declared,
                    rule_prefix: "OpenVPN".to_string(),
                },
            },
        }
    }

    /// Where the config file lives when `--config` is not given
    pub fn default_path(kind: PlatformKind) -> PathBuf {
        match kind {
            PlatformKind::Linux => Path::new("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
            PlatformKind::Windows => {
                let base = std::env::var("ProgramData")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(r"C:\ProgramData"));
                base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
            }
        }
    }

    /// Build the effective configuration: platform defaults, then the config
    /// file, then `OVPN_DEPLOY_*` environment variables (a `.env` file in the
    /// working directory is honoured).
    ///
    /// An explicitly given file must exist; the default location is optional.
    pub fn load(kind: PlatformKind, explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::defaults(kind);

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Some(Self::default_path(kind)).filter(|p| p.exists()),
        };

        if let Some(path) = path {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            config
                .merge_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config file");
        }

        dotenv::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(content)?;

        if let Some(v) = file.install_dir {
            self.install_dir = v;
        }
        if let Some(v) = file.backup_dir {
            self.backup_dir = v;
        }
        if let Some(v) = file.config_file {
            self.config_file = v;
        }
        if let Some(v) = file.routes_dir {
            self.routes_dir = v;
        }
        if let Some(v) = file.pool_file {
            self.pool_file = v;
        }
        if let Some(v) = file.log_files {
            self.log_files = v;
        }
        if let Some(service) = file.service {
            if let Some(v) = service.name {
                self.service.name = v;
            }
            if let Some(v) = service.boot_task {
                self.service.boot_task = v;
            }
            if let Some(v) = service.launcher {
                self.service.launcher = v;
            }
            if let Some(v) = service.openvpn_exe {
                self.service.openvpn_exe = v;
            }
            if let Some(v) = service.routing_service {
                self.service.routing_service = v;
            }
        }
        if let Some(firewall) = file.firewall {
            if let Some(v) = firewall.protocol {
                self.firewall.protocol = v;
            }
            if let Some(v) = firewall.rule_prefix {
                self.firewall.rule_prefix = v;
            }
        }
        Ok(())
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("INSTALL_DIR") {
            self.install_dir = PathBuf::from(v);
        }
        if let Some(v) = var("BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SERVICE") {
            self.service.name = v;
        }
        if let Some(v) = var("FIREWALL_PROTOCOL") {
            self.firewall.protocol = ProtocolPolicy::parse(&v).with_context(|| {
                format!(
                    "{}FIREWALL_PROTOCOL must be declared, udp or tcp (got '{}')",
                    ENV_PREFIX, v
                )
            })?;
        }
        Ok(())
    }

    /// Accepted bundle configuration file names, configured name first
    pub fn config_names(&self) -> Vec<String> {
        let mut names = vec![self.config_file.clone()];
        for fallback in ["server.conf", "server.ovpn"] {
            if !names.iter().any(|n| n == fallback) {
                names.push(fallback.to_string());
            }
        }
        names
    }
}

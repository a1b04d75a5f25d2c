//! Deployment orchestration.
//!
//! Sequence: probe, load and compare the candidate, then stop, back up,
//! install, open the firewall, prepare routing, start and verify. Every step
//! after the comparison mutates the host, and a failure at any of them stops
//! the run without rolling back. The backup snapshot is left in place.

use crate::backup::{self, BackupSnapshot};
use crate::bundle::{ConfigurationBundle, ServerDirectives};
use crate::config::DeployConfig;
use crate::error::{DeployError, Stage};
use crate::firewall::{self, FirewallChange, PortRule, RulePlan};
use crate::platform::HostPlatform;
use crate::probe::EnvironmentProfile;
use crate::service::{self, StartAction, Verification};
use crate::state::InstalledState;
use crate::version::{self, ConfigTimestamp, InstalledVersion, VersionAdvisory, VersionDecision};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub bundle: PathBuf,
    pub dry_run: bool,
    /// Suppress stdout narration (machine-readable output mode)
    pub quiet: bool,
}

/// Everything a successful deployment did
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub timestamp: ConfigTimestamp,
    pub previous: Option<ConfigTimestamp>,
    pub backup: BackupSnapshot,
    pub installed: Vec<String>,
    pub firewall_rule: PortRule,
    pub firewall: FirewallChange,
    /// Opened protocol differs from the configured transport
    pub protocol_mismatch: bool,
    pub service: StartAction,
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DeployOutcome {
    NoUpdateNeeded {
        candidate: ConfigTimestamp,
        installed: Option<ConfigTimestamp>,
    },
    WouldDeploy {
        candidate: ConfigTimestamp,
        installed: Option<ConfigTimestamp>,
        directives: ServerDirectives,
        advisories: Vec<String>,
    },
    DeployedSuccessfully(DeployReport),
}

/// Operator-facing progress lines on stdout
struct Progress {
    quiet: bool,
}

impl Progress {
    fn step(&self, message: impl Display) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    fn done(&self, message: impl Display) {
        if !self.quiet {
            println!("✓ {}", message);
        }
    }

    fn warn(&self, message: impl Display) {
        tracing::warn!("{}", message);
        if !self.quiet {
            println!("⚠ {}", message);
        }
    }
}

fn report_profile(progress: &Progress, profile: &EnvironmentProfile) -> Vec<String> {
    match &profile.distribution {
        Some(distro) => progress.done(format!(
            "Host checks passed ({}, {})",
            profile.platform, distro.id
        )),
        None => progress.done(format!("Host checks passed ({})", profile.platform)),
    }
    for advisory in &profile.advisories {
        progress.warn(advisory);
    }
    profile.advisories.clone()
}

/// Bring the host to the candidate bundle's configuration if it is newer
pub fn run(
    platform: &dyn HostPlatform,
    config: &DeployConfig,
    request: &DeployRequest,
) -> Result<DeployOutcome, DeployError> {
    run_at(
        platform,
        config,
        request,
        chrono::Local::now().naive_local(),
    )
}

fn run_at(
    platform: &dyn HostPlatform,
    config: &DeployConfig,
    request: &DeployRequest,
    now: NaiveDateTime,
) -> Result<DeployOutcome, DeployError> {
    let progress = Progress {
        quiet: request.quiet,
    };

    progress.step("Checking host...");
    let profile = platform.probe()?;
    let mut advisories = report_profile(&progress, &profile);

    let bundle = ConfigurationBundle::load(
        &request.bundle,
        &config.config_names(),
        &config.routes_dir,
    )?;
    let candidate = bundle.timestamp;
    progress.done(format!(
        "Candidate bundle {} ({}, {}/{})",
        bundle.root.display(),
        candidate,
        bundle.directives.port,
        bundle.directives.transport
    ));

    let state = InstalledState::from_config(config);
    let installed = InstalledVersion::read(&state.config_file)
        .map_err(DeployError::operational(Stage::Inspect))?;

    match version::compare(candidate, installed) {
        VersionDecision::NotNewer => {
            progress.done(format!(
                "Installed configuration is current ({}), nothing to do",
                installed
                    .timestamp()
                    .map(|t| t.to_string())
                    .unwrap_or_default()
            ));
            return Ok(DeployOutcome::NoUpdateNeeded {
                candidate,
                installed: installed.timestamp(),
            });
        }
        VersionDecision::Newer { advisory } => {
            if let Some(VersionAdvisory::InstalledTimestampMissing) = advisory {
                let message = format!(
                    "Installed {} has no timestamp marker; treating candidate as newer",
                    state.config_file.display()
                );
                progress.warn(&message);
                advisories.push(message);
            }
        }
    }

    if request.dry_run {
        progress.done("Dry run: candidate would be deployed");
        return Ok(DeployOutcome::WouldDeploy {
            candidate,
            installed: installed.timestamp(),
            directives: bundle.directives,
            advisories,
        });
    }

    platform
        .ensure_packages(&profile)
        .map_err(DeployError::operational(Stage::Packages))?;

    let services = platform.services();
    if service::stop_if_running(services).map_err(DeployError::operational(Stage::StopService))? {
        progress.done(format!("Stopped {}", services.name()));
    }

    let snapshot = backup::snapshot(&state, &config.backup_dir, now)
        .map_err(DeployError::operational(Stage::Backup))?;
    progress.done(format!("Backup saved to {}", snapshot.path.display()));

    let directives = bundle.directives;
    let installed_entries = state
        .install(bundle)
        .map_err(DeployError::operational(Stage::Install))?;
    progress.done(format!(
        "Installed configuration into {}",
        state.install_dir.display()
    ));

    let plan = RulePlan::new(&directives, config.firewall.protocol);
    if plan.diverges() {
        let message = format!(
            "Firewall opens {} while the configuration declares {}; clients using {} will be blocked",
            plan.rule, plan.declared, plan.declared
        );
        progress.warn(&message);
        advisories.push(message);
    }
    let firewall_change = firewall::ensure_open(platform.firewall(), plan.rule)
        .map_err(DeployError::operational(Stage::Firewall))?;
    match firewall_change {
        FirewallChange::Added => progress.done(format!("Opened firewall port {}", plan.rule)),
        FirewallChange::AlreadyPresent => {
            progress.done(format!("Firewall port {} already open", plan.rule))
        }
    }

    platform
        .prepare_network()
        .map_err(DeployError::operational(Stage::Network))?;

    service::apply_boot_persistence(services)
        .map_err(DeployError::operational(Stage::StartService))?;
    let action = service::start_or_restart(services).map_err(|e| DeployError::ServiceStartFailed {
        service: services.name().to_string(),
        reason: format!("{:#}", e),
    })?;

    match service::verify_running(services).map_err(DeployError::operational(Stage::Verify))? {
        Verification::Running => {
            progress.done(format!("{} is running", services.name()));
        }
        Verification::Failed(reason) => {
            return Err(DeployError::ServiceStartFailed {
                service: services.name().to_string(),
                reason,
            });
        }
    }

    Ok(DeployOutcome::DeployedSuccessfully(DeployReport {
        timestamp: candidate,
        previous: installed.timestamp(),
        backup: snapshot,
        installed: installed_entries,
        firewall_rule: plan.rule,
        firewall: firewall_change,
        protocol_mismatch: plan.diverges(),
        service: action,
        advisories,
    }))
}

/// Result of a manual restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_from: String,
    pub report: backup::RestoreReport,
    pub service: StartAction,
}

/// Put a snapshot back in place and bring the service up on it.
///
/// The firewall is left as it is; rules are only ever added.
pub fn restore(
    platform: &dyn HostPlatform,
    config: &DeployConfig,
    name: &str,
    quiet: bool,
) -> Result<RestoreOutcome, DeployError> {
    restore_at(
        platform,
        config,
        name,
        quiet,
        chrono::Local::now().naive_local(),
    )
}

fn restore_at(
    platform: &dyn HostPlatform,
    config: &DeployConfig,
    name: &str,
    quiet: bool,
    now: NaiveDateTime,
) -> Result<RestoreOutcome, DeployError> {
    let progress = Progress { quiet };

    let profile = platform.probe()?;
    report_profile(&progress, &profile);

    let services = platform.services();
    if service::stop_if_running(services).map_err(DeployError::operational(Stage::StopService))? {
        progress.done(format!("Stopped {}", services.name()));
    }

    let state = InstalledState::from_config(config);
    let report = backup::restore(&state, &config.backup_dir, name, now)
        .map_err(DeployError::operational(Stage::Backup))?;
    progress.done(format!(
        "Restored {} (previous state saved as {})",
        name, report.retired.name
    ));

    service::apply_boot_persistence(services)
        .map_err(DeployError::operational(Stage::StartService))?;
    let action = service::start_or_restart(services).map_err(|e| DeployError::ServiceStartFailed {
        service: services.name().to_string(),
        reason: format!("{:#}", e),
    })?;
    if let Verification::Failed(reason) =
        service::verify_running(services).map_err(DeployError::operational(Stage::Verify))?
    {
        return Err(DeployError::ServiceStartFailed {
            service: services.name().to_string(),
            reason,
        });
    }
    progress.done(format!("{} is running", services.name()));

    Ok(RestoreOutcome {
        restored_from: name.to_string(),
        report,
        service: action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnvironmentError;
    use crate::firewall::Firewall;
    use crate::firewall::testing::MemoryFirewall;
    use crate::platform::PlatformKind;
    use crate::service::testing::FakeService;
    use crate::service::{ServiceManager, ServiceState};
    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::path::Path;

    /// One mutating call observed through the platform, with the on-disk
    /// phase the host was in at that moment
    #[derive(Debug, PartialEq)]
    struct Event {
        call: &'static str,
        backup_taken: bool,
        candidate_installed: bool,
    }

    fn event(call: &'static str, backup_taken: bool, candidate_installed: bool) -> Event {
        Event {
            call,
            backup_taken,
            candidate_installed,
        }
    }

    /// Paths inspected whenever the journal records a call
    struct Watch {
        backup_dir: PathBuf,
        config_file: PathBuf,
        candidate_marker: String,
    }

    struct FakePlatform {
        services: FakeService,
        firewall: MemoryFirewall,
        unprivileged: bool,
        packages_checked: Cell<bool>,
        network_prepared: Cell<bool>,
        watch: Option<Watch>,
        journal: RefCell<Vec<Event>>,
    }

    impl FakePlatform {
        fn new(state: ServiceState) -> Self {
            Self {
                services: FakeService::new(state),
                firewall: MemoryFirewall::with_rules(&["22/tcp"]),
                unprivileged: false,
                packages_checked: Cell::new(false),
                network_prepared: Cell::new(false),
                watch: None,
                journal: RefCell::new(Vec::new()),
            }
        }

        fn watching(state: ServiceState, config: &DeployConfig, candidate_marker: &str) -> Self {
            Self {
                watch: Some(Watch {
                    backup_dir: config.backup_dir.clone(),
                    config_file: config.install_dir.join(&config.config_file),
                    candidate_marker: candidate_marker.to_string(),
                }),
                ..Self::new(state)
            }
        }

        fn record(&self, call: &'static str) {
            let (backup_taken, candidate_installed) = match &self.watch {
                Some(w) => (
                    w.backup_dir.exists(),
                    fs::read_to_string(&w.config_file)
                        .map(|c| c.contains(&w.candidate_marker))
                        .unwrap_or(false),
                ),
                None => (false, false),
            };
            self.journal.borrow_mut().push(Event {
                call,
                backup_taken,
                candidate_installed,
            });
        }

        fn journal(&self) -> Vec<Event> {
            self.journal.take()
        }
    }

    impl HostPlatform for FakePlatform {
        fn kind(&self) -> PlatformKind {
            PlatformKind::Linux
        }

        fn probe(&self) -> Result<EnvironmentProfile, EnvironmentError> {
            if self.unprivileged {
                return Err(EnvironmentError::InsufficientPrivilege);
            }
            Ok(EnvironmentProfile {
                platform: PlatformKind::Linux,
                distribution: None,
                package_manager: None,
                advisories: Vec::new(),
            })
        }

        fn ensure_packages(&self, _profile: &EnvironmentProfile) -> anyhow::Result<()> {
            self.record("packages");
            self.packages_checked.set(true);
            Ok(())
        }

        fn services(&self) -> &dyn ServiceManager {
            self
        }

        fn firewall(&self) -> &dyn Firewall {
            self
        }

        fn prepare_network(&self) -> anyhow::Result<()> {
            self.record("network");
            self.network_prepared.set(true);
            Ok(())
        }
    }

    impl ServiceManager for FakePlatform {
        fn name(&self) -> &str {
            self.services.name()
        }

        fn state(&self) -> anyhow::Result<ServiceState> {
            self.services.state()
        }

        fn stop(&self) -> anyhow::Result<()> {
            self.record("stop");
            self.services.stop()
        }

        fn disable_autostart(&self) -> anyhow::Result<()> {
            self.record("disable");
            self.services.disable_autostart()
        }

        fn enable_autostart(&self) -> anyhow::Result<()> {
            self.record("enable");
            self.services.enable_autostart()
        }

        fn start(&self) -> anyhow::Result<()> {
            self.record("start");
            self.services.start()
        }

        fn restart(&self) -> anyhow::Result<()> {
            self.record("restart");
            self.services.restart()
        }
    }

    impl Firewall for FakePlatform {
        fn open_ports(&self) -> anyhow::Result<Vec<firewall::OpenPorts>> {
            self.firewall.open_ports()
        }

        fn add_persistent(&self, rule: PortRule) -> anyhow::Result<()> {
            self.record("firewall-add");
            self.firewall.add_persistent(rule)
        }

        fn reload(&self) -> anyhow::Result<()> {
            self.record("firewall-reload");
            self.firewall.reload()
        }
    }

    struct Host {
        dir: tempfile::TempDir,
        config: DeployConfig,
    }

    impl Host {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = DeployConfig::defaults(PlatformKind::Linux);
            config.install_dir = dir.path().join("server");
            config.backup_dir = dir.path().join("server_backups");
            Self { dir, config }
        }

        fn bundle(&self, config_text: &str) -> PathBuf {
            let bundle = self.dir.path().join("incoming");
            fs::create_dir_all(bundle.join("ccd")).unwrap();
            fs::write(bundle.join("server.conf"), config_text).unwrap();
            fs::write(bundle.join("ccd").join("client1"), "iroute 10.0.0.0 255.0.0.0\n").unwrap();
            fs::write(bundle.join("ca.crt"), "opaque").unwrap();
            bundle
        }

        fn install_existing(&self, config_text: &str) {
            let dir = &self.config.install_dir;
            fs::create_dir_all(dir.join("ccd")).unwrap();
            fs::write(dir.join("server.conf"), config_text).unwrap();
            fs::write(dir.join("ipp.txt"), "client1,10.8.0.2\n").unwrap();
            fs::write(dir.join("openvpn.log"), "log\n").unwrap();
        }

        fn request(&self, bundle: &Path) -> DeployRequest {
            DeployRequest {
                bundle: bundle.to_path_buf(),
                dry_run: false,
                quiet: true,
            }
        }

        fn install_listing(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(&self.config.install_dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    const CANDIDATE: &str = "port 1194\nproto udp\ndev tun\n# 2025-01-01 00:00:00 #\n";

    #[test]
    fn test_fresh_host_is_deployed() {
        let host = Host::new();
        let bundle = host.bundle(CANDIDATE);
        let platform = FakePlatform::new(ServiceState::Unknown);

        let request = host.request(&bundle);
        let outcome = run_at(&platform, &host.config, &request, at("2025-01-02 10:00:00")).unwrap();

        let DeployOutcome::DeployedSuccessfully(report) = outcome else {
            panic!("expected a deployment, got {:?}", outcome);
        };
        assert_eq!(report.timestamp.to_string(), "2025-01-01 00:00:00");
        assert_eq!(report.previous, None);
        assert_eq!(report.firewall, FirewallChange::Added);
        assert_eq!(report.service, StartAction::Started);
        assert!(report.backup.artifacts.is_empty());
        assert_eq!(report.backup.name, "20250102_100000");

        assert_eq!(platform.firewall.active_rules(), vec!["22/tcp", "1194/udp"]);
        assert_eq!(platform.services.state.get(), ServiceState::Running);
        assert!(platform.services.autostart.get());
        assert!(platform.packages_checked.get());
        assert!(platform.network_prepared.get());
        assert_eq!(host.install_listing(), vec!["ca.crt", "ccd", "server.conf"]);
        assert!(!bundle.join("ccd").exists());
    }

    #[test]
    fn test_host_steps_run_in_pipeline_order() {
        let host = Host::new();
        host.install_existing("# 2024-12-01 00:00:00 #\nport 1194\n");
        let bundle = host.bundle("# 2025-01-01 00:00:00 #\nport 443\nproto tcp\n");
        let platform = FakePlatform::watching(
            ServiceState::Running,
            &host.config,
            "2025-01-01 00:00:00",
        );

        let request = host.request(&bundle);
        run_at(&platform, &host.config, &request, at("2025-01-01 08:30:00")).unwrap();

        assert_eq!(
            platform.journal(),
            vec![
                event("packages", false, false),
                event("stop", false, false),
                event("disable", false, false),
                event("firewall-add", true, true),
                event("firewall-reload", true, true),
                event("network", true, true),
                event("enable", true, true),
                event("start", true, true),
            ]
        );
    }

    #[test]
    fn test_unreadable_installed_config_is_an_inspect_failure() {
        let host = Host::new();
        fs::create_dir_all(host.config.install_dir.join("server.conf")).unwrap();
        let bundle = host.bundle(CANDIDATE);
        let platform = FakePlatform::new(ServiceState::Running);

        let err = run(&platform, &host.config, &host.request(&bundle)).unwrap_err();

        assert_eq!(err.stage(), Stage::Inspect);
        assert_eq!(err.exit_code(), 4);
        assert!(platform.services.ops().is_empty());
        assert!(!host.config.backup_dir.exists());
    }

    #[test]
    fn test_older_candidate_is_a_no_op() {
        let host = Host::new();
        host.install_existing("# 2025-06-01 12:00:00 #\nport 1194\n");
        let bundle = host.bundle("# 2025-05-01 00:00:00 #\nport 1194\n");
        let platform = FakePlatform::new(ServiceState::Running);

        let outcome = run(&platform, &host.config, &host.request(&bundle)).unwrap();

        assert!(matches!(outcome, DeployOutcome::NoUpdateNeeded { .. }));
        assert!(platform.services.ops().is_empty());
        assert!(platform.firewall.persisted.borrow().len() == 1);
        assert!(!host.config.backup_dir.exists());
        assert!(bundle.join("server.conf").exists());
        assert_eq!(
            fs::read_to_string(host.config.install_dir.join("server.conf")).unwrap(),
            "# 2025-06-01 12:00:00 #\nport 1194\n"
        );
    }

    #[test]
    fn test_equal_timestamp_is_not_newer() {
        let host = Host::new();
        host.install_existing(CANDIDATE);
        let bundle = host.bundle(CANDIDATE);
        let platform = FakePlatform::new(ServiceState::Running);

        let outcome = run(&platform, &host.config, &host.request(&bundle)).unwrap();
        assert!(matches!(outcome, DeployOutcome::NoUpdateNeeded { .. }));
    }

    #[test]
    fn test_missing_timestamp_fails_before_mutation() {
        let host = Host::new();
        let bundle = host.bundle("port 1194\nproto udp\n");
        let platform = FakePlatform::new(ServiceState::Running);

        let err = run(&platform, &host.config, &host.request(&bundle)).unwrap_err();

        assert_eq!(err.stage(), Stage::Validation);
        assert_eq!(err.reason_code(), "no-timestamp-found");
        assert_eq!(err.exit_code(), 3);
        assert!(!host.config.backup_dir.exists());
        assert!(platform.services.ops().is_empty());
    }

    #[test]
    fn test_upgrade_backs_up_exactly_the_old_artifacts() {
        let host = Host::new();
        host.install_existing("# 2024-12-01 00:00:00 #\nport 1194\n");
        let bundle = host.bundle("# 2025-01-01 00:00:00 #\nport 443\nproto tcp\n");
        let platform = FakePlatform::new(ServiceState::Running);

        let request = host.request(&bundle);
        let outcome = run_at(&platform, &host.config, &request, at("2025-01-01 08:30:00")).unwrap();

        let DeployOutcome::DeployedSuccessfully(report) = outcome else {
            panic!("expected a deployment, got {:?}", outcome);
        };
        assert_eq!(
            report.previous.map(|t| t.to_string()).as_deref(),
            Some("2024-12-01 00:00:00")
        );
        assert_eq!(
            report.backup.artifacts,
            vec!["server.conf", "ccd", "ipp.txt", "openvpn.log"]
        );
        assert_eq!(report.firewall_rule.to_string(), "443/tcp");
        assert_eq!(
            platform.services.ops(),
            vec!["state", "stop", "disable", "enable", "state", "start", "state"]
        );
        assert_eq!(host.install_listing(), vec!["ca.crt", "ccd", "server.conf"]);
        assert!(
            fs::read_to_string(report.backup.path.join("server.conf"))
                .unwrap()
                .contains("2024-12-01")
        );
    }

    #[test]
    fn test_unstamped_installed_config_does_not_block() {
        let host = Host::new();
        host.install_existing("port 1194\n");
        let bundle = host.bundle(CANDIDATE);
        let platform = FakePlatform::new(ServiceState::Stopped);

        let outcome = run(&platform, &host.config, &host.request(&bundle)).unwrap();

        let DeployOutcome::DeployedSuccessfully(report) = outcome else {
            panic!("expected a deployment, got {:?}", outcome);
        };
        assert_eq!(report.previous, None);
        assert_eq!(report.advisories.len(), 1);
    }

    #[test]
    fn test_failed_start_is_reported_and_backup_kept() {
        let host = Host::new();
        host.install_existing("# 2024-12-01 00:00:00 #\n");
        let bundle = host.bundle(CANDIDATE);
        let platform = FakePlatform::new(ServiceState::Running);
        platform.services.refuse_start.set(true);

        let err = run(&platform, &host.config, &host.request(&bundle)).unwrap_err();

        assert!(matches!(err, DeployError::ServiceStartFailed { .. }));
        assert_eq!(err.exit_code(), 5);
        assert_eq!(backup::list(&host.config.backup_dir).unwrap().len(), 1);
        assert!(host.config.install_dir.join("server.conf").exists());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let host = Host::new();
        host.install_existing("# 2024-12-01 00:00:00 #\n");
        let bundle = host.bundle(CANDIDATE);
        let platform = FakePlatform::new(ServiceState::Running);
        let mut request = host.request(&bundle);
        request.dry_run = true;

        let outcome = run(&platform, &host.config, &request).unwrap();

        let DeployOutcome::WouldDeploy { directives, .. } = outcome else {
            panic!("expected a dry-run report, got {:?}", outcome);
        };
        assert_eq!(directives.port, 1194);
        assert!(platform.services.ops().is_empty());
        assert!(!platform.packages_checked.get());
        assert!(!host.config.backup_dir.exists());
        assert!(bundle.join("server.conf").exists());
    }

    #[test]
    fn test_probe_failure_is_terminal() {
        let host = Host::new();
        let bundle = host.bundle(CANDIDATE);
        let mut platform = FakePlatform::new(ServiceState::Running);
        platform.unprivileged = true;

        let err = run(&platform, &host.config, &host.request(&bundle)).unwrap_err();

        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.stage(), Stage::Probe);
        assert!(platform.services.ops().is_empty());
        assert!(!host.config.install_dir.exists());
    }

    #[test]
    fn test_pinned_protocol_mismatch_is_reported() {
        let mut host = Host::new();
        host.config.firewall.protocol = crate::config::ProtocolPolicy::Udp;
        let bundle = host.bundle("# 2025-01-01 00:00:00 #\nport 443\nproto tcp-server\n");
        let platform = FakePlatform::new(ServiceState::Stopped);

        let outcome = run(&platform, &host.config, &host.request(&bundle)).unwrap();

        let DeployOutcome::DeployedSuccessfully(report) = outcome else {
            panic!("expected a deployment, got {:?}", outcome);
        };
        assert!(report.protocol_mismatch);
        assert_eq!(report.firewall_rule.to_string(), "443/udp");
        assert_eq!(platform.firewall.active_rules(), vec!["22/tcp", "443/udp"]);
    }

    #[test]
    fn test_restore_brings_service_back() {
        let host = Host::new();
        host.install_existing("# 2024-12-01 00:00:00 #\n");
        let bundle = host.bundle(CANDIDATE);
        let platform = FakePlatform::new(ServiceState::Running);
        let request = host.request(&bundle);
        let DeployOutcome::DeployedSuccessfully(report) =
            run_at(&platform, &host.config, &request, at("2025-01-01 09:00:00")).unwrap()
        else {
            panic!("expected a deployment");
        };

        let restored = restore_at(
            &platform,
            &host.config,
            &report.backup.name,
            true,
            at("2025-01-01 10:00:00"),
        )
        .unwrap();

        assert_eq!(restored.service, StartAction::Started);
        assert_eq!(restored.report.retired.name, "20250101_100000");
        assert!(
            fs::read_to_string(host.config.install_dir.join("server.conf"))
                .unwrap()
                .contains("2024-12-01")
        );
        assert_eq!(platform.services.state.get(), ServiceState::Running);
    }
}

//! VPN service lifecycle: stop before replacement, start after, verify.

use anyhow::Result;
use serde::Serialize;
use std::fmt;

/// Observed state of the VPN service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Unknown,
    Stopped,
    Disabled,
    Enabled,
    Starting,
    Running,
    Failed,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Running, or on its way there
    pub fn is_active(&self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Starting)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Unknown => "unknown",
            ServiceState::Stopped => "stopped",
            ServiceState::Disabled => "disabled",
            ServiceState::Enabled => "enabled",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Host service manager operations on the VPN service
pub trait ServiceManager {
    fn name(&self) -> &str;
    fn state(&self) -> Result<ServiceState>;
    fn stop(&self) -> Result<()>;
    fn disable_autostart(&self) -> Result<()>;
    fn enable_autostart(&self) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn restart(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAction {
    Started,
    Restarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Running,
    Failed(String),
}

/// Stop the service and drop its autostart if it is running or starting.
///
/// Returns whether anything was stopped.
pub fn stop_if_running(services: &dyn ServiceManager) -> Result<bool> {
    let state = services.state()?;
    if !state.is_active() {
        tracing::debug!(service = services.name(), %state, "service not running");
        return Ok(false);
    }
    services.stop()?;
    services.disable_autostart()?;
    tracing::info!(service = services.name(), "stopped service");
    Ok(true)
}

pub fn apply_boot_persistence(services: &dyn ServiceManager) -> Result<()> {
    services.enable_autostart()?;
    tracing::info!(service = services.name(), "enabled autostart");
    Ok(())
}

/// Start the service, or restart it if something already brought it up
pub fn start_or_restart(services: &dyn ServiceManager) -> Result<StartAction> {
    if services.state()?.is_active() {
        services.restart()?;
        Ok(StartAction::Restarted)
    } else {
        services.start()?;
        Ok(StartAction::Started)
    }
}

/// Query the live state once; no retries.
pub fn verify_running(services: &dyn ServiceManager) -> Result<Verification> {
    Ok(match services.state()? {
        ServiceState::Running => Verification::Running,
        ServiceState::Starting => {
            Verification::Failed("service is still starting and has not reached running".into())
        }
        state => Verification::Failed(format!("service is {}", state)),
    })
}


#[cfg(test)]
mod tests {
    use super::testing::FakeService;
    use super::*;

    #[test]
    fn test_stop_only_when_running() {
        let idle = FakeService::new(ServiceState::Stopped);
        assert!(!stop_if_running(&idle).unwrap());
        assert_eq!(idle.ops(), vec!["state"]);

        let running = FakeService::new(ServiceState::Running);
        assert!(stop_if_running(&running).unwrap());
        assert_eq!(running.ops(), vec!["state", "stop", "disable"]);
        assert!(!running.autostart.get());
    }

    #[test]
    fn test_start_or_restart() {
        let stopped = FakeService::new(ServiceState::Stopped);
        assert_eq!(start_or_restart(&stopped).unwrap(), StartAction::Started);

        let running = FakeService::new(ServiceState::Running);
        assert_eq!(start_or_restart(&running).unwrap(), StartAction::Restarted);
        assert_eq!(verify_running(&running).unwrap(), Verification::Running);
    }

    #[test]
    fn test_verify_reports_failed_start() {
        let service = FakeService::new(ServiceState::Stopped);
        service.refuse_start.set(true);
        apply_boot_persistence(&service).unwrap();
        start_or_restart(&service).unwrap();

        assert_eq!(
            verify_running(&service).unwrap(),
            Verification::Failed("service is failed".to_string())
        );
    }

    #[test]
    fn test_starting_service_is_treated_as_active() {
        let service = FakeService::new(ServiceState::Starting);
        assert!(stop_if_running(&service).unwrap());
        assert_eq!(service.ops(), vec!["state", "stop", "disable"]);

        let service = FakeService::new(ServiceState::Starting);
        assert_eq!(start_or_restart(&service).unwrap(), StartAction::Restarted);
    }

    #[test]
    fn test_verify_names_a_unit_stuck_starting() {
        let service = FakeService::new(ServiceState::Starting);
        let Verification::Failed(reason) = verify_running(&service).unwrap() else {
            panic!("a starting unit is not running yet");
        };
        assert!(reason.contains("still starting"));
        assert!(!reason.contains("unknown"));
    }
}

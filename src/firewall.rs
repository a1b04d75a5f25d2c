//! Additive firewall reconciliation.
//!
//! Rules are only ever added. A rule left behind by an earlier deployment on a
//! different port or protocol stays in place.

use crate::bundle::{ServerDirectives, Transport};
use crate::config::ProtocolPolicy;
use anyhow::Result;
use serde::Serialize;
use std::fmt;

/// A single `(port, protocol)` pair to permit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortRule {
    pub port: u16,
    pub protocol: Transport,
}

impl fmt::Display for PortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// A permitted port range as reported by the firewall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenPorts {
    pub start: u16,
    pub end: u16,
    pub protocol: Transport,
}

impl OpenPorts {
    pub fn single(rule: PortRule) -> Self {
        Self {
            start: rule.port,
            end: rule.port,
            protocol: rule.protocol,
        }
    }

    pub fn contains(&self, rule: PortRule) -> bool {
        self.protocol == rule.protocol && (self.start..=self.end).contains(&rule.port)
    }

    /// Parse `1194/udp` or `60000-61000/udp`. Other protocols are ignored.
    pub fn parse(token: &str) -> Option<Self> {
        let (ports, proto) = token.trim().split_once('/')?;
        let protocol = match proto.to_ascii_lowercase().as_str() {
            "udp" => Transport::Udp,
            "tcp" => Transport::Tcp,
            _ => return None,
        };
        let (start, end) = match ports.split_once('-') {
            Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
            None => {
                let p = ports.parse().ok()?;
                (p, p)
            }
        };
        Some(Self {
            start,
            end,
            protocol,
        })
    }
}

/// Host firewall facility
pub trait Firewall {
    /// Ports currently permitted inbound
    fn open_ports(&self) -> Result<Vec<OpenPorts>>;

    /// Add a rule that survives reboots
    fn add_persistent(&self, rule: PortRule) -> Result<()>;

    /// Make persisted rules active without restarting the firewall service
    fn reload(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirewallChange {
    Added,
    AlreadyPresent,
}

/// Rule derived from the installed configuration and the protocol policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RulePlan {
    pub rule: PortRule,
    pub declared: Transport,
}

impl RulePlan {
    /// The same effective protocol is used for the membership test and the
    /// rule that gets opened.
    pub fn new(directives: &ServerDirectives, policy: ProtocolPolicy) -> Self {
        Self {
            rule: PortRule {
                port: directives.port,
                protocol: policy.resolve(directives.transport),
            },
            declared: directives.transport,
        }
    }

    pub fn diverges(&self) -> bool {
        self.rule.protocol != self.declared
    }
}

/// Permit `rule` if it is not already covered by an open port
pub fn ensure_open(firewall: &dyn Firewall, rule: PortRule) -> Result<FirewallChange> {
    let open = firewall.open_ports()?;
    if open.iter().any(|p| p.contains(rule)) {
        tracing::debug!(%rule, "firewall rule already present");
        return Ok(FirewallChange::AlreadyPresent);
    }

    firewall.add_persistent(rule)?;
    firewall.reload()?;
    tracing::info!(%rule, "opened firewall port");
    Ok(FirewallChange::Added)
}

//! Request and response shapes of the network runtime operations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::record::InterfaceAddresses;

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Sctp => write!(f, "SCTP"),
        }
    }
}

/// Port mapping requested for a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortMapping {
    pub protocol: Protocol,
    pub container_port: i32,
    pub host_port: i32,
    pub host_ip: String,
}

/// DNS configuration requested for a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub servers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

/// Isolation of the sandbox being attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Isolation {
    /// Network namespace path; empty means the host namespace.
    pub path: String,
}

/// AttachNetwork request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachRequest {
    pub id: String,
    pub isolation: Option<Isolation>,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub extra_data: HashMap<String, String>,
    pub port_mappings: Vec<PortMapping>,
    pub dns_config: Option<DnsConfig>,
}

impl AttachRequest {
    /// Namespace path, if one was supplied.
    pub fn netns(&self) -> Option<&str> {
        self.isolation
            .as_ref()
            .map(|i| i.path.as_str())
            .filter(|p| !p.is_empty())
    }
}

/// DetachNetwork request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetachRequest {
    pub id: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub extra_data: HashMap<String, String>,
}

/// Addressing of a sandbox; empty when nothing is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodNetwork {
    pub ip_configs: BTreeMap<String, InterfaceAddresses>,
}

impl PodNetwork {
    pub fn is_empty(&self) -> bool {
        self.ip_configs.is_empty()
    }
}

/// Aggregate readiness of the node's networks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeNetwork {
    pub name: String,
    pub ready: bool,
    pub extra_data: HashMap<String, String>,
}

/// Per-call context carrying the caller's deadline.
///
/// Cancellation is dropping the operation's future; the deadline bounds
/// plugin invocations when the caller keeps waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context with no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Keep the earlier of the current deadline and `now + limit`.
    pub fn bounded_by(self, limit: Option<Duration>) -> Self {
        let Some(limit) = limit else {
            return self;
        };
        let candidate = Instant::now() + limit;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
        }
    }
}

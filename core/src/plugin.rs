//! Plugin runtime contract.
//!
//! The orchestrator talks to the network plugin runtime only through
//! [`PluginRuntime`]. Invocation options are typed: labels become plugin
//! arguments and every capability is a named field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::network::{BoundNetwork, NetworkInterfaceSpec, PluginConfig};

/// Capability key for pod annotations.
pub const CAP_POD_ANNOTATIONS: &str = "io.kubernetes.cri.pod-annotations";
/// Capability key for port mappings.
pub const CAP_PORT_MAPPINGS: &str = "portMappings";
/// Capability key for bandwidth limits.
pub const CAP_BANDWIDTH: &str = "bandwidth";
/// Capability key for DNS settings.
pub const CAP_DNS: &str = "dns";
/// Capability key for the sandbox cgroup path.
pub const CAP_CGROUP_PATH: &str = "cgroupPath";

/// A host port exposed into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMappingCapability {
    pub host_port: i32,
    pub container_port: i32,
    /// Lower-case protocol name (`tcp`, `udp`, `sctp`).
    pub protocol: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
}

/// Traffic shaping limits in bits per second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthCapability {
    pub ingress_rate: u64,
    pub ingress_burst: u64,
    pub egress_rate: u64,
    pub egress_burst: u64,
}

/// DNS settings for the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsCapability {
    pub servers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

/// Structured capabilities passed alongside a setup or teardown call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub pod_annotations: HashMap<String, String>,
    pub port_mappings: Vec<PortMappingCapability>,
    pub bandwidth: Option<BandwidthCapability>,
    pub dns: Option<DnsCapability>,
    pub cgroup_path: Option<String>,
}

impl Capabilities {
    /// Capabilities keyed by their plugin protocol names. Absent
    /// capabilities are omitted.
    pub fn runtime_config(&self) -> BTreeMap<&'static str, serde_json::Value> {
        let mut config = BTreeMap::new();
        config.insert(
            CAP_POD_ANNOTATIONS,
            serde_json::json!(self.pod_annotations),
        );
        if !self.port_mappings.is_empty() {
            config.insert(CAP_PORT_MAPPINGS, serde_json::json!(self.port_mappings));
        }
        if let Some(bandwidth) = &self.bandwidth {
            config.insert(CAP_BANDWIDTH, serde_json::json!(bandwidth));
        }
        if let Some(dns) = &self.dns {
            config.insert(CAP_DNS, serde_json::json!(dns));
        }
        if let Some(cgroup) = &self.cgroup_path {
            config.insert(CAP_CGROUP_PATH, serde_json::json!(cgroup));
        }
        config
    }
}

/// Options for one plugin invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceOptions {
    /// Plugin arguments in a fixed order.
    pub labels: Vec<(String, String)>,
    pub capabilities: Capabilities,
}

impl NamespaceOptions {
    /// Arguments rendered as `K=V;K=V`.
    pub fn args_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An interface reported by the plugin runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInterface {
    pub mac: String,
    /// CIDR addresses in plugin order.
    pub ip_configs: Vec<String>,
}

/// Aggregated result of a setup call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResult {
    pub interfaces: BTreeMap<String, PluginInterface>,
}

/// Runtime that executes network configuration plugins.
///
/// Invocations take `&self` and may run concurrently; `load` takes
/// `&mut self` and must leave the previous configuration active on failure.
#[async_trait]
pub trait PluginRuntime: Send + Sync + 'static {
    /// (Re)load network configurations.
    async fn load(&mut self) -> Result<()>;

    /// Snapshot of the loaded configurations, in slot order.
    fn config(&self) -> PluginConfig;

    /// Readiness of the runtime.
    fn status(&self) -> Result<()>;

    /// Attach every loaded network in order.
    async fn setup_serially(
        &self,
        id: &str,
        netns: &str,
        opts: &NamespaceOptions,
    ) -> Result<PluginResult>;

    /// Attach the given networks in order.
    async fn setup_networks(
        &self,
        id: &str,
        netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<PluginResult>;

    /// Detach every loaded network.
    async fn remove(&self, id: &str, netns: &str, opts: &NamespaceOptions) -> Result<()>;

    /// Detach the given networks.
    async fn remove_networks(
        &self,
        id: &str,
        netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<()>;

    /// Validate requested networks against the loaded configuration and
    /// resolve interface names.
    fn build_multi_network(&self, specs: &[NetworkInterfaceSpec]) -> Result<Vec<BoundNetwork>>;
}

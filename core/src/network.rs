//! Network types shared by the plugin runtime and the orchestrator.
//!
//! `PluginConfig` is the ordered view of the loaded network configurations.
//! Slot 0 is the base (loopback) configuration and slot 1 is the primary
//! data-plane configuration; the multi-network path depends on that order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{KniError, Result};

/// Slot of the base (loopback) configuration.
pub const BASE_CONFIG_SLOT: usize = 0;

/// Slot of the primary data-plane configuration.
pub const PRIMARY_CONFIG_SLOT: usize = 1;

/// Network name of the loopback configuration.
pub const LOOPBACK_NETWORK: &str = "cni-loopback";

/// Interface name of the loopback device.
pub const LOOPBACK_INTERFACE: &str = "lo";

/// A network requested for a sandbox on the multi-network path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceSpec {
    /// Name of a loaded network configuration.
    pub network_name: String,

    /// Interface to create; `None` lets the runtime assign one.
    pub interface_name: Option<String>,
}

impl NetworkInterfaceSpec {
    /// Request a network with a runtime-assigned interface name.
    pub fn new(network_name: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            interface_name: None,
        }
    }

    /// Request a network bound to a specific interface name.
    pub fn with_interface(network_name: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            interface_name: Some(interface.into()),
        }
    }
}

impl fmt::Display for NetworkInterfaceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.interface_name {
            Some(ifname) => write!(f, "{}@{}", self.network_name, ifname),
            None => write!(f, "{}", self.network_name),
        }
    }
}

/// A requested network validated against the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundNetwork {
    pub network_name: String,
    pub interface_name: String,
}

/// Resolve the interface name of every requested network.
///
/// Unnamed entries get the lowest `<prefix><n>` not claimed elsewhere in the
/// list. Two entries resolving to the same interface is an error.
pub fn assign_interface_names(specs: &[NetworkInterfaceSpec], prefix: &str) -> Result<Vec<String>> {
    let taken: HashSet<&str> = specs
        .iter()
        .filter_map(|s| s.interface_name.as_deref())
        .collect();

    let mut next = 0usize;
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(specs.len());
    for spec in specs {
        let name = match &spec.interface_name {
            Some(name) => name.clone(),
            None => loop {
                let candidate = format!("{}{}", prefix, next);
                next += 1;
                if !taken.contains(candidate.as_str()) {
                    break candidate;
                }
            },
        };
        if !seen.insert(name.clone()) {
            return Err(KniError::Validation(format!(
                "interface '{}' requested more than once",
                name
            )));
        }
        names.push(name);
    }
    Ok(names)
}

/// Summary of one loaded network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    /// Network name from the configuration file.
    pub name: String,

    /// Plugin types in invocation order.
    pub plugins: Vec<String>,
}

/// Ordered list of loaded network configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub networks: Vec<NetworkSummary>,
}

impl PluginConfig {
    pub fn new(networks: Vec<NetworkSummary>) -> Self {
        Self { networks }
    }

    /// Number of loaded configurations.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Name of the network in the primary config slot.
    ///
    /// Fails when fewer than two configurations are loaded, since slot 0 is
    /// reserved for the base configuration.
    pub fn primary_network(&self) -> Result<&str> {
        self.networks
            .get(PRIMARY_CONFIG_SLOT)
            .map(|n| n.name.as_str())
            .ok_or_else(|| {
                KniError::Config(format!(
                    "primary config slot is empty: {} network configuration(s) loaded, need at least {}",
                    self.networks.len(),
                    PRIMARY_CONFIG_SLOT + 1
                ))
            })
    }

    /// Look up a loaded network by name.
    pub fn find(&self, name: &str) -> Option<&NetworkSummary> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Validate requested networks against the loaded set and resolve
    /// their interface names.
    pub fn bind(&self, specs: &[NetworkInterfaceSpec], prefix: &str) -> Result<Vec<BoundNetwork>> {
        if let Some(missing) = specs.iter().find(|s| self.find(&s.network_name).is_none()) {
            return Err(KniError::Validation(format!(
                "network '{}' is not loaded",
                missing.network_name
            )));
        }
        let names = assign_interface_names(specs, prefix)?;
        Ok(specs
            .iter()
            .zip(names)
            .map(|(spec, interface_name)| BoundNetwork {
                network_name: spec.network_name.clone(),
                interface_name,
            })
            .collect())
    }
}

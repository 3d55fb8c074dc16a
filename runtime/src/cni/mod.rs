//! Plugin runtime backed by CNI plugin binaries.
//!
//! Network configurations are read from a directory; the built-in loopback
//! network always occupies slot 0. Interfaces are named `lo` for loopback
//! and `<prefix><n>` for the remaining networks in load order.

pub mod conf;
pub mod exec;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kni_core::error::{KniError, Result};
use kni_core::network::{
    BoundNetwork, NetworkInterfaceSpec, NetworkSummary, PluginConfig, LOOPBACK_INTERFACE,
    PRIMARY_CONFIG_SLOT,
};
use kni_core::plugin::{NamespaceOptions, PluginInterface, PluginResult, PluginRuntime};
use serde::Deserialize;
use serde_json::Value;

use self::conf::NetworkConfList;
use self::exec::{CniCommand, Invocation, PluginExec};

/// A loaded network and the interface it attaches on the serial path.
#[derive(Debug, Clone)]
struct Network {
    config: NetworkConfList,
    ifname: String,
}

/// CNI plugin runtime.
pub struct CniRuntime {
    conf_dir: PathBuf,
    if_prefix: String,
    exec: PluginExec,
    networks: Vec<Network>,
}

impl CniRuntime {
    pub fn new(
        conf_dir: impl Into<PathBuf>,
        bin_dirs: Vec<PathBuf>,
        if_prefix: impl Into<String>,
    ) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            if_prefix: if_prefix.into(),
            exec: PluginExec::new(bin_dirs),
            networks: Vec::new(),
        }
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    fn network(&self, name: &str) -> Result<&Network> {
        self.networks
            .iter()
            .find(|n| n.config.name == name)
            .ok_or_else(|| KniError::Validation(format!("network '{}' is not loaded", name)))
    }

    /// Run every plugin of a list in order, chaining results.
    async fn add_network(
        &self,
        id: &str,
        netns: &str,
        list: &NetworkConfList,
        ifname: &str,
        opts: &NamespaceOptions,
    ) -> Result<Value> {
        let invocation = Invocation {
            command: CniCommand::Add,
            container_id: id,
            netns,
            ifname,
            args: opts.args_string(),
        };
        let runtime_config = opts.capabilities.runtime_config();

        let mut prev: Option<Value> = None;
        for plugin in &list.plugins {
            let config = plugin.invocation_config(list, &runtime_config, prev.as_ref());
            match self.exec.run(&plugin.plugin_type, &invocation, &config).await? {
                Some(result) => prev = Some(result),
                None if prev.is_some() => {}
                None => {
                    return Err(KniError::plugin(
                        id,
                        format!("plugin {} returned no result", plugin.plugin_type),
                    ))
                }
            }
        }
        prev.ok_or_else(|| KniError::plugin(id, format!("network {} has no plugins", list.name)))
    }

    /// Run every plugin of a list in reverse order.
    async fn del_network(
        &self,
        id: &str,
        netns: &str,
        list: &NetworkConfList,
        ifname: &str,
        opts: &NamespaceOptions,
    ) -> Result<()> {
        let invocation = Invocation {
            command: CniCommand::Del,
            container_id: id,
            netns,
            ifname,
            args: opts.args_string(),
        };
        let runtime_config = opts.capabilities.runtime_config();

        for plugin in list.plugins.iter().rev() {
            let config = plugin.invocation_config(list, &runtime_config, None);
            self.exec.run(&plugin.plugin_type, &invocation, &config).await?;
        }
        Ok(())
    }

    async fn setup_bound(
        &self,
        id: &str,
        netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<PluginResult> {
        let mut result = PluginResult::default();
        for bound in networks {
            let network = self.network(&bound.network_name)?;
            let output = self
                .add_network(id, netns, &network.config, &bound.interface_name, opts)
                .await?;
            merge_result(&mut result, &output, &bound.interface_name)
                .map_err(|e| KniError::plugin(id, e))?;
        }
        Ok(result)
    }

    async fn remove_bound(
        &self,
        id: &str,
        netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<()> {
        for bound in networks.iter().rev() {
            // A network dropped from the config directory has nothing left to run.
            let Ok(network) = self.network(&bound.network_name) else {
                tracing::warn!(
                    sandbox_id = %id,
                    network = %bound.network_name,
                    ifname = %bound.interface_name,
                    "Network no longer loaded, skipping teardown"
                );
                continue;
            };
            self.del_network(id, netns, &network.config, &bound.interface_name, opts)
                .await?;
        }
        Ok(())
    }

    fn serial_networks(&self) -> Vec<BoundNetwork> {
        self.networks
            .iter()
            .map(|n| BoundNetwork {
                network_name: n.config.name.clone(),
                interface_name: n.ifname.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl PluginRuntime for CniRuntime {
    async fn load(&mut self) -> Result<()> {
        let lists = conf::load_dir(&self.conf_dir)?;
        if lists.is_empty() {
            return Err(KniError::Config(format!(
                "no network config found in {}",
                self.conf_dir.display()
            )));
        }

        let networks: Vec<Network> = std::iter::once(NetworkConfList::loopback())
            .chain(lists)
            .enumerate()
            .map(|(slot, config)| Network {
                ifname: interface_name(&self.if_prefix, slot),
                config,
            })
            .collect();

        for network in &networks {
            tracing::debug!(
                network = %network.config.name,
                ifname = %network.ifname,
                plugins = ?network.config.plugin_types(),
                "Loaded network config"
            );
        }
        self.networks = networks;
        Ok(())
    }

    fn config(&self) -> PluginConfig {
        PluginConfig::new(
            self.networks
                .iter()
                .map(|n| NetworkSummary {
                    name: n.config.name.clone(),
                    plugins: n.config.plugin_types(),
                })
                .collect(),
        )
    }

    fn status(&self) -> Result<()> {
        if self.networks.len() <= PRIMARY_CONFIG_SLOT {
            return Err(KniError::Config(format!(
                "cni plugin not initialized: no network config loaded from {}",
                self.conf_dir.display()
            )));
        }
        Ok(())
    }

    async fn setup_serially(
        &self,
        id: &str,
        netns: &str,
        opts: &NamespaceOptions,
    ) -> Result<PluginResult> {
        self.status()?;
        self.setup_bound(id, netns, &self.serial_networks(), opts)
            .await
    }

    async fn setup_networks(
        &self,
        id: &str,
        netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<PluginResult> {
        self.status()?;
        self.setup_bound(id, netns, networks, opts).await
    }

    async fn remove(&self, id: &str, netns: &str, opts: &NamespaceOptions) -> Result<()> {
        self.status()?;
        self.remove_bound(id, netns, &self.serial_networks(), opts)
            .await
    }

    async fn remove_networks(
        &self,
        id: &str,
        netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<()> {
        self.status()?;
        self.remove_bound(id, netns, networks, opts).await
    }

    fn build_multi_network(&self, specs: &[NetworkInterfaceSpec]) -> Result<Vec<BoundNetwork>> {
        self.config().bind(specs, &self.if_prefix)
    }
}

fn interface_name(prefix: &str, slot: usize) -> String {
    match slot {
        0 => LOOPBACK_INTERFACE.to_string(),
        n => format!("{}{}", prefix, n - 1),
    }
}

#[derive(Debug, Default, Deserialize)]
struct CniResult {
    #[serde(default)]
    interfaces: Vec<CniInterface>,
    #[serde(default)]
    ips: Vec<CniIp>,
}

#[derive(Debug, Deserialize)]
struct CniInterface {
    name: String,
    #[serde(default)]
    mac: String,
    #[serde(default)]
    sandbox: String,
}

#[derive(Debug, Deserialize)]
struct CniIp {
    address: String,
    #[serde(default)]
    interface: Option<usize>,
}

/// Fold one network's result into the aggregate.
///
/// Interfaces outside the sandbox are dropped; addresses without an
/// interface index belong to the interface the network was attached on.
fn merge_result(
    aggregate: &mut PluginResult,
    output: &Value,
    ifname: &str,
) -> std::result::Result<(), String> {
    let result = CniResult::deserialize(output)
        .map_err(|e| format!("unrecognised plugin result: {}", e))?;

    for iface in result.interfaces.iter().filter(|i| !i.sandbox.is_empty()) {
        let entry = aggregate.interfaces.entry(iface.name.clone()).or_default();
        if !iface.mac.is_empty() {
            entry.mac = iface.mac.clone();
        }
    }

    for ip in &result.ips {
        let target = match ip.interface {
            Some(idx) => match result.interfaces.get(idx) {
                Some(iface) => iface.name.as_str(),
                None => return Err(format!("address {} names unknown interface {}", ip.address, idx)),
            },
            None => ifname,
        };
        aggregate
            .interfaces
            .entry(target.to_string())
            .or_insert_with(PluginInterface::default)
            .ip_configs
            .push(ip.address.clone());
    }
    Ok(())
}

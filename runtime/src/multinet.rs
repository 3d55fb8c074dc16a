//! Multi-network request parsing.
//!
//! The `kni.io/multi-network` annotation lists networks as
//! `name[@ifname]` entries separated by commas. Order matters: the plugin
//! runtime attaches interfaces in sequence.

use std::collections::HashMap;

use kni_core::error::Result;
use kni_core::network::{
    NetworkInterfaceSpec, PluginConfig, LOOPBACK_INTERFACE, LOOPBACK_NETWORK,
};

/// Annotation listing the requested networks.
pub const ANN_MULTI_NETWORK: &str = "kni.io/multi-network";

/// Parse the networks requested through annotations.
pub fn extract_networks(annotations: &HashMap<String, String>) -> Vec<NetworkInterfaceSpec> {
    let Some(value) = annotations.get(ANN_MULTI_NETWORK) else {
        return Vec::new();
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('@') {
            Some((name, ifname)) if !ifname.is_empty() => {
                NetworkInterfaceSpec::with_interface(name, ifname)
            }
            Some((name, _)) => NetworkInterfaceSpec::new(name),
            None => NetworkInterfaceSpec::new(entry),
        })
        .collect()
}

/// Append the loopback and primary interfaces every sandbox gets.
pub fn append_default_networks(
    networks: &mut Vec<NetworkInterfaceSpec>,
    config: &PluginConfig,
    primary_interface: &str,
) -> Result<()> {
    let primary = config.primary_network()?;
    networks.push(NetworkInterfaceSpec::with_interface(
        LOOPBACK_NETWORK,
        LOOPBACK_INTERFACE,
    ));
    networks.push(NetworkInterfaceSpec::with_interface(primary, primary_interface));
    Ok(())
}

/// Requested networks followed by the default ones.
pub fn build_network_list(
    annotations: &HashMap<String, String>,
    config: &PluginConfig,
    primary_interface: &str,
) -> Result<Vec<NetworkInterfaceSpec>> {
    let mut networks = extract_networks(annotations);
    append_default_networks(&mut networks, config, primary_interface)?;
    Ok(networks)
}

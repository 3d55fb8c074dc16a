//! Per-sandbox attachment record.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{KniError, Result};
use crate::network::BoundNetwork;
use crate::plugin::PluginResult;

/// Extra-data key holding the network namespace path used at attach.
pub const EXTRA_NETNS: &str = "netns";

/// Extra-data key holding the sandbox cgroup path.
pub const EXTRA_CGROUP_PATH: &str = "cgroupPath";

/// Addressing of one interface inside the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceAddresses {
    /// Hardware address reported by the plugin (may be empty).
    #[serde(default)]
    pub mac_address: String,

    /// CIDR addresses in plugin order.
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Networking state last applied to a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    /// Interface name → addressing.
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceAddresses>,

    /// Attach request annotations, verbatim.
    #[serde(default)]
    pub annotations: HashMap<String, String>,

    /// Attach request extra data plus the namespace path.
    #[serde(default)]
    pub extra_data: HashMap<String, String>,

    /// Networks set up on the multi-network path, in setup order.
    ///
    /// Teardown uses this list rather than re-resolving the annotation, so a
    /// network dropped from the configuration can still be detached.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<BoundNetwork>,

    /// When the attach completed (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_at: Option<String>,
}

impl AttachmentRecord {
    /// Build a record from a plugin result and the attach request context.
    pub fn from_result(
        result: &PluginResult,
        annotations: &HashMap<String, String>,
        extra_data: &HashMap<String, String>,
        netns: &str,
    ) -> Self {
        let interfaces = result
            .interfaces
            .iter()
            .map(|(name, iface)| {
                (
                    name.clone(),
                    InterfaceAddresses {
                        mac_address: iface.mac.clone(),
                        addresses: iface.ip_configs.clone(),
                    },
                )
            })
            .collect();

        let mut extra_data = extra_data.clone();
        extra_data.insert(EXTRA_NETNS.to_string(), netns.to_string());

        Self {
            interfaces,
            annotations: annotations.clone(),
            extra_data,
            networks: Vec::new(),
            attached_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Remember the networks bound at attach.
    pub fn with_networks(mut self, networks: Vec<BoundNetwork>) -> Self {
        self.networks = networks;
        self
    }

    /// Namespace path recorded at attach; required for teardown.
    pub fn netns(&self) -> Result<&str> {
        self.extra_data
            .get(EXTRA_NETNS)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                KniError::Validation("attachment record has no network namespace path".to_string())
            })
    }

    /// Cgroup path recorded at attach, if any.
    pub fn cgroup_path(&self) -> Option<&str> {
        self.extra_data
            .get(EXTRA_CGROUP_PATH)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    /// True when the record carries no interface data.
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

//! Network configuration files.
//!
//! A directory holds `*.conf`, `*.conflist` and `*.json` files, read in
//! lexical order. Single-plugin files are wrapped into a one-entry list.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kni_core::error::{KniError, Result};
use kni_core::network::LOOPBACK_NETWORK;
use serde_json::{Map, Value};

/// File extensions recognised as network configuration.
pub const CONF_EXTENSIONS: &[&str] = &["conf", "conflist", "json"];

/// Version used when a file does not declare one.
const DEFAULT_CNI_VERSION: &str = "0.3.1";

/// One plugin entry of a network configuration list.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConf {
    /// Binary name of the plugin.
    pub plugin_type: String,
    /// Capabilities the plugin declares support for.
    pub capabilities: BTreeSet<String>,
    raw: Map<String, Value>,
}

impl PluginConf {
    fn from_value(value: Value, source: &Path) -> Result<Self> {
        let Value::Object(raw) = value else {
            return Err(invalid(source, "plugin entry is not an object"));
        };
        let plugin_type = raw
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid(source, "plugin entry has no type"))?
            .to_string();
        let capabilities = raw
            .get("capabilities")
            .and_then(Value::as_object)
            .map(|caps| {
                caps.iter()
                    .filter(|(_, enabled)| enabled.as_bool() == Some(true))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            plugin_type,
            capabilities,
            raw,
        })
    }

    /// Configuration written to the plugin's stdin.
    ///
    /// Only capabilities the plugin declares are passed as `runtimeConfig`.
    pub fn invocation_config(
        &self,
        list: &NetworkConfList,
        runtime_config: &BTreeMap<&'static str, Value>,
        prev_result: Option<&Value>,
    ) -> Value {
        let mut config = self.raw.clone();
        config.insert("name".to_string(), Value::String(list.name.clone()));
        config.insert(
            "cniVersion".to_string(),
            Value::String(list.cni_version.clone()),
        );
        config.remove("capabilities");

        let declared: Map<String, Value> = runtime_config
            .iter()
            .filter(|(key, _)| self.capabilities.contains(**key))
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        if !declared.is_empty() {
            config.insert("runtimeConfig".to_string(), Value::Object(declared));
        }
        if let Some(prev) = prev_result {
            config.insert("prevResult".to_string(), prev.clone());
        }
        Value::Object(config)
    }
}

/// A named network: plugins run in order on ADD and in reverse on DEL.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfList {
    pub name: String,
    pub cni_version: String,
    pub plugins: Vec<PluginConf>,
    /// File the list was read from; `None` for the built-in loopback.
    pub source: Option<PathBuf>,
}

impl NetworkConfList {
    /// Built-in loopback network, always loaded first.
    pub fn loopback() -> Self {
        let mut raw = Map::new();
        raw.insert("type".to_string(), Value::String("loopback".to_string()));
        Self {
            name: LOOPBACK_NETWORK.to_string(),
            cni_version: DEFAULT_CNI_VERSION.to_string(),
            plugins: vec![PluginConf {
                plugin_type: "loopback".to_string(),
                capabilities: BTreeSet::new(),
                raw,
            }],
            source: None,
        }
    }

    /// Parse a configuration file's contents.
    pub fn parse(bytes: &[u8], source: &Path) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| invalid(source, &format!("invalid JSON: {}", e)))?;
        let Value::Object(obj) = &value else {
            return Err(invalid(source, "top level is not an object"));
        };

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid(source, "missing network name"))?
            .to_string();
        let cni_version = obj
            .get("cniVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CNI_VERSION)
            .to_string();

        let plugins = match obj.get("plugins") {
            Some(Value::Array(entries)) => entries
                .iter()
                .cloned()
                .map(|entry| PluginConf::from_value(entry, source))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(invalid(source, "plugins is not an array")),
            None => vec![PluginConf::from_value(value.clone(), source)?],
        };
        if plugins.is_empty() {
            return Err(invalid(source, "no plugins listed"));
        }

        Ok(Self {
            name,
            cni_version,
            plugins,
            source: Some(source.to_path_buf()),
        })
    }

    /// Plugin types in invocation order.
    pub fn plugin_types(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.plugin_type.clone()).collect()
    }
}

/// Read every network configuration in `dir`, in lexical file order.
///
/// Later files reusing a network name, or the loopback name, are skipped.
pub fn load_dir(dir: &Path) -> Result<Vec<NetworkConfList>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        KniError::Config(format!(
            "failed to read network config directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_conf_file(path))
        .collect();
    files.sort();

    let mut lists: Vec<NetworkConfList> = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(&path)?;
        let list = NetworkConfList::parse(&bytes, &path)?;
        if list.name == LOOPBACK_NETWORK || lists.iter().any(|l| l.name == list.name) {
            tracing::warn!(
                file = %path.display(),
                network = %list.name,
                "Skipping network config with duplicate name"
            );
            continue;
        }
        lists.push(list);
    }
    Ok(lists)
}

fn is_conf_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| CONF_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn invalid(source: &Path, reason: &str) -> KniError {
    KniError::Config(format!(
        "invalid network config {}: {}",
        source.display(),
        reason
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kni_core::plugin::{CAP_BANDWIDTH, CAP_PORT_MAPPINGS};

    const BRIDGE_LIST: &str = r#"{
        "cniVersion": "1.0.0",
        "name": "podnet",
        "plugins": [
            {"type": "bridge", "bridge": "cni0"},
            {"type": "portmap", "capabilities": {"portMappings": true, "bandwidth": false}}
        ]
    }"#;

    #[test]
    fn test_parse_list() {
        let list = NetworkConfList::parse(BRIDGE_LIST.as_bytes(), Path::new("10-podnet.conflist"))
            .unwrap();
        assert_eq!(list.name, "podnet");
        assert_eq!(list.cni_version, "1.0.0");
        assert_eq!(list.plugin_types(), vec!["bridge", "portmap"]);
        assert!(list.plugins[1].capabilities.contains(CAP_PORT_MAPPINGS));
        assert!(!list.plugins[1].capabilities.contains(CAP_BANDWIDTH));
    }

    #[test]
    fn test_parse_single_conf_is_wrapped() {
        let list = NetworkConfList::parse(
            br#"{"name": "flat", "type": "macvlan", "master": "eth1"}"#,
            Path::new("20-flat.conf"),
        )
        .unwrap();
        assert_eq!(list.name, "flat");
        assert_eq!(list.cni_version, DEFAULT_CNI_VERSION);
        assert_eq!(list.plugin_types(), vec!["macvlan"]);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        let path = Path::new("bad.conf");
        assert!(NetworkConfList::parse(b"not json", path).is_err());
        assert!(NetworkConfList::parse(br#"{"type": "bridge"}"#, path).is_err());
        assert!(NetworkConfList::parse(br#"{"name": "x", "plugins": []}"#, path).is_err());
        assert!(NetworkConfList::parse(br#"{"name": "x", "plugins": [{}]}"#, path).is_err());
    }

    #[test]
    fn test_invocation_config_filters_capabilities() {
        let list = NetworkConfList::parse(BRIDGE_LIST.as_bytes(), Path::new("x.conflist"))
            .unwrap();
        let mut runtime_config = BTreeMap::new();
        runtime_config.insert(CAP_PORT_MAPPINGS, serde_json::json!([{"hostPort": 8080}]));
        runtime_config.insert(CAP_BANDWIDTH, serde_json::json!({"ingressRate": 1000}));
        let prev = serde_json::json!({"cniVersion": "1.0.0", "interfaces": []});

        let bridge = list.plugins[0].invocation_config(&list, &runtime_config, None);
        assert_eq!(bridge["name"], "podnet");
        assert_eq!(bridge["bridge"], "cni0");
        assert!(bridge.get("runtimeConfig").is_none());
        assert!(bridge.get("prevResult").is_none());

        let portmap = list.plugins[1].invocation_config(&list, &runtime_config, Some(&prev));
        assert_eq!(portmap["runtimeConfig"]["portMappings"][0]["hostPort"], 8080);
        assert!(portmap["runtimeConfig"].get("bandwidth").is_none());
        assert!(portmap.get("capabilities").is_none());
        assert_eq!(portmap["prevResult"], prev);
    }

    #[test]
    fn test_load_dir_order_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-b.conf"), r#"{"name":"b","type":"bridge"}"#).unwrap();
        std::fs::write(dir.path().join("10-a.conflist"), BRIDGE_LIST).unwrap();
        std::fs::write(dir.path().join("30-c.json"), r#"{"name":"c","type":"ipvlan"}"#).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("40-dup.conf"), r#"{"name":"b","type":"bridge"}"#).unwrap();

        let lists = load_dir(dir.path()).unwrap();
        let names: Vec<_> = lists.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["podnet", "b", "c"]);
    }

    #[test]
    fn test_load_dir_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dir(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, KniError::Config(_)));
    }

    #[test]
    fn test_loopback() {
        let lo = NetworkConfList::loopback();
        assert_eq!(lo.name, LOOPBACK_NETWORK);
        assert_eq!(lo.plugin_types(), vec!["loopback"]);
        assert!(lo.source.is_none());
    }
}

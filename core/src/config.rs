use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{KniError, Result};

/// Default interface name prefix handed to the plugin runtime.
pub const DEFAULT_IF_PREFIX: &str = "eth";

/// Default attachment store file name.
pub const DEFAULT_DB_PATH: &str = "net.db";

/// Default CNI configuration directory.
pub const DEFAULT_PLUGIN_CONF_DIR: &str = "/etc/cni/net.d";

/// Default CNI plugin binary directory.
pub const DEFAULT_PLUGIN_BIN_DIR: &str = "/opt/cni/bin";

/// Network runtime service configuration.
///
/// Supplied once at service construction; only the contents of
/// `plugin_conf_dir` change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KniConfig {
    /// Interface name prefix (`eth` gives `eth0`, `eth1`, ...)
    pub if_prefix: String,

    /// Attach through the multi-network path
    pub use_multi_net: bool,

    /// Directory holding network configuration files
    pub plugin_conf_dir: PathBuf,

    /// Directories searched for plugin binaries
    pub plugin_bin_dirs: Vec<PathBuf>,

    /// Attachment store file
    pub db_path: PathBuf,

    /// Behavior of detach when no record exists for the sandbox
    pub missing_record_policy: MissingRecordPolicy,

    /// Server-side bound on a single plugin invocation in seconds (0 = none)
    pub plugin_timeout_secs: u64,
}

impl Default for KniConfig {
    fn default() -> Self {
        Self {
            if_prefix: DEFAULT_IF_PREFIX.to_string(),
            use_multi_net: false,
            plugin_conf_dir: PathBuf::from(DEFAULT_PLUGIN_CONF_DIR),
            plugin_bin_dirs: vec![PathBuf::from(DEFAULT_PLUGIN_BIN_DIR)],
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            missing_record_policy: MissingRecordPolicy::default(),
            plugin_timeout_secs: 0,
        }
    }
}

impl KniConfig {
    /// Load configuration from a YAML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            KniError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: KniConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.if_prefix.is_empty() {
            return Err(KniError::Config("if_prefix must not be empty".to_string()));
        }
        if self.plugin_bin_dirs.is_empty() {
            return Err(KniError::Config(
                "at least one plugin binary directory is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Server-side plugin timeout, if configured.
    pub fn plugin_timeout(&self) -> Option<Duration> {
        match self.plugin_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Name of the primary data-plane interface (`<prefix>0`).
    pub fn primary_interface(&self) -> String {
        format!("{}0", self.if_prefix)
    }
}

/// What detach does when the sandbox has no attachment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRecordPolicy {
    /// Report `NotFound` so callers can tell "never attached" from "detached".
    #[default]
    Error,
    /// Treat detach of an unknown sandbox as already done.
    Succeed,
}

impl std::str::FromStr for MissingRecordPolicy {
    type Err = KniError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(MissingRecordPolicy::Error),
            "succeed" => Ok(MissingRecordPolicy::Succeed),
            other => Err(KniError::Config(format!(
                "unknown missing record policy '{}'. Expected: error, succeed",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KniConfig::default();
        assert_eq!(config.if_prefix, "eth");
        assert!(!config.use_multi_net);
        assert_eq!(config.plugin_conf_dir, PathBuf::from("/etc/cni/net.d"));
        assert_eq!(config.db_path, PathBuf::from("net.db"));
        assert_eq!(config.missing_record_policy, MissingRecordPolicy::Error);
        assert!(config.plugin_timeout().is_none());
        assert_eq!(config.primary_interface(), "eth0");
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kni.yaml");
        std::fs::write(
            &path,
            "use_multi_net: true\nif_prefix: net\nmissing_record_policy: succeed\nplugin_timeout_secs: 30\n",
        )
        .unwrap();

        let config = KniConfig::from_file(&path).unwrap();
        assert!(config.use_multi_net);
        assert_eq!(config.primary_interface(), "net0");
        assert_eq!(config.missing_record_policy, MissingRecordPolicy::Succeed);
        assert_eq!(config.plugin_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn test_from_file_rejects_empty_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kni.yaml");
        std::fs::write(&path, "if_prefix: \"\"\n").unwrap();
        assert!(matches!(
            KniConfig::from_file(&path),
            Err(KniError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let err = KniConfig::from_file(Path::new("/nonexistent/kni.yaml")).unwrap_err();
        assert!(matches!(err, KniError::Config(_)));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "succeed".parse::<MissingRecordPolicy>().unwrap(),
            MissingRecordPolicy::Succeed
        );
        assert!("ignore".parse::<MissingRecordPolicy>().is_err());
    }
}

//! Plugin binary invocation.
//!
//! Each call spawns the plugin with the `CNI_*` environment, writes the
//! network configuration to stdin and reads the result from stdout. The
//! child is killed if the invocation future is dropped.

use std::path::PathBuf;
use std::process::Stdio;

use kni_core::error::{KniError, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Plugin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
}

impl CniCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            CniCommand::Add => "ADD",
            CniCommand::Del => "DEL",
        }
    }
}

/// Per-invocation parameters passed through the environment.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub command: CniCommand,
    pub container_id: &'a str,
    pub netns: &'a str,
    pub ifname: &'a str,
    pub args: String,
}

/// Error document plugins print on failure.
#[derive(Debug, Deserialize)]
struct PluginErrorOutput {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

/// Locates and runs plugin binaries.
#[derive(Debug, Clone)]
pub struct PluginExec {
    bin_dirs: Vec<PathBuf>,
}

impl PluginExec {
    pub fn new(bin_dirs: Vec<PathBuf>) -> Self {
        Self { bin_dirs }
    }

    /// First binary named `plugin_type` in the search path.
    pub fn find(&self, plugin_type: &str) -> Result<PathBuf> {
        self.bin_dirs
            .iter()
            .map(|dir| dir.join(plugin_type))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                KniError::Config(format!(
                    "plugin binary '{}' not found in {:?}",
                    plugin_type, self.bin_dirs
                ))
            })
    }

    /// Run one plugin and return its parsed stdout, if any.
    pub async fn run(
        &self,
        plugin_type: &str,
        invocation: &Invocation<'_>,
        config: &Value,
    ) -> Result<Option<Value>> {
        let binary = self.find(plugin_type)?;
        let cni_path = std::env::join_paths(&self.bin_dirs)
            .map_err(|e| KniError::Config(format!("invalid plugin search path: {}", e)))?;
        let stdin = serde_json::to_vec(config)?;

        tracing::debug!(
            sandbox_id = %invocation.container_id,
            plugin = plugin_type,
            command = invocation.command.as_str(),
            ifname = invocation.ifname,
            "Invoking network plugin"
        );

        let mut child = Command::new(&binary)
            .env("CNI_COMMAND", invocation.command.as_str())
            .env("CNI_CONTAINERID", invocation.container_id)
            .env("CNI_NETNS", invocation.netns)
            .env("CNI_IFNAME", invocation.ifname)
            .env("CNI_ARGS", &invocation.args)
            .env("CNI_PATH", cni_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KniError::plugin(
                    invocation.container_id,
                    format!("failed to spawn {}: {}", binary.display(), e),
                )
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(&stdin).await?;
            // Dropping the pipe closes the plugin's stdin.
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(KniError::plugin(
                invocation.container_id,
                describe_failure(plugin_type, &output.stdout, &output.stderr),
            ));
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let result = serde_json::from_slice(&output.stdout).map_err(|e| {
            KniError::plugin(
                invocation.container_id,
                format!("plugin {} returned invalid output: {}", plugin_type, e),
            )
        })?;
        Ok(Some(result))
    }

    pub fn bin_dirs(&self) -> &[PathBuf] {
        &self.bin_dirs
    }
}

fn describe_failure(plugin_type: &str, stdout: &[u8], stderr: &[u8]) -> String {
    if let Ok(err) = serde_json::from_slice::<PluginErrorOutput>(stdout) {
        let mut message = format!("plugin {} failed (code {}): {}", plugin_type, err.code, err.msg);
        if !err.details.is_empty() {
            message.push_str("; ");
            message.push_str(&err.details);
        }
        return message;
    }
    let stderr = String::from_utf8_lossy(stderr);
    format!("plugin {} failed: {}", plugin_type, stderr.trim())
}

//! Plugin configuration syncer.
//!
//! Watches the network configuration directory and reloads the plugin
//! runtime whenever a file is created, modified or removed. Reloads go
//! through [`PluginHandle::reload`], which waits for in-flight invocations.
//! A failed reload keeps the previous configuration and the loop goes on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kni_core::error::{KniError, Result};
use kni_core::plugin::PluginRuntime;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::handle::PluginHandle;

/// Quiet period used to coalesce bursts of file events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Background reloader bound to one configuration directory.
///
/// The watch stops when the syncer is dropped.
pub struct ConfigSyncer {
    dir: PathBuf,
    task: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

impl ConfigSyncer {
    /// Start watching `dir`, creating it if needed.
    pub fn spawn<R: PluginRuntime>(dir: impl Into<PathBuf>, handle: PluginHandle<R>) -> Result<Self> {
        Self::spawn_with_debounce(dir, handle, DEFAULT_DEBOUNCE)
    }

    pub fn spawn_with_debounce<R: PluginRuntime>(
        dir: impl Into<PathBuf>,
        handle: PluginHandle<R>,
        debounce: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            KniError::Config(format!(
                "failed to create config directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // Receiver gone means the syncer is shutting down.
            let _ = tx.send(event);
        })
        .map_err(|e| KniError::Config(format!("failed to create config watcher: {}", e)))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                KniError::Config(format!("failed to watch {}: {}", dir.display(), e))
            })?;

        tracing::info!(dir = %dir.display(), "Watching plugin configuration directory");

        let task = tokio::spawn(sync_loop(rx, handle, debounce));
        Ok(Self {
            dir,
            task,
            _watcher: watcher,
        })
    }

    /// Watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop watching and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for ConfigSyncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_config_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

async fn sync_loop<R: PluginRuntime>(
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    handle: PluginHandle<R>,
    debounce: Duration,
) {
    while let Some(event) = events.recv().await {
        match event {
            Ok(event) if is_config_change(&event.kind) => {
                tracing::debug!(kind = ?event.kind, paths = ?event.paths, "Plugin configuration changed");
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Plugin configuration watcher error");
                continue;
            }
        }

        tokio::time::sleep(debounce).await;
        while events.try_recv().is_ok() {}

        // Failures are logged by reload; the previous configuration stays.
        let _ = handle.reload().await;
    }
    tracing::debug!("Plugin configuration syncer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::SimulatedRuntime;

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[test]
    fn test_is_config_change() {
        use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
        assert!(is_config_change(&EventKind::Create(CreateKind::File)));
        assert!(is_config_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_config_change(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_config_change(&EventKind::Access(AccessKind::Any)));
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let conf_dir = dir.path().join("net.d");
        let (runtime, _control) = SimulatedRuntime::new("eth", &["podnet"]);

        let syncer = ConfigSyncer::spawn(&conf_dir, PluginHandle::new(runtime)).unwrap();
        assert!(conf_dir.is_dir());
        assert_eq!(syncer.dir(), conf_dir.as_path());
        syncer.shutdown().await;
    }

    #[tokio::test]
    async fn test_reloads_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, control) = SimulatedRuntime::new("eth", &["podnet"]);
        let handle = PluginHandle::new(runtime);
        handle.reload().await.unwrap();

        let _syncer = ConfigSyncer::spawn_with_debounce(
            dir.path(),
            handle.clone(),
            Duration::from_millis(10),
        )
        .unwrap();

        control.set_networks(&["othernet"]);
        std::fs::write(dir.path().join("10-othernet.conflist"), "{}").unwrap();

        assert!(wait_for(|| control.loads() >= 2).await);
        // The read guard waits for a reload still holding the write guard.
        assert_eq!(
            handle.read().await.config().primary_network().unwrap(),
            "othernet"
        );
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, control) = SimulatedRuntime::new("eth", &["podnet"]);
        let handle = PluginHandle::new(runtime);
        handle.reload().await.unwrap();

        let _syncer = ConfigSyncer::spawn_with_debounce(
            dir.path(),
            handle.clone(),
            Duration::from_millis(10),
        )
        .unwrap();

        control.fail_load(true);
        std::fs::write(dir.path().join("10-bad.conf"), "not json").unwrap();
        assert!(wait_for(|| control.loads() >= 2).await);
        assert_eq!(
            handle.read().await.config().primary_network().unwrap(),
            "podnet"
        );

        control.fail_load(false);
        control.set_networks(&["fixed"]);
        let loads = control.loads();
        std::fs::write(dir.path().join("10-bad.conf"), "{}").unwrap();
        assert!(wait_for(|| control.loads() > loads).await);
    }
}

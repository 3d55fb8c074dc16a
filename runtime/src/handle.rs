//! Shared access to the plugin runtime.
//!
//! Invocations hold a read guard for their whole duration, so many attach
//! and detach calls run concurrently against a stable configuration. Reload
//! takes the write guard and waits for in-flight invocations to finish.

use std::sync::Arc;

use kni_core::error::Result;
use kni_core::plugin::PluginRuntime;
use tokio::sync::{RwLock, RwLockReadGuard};

/// Reader/writer-guarded plugin runtime shared by requests and the syncer.
pub struct PluginHandle<R> {
    inner: Arc<RwLock<R>>,
}

impl<R> Clone for PluginHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: PluginRuntime> PluginHandle<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            inner: Arc::new(RwLock::new(runtime)),
        }
    }

    /// Shared access for an invocation.
    pub async fn read(&self) -> RwLockReadGuard<'_, R> {
        self.inner.read().await
    }

    /// Reload the configuration under exclusive access.
    pub async fn reload(&self) -> Result<()> {
        let mut runtime = self.inner.write().await;
        let result = runtime.load().await;
        match &result {
            Ok(()) => tracing::info!(
                networks = runtime.config().len(),
                "Plugin configuration reloaded"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                networks = runtime.config().len(),
                "Plugin configuration reload failed; keeping previous configuration"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::SimulatedRuntime;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reload_picks_up_new_networks() {
        let (runtime, control) = SimulatedRuntime::new("eth", &["podnet"]);
        let handle = PluginHandle::new(runtime);
        handle.reload().await.unwrap();
        assert_eq!(handle.read().await.config().primary_network().unwrap(), "podnet");

        control.set_networks(&["other"]);
        handle.reload().await.unwrap();
        assert_eq!(handle.read().await.config().primary_network().unwrap(), "other");
    }

    #[tokio::test]
    async fn test_reload_waits_for_readers() {
        let (runtime, control) = SimulatedRuntime::new("eth", &["podnet"]);
        let handle = PluginHandle::new(runtime);
        handle.reload().await.unwrap();

        let guard = handle.read().await;
        let reloader = handle.clone();
        let task = tokio::spawn(async move { reloader.reload().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(control.loads(), 1);

        drop(guard);
        task.await.unwrap().unwrap();
        assert_eq!(control.loads(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_reports_error() {
        let (runtime, control) = SimulatedRuntime::new("eth", &["podnet"]);
        let handle = PluginHandle::new(runtime);
        handle.reload().await.unwrap();

        control.fail_load(true);
        assert!(handle.reload().await.is_err());
        assert!(handle.read().await.status().is_ok());
    }
}

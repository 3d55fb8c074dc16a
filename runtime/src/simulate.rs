//! Simulated plugin runtime for development and testing.
//!
//! Keeps attachments in memory and hands out deterministic addresses from
//! `10.88.0.0/16`, so the service can run without plugin binaries or root.
//! A [`SimulatedControl`] handle edits the "on-disk" configuration, injects
//! delays and failures, and inspects what the runtime was asked to do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kni_core::error::{KniError, Result};
use kni_core::network::{
    BoundNetwork, NetworkInterfaceSpec, NetworkSummary, PluginConfig, LOOPBACK_INTERFACE,
    LOOPBACK_NETWORK,
};
use kni_core::plugin::{NamespaceOptions, PluginInterface, PluginResult, PluginRuntime};
use parking_lot::Mutex;

/// Environment variable selecting the simulated runtime in the server.
pub const SIMULATE_ENV: &str = "KNI_SIMULATE";

/// Check if simulation mode is enabled via environment variable.
pub fn is_simulate_mode() -> bool {
    std::env::var(SIMULATE_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Default)]
struct SimState {
    /// Network names `load` picks up next, in slot order.
    source: Mutex<Vec<String>>,
    /// Live interfaces per sandbox ID.
    attached: Mutex<HashMap<String, PluginResult>>,
    /// Networks passed to each `setup_networks` call.
    setups: Mutex<Vec<Vec<BoundNetwork>>>,
    /// Networks passed to each `remove_networks` call.
    removals: Mutex<Vec<Vec<BoundNetwork>>>,
    /// Options passed to each setup or remove call.
    options: Mutex<Vec<NamespaceOptions>>,
    delay: Mutex<Duration>,
    fail_setup: AtomicBool,
    fail_remove: AtomicBool,
    fail_load: AtomicBool,
    loads: AtomicUsize,
    next_host: AtomicU32,
}

/// In-memory plugin runtime.
pub struct SimulatedRuntime {
    if_prefix: String,
    networks: Vec<String>,
    state: Arc<SimState>,
}

/// Test and development handle onto a [`SimulatedRuntime`].
#[derive(Clone)]
pub struct SimulatedControl {
    state: Arc<SimState>,
}

impl SimulatedRuntime {
    /// Create a runtime whose configuration source lists `networks` after
    /// the loopback network. Nothing is loaded until `load` runs.
    pub fn new(if_prefix: &str, networks: &[&str]) -> (Self, SimulatedControl) {
        let state = Arc::new(SimState::default());
        *state.source.lock() = with_loopback(networks);
        state.next_host.store(2, Ordering::SeqCst);

        let runtime = Self {
            if_prefix: if_prefix.to_string(),
            networks: Vec::new(),
            state: Arc::clone(&state),
        };
        (runtime, SimulatedControl { state })
    }

    fn interface_name(&self, slot: usize) -> String {
        if slot == 0 {
            LOOPBACK_INTERFACE.to_string()
        } else {
            format!("{}{}", self.if_prefix, slot - 1)
        }
    }

    fn allocate(&self, network: &str, ifname: &str) -> PluginInterface {
        if network == LOOPBACK_NETWORK {
            return PluginInterface {
                mac: "00:00:00:00:00:00".to_string(),
                ip_configs: vec!["127.0.0.1/8".to_string()],
            };
        }
        let host = self.state.next_host.fetch_add(1, Ordering::SeqCst);
        let [_, _, hi, lo] = host.to_be_bytes();
        tracing::debug!(network, ifname, host, "Simulated address allocated");
        PluginInterface {
            mac: format!("02:42:0a:58:{:02x}:{:02x}", hi, lo),
            ip_configs: vec![format!("10.88.{}.{}/16", hi, lo)],
        }
    }

    async fn apply(
        &self,
        id: &str,
        networks: Vec<BoundNetwork>,
        opts: &NamespaceOptions,
    ) -> Result<PluginResult> {
        self.state.options.lock().push(opts.clone());
        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_setup.load(Ordering::SeqCst) {
            return Err(KniError::plugin(id, "simulated setup failure"));
        }

        let mut result = PluginResult::default();
        for network in &networks {
            let iface = self.allocate(&network.network_name, &network.interface_name);
            result.interfaces.insert(network.interface_name.clone(), iface);
        }
        self.state
            .attached
            .lock()
            .insert(id.to_string(), result.clone());
        Ok(result)
    }

    async fn release(&self, id: &str, opts: &NamespaceOptions) -> Result<()> {
        self.state.options.lock().push(opts.clone());
        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_remove.load(Ordering::SeqCst) {
            return Err(KniError::plugin(id, "simulated teardown failure"));
        }
        // Removing an absent attachment is fine, as with real plugins.
        self.state.attached.lock().remove(id);
        Ok(())
    }
}

#[async_trait]
impl PluginRuntime for SimulatedRuntime {
    async fn load(&mut self) -> Result<()> {
        self.state.loads.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_load.load(Ordering::SeqCst) {
            return Err(KniError::Config("simulated load failure".to_string()));
        }
        let source = self.state.source.lock().clone();
        if source.len() < 2 {
            return Err(KniError::Config("no network config found".to_string()));
        }
        self.networks = source;
        Ok(())
    }

    fn config(&self) -> PluginConfig {
        PluginConfig::new(
            self.networks
                .iter()
                .map(|name| NetworkSummary {
                    name: name.clone(),
                    plugins: vec!["simulated".to_string()],
                })
                .collect(),
        )
    }

    fn status(&self) -> Result<()> {
        if self.networks.len() < 2 {
            return Err(KniError::Config("cni plugin not initialized".to_string()));
        }
        Ok(())
    }

    async fn setup_serially(
        &self,
        id: &str,
        _netns: &str,
        opts: &NamespaceOptions,
    ) -> Result<PluginResult> {
        self.status()?;
        let networks = self
            .networks
            .iter()
            .enumerate()
            .map(|(slot, name)| BoundNetwork {
                network_name: name.clone(),
                interface_name: self.interface_name(slot),
            })
            .collect();
        self.apply(id, networks, opts).await
    }

    async fn setup_networks(
        &self,
        id: &str,
        _netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<PluginResult> {
        self.state.setups.lock().push(networks.to_vec());
        self.apply(id, networks.to_vec(), opts).await
    }

    async fn remove(&self, id: &str, _netns: &str, opts: &NamespaceOptions) -> Result<()> {
        self.release(id, opts).await
    }

    async fn remove_networks(
        &self,
        id: &str,
        _netns: &str,
        networks: &[BoundNetwork],
        opts: &NamespaceOptions,
    ) -> Result<()> {
        self.state.removals.lock().push(networks.to_vec());
        self.release(id, opts).await
    }

    fn build_multi_network(&self, specs: &[NetworkInterfaceSpec]) -> Result<Vec<BoundNetwork>> {
        self.config().bind(specs, &self.if_prefix)
    }
}

impl SimulatedControl {
    /// Replace the configuration the next `load` picks up.
    pub fn set_networks(&self, networks: &[&str]) {
        *self.state.source.lock() = with_loopback(networks);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    pub fn fail_setup(&self, fail: bool) {
        self.state.fail_setup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.state.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn fail_load(&self, fail: bool) {
        self.state.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Number of `load` calls so far.
    pub fn loads(&self) -> usize {
        self.state.loads.load(Ordering::SeqCst)
    }

    /// Interfaces currently attached for `id`.
    pub fn attached(&self, id: &str) -> Option<PluginResult> {
        self.state.attached.lock().get(id).cloned()
    }

    /// Networks passed to each multi-network setup, in call order.
    pub fn setups(&self) -> Vec<Vec<BoundNetwork>> {
        self.state.setups.lock().clone()
    }

    /// Networks passed to each `remove_networks` call.
    pub fn removals(&self) -> Vec<Vec<BoundNetwork>> {
        self.state.removals.lock().clone()
    }

    /// Options passed to each setup or teardown, in call order.
    pub fn options(&self) -> Vec<NamespaceOptions> {
        self.state.options.lock().clone()
    }
}

fn with_loopback(networks: &[&str]) -> Vec<String> {
    std::iter::once(LOOPBACK_NETWORK)
        .chain(networks.iter().copied())
        .map(str::to_string)
        .collect()
}

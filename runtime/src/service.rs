//! Sandbox network attachment service.
//!
//! `KniService` is the entry point for every network operation on the node.
//! Attach and detach for one sandbox are serialized with [`SandboxLocks`];
//! plugin calls run under a shared [`PluginHandle`] guard so a concurrent
//! reload never swaps the configuration mid-invocation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use kni_core::api::{AttachRequest, CallContext, DetachRequest, NodeNetwork, PodNetwork};
use kni_core::config::{KniConfig, MissingRecordPolicy};
use kni_core::error::{KniError, Result};
use kni_core::network::BoundNetwork;
use kni_core::plugin::{NamespaceOptions, PluginResult, PluginRuntime};
use kni_core::record::AttachmentRecord;

use crate::capability::{namespace_options, PodContext};
use crate::handle::PluginHandle;
use crate::locks::SandboxLocks;
use crate::multinet::build_network_list;
use crate::store::AttachmentStore;

/// Name of the single node network reported by `query_node_networks`.
pub const DEFAULT_NODE_NETWORK: &str = "default";

/// Extra data key explaining why the node network is not ready.
pub const NODE_NOT_READY_REASON: &str = "reason";

/// Network attachment service.
pub struct KniService<R> {
    config: KniConfig,
    plugin: PluginHandle<R>,
    store: Arc<AttachmentStore>,
    locks: SandboxLocks,
}

impl<R: PluginRuntime> KniService<R> {
    pub fn new(config: KniConfig, plugin: PluginHandle<R>, store: Arc<AttachmentStore>) -> Self {
        Self {
            config,
            plugin,
            store,
            locks: SandboxLocks::new(),
        }
    }

    /// Open the record store and load the plugin configuration.
    ///
    /// A failed initial load is tolerated: the node reports not ready until
    /// the syncer picks up a valid configuration.
    pub async fn open(config: KniConfig, runtime: R) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(AttachmentStore::open(config.db_path.clone())?);
        let plugin = PluginHandle::new(runtime);
        if let Err(e) = plugin.reload().await {
            tracing::warn!(error = %e, "Initial plugin configuration load failed");
        }
        Ok(Self::new(config, plugin, store))
    }

    pub fn config(&self) -> &KniConfig {
        &self.config
    }

    /// Handle shared with the config syncer.
    pub fn plugin_handle(&self) -> PluginHandle<R> {
        self.plugin.clone()
    }

    pub fn store(&self) -> &Arc<AttachmentStore> {
        &self.store
    }

    /// Attach a sandbox to the node's networks and record the result.
    ///
    /// Dropping the returned future before it completes aborts the plugin
    /// call; nothing is recorded unless the store write has started.
    pub async fn attach_network(&self, ctx: CallContext, req: &AttachRequest) -> Result<PodNetwork> {
        tracing::info!(sandbox_id = %req.id, "AttachNetwork");
        let result = self.attach(ctx, req).await;
        if let Err(e) = &result {
            tracing::error!(sandbox_id = %req.id, error = %e, "AttachNetwork failed");
        }
        result
    }

    async fn attach(&self, ctx: CallContext, req: &AttachRequest) -> Result<PodNetwork> {
        let id = validate_id(&req.id)?;
        let Some(netns) = req.netns() else {
            tracing::info!(sandbox_id = %id, "Sandbox uses the host network namespace, nothing to attach");
            return Ok(PodNetwork::default());
        };

        let _guard = self.locks.lock(id).await;

        let opts = namespace_options(&PodContext {
            id,
            labels: &req.labels,
            annotations: &req.annotations,
            extra_data: &req.extra_data,
            port_mappings: &req.port_mappings,
            dns_config: req.dns_config.as_ref(),
        })?;

        let (result, networks) = self
            .bounded(ctx, id, self.setup(id, netns, &req.annotations, &opts))
            .await?;

        let record = AttachmentRecord::from_result(&result, &req.annotations, &req.extra_data, netns)
            .with_networks(networks);
        self.store.save(id, &record).await?;

        tracing::info!(
            sandbox_id = %id,
            netns = %netns,
            interfaces = record.interfaces.len(),
            "Sandbox network attached"
        );
        Ok(PodNetwork {
            ip_configs: record.interfaces,
        })
    }

    async fn setup(
        &self,
        id: &str,
        netns: &str,
        annotations: &HashMap<String, String>,
        opts: &NamespaceOptions,
    ) -> Result<(PluginResult, Vec<BoundNetwork>)> {
        let plugin = self.plugin.read().await;
        if self.config.use_multi_net {
            // Defaults come from the snapshot held under this guard.
            let specs =
                build_network_list(annotations, &plugin.config(), &self.config.primary_interface())?;
            let networks = plugin.build_multi_network(&specs)?;
            tracing::debug!(sandbox_id = %id, networks = ?networks, "Setting up multiple networks");
            let result = plugin.setup_networks(id, netns, &networks, opts).await?;
            Ok((result, networks))
        } else {
            Ok((plugin.setup_serially(id, netns, opts).await?, Vec::new()))
        }
    }

    /// Tear down a sandbox's networks and forget its record.
    pub async fn detach_network(&self, ctx: CallContext, req: &DetachRequest) -> Result<()> {
        tracing::info!(sandbox_id = %req.id, "DetachNetwork");
        let result = self.detach(ctx, req).await;
        if let Err(e) = &result {
            tracing::error!(sandbox_id = %req.id, error = %e, "DetachNetwork failed");
        }
        result
    }

    async fn detach(&self, ctx: CallContext, req: &DetachRequest) -> Result<()> {
        let id = validate_id(&req.id)?;
        let _guard = self.locks.lock(id).await;

        let Some(record) = self.store.query(id)? else {
            return match self.config.missing_record_policy {
                MissingRecordPolicy::Error => Err(KniError::NotFound(format!(
                    "no attachment record for sandbox {}",
                    id
                ))),
                MissingRecordPolicy::Succeed => {
                    tracing::info!(sandbox_id = %id, "No attachment record, nothing to detach");
                    Ok(())
                }
            };
        };

        let netns = record.netns()?;
        let opts = namespace_options(&PodContext {
            id,
            labels: &req.labels,
            annotations: &record.annotations,
            extra_data: &record.extra_data,
            port_mappings: &[],
            dns_config: None,
        })?;

        self.bounded(ctx, id, self.teardown(id, netns, &record, &opts))
            .await?;
        self.store.delete(id).await?;

        tracing::info!(sandbox_id = %id, netns = %netns, "Sandbox network detached");
        Ok(())
    }

    async fn teardown(
        &self,
        id: &str,
        netns: &str,
        record: &AttachmentRecord,
        opts: &NamespaceOptions,
    ) -> Result<()> {
        let plugin = self.plugin.read().await;
        if self.config.use_multi_net {
            if !record.networks.is_empty() {
                return plugin.remove_networks(id, netns, &record.networks, opts).await;
            }
            // Records written on the serial path carry no network list.
            let specs = build_network_list(
                &record.annotations,
                &plugin.config(),
                &self.config.primary_interface(),
            )?;
            let networks = plugin.build_multi_network(&specs)?;
            plugin.remove_networks(id, netns, &networks, opts).await
        } else {
            plugin.remove(id, netns, opts).await
        }
    }

    /// Recorded addressing of a sandbox; empty when nothing is recorded.
    pub fn query_pod_network(&self, id: &str) -> Result<PodNetwork> {
        tracing::debug!(sandbox_id = %id, "QueryPodNetwork");
        let record = match self.store.query(id) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(sandbox_id = %id, error = %e, "QueryPodNetwork failed");
                return Err(e);
            }
        };
        Ok(record
            .map(|r| PodNetwork {
                ip_configs: r.interfaces,
            })
            .unwrap_or_default())
    }

    /// Readiness of the node network.
    pub async fn query_node_networks(&self) -> Result<Vec<NodeNetwork>> {
        let plugin = self.plugin.read().await;
        let mut network = NodeNetwork {
            name: DEFAULT_NODE_NETWORK.to_string(),
            ready: true,
            extra_data: HashMap::new(),
        };
        if let Err(e) = plugin.status() {
            tracing::debug!(error = %e, "Node network not ready");
            network.ready = false;
            network
                .extra_data
                .insert(NODE_NOT_READY_REASON.to_string(), e.to_string());
        }
        Ok(vec![network])
    }

    /// Node-level network setup is not provided by this runtime.
    pub async fn setup_node_network(&self) -> Result<()> {
        Err(KniError::NotImplemented(
            "SetupNodeNetwork is not supported".to_string(),
        ))
    }

    /// Run a plugin invocation under the call deadline.
    ///
    /// On expiry the invocation future is dropped, which kills any plugin
    /// process it spawned.
    async fn bounded<T>(
        &self,
        ctx: CallContext,
        id: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let ctx = ctx.bounded_by(self.config.plugin_timeout());
        match ctx.deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| {
                    KniError::DeadlineExceeded(format!("plugin invocation for sandbox {}", id))
                })?,
            None => fut.await,
        }
    }
}

fn validate_id(id: &str) -> Result<&str> {
    if id.is_empty() {
        return Err(KniError::Validation("sandbox id is required".to_string()));
    }
    Ok(id)
}

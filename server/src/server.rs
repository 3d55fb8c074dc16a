//! gRPC server setup for the network runtime.
//!
//! Serves `kni.v1.NetworkRuntime` on a Unix domain socket or a TCP address.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::Server;

use kni_core::plugin::PluginRuntime;
use kni_runtime::KniService;

use crate::kni_api::network_runtime_server::NetworkRuntimeServer;
use crate::network_service::KniNetworkService;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Unix(PathBuf),
    Tcp(String),
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
            ListenAddr::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Network runtime gRPC server.
pub struct KniServer<R> {
    addr: ListenAddr,
    service: Arc<KniService<R>>,
}

impl<R: PluginRuntime> KniServer<R> {
    pub fn new(addr: ListenAddr, service: Arc<KniService<R>>) -> Self {
        Self { addr, service }
    }

    /// Serve until `shutdown` completes, then drain in-flight calls.
    pub async fn serve_with_shutdown(
        &self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<()> {
        let network_service = NetworkRuntimeServer::new(KniNetworkService::new(Arc::clone(
            &self.service,
        )));
        let router = Server::builder().add_service(network_service);

        match &self.addr {
            ListenAddr::Unix(path) => {
                // Remove existing socket file if present
                if path.exists() {
                    std::fs::remove_file(path).with_context(|| {
                        format!("failed to remove stale socket {}", path.display())
                    })?;
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let uds = UnixListener::bind(path)
                    .with_context(|| format!("failed to bind {}", self.addr))?;
                tracing::info!(addr = %self.addr, "KNI server listening");

                let served = router
                    .serve_with_incoming_shutdown(UnixListenerStream::new(uds), shutdown)
                    .await;
                std::fs::remove_file(path).ok();
                served.with_context(|| format!("server on {} failed", self.addr))?;
            }
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind {}", self.addr))?;
                tracing::info!(addr = %self.addr, "KNI server listening");

                router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
                    .await
                    .with_context(|| format!("server on {} failed", self.addr))?;
            }
        }
        tracing::info!(addr = %self.addr, "KNI server stopped");
        Ok(())
    }
}

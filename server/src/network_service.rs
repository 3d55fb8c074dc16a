//! `kni.v1.NetworkRuntime` implementation.
//!
//! Each RPC maps its message onto the attachment service. The client's
//! `grpc-timeout` becomes the call deadline. When the client goes away the
//! handler future is dropped, which aborts any plugin call still running.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use kni_core::plugin::PluginRuntime;
use kni_runtime::KniService;

use crate::convert;
use crate::error::kni_error_to_status;
use crate::kni_api::network_runtime_server::NetworkRuntime;
use crate::kni_api::*;

/// gRPC front of a [`KniService`].
pub struct KniNetworkService<R> {
    service: Arc<KniService<R>>,
}

impl<R: PluginRuntime> KniNetworkService<R> {
    pub fn new(service: Arc<KniService<R>>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl<R: PluginRuntime> NetworkRuntime for KniNetworkService<R> {
    async fn attach_network(
        &self,
        request: Request<AttachNetworkRequest>,
    ) -> Result<Response<AttachNetworkResponse>, Status> {
        let ctx = convert::call_context(request.metadata());
        let req = convert::attach_request(request.into_inner());

        let network = self
            .service
            .attach_network(ctx, &req)
            .await
            .map_err(kni_error_to_status)?;

        Ok(Response::new(AttachNetworkResponse {
            ipconfigs: convert::ip_configs(network),
        }))
    }

    async fn detach_network(
        &self,
        request: Request<DetachNetworkRequest>,
    ) -> Result<Response<DetachNetworkResponse>, Status> {
        let ctx = convert::call_context(request.metadata());
        let req = convert::detach_request(request.into_inner());

        self.service
            .detach_network(ctx, &req)
            .await
            .map_err(kni_error_to_status)?;

        Ok(Response::new(DetachNetworkResponse {}))
    }

    async fn setup_node_network(
        &self,
        _request: Request<SetupNodeNetworkRequest>,
    ) -> Result<Response<SetupNodeNetworkResponse>, Status> {
        self.service
            .setup_node_network()
            .await
            .map_err(kni_error_to_status)?;
        Ok(Response::new(SetupNodeNetworkResponse {}))
    }

    async fn query_pod_network(
        &self,
        request: Request<QueryPodNetworkRequest>,
    ) -> Result<Response<QueryPodNetworkResponse>, Status> {
        let req = request.into_inner();
        let network = self
            .service
            .query_pod_network(&req.id)
            .map_err(kni_error_to_status)?;

        Ok(Response::new(QueryPodNetworkResponse {
            ipconfigs: convert::ip_configs(network),
        }))
    }

    async fn query_node_networks(
        &self,
        _request: Request<QueryNodeNetworksRequest>,
    ) -> Result<Response<QueryNodeNetworksResponse>, Status> {
        let networks = self
            .service
            .query_node_networks()
            .await
            .map_err(kni_error_to_status)?;

        Ok(Response::new(QueryNodeNetworksResponse {
            networks: networks.into_iter().map(convert::network).collect(),
        }))
    }
}

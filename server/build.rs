use tonic_build::manual::{Builder, Method, Service};

/// (rpc name, method name, request, response)
const METHODS: &[(&str, &str, &str, &str)] = &[
    (
        "AttachNetwork",
        "attach_network",
        "AttachNetworkRequest",
        "AttachNetworkResponse",
    ),
    (
        "DetachNetwork",
        "detach_network",
        "DetachNetworkRequest",
        "DetachNetworkResponse",
    ),
    (
        "SetupNodeNetwork",
        "setup_node_network",
        "SetupNodeNetworkRequest",
        "SetupNodeNetworkResponse",
    ),
    (
        "QueryPodNetwork",
        "query_pod_network",
        "QueryPodNetworkRequest",
        "QueryPodNetworkResponse",
    ),
    (
        "QueryNodeNetworks",
        "query_node_networks",
        "QueryNodeNetworksRequest",
        "QueryNodeNetworksResponse",
    ),
];

fn main() {
    // Messages are derived by hand in src/kni_api.rs, so only the service
    // plumbing is generated and no protoc is needed.
    let mut service = Service::builder()
        .name("NetworkRuntime")
        .package("kni.v1");
    for (route, name, input, output) in METHODS {
        service = service.method(
            Method::builder()
                .name(*name)
                .route_name(*route)
                .input_type(format!("crate::kni_api::{}", input))
                .output_type(format!("crate::kni_api::{}", output))
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        );
    }

    Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[service.build()]);

    println!("cargo:rerun-if-changed=build.rs");
}

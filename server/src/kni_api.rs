//! `kni.v1` protobuf messages and the generated `NetworkRuntime` service.

use std::collections::HashMap;

/// Transport protocol of a port mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Protocol {
    Tcp = 0,
    Udp = 1,
    Sctp = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Isolation {
    /// Network namespace path; empty means the host namespace.
    #[prost(string, tag = "1")]
    pub path: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PortMapping {
    #[prost(enumeration = "Protocol", tag = "1")]
    pub protocol: i32,
    #[prost(int32, tag = "2")]
    pub container_port: i32,
    #[prost(int32, tag = "3")]
    pub host_port: i32,
    #[prost(string, tag = "4")]
    pub host_ip: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DnsConfig {
    #[prost(string, repeated, tag = "1")]
    pub servers: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub searches: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub options: Vec<String>,
}

/// Addressing of one sandbox interface.
#[derive(Clone, PartialEq, prost::Message)]
pub struct IpConfig {
    #[prost(string, repeated, tag = "1")]
    pub ip: Vec<String>,
    #[prost(string, tag = "2")]
    pub mac: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AttachNetworkRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub isolation: Option<Isolation>,
    #[prost(map = "string, string", tag = "3")]
    pub labels: HashMap<String, String>,
    #[prost(map = "string, string", tag = "4")]
    pub annotations: HashMap<String, String>,
    #[prost(map = "string, string", tag = "5")]
    pub extradata: HashMap<String, String>,
    #[prost(message, repeated, tag = "6")]
    pub port_mappings: Vec<PortMapping>,
    #[prost(message, optional, tag = "7")]
    pub dns_config: Option<DnsConfig>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AttachNetworkResponse {
    #[prost(map = "string, message", tag = "1")]
    pub ipconfigs: HashMap<String, IpConfig>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DetachNetworkRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(map = "string, string", tag = "2")]
    pub labels: HashMap<String, String>,
    #[prost(map = "string, string", tag = "3")]
    pub annotations: HashMap<String, String>,
    #[prost(map = "string, string", tag = "4")]
    pub extradata: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DetachNetworkResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetupNodeNetworkRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetupNodeNetworkResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryPodNetworkRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryPodNetworkResponse {
    #[prost(map = "string, message", tag = "1")]
    pub ipconfigs: HashMap<String, IpConfig>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryNodeNetworksRequest {}

/// Readiness of one node network.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Network {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub ready: bool,
    #[prost(map = "string, string", tag = "3")]
    pub extradata: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryNodeNetworksResponse {
    #[prost(message, repeated, tag = "1")]
    pub networks: Vec<Network>,
}

include!(concat!(env!("OUT_DIR"), "/kni.v1.NetworkRuntime.rs"));

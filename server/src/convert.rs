//! Mapping between `kni.v1` messages and the runtime's request types.

use std::collections::HashMap;
use std::time::Duration;

use kni_core::api::{self, AttachRequest, CallContext, DetachRequest, NodeNetwork, PodNetwork};
use tonic::metadata::MetadataMap;

use crate::kni_api;

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

pub fn attach_request(req: kni_api::AttachNetworkRequest) -> AttachRequest {
    AttachRequest {
        id: req.id,
        isolation: req.isolation.map(|i| api::Isolation { path: i.path }),
        labels: req.labels,
        annotations: req.annotations,
        extra_data: req.extradata,
        port_mappings: req.port_mappings.into_iter().map(port_mapping).collect(),
        dns_config: req.dns_config.map(|dns| api::DnsConfig {
            servers: dns.servers,
            searches: dns.searches,
            options: dns.options,
        }),
    }
}

fn port_mapping(pm: kni_api::PortMapping) -> api::PortMapping {
    let protocol = match pm.protocol() {
        kni_api::Protocol::Tcp => api::Protocol::Tcp,
        kni_api::Protocol::Udp => api::Protocol::Udp,
        kni_api::Protocol::Sctp => api::Protocol::Sctp,
    };
    api::PortMapping {
        protocol,
        container_port: pm.container_port,
        host_port: pm.host_port,
        host_ip: pm.host_ip,
    }
}

pub fn detach_request(req: kni_api::DetachNetworkRequest) -> DetachRequest {
    DetachRequest {
        id: req.id,
        labels: req.labels,
        annotations: req.annotations,
        extra_data: req.extradata,
    }
}

pub fn ip_configs(network: PodNetwork) -> HashMap<String, kni_api::IpConfig> {
    network
        .ip_configs
        .into_iter()
        .map(|(name, iface)| {
            (
                name,
                kni_api::IpConfig {
                    ip: iface.addresses,
                    mac: iface.mac_address,
                },
            )
        })
        .collect()
}

pub fn network(network: NodeNetwork) -> kni_api::Network {
    kni_api::Network {
        name: network.name,
        ready: network.ready,
        extradata: network.extra_data,
    }
}

/// Call context carrying the client's `grpc-timeout`, if it sent one.
pub fn call_context(metadata: &MetadataMap) -> CallContext {
    metadata
        .get(GRPC_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_grpc_timeout)
        .map(CallContext::with_timeout)
        .unwrap_or_else(CallContext::background)
}

/// Parse a `grpc-timeout` value: up to 8 digits and a unit.
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kni_core::record::InterfaceAddresses;

    #[test]
    fn test_attach_request_mapping() {
        let req = kni_api::AttachNetworkRequest {
            id: "sb1".to_string(),
            isolation: Some(kni_api::Isolation {
                path: "/var/run/netns/sb1".to_string(),
            }),
            extradata: HashMap::from([("cgroupPath".to_string(), "/kubepods/x".to_string())]),
            port_mappings: vec![kni_api::PortMapping {
                protocol: kni_api::Protocol::Sctp as i32,
                container_port: 80,
                host_port: 8080,
                host_ip: "10.0.0.1".to_string(),
            }],
            dns_config: Some(kni_api::DnsConfig {
                servers: vec!["10.96.0.10".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };

        let mapped = attach_request(req);
        assert_eq!(mapped.netns(), Some("/var/run/netns/sb1"));
        assert_eq!(mapped.extra_data["cgroupPath"], "/kubepods/x");
        assert_eq!(mapped.port_mappings[0].protocol, api::Protocol::Sctp);
        assert_eq!(mapped.port_mappings[0].host_port, 8080);
        assert_eq!(mapped.dns_config.unwrap().servers, vec!["10.96.0.10"]);
    }

    #[test]
    fn test_unknown_protocol_falls_back_to_tcp() {
        let pm = kni_api::PortMapping {
            protocol: 42,
            ..Default::default()
        };
        assert_eq!(port_mapping(pm).protocol, api::Protocol::Tcp);
    }

    #[test]
    fn test_ip_configs_mapping() {
        let mut network = PodNetwork::default();
        network.ip_configs.insert(
            "eth0".to_string(),
            InterfaceAddresses {
                mac_address: "02:42:0a:58:00:02".to_string(),
                addresses: vec!["10.88.0.2/16".to_string()],
            },
        );
        let configs = ip_configs(network);
        assert_eq!(configs["eth0"].ip, vec!["10.88.0.2/16"]);
        assert_eq!(configs["eth0"].mac, "02:42:0a:58:00:02");
    }

    #[test]
    fn test_parse_grpc_timeout() {
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_grpc_timeout("100u"), Some(Duration::from_micros(100)));
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("5x"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
        assert_eq!(parse_grpc_timeout("1é"), None);
    }

    #[tokio::test]
    async fn test_call_context_from_metadata() {
        let mut metadata = MetadataMap::new();
        assert!(call_context(&metadata).deadline().is_none());

        metadata.insert(GRPC_TIMEOUT_HEADER, "3S".parse().unwrap());
        assert!(call_context(&metadata).deadline().is_some());
    }
}

//! Translate attach/detach request fields into plugin invocation options.
//!
//! Reads well-known keys from the request:
//! - `io.kubernetes.pod.{name,namespace,uid}` labels → plugin arguments
//! - `kubernetes.io/{ingress,egress}-bandwidth` annotations → bandwidth
//! - `cgroupPath` extra data → cgroup capability

use std::collections::HashMap;

use kni_core::api::{DnsConfig, PortMapping};
use kni_core::error::{KniError, Result};
use kni_core::plugin::{
    BandwidthCapability, Capabilities, DnsCapability, NamespaceOptions, PortMappingCapability,
};
use kni_core::record::EXTRA_CGROUP_PATH;

use crate::quantity::parse_quantity;

/// Label keys carrying pod identity.
pub const LABEL_POD_NAME: &str = "io.kubernetes.pod.name";
pub const LABEL_POD_NAMESPACE: &str = "io.kubernetes.pod.namespace";
pub const LABEL_POD_UID: &str = "io.kubernetes.pod.uid";

/// Annotation keys for bandwidth limits.
pub const ANN_INGRESS_BANDWIDTH: &str = "kubernetes.io/ingress-bandwidth";
pub const ANN_EGRESS_BANDWIDTH: &str = "kubernetes.io/egress-bandwidth";

/// Smallest accepted bandwidth (1 kbit).
const MIN_BANDWIDTH: i128 = 1_000;
/// Largest accepted bandwidth (1 Pbit).
const MAX_BANDWIDTH: i128 = 1_000_000_000_000_000;

/// Request fields consumed by the translator.
#[derive(Debug, Clone, Copy)]
pub struct PodContext<'a> {
    pub id: &'a str,
    pub labels: &'a HashMap<String, String>,
    pub annotations: &'a HashMap<String, String>,
    pub extra_data: &'a HashMap<String, String>,
    pub port_mappings: &'a [PortMapping],
    pub dns_config: Option<&'a DnsConfig>,
}

/// Build plugin options for a sandbox.
pub fn namespace_options(pod: &PodContext<'_>) -> Result<NamespaceOptions> {
    let bandwidth = to_bandwidth(pod.annotations)?;

    let cgroup_path = pod
        .extra_data
        .get(EXTRA_CGROUP_PATH)
        .filter(|c| !c.is_empty())
        .cloned();
    if let Some(cgroup) = &cgroup_path {
        tracing::debug!(sandbox_id = %pod.id, cgroup = %cgroup, "Sandbox cgroup capability");
    }

    Ok(NamespaceOptions {
        labels: to_labels(pod),
        capabilities: Capabilities {
            pod_annotations: pod.annotations.clone(),
            port_mappings: to_port_mappings(pod.port_mappings),
            bandwidth,
            dns: pod.dns_config.map(to_dns),
            cgroup_path,
        },
    })
}

fn to_labels(pod: &PodContext<'_>) -> Vec<(String, String)> {
    let label = |key: &str| pod.labels.get(key).cloned().unwrap_or_default();
    vec![
        ("K8S_POD_NAMESPACE".to_string(), label(LABEL_POD_NAMESPACE)),
        ("K8S_POD_NAME".to_string(), label(LABEL_POD_NAME)),
        ("K8S_POD_INFRA_CONTAINER_ID".to_string(), pod.id.to_string()),
        ("K8S_POD_UID".to_string(), label(LABEL_POD_UID)),
        ("IgnoreUnknown".to_string(), "1".to_string()),
    ]
}

/// Keep only host-exposed mappings.
fn to_port_mappings(mappings: &[PortMapping]) -> Vec<PortMappingCapability> {
    mappings
        .iter()
        .filter(|m| m.host_port > 0)
        .map(|m| PortMappingCapability {
            host_port: m.host_port,
            container_port: m.container_port,
            protocol: m.protocol.to_string().to_lowercase(),
            host_ip: m.host_ip.clone(),
        })
        .collect()
}

fn to_dns(dns: &DnsConfig) -> DnsCapability {
    DnsCapability {
        servers: dns.servers.clone(),
        searches: dns.searches.clone(),
        options: dns.options.clone(),
    }
}

fn to_bandwidth(annotations: &HashMap<String, String>) -> Result<Option<BandwidthCapability>> {
    let ingress = parse_bandwidth(annotations, ANN_INGRESS_BANDWIDTH)?;
    let egress = parse_bandwidth(annotations, ANN_EGRESS_BANDWIDTH)?;

    if ingress.is_none() && egress.is_none() {
        return Ok(None);
    }

    let mut bandwidth = BandwidthCapability::default();
    if let Some(rate) = ingress {
        bandwidth.ingress_rate = rate;
        bandwidth.ingress_burst = u64::from(u32::MAX);
    }
    if let Some(rate) = egress {
        bandwidth.egress_rate = rate;
        bandwidth.egress_burst = u64::from(u32::MAX);
    }
    Ok(Some(bandwidth))
}

fn parse_bandwidth(annotations: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = annotations.get(key) else {
        return Ok(None);
    };

    let value = parse_quantity(raw).map_err(|e| {
        KniError::Validation(format!("reading pod bandwidth annotation {}: {}", key, e))
    })?;

    if value < MIN_BANDWIDTH {
        return Err(KniError::Validation(format!(
            "reading pod bandwidth annotation {}: resource is unreasonably small (< 1kbit): '{}'",
            key, raw
        )));
    }
    if value > MAX_BANDWIDTH {
        return Err(KniError::Validation(format!(
            "reading pod bandwidth annotation {}: resource is unreasonably large (> 1Pbit): '{}'",
            key, raw
        )));
    }

    // Bounded by MAX_BANDWIDTH above.
    Ok(Some(value as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kni_core::api::Protocol;

    struct Fixture {
        labels: HashMap<String, String>,
        annotations: HashMap<String, String>,
        extra_data: HashMap<String, String>,
        port_mappings: Vec<PortMapping>,
        dns: Option<DnsConfig>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                labels: HashMap::from([
                    (LABEL_POD_NAME.to_string(), "web".to_string()),
                    (LABEL_POD_NAMESPACE.to_string(), "default".to_string()),
                    (LABEL_POD_UID.to_string(), "uid-1".to_string()),
                ]),
                annotations: HashMap::new(),
                extra_data: HashMap::new(),
                port_mappings: vec![],
                dns: None,
            }
        }

        fn options(&self) -> Result<NamespaceOptions> {
            namespace_options(&PodContext {
                id: "sb1",
                labels: &self.labels,
                annotations: &self.annotations,
                extra_data: &self.extra_data,
                port_mappings: &self.port_mappings,
                dns_config: self.dns.as_ref(),
            })
        }

        fn with_ingress(mut self, value: &str) -> Self {
            self.annotations
                .insert(ANN_INGRESS_BANDWIDTH.to_string(), value.to_string());
            self
        }
    }

    #[test]
    fn test_fixed_labels() {
        let opts = Fixture::new().options().unwrap();
        let keys: Vec<&str> = opts.labels.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "K8S_POD_NAMESPACE",
                "K8S_POD_NAME",
                "K8S_POD_INFRA_CONTAINER_ID",
                "K8S_POD_UID",
                "IgnoreUnknown"
            ]
        );
        assert_eq!(opts.label("K8S_POD_NAME"), Some("web"));
        assert_eq!(opts.label("K8S_POD_INFRA_CONTAINER_ID"), Some("sb1"));
        assert_eq!(opts.label("IgnoreUnknown"), Some("1"));
    }

    #[test]
    fn test_missing_identity_labels_are_empty() {
        let mut fixture = Fixture::new();
        fixture.labels.clear();
        let opts = fixture.options().unwrap();
        assert_eq!(opts.label("K8S_POD_NAMESPACE"), Some(""));
    }

    #[test]
    fn test_annotations_passed_through() {
        let mut fixture = Fixture::new();
        fixture
            .annotations
            .insert("team".to_string(), "net".to_string());
        let opts = fixture.options().unwrap();
        assert_eq!(opts.capabilities.pod_annotations["team"], "net");
    }

    #[test]
    fn test_port_mappings_filter_and_lowercase() {
        let mut fixture = Fixture::new();
        fixture.port_mappings = vec![
            PortMapping {
                protocol: Protocol::Tcp,
                container_port: 80,
                host_port: 0,
                host_ip: String::new(),
            },
            PortMapping {
                protocol: Protocol::Udp,
                container_port: 53,
                host_port: 8080,
                host_ip: "0.0.0.0".to_string(),
            },
        ];
        let opts = fixture.options().unwrap();
        assert_eq!(
            opts.capabilities.port_mappings,
            vec![PortMappingCapability {
                host_port: 8080,
                container_port: 53,
                protocol: "udp".to_string(),
                host_ip: "0.0.0.0".to_string(),
            }]
        );
    }

    #[test]
    fn test_negative_host_port_dropped() {
        let mut fixture = Fixture::new();
        fixture.port_mappings = vec![PortMapping {
            host_port: -1,
            container_port: 80,
            ..Default::default()
        }];
        assert!(fixture.options().unwrap().capabilities.port_mappings.is_empty());
    }

    #[test]
    fn test_dns_only_when_supplied() {
        let mut fixture = Fixture::new();
        assert!(fixture.options().unwrap().capabilities.dns.is_none());

        fixture.dns = Some(DnsConfig {
            servers: vec!["10.96.0.10".to_string()],
            searches: vec!["svc.cluster.local".to_string()],
            options: vec!["ndots:5".to_string()],
        });
        let dns = fixture.options().unwrap().capabilities.dns.unwrap();
        assert_eq!(dns.servers, vec!["10.96.0.10"]);
        assert_eq!(dns.options, vec!["ndots:5"]);
    }

    #[test]
    fn test_bandwidth_below_floor_rejected() {
        let err = Fixture::new().with_ingress("500").options().unwrap_err();
        assert!(matches!(err, KniError::Validation(_)));
        assert!(err.to_string().contains("unreasonably small"));
    }

    #[test]
    fn test_bandwidth_accepted() {
        let opts = Fixture::new().with_ingress("500k").options().unwrap();
        let bandwidth = opts.capabilities.bandwidth.unwrap();
        assert_eq!(bandwidth.ingress_rate, 500_000);
        assert_eq!(bandwidth.ingress_burst, u32::MAX as u64);
        assert_eq!(bandwidth.egress_rate, 0);
        assert_eq!(bandwidth.egress_burst, 0);
    }

    #[test]
    fn test_bandwidth_above_ceiling_rejected() {
        let err = Fixture::new().with_ingress("2P").options().unwrap_err();
        assert!(err.to_string().contains("unreasonably large"));
    }

    #[test]
    fn test_bandwidth_bounds_inclusive() {
        assert!(Fixture::new().with_ingress("1k").options().is_ok());
        assert!(Fixture::new().with_ingress("1P").options().is_ok());
    }

    #[test]
    fn test_bandwidth_malformed_rejected() {
        let err = Fixture::new().with_ingress("fast").options().unwrap_err();
        assert!(matches!(err, KniError::Validation(_)));
    }

    #[test]
    fn test_egress_bandwidth() {
        let mut fixture = Fixture::new();
        fixture
            .annotations
            .insert(ANN_EGRESS_BANDWIDTH.to_string(), "10M".to_string());
        let bandwidth = fixture.options().unwrap().capabilities.bandwidth.unwrap();
        assert_eq!(bandwidth.egress_rate, 10_000_000);
        assert_eq!(bandwidth.ingress_rate, 0);
    }

    #[test]
    fn test_cgroup_capability() {
        let mut fixture = Fixture::new();
        assert!(fixture.options().unwrap().capabilities.cgroup_path.is_none());

        fixture
            .extra_data
            .insert(EXTRA_CGROUP_PATH.to_string(), "/kubepods/pod1".to_string());
        assert_eq!(
            fixture.options().unwrap().capabilities.cgroup_path.as_deref(),
            Some("/kubepods/pod1")
        );
    }
}

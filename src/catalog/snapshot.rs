//! In-memory policy snapshot loaded from YAML or JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{MeshConfig, PolicySource};
use crate::domain::{MeshService, Protocol, ServiceIdentity};
use crate::trafficpolicy::{HttpPerRouteRateLimitSpec, RateLimitSpec, RetryPolicy};
use crate::{Error, Result};

/// One port exposed by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    /// Defaults to `port`.
    #[serde(default)]
    pub target_port: Option<u16>,
    pub protocol: Protocol,
}

/// A service, the workload identity backing it and its endpoint addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub namespace: String,
    /// Service account of the backing workloads. Absent for traffic-split apex services.
    #[serde(default)]
    pub identity: Option<ServiceIdentity>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub ips: Vec<String>,
}

impl ServiceEntry {
    pub fn mesh_services(&self) -> impl Iterator<Item = MeshService> + '_ {
        self.ports.iter().map(move |p| MeshService {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            port: p.port,
            target_port: p.target_port.unwrap_or(p.port),
            protocol: p.protocol.clone(),
        })
    }

    fn is(&self, svc: &MeshService) -> bool {
        self.name == svc.name && self.namespace == svc.namespace
    }
}

/// A rule of an access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrafficTargetRule {
    /// Named matches of an HTTP route group in the grant's namespace. No
    /// names selects every match of the group.
    HttpRouteGroup {
        name: String,
        #[serde(default)]
        matches: Vec<String>,
    },
    /// TCP traffic to the listed ports; no ports admits every port.
    TcpRoute {
        #[serde(default)]
        ports: Vec<u16>,
    },
}

/// Grants source identities access to a destination identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficTarget {
    pub name: String,
    pub namespace: String,
    pub destination: ServiceIdentity,
    pub sources: Vec<ServiceIdentity>,
    #[serde(default)]
    pub rules: Vec<TrafficTargetRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMatch {
    pub name: String,
    #[serde(default)]
    pub path_regex: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRouteGroup {
    pub name: String,
    pub namespace: String,
    pub matches: Vec<HttpMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBackend {
    pub service: String,
    pub weight: u32,
}

/// Splits traffic addressed to an apex service across backend services of
/// the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub backends: Vec<SplitBackend>,
}

/// Rate limit applied to the routes matching `path`, and `methods` when given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRouteRateLimit {
    pub path: String,
    #[serde(default)]
    pub methods: Vec<String>,
    pub rate_limit: HttpPerRouteRateLimitSpec,
}

/// Connection and request settings for the upstream side of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTrafficSetting {
    pub name: String,
    pub namespace: String,
    /// Name of the service in `namespace` the setting applies to.
    pub service: String,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
    #[serde(default)]
    pub http_routes: Vec<HttpRouteRateLimit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub name: String,
    pub namespace: String,
}

/// Retries applied by `source` when calling any of `destinations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retry {
    pub name: String,
    pub namespace: String,
    pub source: ServiceIdentity,
    pub destinations: Vec<ServiceRef>,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub number: u16,
    pub protocol: Protocol,
}

/// Destinations outside the mesh that `sources` may reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Egress {
    pub name: String,
    pub namespace: String,
    pub sources: Vec<ServiceIdentity>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    pub ports: Vec<PortSpec>,
    /// HTTP route groups in `namespace` restricting plain HTTP egress.
    #[serde(default)]
    pub http_route_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTls {
    #[serde(default)]
    pub skip_client_cert_validation: bool,
    #[serde(default)]
    pub sni_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressBackendTarget {
    pub name: String,
    pub port: PortSpec,
    #[serde(default)]
    pub tls: BackendTls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngressSource {
    IpRange { cidr: String },
    AuthenticatedPrincipal { name: String },
}

/// Admits traffic from outside the mesh to backend services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressBackend {
    pub name: String,
    pub namespace: String,
    pub backends: Vec<IngressBackendTarget>,
    #[serde(default)]
    pub sources: Vec<IngressSource>,
}

impl IngressBackend {
    /// The backend entry targeting `svc`, if any.
    pub fn backend_for(&self, svc: &MeshService) -> Option<&IngressBackendTarget> {
        if self.namespace != svc.namespace {
            return None;
        }
        self.backends.iter().find(|b| b.name == svc.name && b.port.number == svc.target_port)
    }
}

/// Every policy object the compiler reads, as one value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub mesh_config: MeshConfig,
    pub services: Vec<ServiceEntry>,
    pub traffic_targets: Vec<TrafficTarget>,
    pub http_route_groups: Vec<HttpRouteGroup>,
    pub traffic_splits: Vec<TrafficSplit>,
    pub upstream_traffic_settings: Vec<UpstreamTrafficSetting>,
    pub retries: Vec<Retry>,
    pub egresses: Vec<Egress>,
    pub ingress_backends: Vec<IngressBackend>,
}

impl Snapshot {
    /// Reads a snapshot, choosing JSON for `.json` files and YAML otherwise.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            source: e,
            context: format!("Failed to read snapshot {}", path.display()),
        })?;
        let is_json = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let snapshot = if is_json { serde_json::from_str(&content)? } else { serde_yaml::from_str(&content)? };
        Ok(snapshot)
    }
}

impl PolicySource for Snapshot {
    fn mesh_config(&self) -> MeshConfig {
        self.mesh_config.clone()
    }

    fn list_services(&self) -> Vec<MeshService> {
        self.services.iter().flat_map(ServiceEntry::mesh_services).collect()
    }

    fn services_for_identity(&self, identity: &ServiceIdentity) -> Vec<MeshService> {
        self.services
            .iter()
            .filter(|s| s.identity.as_ref() == Some(identity))
            .flat_map(ServiceEntry::mesh_services)
            .collect()
    }

    fn service_ips(&self, svc: &MeshService) -> Vec<String> {
        self.services.iter().filter(|s| s.is(svc)).flat_map(|s| s.ips.iter().cloned()).collect()
    }

    fn list_traffic_targets(&self) -> Vec<TrafficTarget> {
        self.traffic_targets.clone()
    }

    fn list_http_route_groups(&self) -> Vec<HttpRouteGroup> {
        self.http_route_groups.clone()
    }

    fn list_traffic_splits(&self) -> Vec<TrafficSplit> {
        self.traffic_splits.clone()
    }

    fn upstream_traffic_setting(&self, svc: &MeshService) -> Option<UpstreamTrafficSetting> {
        self.upstream_traffic_settings
            .iter()
            .find(|s| s.service == svc.name && s.namespace == svc.namespace)
            .cloned()
    }

    fn ingress_backend(&self, svc: &MeshService) -> Option<IngressBackend> {
        self.ingress_backends.iter().find(|ib| ib.backend_for(svc).is_some()).cloned()
    }

    fn egress_policies(&self, identity: &ServiceIdentity) -> Vec<Egress> {
        self.egresses.iter().filter(|e| e.sources.contains(identity)).cloned().collect()
    }

    fn retry_policy(&self, source: &ServiceIdentity, destination: &MeshService) -> Option<RetryPolicy> {
        self.retries
            .iter()
            .find(|r| {
                &r.source == source
                    && r.destinations
                        .iter()
                        .any(|d| d.name == destination.name && d.namespace == destination.namespace)
            })
            .map(|r| r.retry_policy.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SNAPSHOT: &str = r#"
mesh_config:
  permissive_traffic_policy_mode: false
services:
  - name: bookstore
    namespace: store
    identity: { name: bookstore, namespace: store }
    ports:
      - { port: 8080, target_port: 80, protocol: http }
      - { port: 9090, protocol: tcp }
    ips: ["10.0.0.5"]
  - name: bookstore-apex
    namespace: store
    ports:
      - { port: 8080, target_port: 80, protocol: http }
traffic_targets:
  - name: bookbuyer-access
    namespace: store
    destination: { name: bookstore, namespace: store }
    sources: [{ name: bookbuyer, namespace: buyer }]
    rules:
      - kind: http_route_group
        name: books
        matches: [buy]
      - kind: tcp_route
        ports: [9090]
ingress_backends:
  - name: edge
    namespace: store
    backends:
      - name: bookstore
        port: { number: 80, protocol: https }
        tls: { sni_hosts: [bookstore.example.com] }
    sources:
      - kind: ip_range
        cidr: 10.1.0.0/16
"#;

    #[test]
    fn parses_yaml_snapshot() {
        let snapshot: Snapshot = serde_yaml::from_str(SNAPSHOT).unwrap();
        let identity = ServiceIdentity::new("bookstore", "store");

        let services = snapshot.services_for_identity(&identity);
        assert_eq!(services.len(), 2);
        assert_eq!(services[1].target_port, 9090);
        assert_eq!(services[1].protocol, Protocol::Tcp);
        assert_eq!(snapshot.list_services().len(), 3);
        assert_eq!(snapshot.service_ips(&services[0]), vec!["10.0.0.5"]);

        match &snapshot.traffic_targets[0].rules[1] {
            TrafficTargetRule::TcpRoute { ports } => assert_eq!(ports, &vec![9090]),
            other => panic!("unexpected rule {:?}", other),
        }

        let backend = snapshot.ingress_backend(&services[0]).unwrap();
        assert_eq!(backend.backend_for(&services[0]).unwrap().tls.sni_hosts, vec!["bookstore.example.com"]);
        assert!(snapshot.ingress_backend(&services[1]).is_none());
    }

    #[test]
    fn from_file_picks_format_by_extension() {
        let snapshot: Snapshot = serde_yaml::from_str(SNAPSHOT).unwrap();

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, "{}", serde_json::to_string(&snapshot).unwrap()).unwrap();
        assert_eq!(Snapshot::from_file(json.path()).unwrap(), snapshot);

        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(yaml, "{}", SNAPSHOT).unwrap();
        assert_eq!(Snapshot::from_file(yaml.path()).unwrap(), snapshot);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Snapshot::from_file("/nonexistent/snapshot.yaml").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn retry_policy_matches_source_and_destination() {
        let mut snapshot = Snapshot::default();
        snapshot.retries.push(Retry {
            name: "retry".into(),
            namespace: "buyer".into(),
            source: ServiceIdentity::new("bookbuyer", "buyer"),
            destinations: vec![ServiceRef { name: "bookstore".into(), namespace: "store".into() }],
            retry_policy: RetryPolicy { retry_on: "5xx".into(), num_retries: Some(3), ..Default::default() },
        });
        let svc = MeshService {
            name: "bookstore".into(),
            namespace: "store".into(),
            port: 80,
            target_port: 80,
            protocol: Protocol::Http,
        };

        let retry = snapshot.retry_policy(&ServiceIdentity::new("bookbuyer", "buyer"), &svc).unwrap();
        assert_eq!(retry.num_retries, Some(3));
        assert!(snapshot.retry_policy(&ServiceIdentity::new("other", "buyer"), &svc).is_none());
    }
}

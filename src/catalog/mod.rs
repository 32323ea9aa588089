//! # Mesh Catalog
//!
//! Derives the traffic policies of one proxy from the policy objects of the
//! mesh. The [`PolicySource`] is a read-only view over already cached
//! objects; [`Snapshot`] is the in-memory implementation used by the CLI and
//! the tests.
//!
//! - [`MeshCatalog::inbound_mesh_policy`]: what the proxy's services accept
//!   from other mesh workloads
//! - [`MeshCatalog::outbound_mesh_policy`]: which mesh services the proxy may call
//! - [`MeshCatalog::egress_policy`]: destinations outside the mesh
//! - [`MeshCatalog::ingress_policy`]: clients outside the mesh

mod egress;
mod inbound;
mod ingress;
mod outbound;
pub mod snapshot;

pub use snapshot::{
    Egress, HttpMatch, HttpRouteGroup, HttpRouteRateLimit, IngressBackend, IngressSource,
    ServiceEntry, Snapshot, TrafficSplit, TrafficTarget, TrafficTargetRule, UpstreamTrafficSetting,
};

use serde::{Deserialize, Serialize};
use regex::Regex;
use tracing::{debug, error};

use crate::domain::{MeshService, ServiceIdentity};
use crate::trafficpolicy::{
    HttpRouteMatch, MergeConflict, PathMatchType, RetryPolicy, WILDCARD_METHOD, WILDCARD_PATH_REGEX,
};
use crate::xds::filters::http::ExtAuthzConfig;

/// Read access to the mesh's policy objects.
pub trait PolicySource: Send + Sync {
    fn mesh_config(&self) -> MeshConfig;

    /// Every service port in the mesh.
    fn list_services(&self) -> Vec<MeshService>;

    /// Service ports backed by workloads running as `identity`.
    fn services_for_identity(&self, identity: &ServiceIdentity) -> Vec<MeshService>;

    /// Endpoint addresses of `svc`.
    fn service_ips(&self, svc: &MeshService) -> Vec<String>;

    fn list_traffic_targets(&self) -> Vec<TrafficTarget>;

    fn list_http_route_groups(&self) -> Vec<HttpRouteGroup>;

    fn list_traffic_splits(&self) -> Vec<TrafficSplit>;

    fn upstream_traffic_setting(&self, svc: &MeshService) -> Option<UpstreamTrafficSetting>;

    fn ingress_backend(&self, svc: &MeshService) -> Option<IngressBackend>;

    /// Egress policies listing `identity` as a source.
    fn egress_policies(&self, identity: &ServiceIdentity) -> Vec<Egress>;

    fn retry_policy(&self, source: &ServiceIdentity, destination: &MeshService) -> Option<RetryPolicy>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingSettings {
    /// Collector path; empty uses the Zipkin v2 default.
    pub endpoint: String,
}

/// Mesh-wide switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Allow every workload to reach every service; access-control objects are ignored.
    pub permissive_traffic_policy_mode: bool,
    /// Let all traffic leave the mesh through the pass-through chain.
    pub enable_egress: bool,
    pub tracing: Option<TracingSettings>,
    pub ext_authz: Option<ExtAuthzConfig>,
    pub enable_active_health_checks: bool,
    pub enable_stats_headers: bool,
    /// Overrides the compiler's trust domain.
    pub trust_domain: Option<String>,
}

/// A derived policy with the merge conflicts found while building it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derived<T> {
    pub policy: T,
    pub conflicts: Vec<MergeConflict>,
}

/// Policy derivation for proxies of one mesh.
pub struct MeshCatalog<'a> {
    source: &'a dyn PolicySource,
    mesh: MeshConfig,
    trust_domain: String,
}

impl<'a> MeshCatalog<'a> {
    /// `trust_domain` is used unless the mesh configuration overrides it.
    pub fn new(source: &'a dyn PolicySource, trust_domain: &str) -> Self {
        let mesh = source.mesh_config();
        let trust_domain = mesh.trust_domain.clone().unwrap_or_else(|| trust_domain.to_string());
        Self { source, mesh, trust_domain }
    }

    pub fn mesh_config(&self) -> &MeshConfig {
        &self.mesh
    }

    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    fn permissive(&self) -> bool {
        self.mesh.permissive_traffic_policy_mode
    }

    /// Traffic-split apex services with a backend among `services`.
    ///
    /// The apex inherits the target port of the backend port it is split to.
    fn apex_services_for(&self, services: &[MeshService]) -> Vec<MeshService> {
        let all = self.source.list_services();
        let mut apexes: Vec<MeshService> = Vec::new();
        for split in self.source.list_traffic_splits() {
            for backend in services {
                let is_backend = backend.namespace == split.namespace
                    && split.backends.iter().any(|b| b.service == backend.name);
                if !is_backend {
                    continue;
                }
                for apex in all.iter().filter(|s| s.name == split.service && s.namespace == split.namespace) {
                    let apex = MeshService { target_port: backend.target_port, ..apex.clone() };
                    if apex.port == backend.port && !apexes.contains(&apex) {
                        debug!(apex = %apex, backend = %backend, "Found traffic split apex service");
                        apexes.push(apex);
                    }
                }
            }
        }
        apexes
    }

    /// Route matches of the route group `namespace/name` selected by `names`.
    ///
    /// Missing paths and methods are wildcarded. Matches whose path or header
    /// patterns are not valid regular expressions are dropped.
    fn route_group_matches(&self, namespace: &str, name: &str, names: &[String]) -> Vec<HttpRouteMatch> {
        let groups = self.source.list_http_route_groups();
        let Some(group) = groups.iter().find(|g| g.name == name && g.namespace == namespace) else {
            debug!(route_group = %name, namespace = %namespace, "Referenced HTTP route group not found");
            return Vec::new();
        };

        group
            .matches
            .iter()
            .filter(|m| names.is_empty() || names.contains(&m.name))
            .filter(|m| {
                let patterns = std::iter::once(&m.path_regex).chain(m.headers.values());
                match patterns.filter(|p| !p.is_empty()).map(|p| Regex::new(p)).find_map(|r| r.err()) {
                    Some(e) => {
                        error!(route_group = %name, route_match = %m.name, error = %e, "Ignoring route match with invalid regex");
                        false
                    }
                    None => true,
                }
            })
            .map(|m| HttpRouteMatch {
                path: if m.path_regex.is_empty() { WILDCARD_PATH_REGEX.to_string() } else { m.path_regex.clone() },
                path_match_type: PathMatchType::Regex,
                methods: if m.methods.is_empty() { vec![WILDCARD_METHOD.to_string()] } else { m.methods.clone() },
                headers: m.headers.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::snapshot::*;
    use super::*;
    use crate::domain::Protocol;

    pub fn identity(name: &str, ns: &str) -> ServiceIdentity {
        ServiceIdentity::new(name, ns)
    }

    pub fn service(name: &str, ns: &str, identity: Option<ServiceIdentity>, port: u16, protocol: Protocol) -> ServiceEntry {
        ServiceEntry {
            name: name.into(),
            namespace: ns.into(),
            identity,
            ports: vec![ServicePort { port, target_port: None, protocol }],
            ips: Vec::new(),
        }
    }

    pub fn mesh_service(name: &str, ns: &str, port: u16, protocol: Protocol) -> MeshService {
        MeshService { name: name.into(), namespace: ns.into(), port, target_port: port, protocol }
    }

    /// bookbuyer (ns buyer) may call bookstore (ns store) on the `buy` route.
    pub fn bookstore_snapshot() -> Snapshot {
        let mut bookstore =
            service("bookstore", "store", Some(identity("bookstore", "store")), 8080, Protocol::Http);
        bookstore.ips = vec!["10.0.0.5".into(), "10.0.0.6".into(), "10.0.0.5".into()];

        Snapshot {
            services: vec![
                bookstore,
                service("bookbuyer", "buyer", Some(identity("bookbuyer", "buyer")), 80, Protocol::Http),
            ],
            traffic_targets: vec![TrafficTarget {
                name: "bookstore-access".into(),
                namespace: "store".into(),
                destination: identity("bookstore", "store"),
                sources: vec![identity("bookbuyer", "buyer")],
                rules: vec![TrafficTargetRule::HttpRouteGroup { name: "books".into(), matches: vec!["buy".into()] }],
            }],
            http_route_groups: vec![HttpRouteGroup {
                name: "books".into(),
                namespace: "store".into(),
                matches: vec![
                    HttpMatch {
                        name: "buy".into(),
                        path_regex: "/buy".into(),
                        methods: vec!["GET".into()],
                        headers: Default::default(),
                    },
                    HttpMatch {
                        name: "sell".into(),
                        path_regex: String::new(),
                        methods: Vec::new(),
                        headers: Default::default(),
                    },
                ],
            }],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::snapshot::{SplitBackend, TrafficSplit};
    use super::*;
    use crate::domain::Protocol;

    #[test]
    fn trust_domain_override() {
        let mut snapshot = Snapshot::default();
        assert_eq!(MeshCatalog::new(&snapshot, "cluster.local").trust_domain(), "cluster.local");

        snapshot.mesh_config.trust_domain = Some("mesh.example".into());
        assert_eq!(MeshCatalog::new(&snapshot, "cluster.local").trust_domain(), "mesh.example");
    }

    #[test]
    fn route_group_matches_wildcard_missing_fields() {
        let snapshot = bookstore_snapshot();
        let catalog = MeshCatalog::new(&snapshot, "cluster.local");

        let all = catalog.route_group_matches("store", "books", &[]);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].path, WILDCARD_PATH_REGEX);
        assert_eq!(all[1].methods, vec![WILDCARD_METHOD]);

        let buy = catalog.route_group_matches("store", "books", &["buy".to_string()]);
        assert_eq!(buy.len(), 1);
        assert_eq!(buy[0].path, "/buy");

        assert!(catalog.route_group_matches("other", "books", &[]).is_empty());
    }

    #[test]
    fn invalid_regex_match_dropped() {
        let mut snapshot = bookstore_snapshot();
        snapshot.http_route_groups[0].matches[1].path_regex = "/sell(".into();
        let catalog = MeshCatalog::new(&snapshot, "cluster.local");

        let matches = catalog.route_group_matches("store", "books", &[]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "/buy");
    }

    #[test]
    fn apex_inherits_backend_target_port() {
        let mut snapshot = Snapshot::default();
        let mut apex = service("bookstore", "store", None, 8080, Protocol::Http);
        apex.ports[0].target_port = Some(1);
        snapshot.services.push(apex);
        snapshot.traffic_splits.push(TrafficSplit {
            name: "split".into(),
            namespace: "store".into(),
            service: "bookstore".into(),
            backends: vec![SplitBackend { service: "bookstore-v1".into(), weight: 100 }],
        });
        let mut backend = mesh_service("bookstore-v1", "store", 8080, Protocol::Http);
        backend.target_port = 80;

        let catalog = MeshCatalog::new(&snapshot, "cluster.local");
        let apexes = catalog.apex_services_for(&[backend]);
        assert_eq!(apexes.len(), 1);
        assert_eq!(apexes[0].name, "bookstore");
        assert_eq!(apexes[0].target_port, 80);
    }
}

use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::snapshot::{TrafficTarget, TrafficTargetRule, UpstreamTrafficSetting};
use super::{Derived, MeshCatalog};
use crate::domain::{MeshService, Principal, ServiceIdentity, WeightedCluster, CLUSTER_WEIGHT_ACCEPT_ALL};
use crate::trafficpolicy::{
    dedup_traffic_matches, merge_inbound_policies, merge_rules, sanitize_http_methods, HttpRouteMatch,
    InboundMeshTrafficPolicy, InboundTrafficPolicy, RouteWeightedClusters, Rule, TrafficMatch,
    TrafficTargetGrant, HOST_HEADER,
};

/// Name of the inbound traffic match of a service port.
pub fn inbound_traffic_match_name(svc: &MeshService) -> String {
    format!("inbound_{}_{}_{}", svc, svc.target_port, svc.protocol)
}

fn local_cluster(svc: &MeshService) -> WeightedCluster {
    WeightedCluster::new(svc.local_cluster_name(), CLUSTER_WEIGHT_ACCEPT_ALL)
}

/// Attaches the per-route rate limit configured for `route`'s path and methods.
fn with_route_rate_limit(
    mut route: RouteWeightedClusters,
    setting: Option<&UpstreamTrafficSetting>,
) -> RouteWeightedClusters {
    let Some(setting) = setting else {
        return route;
    };
    let route_methods = sanitize_http_methods(&route.http_route_match.methods);
    route.rate_limit = setting
        .http_routes
        .iter()
        .find(|r| {
            r.path == route.http_route_match.path
                && (r.methods.is_empty() || sanitize_http_methods(&r.methods) == route_methods)
        })
        .map(|r| r.rate_limit.clone());
    route
}

impl MeshCatalog<'_> {
    /// Inbound policy for the services of `identity`.
    pub fn inbound_mesh_policy(&self, identity: &ServiceIdentity) -> Derived<InboundMeshTrafficPolicy> {
        let services = self.source.services_for_identity(identity);
        let mut derived = Derived::<InboundMeshTrafficPolicy>::default();

        derived.policy.traffic_matches = dedup_traffic_matches(
            services
                .iter()
                .map(|svc| {
                    let mut traffic_match =
                        TrafficMatch::new(inbound_traffic_match_name(svc), svc.target_port, svc.protocol.clone());
                    traffic_match.server_names = vec![svc.fqdn()];
                    traffic_match.cluster = Some(svc.local_cluster_name());
                    traffic_match.rate_limit =
                        self.source.upstream_traffic_setting(svc).and_then(|s| s.rate_limit);
                    traffic_match
                })
                .collect(),
        );

        let targets: Vec<TrafficTarget> = if self.permissive() {
            Vec::new()
        } else {
            self.source.list_traffic_targets().into_iter().filter(|t| &t.destination == identity).collect()
        };

        derived.policy.traffic_targets = targets.iter().map(traffic_target_grant).collect();

        let mut all_services = services.clone();
        all_services.extend(self.apex_services_for(&services));

        let mut per_port: BTreeMap<u16, Vec<InboundTrafficPolicy>> = BTreeMap::new();
        for svc in all_services.iter().filter(|s| s.protocol.is_http_like()) {
            let policies = self.inbound_http_policies(svc, &targets, &mut derived);
            let existing = per_port.remove(&svc.target_port).unwrap_or_default();
            let merged = merge_inbound_policies(existing, policies);
            derived.conflicts.extend(merged.conflicts);
            per_port.insert(svc.target_port, merged.items);
        }
        derived.policy.http_route_configs_per_port = per_port;

        debug!(
            proxy_identity = %identity,
            traffic_matches = derived.policy.traffic_matches.len(),
            ports = derived.policy.http_route_configs_per_port.len(),
            grants = derived.policy.traffic_targets.len(),
            "Derived inbound mesh policy"
        );
        derived
    }

    /// The service's policy plus one policy per host header route.
    fn inbound_http_policies(
        &self,
        svc: &MeshService,
        targets: &[TrafficTarget],
        derived: &mut Derived<InboundMeshTrafficPolicy>,
    ) -> Vec<InboundTrafficPolicy> {
        let setting = self.source.upstream_traffic_setting(svc);
        let mut policy = InboundTrafficPolicy::new(svc.fqdn(), svc.hostnames(&svc.namespace));
        policy.rate_limit = setting.as_ref().and_then(|s| s.rate_limit.clone());

        if self.permissive() {
            let route = RouteWeightedClusters::new(HttpRouteMatch::wildcard(), [local_cluster(svc)]);
            policy.rules = vec![Rule::new(with_route_rate_limit(route, setting.as_ref()), [Principal::wildcard()])];
            return vec![policy];
        }

        let mut host_policies: Vec<InboundTrafficPolicy> = Vec::new();
        for target in targets {
            let principals: Vec<Principal> =
                target.sources.iter().map(|s| s.principal(&self.trust_domain)).collect();

            let mut rules = Vec::new();
            for route_match in self.traffic_target_route_matches(target) {
                let route = with_route_rate_limit(
                    RouteWeightedClusters::new(route_match.clone(), [local_cluster(svc)]),
                    setting.as_ref(),
                );
                let rule = Rule::new(route, principals.iter().cloned());

                match route_match.headers.get(HOST_HEADER) {
                    Some(host) => {
                        trace!(host = %host, service = %svc, "Route with host header gets its own virtual host");
                        let mut host_policy = InboundTrafficPolicy::new(host.clone(), vec![host.clone()]);
                        host_policy.rules.push(rule);
                        let merged = merge_inbound_policies(std::mem::take(&mut host_policies), [host_policy]);
                        derived.conflicts.extend(merged.conflicts);
                        host_policies = merged.items;
                    }
                    None => rules.push(rule),
                }
            }

            let merged = merge_rules(std::mem::take(&mut policy.rules), rules);
            derived.conflicts.extend(merged.conflicts);
            policy.rules = merged.items;
        }

        let mut policies = vec![policy];
        policies.extend(host_policies);
        policies
    }

    fn traffic_target_route_matches(&self, target: &TrafficTarget) -> Vec<HttpRouteMatch> {
        target
            .rules
            .iter()
            .flat_map(|rule| match rule {
                TrafficTargetRule::HttpRouteGroup { name, matches } => {
                    self.route_group_matches(&target.namespace, name, matches)
                }
                TrafficTargetRule::TcpRoute { .. } => Vec::new(),
            })
            .collect()
    }
}

fn traffic_target_grant(target: &TrafficTarget) -> TrafficTargetGrant {
    TrafficTargetGrant {
        name: format!("{}/{}", target.namespace, target.name),
        destination: target.destination.clone(),
        sources: target.sources.clone(),
        tcp_ports: target
            .rules
            .iter()
            .flat_map(|rule| match rule {
                TrafficTargetRule::TcpRoute { ports } => ports.clone(),
                TrafficTargetRule::HttpRouteGroup { .. } => Vec::new(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::*;
    use crate::catalog::snapshot::{HttpMatch, HttpRouteRateLimit};
    use crate::catalog::{Snapshot, TrafficTargetRule};
    use crate::domain::Protocol;
    use crate::trafficpolicy::{HttpLocalRateLimitSpec, HttpPerRouteRateLimitSpec};

    fn bookstore() -> ServiceIdentity {
        identity("bookstore", "store")
    }

    #[test]
    fn traffic_match_per_service_port() {
        let snapshot = bookstore_snapshot();
        let derived = MeshCatalog::new(&snapshot, "cluster.local").inbound_mesh_policy(&bookstore());

        let tm = &derived.policy.traffic_matches[0];
        assert_eq!(tm.name, "inbound_store/bookstore_8080_http");
        assert_eq!(tm.destination_port, 8080);
        assert_eq!(tm.server_names, vec!["bookstore.store.svc.cluster.local"]);
        assert_eq!(tm.cluster.as_deref(), Some("store/bookstore|8080|local"));

        let grant = &derived.policy.traffic_targets[0];
        assert_eq!(grant.name, "store/bookstore-access");
        assert!(grant.tcp_ports.is_empty());
    }

    #[test]
    fn rules_from_traffic_targets() {
        let snapshot = bookstore_snapshot();
        let derived = MeshCatalog::new(&snapshot, "cluster.local").inbound_mesh_policy(&bookstore());

        let policies = &derived.policy.http_route_configs_per_port[&8080];
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name, "bookstore.store.svc.cluster.local");
        assert!(policies[0].hostnames.contains(&"bookstore".to_string()));

        let rule = &policies[0].rules[0];
        assert_eq!(rule.route.http_route_match.path, "/buy");
        assert_eq!(
            rule.allowed_principals.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            vec!["bookbuyer.buyer.cluster.local"]
        );
        assert_eq!(
            rule.route.weighted_clusters.iter().next().unwrap().cluster_name,
            "store/bookstore|8080|local"
        );
    }

    #[test]
    fn same_route_from_two_targets_unions_principals() {
        let mut snapshot = bookstore_snapshot();
        let mut second = snapshot.traffic_targets[0].clone();
        second.name = "bookthief-access".into();
        second.sources = vec![identity("bookthief", "thief")];
        snapshot.traffic_targets.push(second);

        let derived = MeshCatalog::new(&snapshot, "cluster.local").inbound_mesh_policy(&bookstore());
        let rules = &derived.policy.http_route_configs_per_port[&8080][0].rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].allowed_principals.len(), 2);
        assert!(derived.conflicts.is_empty());
    }

    #[test]
    fn permissive_mode_allows_any_principal() {
        let mut snapshot = bookstore_snapshot();
        snapshot.mesh_config.permissive_traffic_policy_mode = true;

        let derived = MeshCatalog::new(&snapshot, "cluster.local").inbound_mesh_policy(&bookstore());
        assert!(derived.policy.traffic_targets.is_empty());

        let rules = &derived.policy.http_route_configs_per_port[&8080][0].rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].route.http_route_match, HttpRouteMatch::wildcard());
        assert!(rules[0].allowed_principals.contains(&Principal::wildcard()));
    }

    #[test]
    fn host_header_route_gets_own_policy() {
        let mut snapshot = bookstore_snapshot();
        snapshot.http_route_groups[0].matches.push(HttpMatch {
            name: "vanity".into(),
            path_regex: "/".into(),
            methods: vec!["GET".into()],
            headers: [("host".to_string(), "books.example.com".to_string())].into(),
        });
        snapshot.traffic_targets[0].rules =
            vec![TrafficTargetRule::HttpRouteGroup { name: "books".into(), matches: vec!["buy".into(), "vanity".into()] }];

        let derived = MeshCatalog::new(&snapshot, "cluster.local").inbound_mesh_policy(&bookstore());
        let policies = &derived.policy.http_route_configs_per_port[&8080];
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[1].name, "books.example.com");
        assert_eq!(policies[1].hostnames, vec!["books.example.com"]);
        assert_eq!(policies[0].rules.len(), 1);
    }

    #[test]
    fn tcp_services_have_no_route_configs() {
        let mut snapshot = Snapshot::default();
        snapshot.services.push(service("db", "data", Some(identity("db", "data")), 5432, Protocol::Tcp));
        snapshot.traffic_targets.push(TrafficTarget {
            name: "db-access".into(),
            namespace: "data".into(),
            destination: identity("db", "data"),
            sources: vec![identity("app", "web")],
            rules: vec![TrafficTargetRule::TcpRoute { ports: vec![5432] }],
        });

        let derived = MeshCatalog::new(&snapshot, "cluster.local").inbound_mesh_policy(&identity("db", "data"));
        assert_eq!(derived.policy.traffic_matches.len(), 1);
        assert!(derived.policy.http_route_configs_per_port.is_empty());
        assert_eq!(derived.policy.traffic_targets[0].tcp_ports, vec![5432]);
    }

    #[test]
    fn per_route_rate_limit_attached_by_path() {
        let mut snapshot = bookstore_snapshot();
        snapshot.upstream_traffic_settings.push(UpstreamTrafficSetting {
            name: "limits".into(),
            namespace: "store".into(),
            service: "bookstore".into(),
            rate_limit: None,
            http_routes: vec![HttpRouteRateLimit {
                path: "/buy".into(),
                methods: Vec::new(),
                rate_limit: HttpPerRouteRateLimitSpec {
                    local: Some(HttpLocalRateLimitSpec {
                        requests: 10,
                        unit: "second".into(),
                        burst: 0,
                        response_status_code: 0,
                        response_headers_to_add: Vec::new(),
                    }),
                    global: None,
                },
            }],
        });

        let derived = MeshCatalog::new(&snapshot, "cluster.local").inbound_mesh_policy(&bookstore());
        let route = &derived.policy.http_route_configs_per_port[&8080][0].rules[0].route;
        assert_eq!(route.rate_limit.as_ref().and_then(|r| r.local.as_ref()).map(|l| l.requests), Some(10));
    }
}

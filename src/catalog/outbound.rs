use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, error, warn};

use super::{Derived, MeshCatalog};
use crate::domain::{MeshService, ServiceIdentity, WeightedCluster, CLUSTER_WEIGHT_ACCEPT_ALL};
use crate::trafficpolicy::{
    merge_outbound_policies, HttpRouteMatch, OutboundMeshTrafficPolicy, OutboundTrafficPolicy, TrafficMatch,
};

/// Name of the outbound traffic match of an upstream service port.
pub fn outbound_traffic_match_name(svc: &MeshService) -> String {
    format!("{}_{}_{}", svc, svc.port, svc.protocol)
}

/// Host CIDR of an endpoint address, `None` when it is not an IP.
fn host_range(ip: &str) -> Option<String> {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => Some(format!("{}/32", ip)),
        Ok(IpAddr::V6(_)) => Some(format!("{}/128", ip)),
        Err(_) => None,
    }
}

impl MeshCatalog<'_> {
    /// Upstream services `identity` may call, apex services included.
    fn allowed_upstream_services(&self, identity: &ServiceIdentity) -> Vec<MeshService> {
        let mut services: Vec<MeshService> = if self.permissive() {
            self.source.list_services()
        } else {
            let mut allowed = Vec::new();
            for target in self.source.list_traffic_targets() {
                if !target.sources.contains(identity) {
                    continue;
                }
                for svc in self.source.services_for_identity(&target.destination) {
                    if !allowed.contains(&svc) {
                        allowed.push(svc);
                    }
                }
            }
            allowed
        };

        for apex in self.apex_services_for(&services) {
            if !services.iter().any(|s| s.name == apex.name && s.namespace == apex.namespace && s.port == apex.port) {
                services.push(apex);
            }
        }
        services
    }

    /// Backends of the traffic split whose apex is `svc`, or `svc` itself.
    fn upstream_clusters(&self, svc: &MeshService) -> Vec<WeightedCluster> {
        let splits: Vec<_> = self
            .source
            .list_traffic_splits()
            .into_iter()
            .filter(|s| s.service == svc.name && s.namespace == svc.namespace)
            .collect();

        let Some(split) = splits.first() else {
            return vec![WeightedCluster::new(svc.cluster_name(), CLUSTER_WEIGHT_ACCEPT_ALL)];
        };
        if splits.len() > 1 {
            warn!(apex = %svc, split = %split.name, "Multiple traffic splits for the same apex service, using the first");
        }

        split
            .backends
            .iter()
            .map(|backend| {
                let backend_svc = MeshService { name: backend.service.clone(), ..svc.clone() };
                WeightedCluster::new(backend_svc.cluster_name(), backend.weight)
            })
            .collect()
    }

    /// Outbound policy for a proxy running as `identity`.
    pub fn outbound_mesh_policy(&self, identity: &ServiceIdentity) -> Derived<OutboundMeshTrafficPolicy> {
        let mut derived = Derived::<OutboundMeshTrafficPolicy>::default();
        let mut per_port: BTreeMap<u16, Vec<OutboundTrafficPolicy>> = BTreeMap::new();

        let upstreams = self.allowed_upstream_services(identity);
        if upstreams.is_empty() {
            debug!(proxy_identity = %identity, "No allowed upstream services");
        }

        for svc in upstreams {
            let mut ranges: Vec<String> = Vec::new();
            for ip in self.source.service_ips(&svc) {
                match host_range(&ip) {
                    Some(range) if !ranges.contains(&range) => ranges.push(range),
                    Some(_) => {}
                    None => error!(service = %svc, ip = %ip, "Ignoring invalid endpoint address"),
                }
            }

            let clusters = self.upstream_clusters(&svc);
            let mut traffic_match =
                TrafficMatch::new(outbound_traffic_match_name(&svc), svc.port, svc.protocol.clone());
            traffic_match.destination_ip_ranges = ranges;
            traffic_match.weighted_clusters = clusters.clone();
            derived.policy.traffic_matches.push(traffic_match);

            if !svc.protocol.is_http_like() {
                continue;
            }

            let mut policy = OutboundTrafficPolicy::new(svc.fqdn(), svc.hostnames(&identity.namespace));
            let retry = self.source.retry_policy(identity, &svc);
            if let Err(e) = policy.add_route(HttpRouteMatch::wildcard(), retry, clusters) {
                error!(service = %svc, error = %e, "Error adding route to outbound policy");
                continue;
            }

            let existing = per_port.remove(&svc.port).unwrap_or_default();
            let merged = merge_outbound_policies(existing, [policy]);
            derived.conflicts.extend(merged.conflicts);
            per_port.insert(svc.port, merged.items);
        }

        derived.policy.http_route_configs_per_port = per_port;
        debug!(
            proxy_identity = %identity,
            traffic_matches = derived.policy.traffic_matches.len(),
            ports = derived.policy.http_route_configs_per_port.len(),
            "Derived outbound mesh policy"
        );
        derived
    }
}

use std::collections::BTreeMap;
use tracing::{debug, error};

use super::snapshot::Egress;
use super::{Derived, MeshCatalog};
use crate::domain::{Protocol, ServiceIdentity, WeightedCluster, CLUSTER_WEIGHT_ACCEPT_ALL};
use crate::trafficpolicy::{
    dedup_traffic_matches, merge_outbound_policies, EgressTrafficPolicy, HttpRouteMatch, OutboundTrafficPolicy,
    TrafficMatch,
};

/// Name of the egress traffic match on `port`.
pub fn egress_traffic_match_name(port: u16, protocol: &Protocol) -> String {
    format!("egress_{}_{}", port, protocol)
}

/// Upstream cluster for an external HTTP host.
fn egress_http_cluster(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Upstream cluster for TCP egress on `port`.
fn egress_tcp_cluster(port: u16) -> String {
    port.to_string()
}

/// Adds `incoming` to `matches`, folding it into a match for the same port,
/// protocol and cluster.
fn add_egress_match(matches: &mut Vec<TrafficMatch>, incoming: TrafficMatch) {
    let existing = matches.iter_mut().find(|m| {
        m.destination_port == incoming.destination_port
            && m.destination_protocol == incoming.destination_protocol
            && m.cluster == incoming.cluster
    });
    match existing {
        Some(current) => {
            for range in incoming.destination_ip_ranges {
                if !current.destination_ip_ranges.contains(&range) {
                    current.destination_ip_ranges.push(range);
                }
            }
            for name in incoming.server_names {
                if !current.server_names.contains(&name) {
                    current.server_names.push(name);
                }
            }
        }
        None => matches.push(incoming),
    }
}

impl MeshCatalog<'_> {
    /// Egress policy of `identity`; `None` when all egress is allowed.
    pub fn egress_policy(&self, identity: &ServiceIdentity) -> Option<Derived<EgressTrafficPolicy>> {
        if self.mesh.enable_egress {
            debug!(proxy_identity = %identity, "Global egress enabled, skipping egress policies");
            return None;
        }

        let mut derived = Derived::<EgressTrafficPolicy>::default();
        let mut matches: Vec<TrafficMatch> = Vec::new();
        let mut per_port: BTreeMap<u16, Vec<OutboundTrafficPolicy>> = BTreeMap::new();

        for egress in self.source.egress_policies(identity) {
            for port in &egress.ports {
                let mut traffic_match =
                    TrafficMatch::new(egress_traffic_match_name(port.number, &port.protocol), port.number, port.protocol.clone());

                match port.protocol {
                    Protocol::Http => {
                        let policies = self.egress_http_policies(&egress, port.number);
                        let existing = per_port.remove(&port.number).unwrap_or_default();
                        let merged = merge_outbound_policies(existing, policies);
                        derived.conflicts.extend(merged.conflicts);
                        per_port.insert(port.number, merged.items);
                    }
                    Protocol::Https => {
                        traffic_match.destination_ip_ranges = egress.ip_addresses.clone();
                        traffic_match.server_names = egress.hosts.clone();
                        traffic_match.cluster = Some(egress_tcp_cluster(port.number));
                    }
                    Protocol::Tcp | Protocol::TcpServerFirst => {
                        traffic_match.destination_ip_ranges = egress.ip_addresses.clone();
                        traffic_match.cluster = Some(egress_tcp_cluster(port.number));
                    }
                    ref other => {
                        error!(
                            egress = %format!("{}/{}", egress.namespace, egress.name),
                            protocol = %other,
                            port = port.number,
                            "Ignoring egress port with unsupported protocol"
                        );
                        continue;
                    }
                }
                add_egress_match(&mut matches, traffic_match);
            }
        }

        derived.policy.traffic_matches = dedup_traffic_matches(matches);
        derived.policy.http_route_configs_per_port = per_port;
        debug!(
            proxy_identity = %identity,
            traffic_matches = derived.policy.traffic_matches.len(),
            ports = derived.policy.http_route_configs_per_port.len(),
            "Derived egress policy"
        );
        Some(derived)
    }

    /// One policy per external host, routing the egress's route group matches.
    fn egress_http_policies(&self, egress: &Egress, port: u16) -> Vec<OutboundTrafficPolicy> {
        let mut route_matches: Vec<HttpRouteMatch> = egress
            .http_route_groups
            .iter()
            .flat_map(|group| self.route_group_matches(&egress.namespace, group, &[]))
            .collect();
        if route_matches.is_empty() {
            route_matches.push(HttpRouteMatch::wildcard());
        }

        let mut policies = Vec::new();
        for host in &egress.hosts {
            let mut policy = OutboundTrafficPolicy::new(host.clone(), vec![host.clone(), format!("{}:{}", host, port)]);
            let cluster = WeightedCluster::new(egress_http_cluster(host, port), CLUSTER_WEIGHT_ACCEPT_ALL);
            for route_match in &route_matches {
                if let Err(e) = policy.add_route(route_match.clone(), None, [cluster.clone()]) {
                    error!(host = %host, error = %e, "Error adding egress route");
                }
            }
            policies.push(policy);
        }
        policies
    }
}

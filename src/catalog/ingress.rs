use tracing::debug;

use super::snapshot::IngressSource;
use super::{Derived, MeshCatalog};
use crate::domain::{MeshService, Principal, ServiceIdentity, WeightedCluster, CLUSTER_WEIGHT_ACCEPT_ALL};
use crate::trafficpolicy::{
    merge_inbound_policies, HttpRouteMatch, IngressTrafficMatch, IngressTrafficPolicy, InboundTrafficPolicy,
    RouteWeightedClusters, Rule,
};

/// Hostname every ingress virtual host answers to.
pub const INGRESS_WILDCARD_HOST: &str = "*";

pub fn ingress_traffic_match_name(svc: &MeshService, protocol: &crate::domain::Protocol) -> String {
    format!("ingress_{}_{}_{}", svc, svc.target_port, protocol)
}

impl MeshCatalog<'_> {
    /// Ingress policy for the services of `identity`; `None` when no ingress
    /// backend targets them.
    pub fn ingress_policy(&self, identity: &ServiceIdentity) -> Option<Derived<IngressTrafficPolicy>> {
        let mut derived = Derived::<IngressTrafficPolicy>::default();

        for svc in self.source.services_for_identity(identity) {
            let Some(ingress) = self.source.ingress_backend(&svc) else {
                continue;
            };
            let Some(backend) = ingress.backend_for(&svc) else {
                continue;
            };

            let mut source_ip_ranges = Vec::new();
            let mut principals = Vec::new();
            for source in &ingress.sources {
                match source {
                    IngressSource::IpRange { cidr } => source_ip_ranges.push(cidr.clone()),
                    IngressSource::AuthenticatedPrincipal { name } => principals.push(Principal::from(name.as_str())),
                }
            }

            derived.policy.traffic_matches.push(IngressTrafficMatch {
                name: ingress_traffic_match_name(&svc, &backend.port.protocol),
                port: svc.target_port,
                protocol: backend.port.protocol.clone(),
                source_ip_ranges,
                server_names: backend.tls.sni_hosts.clone(),
                skip_client_cert_validation: backend.tls.skip_client_cert_validation,
            });

            // Client identities are only known once the client certificate is verified.
            if principals.is_empty() || backend.tls.skip_client_cert_validation {
                principals = vec![Principal::wildcard()];
            }

            let route = RouteWeightedClusters::new(
                HttpRouteMatch::wildcard(),
                [WeightedCluster::new(svc.local_cluster_name(), CLUSTER_WEIGHT_ACCEPT_ALL)],
            );
            let mut policy =
                InboundTrafficPolicy::new(format!("{}_from_{}", svc, ingress.name), vec![INGRESS_WILDCARD_HOST.to_string()]);
            policy.rules.push(Rule::new(route, principals));

            let merged = merge_inbound_policies(std::mem::take(&mut derived.policy.http_route_policies), [policy]);
            derived.conflicts.extend(merged.conflicts);
            derived.policy.http_route_policies = merged.items;
        }

        if derived.policy.traffic_matches.is_empty() {
            return None;
        }
        debug!(
            proxy_identity = %identity,
            traffic_matches = derived.policy.traffic_matches.len(),
            "Derived ingress policy"
        );
        Some(derived)
    }
}

//! Listener-scope access control for inbound mesh filter chains.

use envoy_types::pb::envoy::config::listener::v3::Filter;
use envoy_types::pb::envoy::config::rbac::v3::{rbac::Action, Policy, Rbac as RbacRules};
use envoy_types::pb::envoy::extensions::filters::network::rbac::v3::Rbac;
use std::collections::HashMap;
use tracing::error;

use super::{typed_filter, RBAC_FILTER_NAME};
use crate::errors::Error;
use crate::trafficpolicy::TrafficTargetGrant;
use crate::xds::rbac::{generate, PermissionAttribute, PrincipalAttribute, RulesList};

pub const RBAC_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.rbac.v3.RBAC";

const RBAC_STAT_PREFIX: &str = "RBAC";

/// Policy granting the sources of `grant` access to its destination.
///
/// Ports restrict the permission to those destination ports; without ports
/// every permission is granted. A grant without sources has no policy.
pub fn grant_policy(grant: &TrafficTargetGrant, trust_domain: &str) -> crate::Result<Policy> {
    if grant.sources.is_empty() {
        return Err(Error::rbac(format!("traffic target '{}' has no sources", grant.name)));
    }

    let principals = RulesList::or(
        grant
            .sources
            .iter()
            .map(|source| PrincipalAttribute::DownstreamIdentity(source.principal(trust_domain))),
    );

    let permissions: Vec<RulesList<PermissionAttribute>> = if grant.tcp_ports.is_empty() {
        Vec::new()
    } else {
        vec![RulesList::or(grant.tcp_ports.iter().copied().map(PermissionAttribute::DestinationPort))]
    };

    generate(&[principals], &permissions)
}

/// Builds the inbound RBAC filter from the grants targeting the proxy.
///
/// Each grant becomes one ALLOW policy named after it. A connection matching
/// none of them is denied, so an empty grant list denies everything. A grant
/// whose policy cannot be built is logged and left out.
pub fn build_inbound_rbac_filter(
    grants: &[TrafficTargetGrant],
    trust_domain: &str,
) -> crate::Result<Filter> {
    let mut policies: HashMap<String, Policy> = HashMap::new();

    for grant in grants {
        match grant_policy(grant, trust_domain) {
            Ok(policy) => {
                policies.insert(grant.name.clone(), policy);
            }
            Err(e) => {
                error!(
                    grant = %grant.name,
                    destination = %grant.destination,
                    error = %e,
                    "Error building RBAC policy for traffic target, sources are not granted access"
                );
            }
        }
    }

    let config = Rbac {
        stat_prefix: RBAC_STAT_PREFIX.to_string(),
        rules: Some(RbacRules { action: Action::Allow as i32, policies, ..Default::default() }),
        ..Default::default()
    };

    Ok(typed_filter(RBAC_FILTER_NAME, RBAC_TYPE_URL, &config))
}

//! Policy model compiled into listeners and route tables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ratelimit::{HttpPerRouteRateLimitSpec, RateLimitSpec};
use crate::domain::{Principal, Protocol, ServiceIdentity, WeightedCluster};

/// Path regex matching every request path.
pub const WILDCARD_PATH_REGEX: &str = ".*";

/// Method value matching every HTTP method.
pub const WILDCARD_METHOD: &str = "*";

/// Header name whose value is matched against the request authority.
pub const HOST_HEADER: &str = "host";

/// How [`HttpRouteMatch::path`] is compared to the request path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatchType {
    /// Regex when a path is given; match-all when the path is empty.
    #[default]
    Unspecified,
    Regex,
    Exact,
    Prefix,
}

/// HTTP request attributes a route matches on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HttpRouteMatch {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_match_type: PathMatchType,
    #[serde(default)]
    pub methods: Vec<String>,
    /// Header name to value regex.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl HttpRouteMatch {
    /// Matches any path with any method.
    pub fn wildcard() -> Self {
        Self {
            path: WILDCARD_PATH_REGEX.to_string(),
            path_match_type: PathMatchType::Regex,
            methods: vec![WILDCARD_METHOD.to_string()],
            headers: BTreeMap::new(),
        }
    }
}

/// Retry behaviour of an outbound route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Comma separated retry conditions, e.g. `5xx,connect-failure`.
    pub retry_on: String,
    #[serde(default)]
    pub num_retries: Option<u32>,
    #[serde(default)]
    pub per_try_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_backoff_base_interval_ms: Option<u64>,
}

/// A route match paired with the upstream clusters serving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteWeightedClusters {
    pub http_route_match: HttpRouteMatch,
    pub weighted_clusters: BTreeSet<WeightedCluster>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub rate_limit: Option<HttpPerRouteRateLimitSpec>,
}

impl RouteWeightedClusters {
    pub fn new(
        http_route_match: HttpRouteMatch,
        weighted_clusters: impl IntoIterator<Item = WeightedCluster>,
    ) -> Self {
        Self {
            http_route_match,
            weighted_clusters: weighted_clusters.into_iter().collect(),
            retry_policy: None,
            rate_limit: None,
        }
    }

    pub fn total_weight(&self) -> u32 {
        self.weighted_clusters.iter().map(|wc| wc.weight).fold(0u32, u32::saturating_add)
    }
}

/// A route together with the principals allowed to use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub route: RouteWeightedClusters,
    pub allowed_principals: BTreeSet<Principal>,
}

impl Rule {
    pub fn new(route: RouteWeightedClusters, principals: impl IntoIterator<Item = Principal>) -> Self {
        Self { route, allowed_principals: principals.into_iter().collect() }
    }
}

/// Rules for one set of hostnames served by the local proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTrafficPolicy {
    pub name: String,
    pub hostnames: Vec<String>,
    pub rules: Vec<Rule>,
    /// Rate limit applied to the whole virtual host.
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
}

impl InboundTrafficPolicy {
    pub fn new(name: impl Into<String>, hostnames: Vec<String>) -> Self {
        Self { name: name.into(), hostnames, rules: Vec::new(), rate_limit: None }
    }

    /// Grants `principal` access to `route`, reusing an identical route when present.
    pub fn add_rule(&mut self, route: RouteWeightedClusters, principal: Principal) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.route == route) {
            rule.allowed_principals.insert(principal);
            return;
        }
        self.rules.push(Rule::new(route, [principal]));
    }

    pub fn hostname_set(&self) -> BTreeSet<&str> {
        self.hostnames.iter().map(String::as_str).collect()
    }
}

/// Routes for one set of upstream hostnames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTrafficPolicy {
    pub name: String,
    pub hostnames: Vec<String>,
    pub routes: Vec<RouteWeightedClusters>,
}

impl OutboundTrafficPolicy {
    pub fn new(name: impl Into<String>, hostnames: Vec<String>) -> Self {
        Self { name: name.into(), hostnames, routes: Vec::new() }
    }

    /// Adds a route to the policy.
    ///
    /// A route with the same match and the same clusters only updates the retry
    /// policy. The same match with different clusters is a conflict.
    pub fn add_route(
        &mut self,
        http_route_match: HttpRouteMatch,
        retry_policy: Option<RetryPolicy>,
        weighted_clusters: impl IntoIterator<Item = WeightedCluster>,
    ) -> crate::Result<()> {
        let clusters: BTreeSet<WeightedCluster> = weighted_clusters.into_iter().collect();

        if let Some(existing) =
            self.routes.iter_mut().find(|r| r.http_route_match == http_route_match)
        {
            if existing.weighted_clusters == clusters {
                existing.retry_policy = retry_policy;
                return Ok(());
            }
            return Err(crate::Error::conflict(
                format!(
                    "route {:?} on policy '{}' already routes to different weighted clusters",
                    http_route_match.path, self.name
                ),
                "outbound_route",
            ));
        }

        let mut route = RouteWeightedClusters::new(http_route_match, clusters);
        route.retry_policy = retry_policy;
        self.routes.push(route);
        Ok(())
    }

    pub fn hostname_set(&self) -> BTreeSet<&str> {
        self.hostnames.iter().map(String::as_str).collect()
    }
}

/// Which traffic a filter chain accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrafficMatch {
    pub name: String,
    pub destination_port: u16,
    pub destination_protocol: Protocol,
    #[serde(default)]
    pub destination_ip_ranges: Vec<String>,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub weighted_clusters: Vec<WeightedCluster>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
}

impl TrafficMatch {
    pub fn new(name: impl Into<String>, destination_port: u16, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            destination_port,
            destination_protocol: protocol,
            destination_ip_ranges: Vec::new(),
            server_names: Vec::new(),
            cluster: None,
            weighted_clusters: Vec::new(),
            rate_limit: None,
        }
    }
}

/// Sources allowed to reach a destination identity, as granted by one
/// access-control object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficTargetGrant {
    /// `{namespace}/{name}` of the granting object.
    pub name: String,
    pub destination: ServiceIdentity,
    pub sources: Vec<ServiceIdentity>,
    /// Destination ports of TCP route matches. Empty grants every port.
    #[serde(default)]
    pub tcp_ports: Vec<u16>,
}

/// Traffic admitted from outside the mesh to one of the proxy's ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressTrafficMatch {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Client CIDRs. Empty admits any source.
    #[serde(default)]
    pub source_ip_ranges: Vec<String>,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default)]
    pub skip_client_cert_validation: bool,
}

/// Everything the inbound listener and inbound route tables are built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMeshTrafficPolicy {
    pub traffic_matches: Vec<TrafficMatch>,
    /// HTTP policies keyed by the service target port they are served on.
    pub http_route_configs_per_port: BTreeMap<u16, Vec<InboundTrafficPolicy>>,
    /// Access grants checked by the L4 RBAC filter.
    pub traffic_targets: Vec<TrafficTargetGrant>,
}

/// Everything the mesh part of the outbound listener is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMeshTrafficPolicy {
    pub traffic_matches: Vec<TrafficMatch>,
    pub http_route_configs_per_port: BTreeMap<u16, Vec<OutboundTrafficPolicy>>,
}

/// Destinations outside the mesh the proxy may reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressTrafficPolicy {
    pub traffic_matches: Vec<TrafficMatch>,
    pub http_route_configs_per_port: BTreeMap<u16, Vec<OutboundTrafficPolicy>>,
}

/// Clients outside the mesh allowed to reach the proxy's services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressTrafficPolicy {
    pub traffic_matches: Vec<IngressTrafficMatch>,
    pub http_route_policies: Vec<InboundTrafficPolicy>,
}

/// Normalizes an allowed-methods list.
///
/// Empty entries are ignored. Any wildcard collapses the list to `["*"]`;
/// otherwise duplicates are removed keeping the first occurrence.
pub fn sanitize_http_methods<S: AsRef<str>>(methods: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut sanitized = Vec::new();
    for method in methods.iter().map(AsRef::as_ref) {
        if method.is_empty() {
            continue;
        }
        if method == WILDCARD_METHOD {
            return vec![WILDCARD_METHOD.to_string()];
        }
        if seen.insert(method) {
            sanitized.push(method.to_string());
        }
    }
    sanitized
}

/// Removes duplicate traffic matches, keeping the first occurrence.
pub fn dedup_traffic_matches(matches: Vec<TrafficMatch>) -> Vec<TrafficMatch> {
    let mut deduped: Vec<TrafficMatch> = Vec::with_capacity(matches.len());
    for tm in matches {
        if !deduped.contains(&tm) {
            deduped.push(tm);
        }
    }
    deduped
}

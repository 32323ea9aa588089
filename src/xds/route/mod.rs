//! Route table construction
//!
//! One `RouteConfiguration` is built per destination port so that a host
//! header meant for one port never matches a route programmed for another.
//! Every policy bundle becomes one virtual host named
//! `{direction}_virtual-host|{policy}` whose domains are the bundle's
//! hostnames.
//!
//! - inbound and ingress routes carry a per-route RBAC config; a route whose
//!   RBAC config cannot be built is skipped, never left unguarded
//! - outbound routes match everything and only carry weighted clusters and
//!   retries; access is enforced by the destination's inbound routes
//! - egress routes expand into one route per allowed method

pub mod action;

use envoy_types::pb::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use envoy_types::pb::envoy::config::route::v3::{Route, RouteConfiguration, VirtualHost};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error};

use crate::trafficpolicy::{
    sanitize_http_methods, HttpRouteMatch, InboundTrafficPolicy, OutboundTrafficPolicy,
    PathMatchType, Rule, WILDCARD_METHOD, WILDCARD_PATH_REGEX,
};
use crate::xds::filters::http::local_rate_limit::local_rate_limit_config;
use crate::xds::filters::http::rate_limit::rate_limit_actions;
use crate::xds::filters::http::rbac::per_route_rbac;
use crate::xds::filters::http::{LOCAL_RATE_LIMIT_FILTER_NAME, RBAC_FILTER_NAME};
use crate::xds::resources::Diagnostics;

pub use action::build_route;

pub const INBOUND_ROUTE_CONFIG_NAME: &str = "rds-inbound";
pub const OUTBOUND_ROUTE_CONFIG_NAME: &str = "rds-outbound";
pub const EGRESS_ROUTE_CONFIG_NAME: &str = "rds-egress";
pub const INGRESS_ROUTE_CONFIG_NAME: &str = "rds-ingress";

const INBOUND_VIRTUAL_HOST: &str = "inbound_virtual-host";
const OUTBOUND_VIRTUAL_HOST: &str = "outbound_virtual-host";
const EGRESS_VIRTUAL_HOST: &str = "egress_virtual-host";
const INGRESS_VIRTUAL_HOST: &str = "ingress_virtual-host";

pub fn inbound_route_config_name(port: u16) -> String {
    format!("{}.{}", INBOUND_ROUTE_CONFIG_NAME, port)
}

pub fn outbound_route_config_name(port: u16) -> String {
    format!("{}.{}", OUTBOUND_ROUTE_CONFIG_NAME, port)
}

pub fn egress_route_config_name(port: u16) -> String {
    format!("{}.{}", EGRESS_ROUTE_CONFIG_NAME, port)
}

/// Route table stub; cluster existence is not validated so tables can be
/// accepted before the clusters they reference.
fn route_config_stub(name: String) -> RouteConfiguration {
    RouteConfiguration {
        name,
        validate_clusters: Some(BoolValue { value: false }),
        ..Default::default()
    }
}

fn virtual_host_stub(prefix: &str, policy_name: &str, domains: &[String]) -> VirtualHost {
    VirtualHost {
        name: format!("{}|{}", prefix, policy_name),
        domains: domains.to_vec(),
        ..Default::default()
    }
}

/// Inbound routes for `rules`: one route per sanitized method, each guarded
/// by the rule's principals.
fn inbound_routes(vhost: &str, rules: &[Rule], diagnostics: &mut Diagnostics) -> Vec<Route> {
    let mut routes = Vec::new();

    for rule in rules {
        let matcher = &rule.route.http_route_match;
        let rbac = match per_route_rbac(&rule.allowed_principals) {
            Ok(rbac) => rbac,
            Err(e) => {
                diagnostics.skip(format!("{}/route:{}", vhost, matcher.path), &e);
                continue;
            }
        };

        let local_rate_limit = rule.route.rate_limit.as_ref().and_then(|rl| rl.local.as_ref());
        let local_rate_limit = match local_rate_limit.map(local_rate_limit_config).transpose() {
            Ok(config) => config,
            Err(e) => {
                error!(
                    vhost,
                    path = %matcher.path,
                    error = %e,
                    "Error applying local rate limiting config for route, ignoring it"
                );
                None
            }
        };

        for method in sanitize_http_methods(&matcher.methods) {
            let mut route = match build_route(&rule.route, &method) {
                Ok(route) => route,
                Err(e) => {
                    diagnostics.skip(format!("{}/route:{}:{}", vhost, matcher.path, method), &e);
                    continue;
                }
            };
            route.typed_per_filter_config = inbound_route_filter_config(&rbac, local_rate_limit.as_ref());
            routes.push(route);
        }
    }

    routes
}

fn inbound_route_filter_config(
    rbac: &EnvoyAny,
    local_rate_limit: Option<&EnvoyAny>,
) -> HashMap<String, EnvoyAny> {
    let mut config = HashMap::from([(RBAC_FILTER_NAME.to_string(), rbac.clone())]);
    if let Some(local) = local_rate_limit {
        config.insert(LOCAL_RATE_LIMIT_FILTER_NAME.to_string(), local.clone());
    }
    config
}

/// Applies the bundle's vhost-level local and global HTTP rate limits.
fn apply_virtual_host_rate_limits(vhost: &mut VirtualHost, policy: &InboundTrafficPolicy) {
    let Some(rate_limit) = policy.rate_limit.as_ref() else {
        return;
    };

    if let Some(local) = rate_limit.local.as_ref().and_then(|l| l.http.as_ref()) {
        match local_rate_limit_config(local) {
            Ok(config) => {
                vhost.typed_per_filter_config.insert(LOCAL_RATE_LIMIT_FILTER_NAME.to_string(), config);
            }
            Err(e) => error!(
                vhost = %vhost.name,
                error = %e,
                "Error applying local rate limiting config for vhost, ignoring it"
            ),
        }
    }

    if let Some(global) = rate_limit.global.as_ref().and_then(|g| g.http.as_ref()) {
        vhost.rate_limits = rate_limit_actions(&global.descriptors);
    }
}

pub(crate) fn stats_response_headers(stats_headers: &BTreeMap<String, String>) -> Vec<HeaderValueOption> {
    stats_headers
        .iter()
        .map(|(key, value)| HeaderValueOption {
            header: Some(HeaderValue { key: key.clone(), value: value.clone(), ..Default::default() }),
            ..Default::default()
        })
        .collect()
}

/// Keeps `config` only when it has at least one virtual host.
fn non_empty(config: RouteConfiguration) -> Option<RouteConfiguration> {
    if config.virtual_hosts.is_empty() {
        debug!(route_config = %config.name, "Omitting route configuration without virtual hosts");
        None
    } else {
        Some(config)
    }
}

/// Inbound mesh route tables, one per port.
///
/// `stats_headers` are added to every response served through these tables.
pub fn build_inbound_route_configs(
    per_port: &BTreeMap<u16, Vec<InboundTrafficPolicy>>,
    stats_headers: &BTreeMap<String, String>,
    diagnostics: &mut Diagnostics,
) -> Vec<RouteConfiguration> {
    per_port
        .iter()
        .filter_map(|(port, policies)| {
            let mut config = route_config_stub(inbound_route_config_name(*port));
            for policy in policies {
                let mut vhost = virtual_host_stub(INBOUND_VIRTUAL_HOST, &policy.name, &policy.hostnames);
                vhost.routes = inbound_routes(&vhost.name, &policy.rules, diagnostics);
                apply_virtual_host_rate_limits(&mut vhost, policy);
                config.virtual_hosts.push(vhost);
            }
            config.response_headers_to_add = stats_response_headers(stats_headers);
            non_empty(config)
        })
        .collect()
}

/// Outbound routes ignore the configured match: each route matches every
/// path and method and only carries the weighted clusters and retry policy.
fn outbound_routes(vhost: &str, policy: &OutboundTrafficPolicy, diagnostics: &mut Diagnostics) -> Vec<Route> {
    policy
        .routes
        .iter()
        .filter_map(|route| {
            let mut catch_all = route.clone();
            catch_all.http_route_match = HttpRouteMatch {
                path: WILDCARD_PATH_REGEX.to_string(),
                path_match_type: PathMatchType::Regex,
                methods: vec![WILDCARD_METHOD.to_string()],
                headers: BTreeMap::new(),
            };
            build_route(&catch_all, WILDCARD_METHOD)
                .map_err(|e| diagnostics.skip(format!("{}/route:{}", vhost, route.http_route_match.path), &e))
                .ok()
        })
        .collect()
}

/// Outbound mesh route tables, one per upstream port.
pub fn build_outbound_route_configs(
    per_port: &BTreeMap<u16, Vec<OutboundTrafficPolicy>>,
    diagnostics: &mut Diagnostics,
) -> Vec<RouteConfiguration> {
    per_port
        .iter()
        .filter_map(|(port, policies)| {
            let mut config = route_config_stub(outbound_route_config_name(*port));
            for policy in policies {
                let mut vhost = virtual_host_stub(OUTBOUND_VIRTUAL_HOST, &policy.name, &policy.hostnames);
                vhost.routes = outbound_routes(&vhost.name, policy, diagnostics);
                config.virtual_hosts.push(vhost);
            }
            non_empty(config)
        })
        .collect()
}

fn egress_routes(vhost: &str, policy: &OutboundTrafficPolicy, diagnostics: &mut Diagnostics) -> Vec<Route> {
    let mut routes = Vec::new();
    for route in &policy.routes {
        for method in sanitize_http_methods(&route.http_route_match.methods) {
            match build_route(route, &method) {
                Ok(built) => routes.push(built),
                Err(e) => diagnostics.skip(
                    format!("{}/route:{}:{}", vhost, route.http_route_match.path, method),
                    &e,
                ),
            }
        }
    }
    routes
}

/// Egress route tables, one per external HTTP port.
pub fn build_egress_route_configs(
    per_port: &BTreeMap<u16, Vec<OutboundTrafficPolicy>>,
    diagnostics: &mut Diagnostics,
) -> Vec<RouteConfiguration> {
    per_port
        .iter()
        .filter_map(|(port, policies)| {
            let mut config = route_config_stub(egress_route_config_name(*port));
            for policy in policies {
                let mut vhost = virtual_host_stub(EGRESS_VIRTUAL_HOST, &policy.name, &policy.hostnames);
                vhost.routes = egress_routes(&vhost.name, policy, diagnostics);
                config.virtual_hosts.push(vhost);
            }
            non_empty(config)
        })
        .collect()
}

/// The single ingress route table, or `None` without ingress policies.
///
/// Ingress virtual hosts carry per-route RBAC but no rate limits.
pub fn build_ingress_route_config(
    policies: &[InboundTrafficPolicy],
    diagnostics: &mut Diagnostics,
) -> Option<RouteConfiguration> {
    if policies.is_empty() {
        return None;
    }

    let mut config = route_config_stub(INGRESS_ROUTE_CONFIG_NAME.to_string());
    for policy in policies {
        let mut vhost = virtual_host_stub(INGRESS_VIRTUAL_HOST, &policy.name, &policy.hostnames);
        vhost.routes = inbound_routes(&vhost.name, &policy.rules, diagnostics);
        config.virtual_hosts.push(vhost);
    }
    Some(config)
}

//! Prometheus scrape listener exposing the proxy's admin stats.

use envoy_types::pb::envoy::config::core::v3::TrafficDirection;
use envoy_types::pb::envoy::config::listener::v3::{FilterChain, Listener};
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier, Route, RouteAction,
    RouteConfiguration, RouteMatch, VirtualHost,
};

use super::hcm::HcmBuilder;
use super::{socket_address, ListenerOptions, PROMETHEUS_LISTENER_NAME, WILDCARD_ADDRESS};
use crate::config::PrometheusConfig;

const PROMETHEUS_STAT_PREFIX: &str = "prometheus-http-conn-manager";
const PROMETHEUS_VIRTUAL_HOST: &str = "prometheus-inbound-virtual-host";

fn scrape_route_config(config: &PrometheusConfig) -> RouteConfiguration {
    RouteConfiguration {
        virtual_hosts: vec![VirtualHost {
            name: PROMETHEUS_VIRTUAL_HOST.to_string(),
            domains: vec!["*".to_string()],
            routes: vec![Route {
                r#match: Some(RouteMatch {
                    path_specifier: Some(PathSpecifier::Prefix(config.path.clone())),
                    ..Default::default()
                }),
                action: Some(Action::Route(RouteAction {
                    cluster_specifier: Some(ClusterSpecifier::Cluster(config.cluster.clone())),
                    prefix_rewrite: config.path.clone(),
                    ..Default::default()
                })),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// The scrape listener, or `None` when scraping is disabled.
pub fn build_prometheus_listener(
    config: &PrometheusConfig,
    options: &ListenerOptions,
) -> crate::Result<Option<Listener>> {
    if !config.enabled {
        return Ok(None);
    }

    let hcm = HcmBuilder::inline(PROMETHEUS_STAT_PREFIX, scrape_route_config(config), options).build_filter()?;
    Ok(Some(Listener {
        name: PROMETHEUS_LISTENER_NAME.to_string(),
        address: Some(socket_address(WILDCARD_ADDRESS, config.port)),
        traffic_direction: TrafficDirection::Inbound as i32,
        filter_chains: vec![FilterChain { filters: vec![hcm], ..Default::default() }],
        ..Default::default()
    }))
}

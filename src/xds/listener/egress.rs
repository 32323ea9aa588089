//! Egress filter chains on the outbound listener.
//!
//! With global egress every unmatched connection falls through to the
//! pass-through chain. Otherwise only destinations named by egress policies
//! get a chain: plain HTTP is routed through the egress route table of its
//! port, everything else is proxied as TCP to the policy's cluster.

use envoy_types::pb::envoy::config::listener::v3::{FilterChain, FilterChainMatch};
use envoy_types::pb::google::protobuf::UInt32Value;

use super::cidr_ranges;
use super::hcm::{HcmBuilder, HcmDirection};
use super::{ListenerOptions, OUTBOUND_LISTENER_NAME};
use crate::domain::Protocol;
use crate::trafficpolicy::TrafficMatch;
use crate::xds::access_log::access_logs;
use crate::xds::filters::network::build_tcp_proxy;
use crate::xds::resources::Diagnostics;
use crate::xds::route::egress_route_config_name;
use crate::Error;

/// Cluster forwarding to the connection's original destination.
pub const PASSTHROUGH_CLUSTER: &str = "passthrough-outbound";
pub const PASSTHROUGH_FILTER_CHAIN_NAME: &str = "outbound-egress-filter-chain";
pub const EGRESS_HTTP_FILTER_CHAIN_PREFIX: &str = "egress-http";
pub const EGRESS_TCP_FILTER_CHAIN_PREFIX: &str = "egress-tcp";
const EGRESS_TCP_PROXY_STAT_PREFIX: &str = "egress-tcp-proxy";

/// Application protocols routed by HTTP rules. TLS-wrapped HTTP/2 (`h2`) is
/// opaque to the proxy and handled as TCP.
pub const HTTP_APPLICATION_PROTOCOLS: &[&str] = &["http/1.0", "http/1.1", "h2c"];

/// Default chain admitting any destination not matched by another chain.
pub fn passthrough_filter_chain(options: &ListenerOptions) -> crate::Result<FilterChain> {
    let proxy = build_tcp_proxy(
        &format!("{}.{}", EGRESS_TCP_PROXY_STAT_PREFIX, PASSTHROUGH_CLUSTER),
        Some(PASSTHROUGH_CLUSTER),
        &[],
        access_logs(&options.access_log)?,
    )?;
    Ok(FilterChain {
        name: PASSTHROUGH_FILTER_CHAIN_NAME.to_string(),
        filters: vec![proxy],
        ..Default::default()
    })
}

fn egress_http_chain(port: u16, options: &ListenerOptions) -> crate::Result<FilterChain> {
    let hcm = HcmBuilder::rds(HcmDirection::Outbound, egress_route_config_name(port), options).build_filter()?;
    Ok(FilterChain {
        name: format!("{}.{}", EGRESS_HTTP_FILTER_CHAIN_PREFIX, port),
        filter_chain_match: Some(FilterChainMatch {
            destination_port: Some(UInt32Value { value: u32::from(port) }),
            application_protocols: HTTP_APPLICATION_PROTOCOLS.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }),
        filters: vec![hcm],
        ..Default::default()
    })
}

fn egress_tcp_chain(traffic_match: &TrafficMatch, options: &ListenerOptions) -> crate::Result<FilterChain> {
    let port = traffic_match.destination_port;
    let proxy = build_tcp_proxy(
        &format!("{}.{}", EGRESS_TCP_PROXY_STAT_PREFIX, port),
        traffic_match.cluster.as_deref(),
        &traffic_match.weighted_clusters,
        access_logs(&options.access_log)?,
    )?;

    let prefix_ranges = cidr_ranges(&traffic_match.destination_ip_ranges, &traffic_match.name)?;

    Ok(FilterChain {
        name: format!("{}.{}", EGRESS_TCP_FILTER_CHAIN_PREFIX, port),
        filter_chain_match: Some(FilterChainMatch {
            destination_port: Some(UInt32Value { value: u32::from(port) }),
            server_names: traffic_match.server_names.clone(),
            prefix_ranges,
            ..Default::default()
        }),
        filters: vec![proxy],
        ..Default::default()
    })
}

fn egress_filter_chain(traffic_match: &TrafficMatch, options: &ListenerOptions) -> crate::Result<FilterChain> {
    match traffic_match.destination_protocol {
        Protocol::Http => egress_http_chain(traffic_match.destination_port, options),
        Protocol::Tcp | Protocol::Https | Protocol::TcpServerFirst => egress_tcp_chain(traffic_match, options),
        ref other => Err(Error::unsupported_protocol(
            other.as_str(),
            format!("egress traffic match {}", traffic_match.name),
        )),
    }
}

/// Egress chains for `matches`, skipping the ones that fail.
pub fn egress_filter_chains(
    matches: &[TrafficMatch],
    options: &ListenerOptions,
    diagnostics: &mut Diagnostics,
) -> Vec<FilterChain> {
    matches
        .iter()
        .filter_map(|traffic_match| {
            egress_filter_chain(traffic_match, options)
                .map_err(|e| {
                    diagnostics.skip(format!("{}/filter_chain:{}", OUTBOUND_LISTENER_NAME, traffic_match.name), &e)
                })
                .ok()
        })
        .collect()
}

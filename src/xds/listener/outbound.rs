//! Outbound listener: one chain per upstream traffic match, then egress.

use envoy_types::pb::envoy::config::core::v3::{CidrRange, TrafficDirection};
use envoy_types::pb::envoy::config::listener::v3::{FilterChain, FilterChainMatch, Listener};
use envoy_types::pb::google::protobuf::UInt32Value;
use tracing::debug;

use super::egress::{egress_filter_chains, passthrough_filter_chain};
use super::hcm::{HcmBuilder, HcmDirection};
use super::{cidr_range, non_empty, socket_address, ListenerOptions, OUTBOUND_LISTENER_NAME, WILDCARD_ADDRESS};
use crate::domain::ServiceIdentity;
use crate::trafficpolicy::{EgressTrafficPolicy, OutboundMeshTrafficPolicy, TrafficMatch};
use crate::xds::access_log::access_logs;
use crate::xds::filters::listener::{http_inspector, original_destination, server_first_predicate, tls_inspector};
use crate::xds::filters::network::build_tcp_proxy;
use crate::xds::resources::Diagnostics;
use crate::xds::route::outbound_route_config_name;
use crate::Error;

pub const OUTBOUND_MESH_HTTP_FILTER_CHAIN_PREFIX: &str = "outbound-mesh-http-filter-chain";
pub const OUTBOUND_MESH_TCP_FILTER_CHAIN_PREFIX: &str = "outbound-mesh-tcp-filter-chain";
const OUTBOUND_MESH_TCP_PROXY_STAT_PREFIX: &str = "outbound-mesh-tcp-proxy";

/// Destination prefixes of a mesh match. Mesh chains must never match on
/// the port alone, so an empty or malformed range list is an error.
fn destination_prefixes(traffic_match: &TrafficMatch) -> crate::Result<Vec<CidrRange>> {
    if traffic_match.destination_ip_ranges.is_empty() {
        return Err(Error::validation_field(
            format!("traffic match {} has no destination IP ranges", traffic_match.name),
            "destination_ip_ranges",
        ));
    }
    traffic_match.destination_ip_ranges.iter().map(|range| cidr_range(range)).collect()
}

fn chain_match(traffic_match: &TrafficMatch) -> crate::Result<FilterChainMatch> {
    Ok(FilterChainMatch {
        destination_port: Some(UInt32Value { value: u32::from(traffic_match.destination_port) }),
        prefix_ranges: destination_prefixes(traffic_match)?,
        ..Default::default()
    })
}

/// Filter chain routing HTTP/gRPC to an upstream through its port's route table.
pub fn outbound_http_filter_chain(traffic_match: &TrafficMatch, options: &ListenerOptions) -> crate::Result<FilterChain> {
    let filter_chain_match = chain_match(traffic_match)?;
    let hcm = HcmBuilder::rds(
        HcmDirection::Outbound,
        outbound_route_config_name(traffic_match.destination_port),
        options,
    )
    .build_filter()?;

    Ok(FilterChain {
        name: format!("{}:{}", OUTBOUND_MESH_HTTP_FILTER_CHAIN_PREFIX, traffic_match.name),
        filter_chain_match: Some(filter_chain_match),
        filters: vec![hcm],
        ..Default::default()
    })
}

/// Filter chain proxying an opaque stream to an upstream's clusters.
pub fn outbound_tcp_filter_chain(traffic_match: &TrafficMatch, options: &ListenerOptions) -> crate::Result<FilterChain> {
    let filter_chain_match = chain_match(traffic_match)?;
    let proxy = build_tcp_proxy(
        &format!("{}.{}", OUTBOUND_MESH_TCP_PROXY_STAT_PREFIX, traffic_match.name),
        traffic_match.cluster.as_deref(),
        &traffic_match.weighted_clusters,
        access_logs(&options.access_log)?,
    )?;

    Ok(FilterChain {
        name: format!("{}:{}", OUTBOUND_MESH_TCP_FILTER_CHAIN_PREFIX, traffic_match.name),
        filter_chain_match: Some(filter_chain_match),
        filters: vec![proxy],
        ..Default::default()
    })
}

fn outbound_filter_chain(traffic_match: &TrafficMatch, options: &ListenerOptions) -> crate::Result<FilterChain> {
    let protocol = &traffic_match.destination_protocol;
    if protocol.is_http_like() {
        outbound_http_filter_chain(traffic_match, options)
    } else if protocol.is_tcp_like() {
        outbound_tcp_filter_chain(traffic_match, options)
    } else {
        Err(Error::unsupported_protocol(
            protocol.as_str(),
            format!("outbound traffic match {}", traffic_match.name),
        ))
    }
}

/// The outbound listener, or `None` without upstreams and egress.
///
/// Global egress installs the pass-through default chain and ignores the
/// egress policy; otherwise the policy's chains follow the mesh chains.
pub fn build_outbound_listener(
    identity: &ServiceIdentity,
    mesh: &OutboundMeshTrafficPolicy,
    egress: Option<&EgressTrafficPolicy>,
    options: &ListenerOptions,
    diagnostics: &mut Diagnostics,
) -> crate::Result<Option<Listener>> {
    let mut filter_chains: Vec<FilterChain> = mesh
        .traffic_matches
        .iter()
        .filter_map(|traffic_match| {
            outbound_filter_chain(traffic_match, options)
                .map_err(|e| {
                    diagnostics.skip(format!("{}/filter_chain:{}", OUTBOUND_LISTENER_NAME, traffic_match.name), &e)
                })
                .ok()
        })
        .collect();

    let mut sniffed: Vec<&TrafficMatch> = mesh.traffic_matches.iter().collect();
    let mut default_filter_chain = None;
    if options.global_egress {
        default_filter_chain = Some(passthrough_filter_chain(options)?);
    } else if let Some(egress) = egress {
        filter_chains.extend(egress_filter_chains(&egress.traffic_matches, options, diagnostics));
        sniffed.extend(egress.traffic_matches.iter());
    }

    let server_first = server_first_predicate(sniffed);
    let listener = Listener {
        name: OUTBOUND_LISTENER_NAME.to_string(),
        address: Some(socket_address(WILDCARD_ADDRESS, options.outbound_port)),
        traffic_direction: TrafficDirection::Outbound as i32,
        listener_filters: vec![
            original_destination(),
            tls_inspector(server_first.clone()),
            http_inspector(server_first),
        ],
        continue_on_listener_filters_timeout: true,
        filter_chains,
        default_filter_chain,
        access_log: access_logs(&options.access_log)?,
        ..Default::default()
    };

    let listener = non_empty(listener);
    if listener.is_none() {
        debug!(proxy = %identity, "No upstreams and no egress, omitting outbound listener");
    }
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Protocol, WeightedCluster};
    use crate::xds::filters::listener::{
        HTTP_INSPECTOR_FILTER_NAME, ORIGINAL_DST_FILTER_NAME, TLS_INSPECTOR_FILTER_NAME,
    };
    use crate::xds::filters::network::{HTTP_CONNECTION_MANAGER_FILTER_NAME, TCP_PROXY_FILTER_NAME};
    use crate::xds::listener::egress::PASSTHROUGH_FILTER_CHAIN_NAME;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("bookbuyer", "bookbuyer-ns")
    }

    fn upstream(port: u16, protocol: Protocol) -> TrafficMatch {
        let mut m = TrafficMatch::new(format!("bookstore-ns/bookstore_{}_{}", port, protocol.as_str()), port, protocol);
        m.destination_ip_ranges = vec!["10.0.1.5/32".into(), "10.0.1.6".into()];
        m.weighted_clusters = vec![WeightedCluster::new(format!("bookstore-ns/bookstore|{}", port), 100)];
        m
    }

    #[test]
    fn mesh_http_without_ranges_is_an_error() {
        let mut m = TrafficMatch::new("bookstore-ns/bookstore_80_http", 80, Protocol::Http);
        m.cluster = None;
        assert!(outbound_http_filter_chain(&m, &ListenerOptions::default()).is_err());
    }

    #[test]
    fn mesh_chains_match_port_and_prefixes() {
        let mesh = OutboundMeshTrafficPolicy {
            traffic_matches: vec![upstream(80, Protocol::Http), upstream(3306, Protocol::TcpServerFirst)],
            ..Default::default()
        };
        let mut diagnostics = Diagnostics::new();
        let listener = build_outbound_listener(&identity(), &mesh, None, &ListenerOptions::default(), &mut diagnostics)
            .unwrap()
            .unwrap();

        assert_eq!(listener.name, OUTBOUND_LISTENER_NAME);
        assert_eq!(listener.traffic_direction, TrafficDirection::Outbound as i32);
        assert!(listener.continue_on_listener_filters_timeout);
        assert!(listener.default_filter_chain.is_none());

        let names: Vec<&str> = listener.listener_filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec![ORIGINAL_DST_FILTER_NAME, TLS_INSPECTOR_FILTER_NAME, HTTP_INSPECTOR_FILTER_NAME]);
        assert!(listener.listener_filters[0].filter_disabled.is_none());
        assert!(listener.listener_filters[1].filter_disabled.is_some());
        assert_eq!(listener.listener_filters[1].filter_disabled, listener.listener_filters[2].filter_disabled);

        let http = &listener.filter_chains[0];
        assert_eq!(http.name, "outbound-mesh-http-filter-chain:bookstore-ns/bookstore_80_http");
        assert_eq!(http.filters[0].name, HTTP_CONNECTION_MANAGER_FILTER_NAME);
        let chain_match = http.filter_chain_match.as_ref().unwrap();
        assert_eq!(chain_match.destination_port, Some(UInt32Value { value: 80 }));
        assert_eq!(chain_match.prefix_ranges.len(), 2);

        let tcp = &listener.filter_chains[1];
        assert_eq!(tcp.name, "outbound-mesh-tcp-filter-chain:bookstore-ns/bookstore_3306_tcp-server-first");
        assert_eq!(tcp.filters[0].name, TCP_PROXY_FILTER_NAME);
    }

    #[test]
    fn global_egress_installs_passthrough_only() {
        let egress = EgressTrafficPolicy {
            traffic_matches: vec![TrafficMatch::new("egress_http_80", 80, Protocol::Http)],
            ..Default::default()
        };
        let options = ListenerOptions { global_egress: true, ..Default::default() };
        let listener = build_outbound_listener(
            &identity(),
            &OutboundMeshTrafficPolicy::default(),
            Some(&egress),
            &options,
            &mut Diagnostics::new(),
        )
        .unwrap()
        .unwrap();

        assert!(listener.filter_chains.is_empty());
        assert_eq!(listener.default_filter_chain.unwrap().name, PASSTHROUGH_FILTER_CHAIN_NAME);
    }

    #[test]
    fn egress_policy_chains_follow_mesh_chains() {
        let mut mysql = TrafficMatch::new("egress_mysql", 3306, Protocol::TcpServerFirst);
        mysql.cluster = Some("mysql.example.com:3306".into());
        let egress = EgressTrafficPolicy {
            traffic_matches: vec![TrafficMatch::new("egress_http_80", 80, Protocol::Http), mysql],
            ..Default::default()
        };
        let mesh =
            OutboundMeshTrafficPolicy { traffic_matches: vec![upstream(8080, Protocol::Grpc)], ..Default::default() };

        let listener =
            build_outbound_listener(&identity(), &mesh, Some(&egress), &ListenerOptions::default(), &mut Diagnostics::new())
                .unwrap()
                .unwrap();
        let names: Vec<&str> = listener.filter_chains.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["outbound-mesh-http-filter-chain:bookstore-ns/bookstore_8080_grpc", "egress-http.80", "egress-tcp.3306"]
        );
        assert!(listener.listener_filters[1].filter_disabled.is_some());
    }

    #[test]
    fn nothing_reachable_omits_listener() {
        let listener = build_outbound_listener(
            &identity(),
            &OutboundMeshTrafficPolicy::default(),
            None,
            &ListenerOptions::default(),
            &mut Diagnostics::new(),
        )
        .unwrap();
        assert!(listener.is_none());
    }
}

//! Inbound listener: mesh mTLS chains followed by ingress chains.

use envoy_types::pb::envoy::config::core::v3::TrafficDirection;
use envoy_types::pb::envoy::config::listener::v3::{Filter, FilterChain, FilterChainMatch, Listener};
use envoy_types::pb::google::protobuf::UInt32Value;
use tracing::debug;

use super::hcm::{HcmBuilder, HcmDirection};
use super::ingress::ingress_filter_chains;
use super::{non_empty, socket_address, ListenerOptions, INBOUND_LISTENER_NAME, WILDCARD_ADDRESS};
use crate::domain::ServiceIdentity;
use crate::trafficpolicy::{InboundMeshTrafficPolicy, IngressTrafficPolicy, TrafficMatch, TrafficTargetGrant};
use crate::xds::access_log::access_logs;
use crate::xds::filters::listener::{original_destination, tls_inspector};
use crate::xds::filters::network::{
    build_inbound_rbac_filter, build_tcp_global_rate_limit, build_tcp_local_rate_limit, build_tcp_proxy,
};
use crate::xds::resources::Diagnostics;
use crate::xds::route::inbound_route_config_name;
use crate::xds::tls::{downstream_transport_socket, PeerValidation, ALPN_IN_MESH, TRANSPORT_PROTOCOL_TLS};
use crate::Error;

pub const INBOUND_MESH_HTTP_FILTER_CHAIN_PREFIX: &str = "inbound-mesh-http-filter-chain";
pub const INBOUND_MESH_TCP_FILTER_CHAIN_PREFIX: &str = "inbound-mesh-tcp-filter-chain";
const INBOUND_MESH_TCP_PROXY_STAT_PREFIX: &str = "inbound-mesh-tcp-proxy";

/// Context shared by the inbound mesh chains of one proxy.
struct InboundChains<'a> {
    identity: &'a ServiceIdentity,
    grants: &'a [TrafficTargetGrant],
    options: &'a ListenerOptions,
}

impl InboundChains<'_> {
    /// L4 filters placed before the terminal filter: RBAC unless
    /// permissive, then the TCP rate limiters the match carries.
    fn leading_filters(&self, traffic_match: &TrafficMatch) -> crate::Result<Vec<Filter>> {
        let mut filters = Vec::new();
        if !self.options.permissive {
            filters.push(build_inbound_rbac_filter(self.grants, &self.options.trust_domain)?);
        }

        let rate_limit = traffic_match.rate_limit.as_ref();
        if let Some(local) = rate_limit.and_then(|rl| rl.tcp_local()) {
            filters.push(build_tcp_local_rate_limit(local, &traffic_match.name)?);
        }
        if let Some(global) = rate_limit.and_then(|rl| rl.tcp_global()) {
            filters.push(build_tcp_global_rate_limit(global, &traffic_match.name)?);
        }
        Ok(filters)
    }

    fn chain(&self, name: String, traffic_match: &TrafficMatch, filters: Vec<Filter>) -> FilterChain {
        FilterChain {
            name,
            filter_chain_match: Some(FilterChainMatch {
                destination_port: Some(UInt32Value { value: u32::from(traffic_match.destination_port) }),
                server_names: traffic_match.server_names.clone(),
                transport_protocol: TRANSPORT_PROTOCOL_TLS.to_string(),
                application_protocols: vec![ALPN_IN_MESH.to_string()],
                ..Default::default()
            }),
            filters,
            transport_socket: Some(downstream_transport_socket(self.identity, PeerValidation::Mesh)),
            ..Default::default()
        }
    }

    fn http_chain(&self, traffic_match: &TrafficMatch) -> crate::Result<FilterChain> {
        let mut filters = self.leading_filters(traffic_match)?;
        let hcm = HcmBuilder::rds(
            HcmDirection::Inbound,
            inbound_route_config_name(traffic_match.destination_port),
            self.options,
        )
        .global_rate_limit(traffic_match.rate_limit.as_ref().and_then(|rl| rl.http_global()))
        .build_filter()?;
        filters.push(hcm);

        let name = format!("{}:{}", INBOUND_MESH_HTTP_FILTER_CHAIN_PREFIX, traffic_match.name);
        Ok(self.chain(name, traffic_match, filters))
    }

    fn tcp_chain(&self, traffic_match: &TrafficMatch) -> crate::Result<FilterChain> {
        let mut filters = self.leading_filters(traffic_match)?;
        let stat_target = traffic_match.cluster.as_deref().unwrap_or(&traffic_match.name);
        filters.push(build_tcp_proxy(
            &format!("{}.{}", INBOUND_MESH_TCP_PROXY_STAT_PREFIX, stat_target),
            traffic_match.cluster.as_deref(),
            &traffic_match.weighted_clusters,
            access_logs(&self.options.access_log)?,
        )?);

        let name = format!("{}:{}", INBOUND_MESH_TCP_FILTER_CHAIN_PREFIX, traffic_match.name);
        Ok(self.chain(name, traffic_match, filters))
    }

    fn build(&self, traffic_match: &TrafficMatch) -> crate::Result<FilterChain> {
        let protocol = &traffic_match.destination_protocol;
        if protocol.is_http_like() {
            self.http_chain(traffic_match)
        } else if protocol.is_tcp_like() {
            self.tcp_chain(traffic_match)
        } else {
            Err(Error::unsupported_protocol(
                protocol.as_str(),
                format!("inbound traffic match {}", traffic_match.name),
            ))
        }
    }
}

/// Inbound mesh filter chains, one per traffic match.
///
/// A match whose chain cannot be built is recorded and skipped.
pub fn inbound_mesh_filter_chains(
    identity: &ServiceIdentity,
    policy: &InboundMeshTrafficPolicy,
    options: &ListenerOptions,
    diagnostics: &mut Diagnostics,
) -> Vec<FilterChain> {
    let chains = InboundChains { identity, grants: &policy.traffic_targets, options };
    policy
        .traffic_matches
        .iter()
        .filter_map(|traffic_match| match chains.build(traffic_match) {
            Ok(chain) => Some(chain),
            Err(e) => {
                diagnostics.skip(format!("{}/filter_chain:{}", INBOUND_LISTENER_NAME, traffic_match.name), &e);
                None
            }
        })
        .collect()
}

/// The inbound listener, or `None` when neither mesh nor ingress traffic
/// produced a filter chain.
pub fn build_inbound_listener(
    identity: &ServiceIdentity,
    mesh: &InboundMeshTrafficPolicy,
    ingress: Option<&IngressTrafficPolicy>,
    options: &ListenerOptions,
    diagnostics: &mut Diagnostics,
) -> crate::Result<Option<Listener>> {
    let mut filter_chains = inbound_mesh_filter_chains(identity, mesh, options, diagnostics);
    if let Some(ingress) = ingress {
        filter_chains.extend(ingress_filter_chains(identity, ingress, options, diagnostics));
    }

    let listener = Listener {
        name: INBOUND_LISTENER_NAME.to_string(),
        address: Some(socket_address(WILDCARD_ADDRESS, options.inbound_port)),
        traffic_direction: TrafficDirection::Inbound as i32,
        listener_filters: vec![tls_inspector(None), original_destination()],
        filter_chains,
        access_log: access_logs(&options.access_log)?,
        ..Default::default()
    };

    let listener = non_empty(listener);
    if listener.is_none() {
        debug!(proxy = %identity, "No inbound filter chains, omitting inbound listener");
    }
    Ok(listener)
}

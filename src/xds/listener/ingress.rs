//! Ingress filter chains on the inbound listener.
//!
//! Plain HTTP ingress is matched by port and client CIDRs only. HTTPS ingress
//! additionally matches TLS with the configured SNI and terminates it with
//! the proxy's service certificate.

use envoy_types::pb::envoy::config::listener::v3::{FilterChain, FilterChainMatch};
use envoy_types::pb::google::protobuf::UInt32Value;
use tracing::warn;

use super::cidr_ranges;
use super::hcm::{HcmBuilder, HcmDirection};
use super::{ListenerOptions, INBOUND_LISTENER_NAME};
use crate::domain::{Protocol, ServiceIdentity};
use crate::trafficpolicy::{IngressTrafficMatch, IngressTrafficPolicy};
use crate::xds::resources::Diagnostics;
use crate::xds::route::INGRESS_ROUTE_CONFIG_NAME;
use crate::xds::tls::{downstream_transport_socket, PeerValidation, TRANSPORT_PROTOCOL_TLS};
use crate::Error;

/// Filter chain for one ingress traffic match, named after it.
pub fn ingress_filter_chain(
    identity: &ServiceIdentity,
    traffic_match: &IngressTrafficMatch,
    options: &ListenerOptions,
) -> crate::Result<FilterChain> {
    let hcm = HcmBuilder::rds(HcmDirection::Inbound, INGRESS_ROUTE_CONFIG_NAME, options).build_filter()?;

    let mut chain_match = FilterChainMatch {
        destination_port: Some(UInt32Value { value: u32::from(traffic_match.port) }),
        source_prefix_ranges: cidr_ranges(&traffic_match.source_ip_ranges, &traffic_match.name)?,
        ..Default::default()
    };
    let mut transport_socket = None;

    match traffic_match.protocol {
        Protocol::Http => {
            if chain_match.source_prefix_ranges.is_empty() {
                warn!(
                    proxy = %identity,
                    traffic_match = %traffic_match.name,
                    "HTTP ingress without source ranges is insecure, restrict the allowed clients"
                );
            }
        }
        Protocol::Https => {
            chain_match.transport_protocol = TRANSPORT_PROTOCOL_TLS.to_string();
            chain_match.server_names = traffic_match.server_names.clone();
            transport_socket = Some(downstream_transport_socket(
                identity,
                PeerValidation::Ingress { require_client_certificate: !traffic_match.skip_client_cert_validation },
            ));
        }
        ref other => {
            return Err(Error::unsupported_protocol(
                other.as_str(),
                format!("ingress traffic match {}, expected http or https", traffic_match.name),
            ))
        }
    }

    Ok(FilterChain {
        name: traffic_match.name.clone(),
        filter_chain_match: Some(chain_match),
        filters: vec![hcm],
        transport_socket,
        ..Default::default()
    })
}

/// Ingress chains for every traffic match of `policy`; failures are
/// recorded and skipped.
pub fn ingress_filter_chains(
    identity: &ServiceIdentity,
    policy: &IngressTrafficPolicy,
    options: &ListenerOptions,
    diagnostics: &mut Diagnostics,
) -> Vec<FilterChain> {
    policy
        .traffic_matches
        .iter()
        .filter_map(|traffic_match| {
            ingress_filter_chain(identity, traffic_match, options)
                .map_err(|e| {
                    diagnostics.skip(format!("{}/filter_chain:{}", INBOUND_LISTENER_NAME, traffic_match.name), &e)
                })
                .ok()
        })
        .collect()
}

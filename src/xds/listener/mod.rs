//! Listener builders
//!
//! Each proxy gets at most three listeners: outbound (mesh and egress
//! traffic leaving the workload), inbound (mesh and ingress traffic reaching
//! it) and the optional Prometheus scrape listener. A listener that ends up
//! with no filter chain and no default chain is not emitted.

pub mod egress;
pub mod hcm;
pub mod inbound;
pub mod ingress;
pub mod outbound;
pub mod prometheus;

pub use inbound::build_inbound_listener;
pub use outbound::build_outbound_listener;
pub use prometheus::build_prometheus_listener;

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address::PortSpecifier, Address, CidrRange,
    SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::google::protobuf::UInt32Value;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::error;

use crate::config::{AccessLogConfig, CompilerConfig};
use crate::xds::filters::http::ExtAuthzConfig;
use crate::Error;

pub const OUTBOUND_LISTENER_NAME: &str = "outbound-listener";
pub const INBOUND_LISTENER_NAME: &str = "inbound-listener";
pub const PROMETHEUS_LISTENER_NAME: &str = "inbound-prometheus-listener";

pub const DEFAULT_OUTBOUND_PORT: u16 = 15001;
pub const DEFAULT_INBOUND_PORT: u16 = 15003;
pub const DEFAULT_PROMETHEUS_PORT: u16 = 15010;

/// Every listener binds all IPv4 addresses; traffic is redirected to it.
pub const WILDCARD_ADDRESS: &str = "0.0.0.0";

/// Mesh-wide switches and per-proxy settings the listener builders consume.
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    pub outbound_port: u16,
    pub inbound_port: u16,
    pub trust_domain: String,
    /// Skip L4/L7 access control entirely.
    pub permissive: bool,
    /// Allow all egress through the pass-through chain.
    pub global_egress: bool,
    /// Zipkin collector endpoint; `None` disables HTTP tracing.
    pub tracing_endpoint: Option<String>,
    /// External authorization for inbound and ingress connection managers.
    pub ext_authz: Option<ExtAuthzConfig>,
    pub health_checks: bool,
    /// Response headers identifying this proxy in local replies.
    pub stats_headers: BTreeMap<String, String>,
    pub access_log: AccessLogConfig,
}

impl ListenerOptions {
    /// Options carrying the ports, trust domain and access log of `config`.
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            outbound_port: config.listeners.outbound_port,
            inbound_port: config.listeners.inbound_port,
            trust_domain: config.trust_domain.clone(),
            access_log: config.access_log.clone(),
            ..Default::default()
        }
    }
}

pub fn socket_address(address: &str, port: u16) -> Address {
    Address {
        address: Some(AddressType::SocketAddress(SocketAddress {
            address: address.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(u32::from(port))),
            ..Default::default()
        })),
    }
}

/// Parses `ip/len` or a bare IP (host prefix) into a CIDR range.
pub fn cidr_range(cidr: &str) -> crate::Result<CidrRange> {
    let invalid = || Error::validation_field(format!("invalid CIDR '{}'", cidr), "ip_range");
    let (ip, len) = match cidr.split_once('/') {
        Some((ip, len)) => (ip, Some(len)),
        None => (cidr, None),
    };

    let ip: IpAddr = ip.trim().parse().map_err(|_| invalid())?;
    let max_len = if ip.is_ipv4() { 32 } else { 128 };
    let prefix_len = match len {
        Some(len) => len.trim().parse::<u32>().map_err(|_| invalid())?,
        None => max_len,
    };
    if prefix_len > max_len {
        return Err(invalid());
    }

    Ok(CidrRange { address_prefix: ip.to_string(), prefix_len: Some(UInt32Value { value: prefix_len }) })
}

/// Parses the CIDRs of a traffic match, logging and dropping the invalid ones.
///
/// Fails when ranges were configured but none of them parsed, since an empty
/// range list would match every address.
pub(crate) fn cidr_ranges(ranges: &[String], traffic_match: &str) -> crate::Result<Vec<CidrRange>> {
    let parsed: Vec<CidrRange> = ranges
        .iter()
        .filter_map(|range| match cidr_range(range) {
            Ok(cidr) => Some(cidr),
            Err(e) => {
                error!(ip_range = %range, traffic_match, error = %e, "Skipping invalid IP range");
                None
            }
        })
        .collect();

    if parsed.is_empty() && !ranges.is_empty() {
        return Err(Error::validation_field(
            format!("none of the IP ranges of '{}' is valid: {}", traffic_match, ranges.join(", ")),
            "ip_range",
        ));
    }
    Ok(parsed)
}

/// `None` for a listener that would carry no filter chain at all.
pub(crate) fn non_empty(listener: Listener) -> Option<Listener> {
    if listener.filter_chains.is_empty() && listener.default_filter_chain.is_none() {
        None
    } else {
        Some(listener)
    }
}

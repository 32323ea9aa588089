//! Listener filters and their disable predicates.
//!
//! Protocol-sniffing listener filters wait for the client's first bytes. On
//! ports where the server speaks first they would stall until the listener
//! filter timeout, so those ports are excluded through `filter_disabled`.

use envoy_types::pb::envoy::config::listener::v3::{
    listener_filter::ConfigType, listener_filter_chain_match_predicate::{MatchSet, Rule},
    ListenerFilter, ListenerFilterChainMatchPredicate,
};
use envoy_types::pb::envoy::extensions::filters::listener::http_inspector::v3::HttpInspector;
use envoy_types::pb::envoy::extensions::filters::listener::original_dst::v3::OriginalDst;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::r#type::v3::Int32Range;
use prost::Message;

use crate::domain::Protocol;
use crate::trafficpolicy::TrafficMatch;
use crate::xds::filters::any_from_message;

pub const ORIGINAL_DST_FILTER_NAME: &str = "envoy.filters.listener.original_dst";
pub const TLS_INSPECTOR_FILTER_NAME: &str = "envoy.filters.listener.tls_inspector";
pub const HTTP_INSPECTOR_FILTER_NAME: &str = "envoy.filters.listener.http_inspector";

const ORIGINAL_DST_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.original_dst.v3.OriginalDst";
const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
const HTTP_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.http_inspector.v3.HttpInspector";

fn listener_filter<M: Message>(
    name: &str,
    type_url: &str,
    msg: &M,
    filter_disabled: Option<ListenerFilterChainMatchPredicate>,
) -> ListenerFilter {
    ListenerFilter {
        name: name.to_string(),
        config_type: Some(ConfigType::TypedConfig(any_from_message(type_url, msg))),
        filter_disabled,
    }
}

/// Restores the pre-redirect destination address of the connection.
pub fn original_destination() -> ListenerFilter {
    listener_filter(ORIGINAL_DST_FILTER_NAME, ORIGINAL_DST_TYPE_URL, &OriginalDst::default(), None)
}

pub fn tls_inspector(filter_disabled: Option<ListenerFilterChainMatchPredicate>) -> ListenerFilter {
    listener_filter(TLS_INSPECTOR_FILTER_NAME, TLS_INSPECTOR_TYPE_URL, &TlsInspector::default(), filter_disabled)
}

pub fn http_inspector(filter_disabled: Option<ListenerFilterChainMatchPredicate>) -> ListenerFilter {
    listener_filter(
        HTTP_INSPECTOR_FILTER_NAME,
        HTTP_INSPECTOR_TYPE_URL,
        &HttpInspector::default(),
        filter_disabled,
    )
}

/// Predicate matching any of `ports`, or `None` when there are none.
///
/// A single port is matched directly; an OR set needs at least two rules.
pub fn ports_predicate(ports: &[u16]) -> Option<ListenerFilterChainMatchPredicate> {
    let mut rules: Vec<ListenerFilterChainMatchPredicate> = ports
        .iter()
        .map(|&port| ListenerFilterChainMatchPredicate {
            rule: Some(Rule::DestinationPortRange(Int32Range {
                start: i32::from(port),
                end: i32::from(port) + 1,
            })),
        })
        .collect();

    match rules.len() {
        0 => None,
        1 => rules.pop(),
        _ => Some(ListenerFilterChainMatchPredicate { rule: Some(Rule::OrMatch(MatchSet { rules })) }),
    }
}

/// Predicate covering the distinct ports of server-first traffic matches.
pub fn server_first_predicate<'a>(
    matches: impl IntoIterator<Item = &'a TrafficMatch>,
) -> Option<ListenerFilterChainMatchPredicate> {
    let mut ports: Vec<u16> = Vec::new();
    for m in matches {
        if m.destination_protocol == Protocol::TcpServerFirst && !ports.contains(&m.destination_port) {
            ports.push(m.destination_port);
        }
    }
    ports_predicate(&ports)
}

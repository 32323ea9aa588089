//! Network (L4) filters placed in listener filter chains.
//!
//! Inbound chains apply them in a fixed order: RBAC, local rate limit, global
//! rate limit, then the terminal HTTP connection manager or TCP proxy.

pub mod local_rate_limit;
pub mod rate_limit;
pub mod rbac;
pub mod tcp_proxy;

pub use local_rate_limit::build_tcp_local_rate_limit;
pub use rate_limit::build_tcp_global_rate_limit;
pub use rbac::build_inbound_rbac_filter;
pub use tcp_proxy::build_tcp_proxy;

use envoy_types::pb::envoy::config::listener::v3::{filter::ConfigType, Filter};
use prost::Message;

use super::any_from_message;

pub const RBAC_FILTER_NAME: &str = "envoy.filters.network.rbac";
pub const LOCAL_RATE_LIMIT_FILTER_NAME: &str = "envoy.filters.network.local_ratelimit";
pub const RATE_LIMIT_FILTER_NAME: &str = "envoy.filters.network.ratelimit";
pub const TCP_PROXY_FILTER_NAME: &str = "envoy.filters.network.tcp_proxy";
pub const HTTP_CONNECTION_MANAGER_FILTER_NAME: &str =
    "envoy.filters.network.http_connection_manager";

pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

/// Wraps a typed payload into a named network filter.
pub fn typed_filter<M: Message>(name: &str, type_url: &str, msg: &M) -> Filter {
    Filter {
        name: name.to_string(),
        config_type: Some(ConfigType::TypedConfig(any_from_message(type_url, msg))),
    }
}

/// The payload of a filter built by [`typed_filter`].
pub fn filter_payload(filter: &Filter) -> Option<&envoy_types::pb::google::protobuf::Any> {
    match &filter.config_type {
        Some(ConfigType::TypedConfig(any)) => Some(any),
        _ => None,
    }
}

//! HTTP tracing through a Zipkin-compatible collector.

use envoy_types::pb::envoy::config::trace::v3::tracing::{self, Http as HttpTracing};
use envoy_types::pb::envoy::config::trace::v3::{zipkin_config::CollectorEndpointVersion, ZipkinConfig};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_connection_manager;

use crate::xds::filters::any_from_message;

pub const ZIPKIN_TRACER_NAME: &str = "envoy.tracers.zipkin";
pub const ZIPKIN_TYPE_URL: &str = "type.googleapis.com/envoy.config.trace.v3.ZipkinConfig";

/// Cluster the proxies send spans to.
pub const TRACING_CLUSTER: &str = "envoy-tracing-cluster";

pub const DEFAULT_TRACING_ENDPOINT: &str = "/api/v2/spans";

/// Connection manager tracing config posting verbose JSON spans to `endpoint`.
pub fn http_tracing(endpoint: &str) -> http_connection_manager::Tracing {
    let endpoint = if endpoint.is_empty() { DEFAULT_TRACING_ENDPOINT } else { endpoint };
    let zipkin = ZipkinConfig {
        collector_cluster: TRACING_CLUSTER.to_string(),
        collector_endpoint: endpoint.to_string(),
        collector_endpoint_version: CollectorEndpointVersion::HttpJson as i32,
        ..Default::default()
    };

    http_connection_manager::Tracing {
        verbose: true,
        provider: Some(HttpTracing {
            name: ZIPKIN_TRACER_NAME.to_string(),
            config_type: Some(tracing::http::ConfigType::TypedConfig(any_from_message(
                ZIPKIN_TYPE_URL,
                &zipkin,
            ))),
        }),
        ..Default::default()
    }
}

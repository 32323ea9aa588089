//! Connection rate limiting delegated to an external rate-limit service.

use envoy_types::pb::envoy::config::listener::v3::Filter;
use envoy_types::pb::envoy::extensions::common::ratelimit::v3::{
    rate_limit_descriptor, RateLimitDescriptor,
};
use envoy_types::pb::envoy::extensions::filters::network::ratelimit::v3::RateLimit;

use super::{typed_filter, RATE_LIMIT_FILTER_NAME};
use crate::trafficpolicy::TcpGlobalRateLimitSpec;
use crate::xds::filters::{duration_from_millis, rate_limit_service};

pub const RATE_LIMIT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.ratelimit.v3.RateLimit";

/// Builds the `envoy.filters.network.ratelimit` filter for `spec`.
///
/// Connections are denied when the service cannot be reached unless the spec
/// explicitly fails open.
pub fn build_tcp_global_rate_limit(
    spec: &TcpGlobalRateLimitSpec,
    stat_prefix: &str,
) -> crate::Result<Filter> {
    let timeout = spec.timeout_ms.map(duration_from_millis);

    let descriptors = spec
        .descriptors
        .iter()
        .map(|descriptor| RateLimitDescriptor {
            entries: descriptor
                .entries
                .iter()
                .map(|entry| rate_limit_descriptor::Entry {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    let config = RateLimit {
        stat_prefix: stat_prefix.to_string(),
        domain: spec.domain.clone(),
        descriptors,
        timeout,
        failure_mode_deny: !spec.fail_open.unwrap_or(false),
        rate_limit_service: Some(rate_limit_service(&spec.rate_limit_service, timeout)),
        ..Default::default()
    };

    Ok(typed_filter(RATE_LIMIT_FILTER_NAME, RATE_LIMIT_TYPE_URL, &config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trafficpolicy::{RateLimitServiceRef, TcpRateLimitDescriptor, TcpRateLimitDescriptorEntry};
    use crate::xds::filters::{decode_any, network::filter_payload};

    fn spec(fail_open: Option<bool>) -> TcpGlobalRateLimitSpec {
        TcpGlobalRateLimitSpec {
            rate_limit_service: RateLimitServiceRef { host: "ratelimit.rl".into(), port: 8081 },
            domain: "bookstore".into(),
            descriptors: vec![
                TcpRateLimitDescriptor {
                    entries: vec![
                        TcpRateLimitDescriptorEntry { key: "k1".into(), value: "v1".into() },
                        TcpRateLimitDescriptorEntry { key: "k2".into(), value: "v2".into() },
                    ],
                },
                TcpRateLimitDescriptor {
                    entries: vec![TcpRateLimitDescriptorEntry { key: "k3".into(), value: "v3".into() }],
                },
            ],
            timeout_ms: Some(250),
            fail_open,
        }
    }

    fn decode(filter: &Filter) -> RateLimit {
        decode_any(filter_payload(filter).unwrap(), RATE_LIMIT_TYPE_URL).unwrap()
    }

    #[test]
    fn descriptors_keep_order_and_grouping() {
        let filter = build_tcp_global_rate_limit(&spec(None), "inbound_store/bookstore_80_tcp").unwrap();
        assert_eq!(filter.name, RATE_LIMIT_FILTER_NAME);

        let config = decode(&filter);
        assert_eq!(config.domain, "bookstore");
        assert_eq!(config.descriptors.len(), 2);
        assert_eq!(config.descriptors[0].entries[1].key, "k2");
        assert_eq!(config.descriptors[1].entries[0].value, "v3");
        assert_eq!(config.timeout.unwrap().nanos, 250_000_000);
        let service = config.rate_limit_service.unwrap();
        assert_eq!(service.grpc_service.unwrap().timeout.unwrap().nanos, 250_000_000);
    }

    #[test]
    fn denies_on_failure_unless_fail_open() {
        assert!(decode(&build_tcp_global_rate_limit(&spec(None), "s").unwrap()).failure_mode_deny);
        assert!(decode(&build_tcp_global_rate_limit(&spec(Some(false)), "s").unwrap()).failure_mode_deny);
        assert!(!decode(&build_tcp_global_rate_limit(&spec(Some(true)), "s").unwrap()).failure_mode_deny);
    }
}

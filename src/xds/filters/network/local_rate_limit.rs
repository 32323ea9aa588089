//! Per-proxy connection rate limiting.

use envoy_types::pb::envoy::config::listener::v3::Filter;
use envoy_types::pb::envoy::extensions::filters::network::local_ratelimit::v3::LocalRateLimit;

use super::{typed_filter, LOCAL_RATE_LIMIT_FILTER_NAME};
use crate::trafficpolicy::TcpLocalRateLimitSpec;
use crate::xds::filters::token_bucket;

pub const LOCAL_RATE_LIMIT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.local_ratelimit.v3.LocalRateLimit";

/// Builds the `envoy.filters.network.local_ratelimit` filter for `spec`.
///
/// Fails with a rate-limit error when the unit is not `second`, `minute` or `hour`.
pub fn build_tcp_local_rate_limit(
    spec: &TcpLocalRateLimitSpec,
    stat_prefix: &str,
) -> crate::Result<Filter> {
    let config = LocalRateLimit {
        stat_prefix: stat_prefix.to_string(),
        token_bucket: Some(token_bucket(spec.connections, spec.burst, &spec.unit, "TCP connection")?),
        ..Default::default()
    };

    Ok(typed_filter(LOCAL_RATE_LIMIT_FILTER_NAME, LOCAL_RATE_LIMIT_TYPE_URL, &config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::filters::{decode_any, network::filter_payload};
    use envoy_types::pb::google::protobuf::UInt32Value;

    fn spec(connections: u32, unit: &str, burst: u32) -> TcpLocalRateLimitSpec {
        TcpLocalRateLimitSpec { connections, unit: unit.into(), burst }
    }

    #[test]
    fn builds_bucket_from_connections_and_burst() {
        let filter = build_tcp_local_rate_limit(&spec(100, "minute", 10), "inbound_store/bookstore_80_tcp")
            .unwrap();
        assert_eq!(filter.name, LOCAL_RATE_LIMIT_FILTER_NAME);

        let config: LocalRateLimit =
            decode_any(filter_payload(&filter).unwrap(), LOCAL_RATE_LIMIT_TYPE_URL).unwrap();
        assert_eq!(config.stat_prefix, "inbound_store/bookstore_80_tcp");
        let bucket = config.token_bucket.unwrap();
        assert_eq!(bucket.max_tokens, 110);
        assert_eq!(bucket.tokens_per_fill, Some(UInt32Value { value: 100 }));
        assert_eq!(bucket.fill_interval.unwrap().seconds, 60);
    }

    #[test]
    fn invalid_unit_builds_no_filter() {
        assert!(build_tcp_local_rate_limit(&spec(100, "fortnight", 0), "stats").is_err());
    }
}

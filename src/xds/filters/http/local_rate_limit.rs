//! Local Rate Limit HTTP filter configuration helpers

use envoy_types::pb::envoy::config::core::v3::{
    HeaderValue, HeaderValueOption, RuntimeFractionalPercent,
};
use envoy_types::pb::envoy::extensions::filters::http::local_ratelimit::v3::LocalRateLimit;
use envoy_types::pb::envoy::r#type::v3::{fractional_percent, FractionalPercent, HttpStatus};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue};

use crate::trafficpolicy::{HeaderValue as RateLimitHeader, HttpLocalRateLimitSpec};
use crate::xds::filters::{any_from_message, token_bucket};

pub const LOCAL_RATE_LIMIT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.local_ratelimit.v3.LocalRateLimit";

/// Stat prefix of limiters attached to virtual hosts and routes.
pub const HTTP_LOCAL_RATE_LIMITER_STAT_PREFIX: &str = "http_local_rate_limiter";

/// Filter-level config without a token bucket.
///
/// Without a bucket the filter limits nothing; buckets are supplied per
/// virtual host or per route by [`local_rate_limit_config`].
pub fn inert_filter_any(stat_prefix: &str) -> EnvoyAny {
    any_from_message(
        LOCAL_RATE_LIMIT_TYPE_URL,
        &LocalRateLimit { stat_prefix: stat_prefix.to_string(), ..Default::default() },
    )
}

fn always() -> RuntimeFractionalPercent {
    RuntimeFractionalPercent {
        default_value: Some(FractionalPercent {
            numerator: 100,
            denominator: fractional_percent::DenominatorType::Hundred as i32,
        }),
        runtime_key: String::new(),
    }
}

fn header_options(headers: &[RateLimitHeader]) -> Vec<HeaderValueOption> {
    headers
        .iter()
        .map(|h| HeaderValueOption {
            header: Some(HeaderValue { key: h.name.clone(), value: h.value.clone(), ..Default::default() }),
            #[allow(deprecated)]
            append: Some(BoolValue { value: false }),
            ..Default::default()
        })
        .collect()
}

/// Per-vhost or per-route limiter for `spec`, enabled and enforced for all requests.
///
/// Fails with a rate-limit error for an unknown unit.
pub fn local_rate_limit_config(spec: &HttpLocalRateLimitSpec) -> crate::Result<EnvoyAny> {
    let mut config = LocalRateLimit {
        stat_prefix: HTTP_LOCAL_RATE_LIMITER_STAT_PREFIX.to_string(),
        token_bucket: Some(token_bucket(spec.requests, spec.burst, &spec.unit, "HTTP request")?),
        response_headers_to_add: header_options(&spec.response_headers_to_add),
        filter_enabled: Some(always()),
        filter_enforced: Some(always()),
        ..Default::default()
    };

    // Zero keeps Envoy's default of 429
    if spec.response_status_code > 0 {
        config.status = Some(HttpStatus { code: spec.response_status_code as i32 });
    }

    Ok(any_from_message(LOCAL_RATE_LIMIT_TYPE_URL, &config))
}

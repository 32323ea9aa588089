//! Distributed Rate Limit HTTP filter configuration helpers
//!
//! The filter itself only names the rate-limit service and domain. What is
//! sent to the service is described by rate-limit actions attached to virtual
//! hosts and routes, built by [`rate_limit_actions`].

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    rate_limit::{action, Action},
    HeaderMatcher, RateLimit as RouteRateLimit,
};
use envoy_types::pb::envoy::extensions::filters::http::ratelimit::v3::{
    rate_limit::XRateLimitHeadersRfcVersion, RateLimit as RateLimitProto,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::envoy::r#type::v3::HttpStatus;
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue};

use crate::trafficpolicy::{
    HeaderMatchKind, HttpGlobalRateLimitDescriptor, HttpGlobalRateLimitDescriptorEntry,
    HttpGlobalRateLimitSpec, HttpHeaderMatcher,
};
use crate::xds::filters::{any_from_message, duration_from_millis, rate_limit_service, safe_regex};

pub const RATE_LIMIT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ratelimit.v3.RateLimit";

/// Filter-level config for `spec`.
///
/// Requests are denied when the service cannot be reached unless the spec
/// explicitly fails open.
pub fn build_http_global_rate_limit(spec: &HttpGlobalRateLimitSpec) -> EnvoyAny {
    let timeout = spec.timeout_ms.map(duration_from_millis);

    let x_ratelimit_headers = if spec.enable_x_rate_limit_headers.unwrap_or(false) {
        XRateLimitHeadersRfcVersion::DraftVersion03
    } else {
        XRateLimitHeadersRfcVersion::Off
    };

    let mut config = RateLimitProto {
        domain: spec.domain.clone(),
        rate_limit_service: Some(rate_limit_service(&spec.rate_limit_service, timeout)),
        enable_x_ratelimit_headers: x_ratelimit_headers as i32,
        timeout,
        failure_mode_deny: !spec.fail_open.unwrap_or(false),
        ..Default::default()
    };

    if spec.response_status_code > 0 {
        config.rate_limited_status = Some(HttpStatus { code: spec.response_status_code as i32 });
    }

    any_from_message(RATE_LIMIT_TYPE_URL, &config)
}

/// One route rate limit per descriptor group, with one action per entry.
pub fn rate_limit_actions(descriptors: &[HttpGlobalRateLimitDescriptor]) -> Vec<RouteRateLimit> {
    descriptors
        .iter()
        .map(|descriptor| RouteRateLimit {
            actions: descriptor.entries.iter().map(rate_limit_action).collect(),
            ..Default::default()
        })
        .collect()
}

fn rate_limit_action(entry: &HttpGlobalRateLimitDescriptorEntry) -> Action {
    let specifier = match entry {
        HttpGlobalRateLimitDescriptorEntry::GenericKey { value, key } => {
            action::ActionSpecifier::GenericKey(action::GenericKey {
                descriptor_key: key.clone().unwrap_or_default(),
                descriptor_value: value.clone(),
                ..Default::default()
            })
        }
        HttpGlobalRateLimitDescriptorEntry::RemoteAddress => {
            action::ActionSpecifier::RemoteAddress(action::RemoteAddress {})
        }
        HttpGlobalRateLimitDescriptorEntry::RequestHeader { name, key } => {
            action::ActionSpecifier::RequestHeaders(action::RequestHeaders {
                header_name: name.clone(),
                descriptor_key: key.clone(),
                ..Default::default()
            })
        }
        HttpGlobalRateLimitDescriptorEntry::HeaderValueMatch { value, headers, key, expect_match } => {
            action::ActionSpecifier::HeaderValueMatch(action::HeaderValueMatch {
                descriptor_key: key.clone().unwrap_or_default(),
                descriptor_value: value.clone(),
                expect_match: expect_match.map(|value| BoolValue { value }),
                headers: header_matchers(headers),
                ..Default::default()
            })
        }
    };

    Action { action_specifier: Some(specifier) }
}

fn string_match(pattern: MatchPattern) -> HeaderMatchSpecifier {
    HeaderMatchSpecifier::StringMatch(StringMatcher { match_pattern: Some(pattern), ignore_case: false })
}

/// Route header matchers for the descriptor's header conditions.
pub fn header_matchers(headers: &[HttpHeaderMatcher]) -> Vec<HeaderMatcher> {
    headers
        .iter()
        .map(|h| {
            let specifier = match &h.kind {
                HeaderMatchKind::Exact(v) => string_match(MatchPattern::Exact(v.clone())),
                HeaderMatchKind::Prefix(v) => string_match(MatchPattern::Prefix(v.clone())),
                HeaderMatchKind::Suffix(v) => string_match(MatchPattern::Suffix(v.clone())),
                HeaderMatchKind::Regex(v) => string_match(MatchPattern::SafeRegex(safe_regex(v.clone()))),
                HeaderMatchKind::Contains(v) => string_match(MatchPattern::Contains(v.clone())),
                HeaderMatchKind::Present(present) => HeaderMatchSpecifier::PresentMatch(*present),
            };
            HeaderMatcher {
                name: h.name.clone(),
                header_match_specifier: Some(specifier),
                ..Default::default()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trafficpolicy::RateLimitServiceRef;
    use crate::xds::filters::decode_any;

    fn spec() -> HttpGlobalRateLimitSpec {
        HttpGlobalRateLimitSpec {
            rate_limit_service: RateLimitServiceRef { host: "ratelimit.rl".into(), port: 8081 },
            domain: "bookstore".into(),
            descriptors: vec![],
            timeout_ms: Some(2000),
            fail_open: None,
            enable_x_rate_limit_headers: None,
            response_status_code: 0,
        }
    }

    fn decode(any: &EnvoyAny) -> RateLimitProto {
        decode_any(any, RATE_LIMIT_TYPE_URL).unwrap()
    }

    #[test]
    fn filter_defaults() {
        let config = decode(&build_http_global_rate_limit(&spec()));
        assert_eq!(config.domain, "bookstore");
        assert!(config.failure_mode_deny);
        assert_eq!(config.enable_x_ratelimit_headers, XRateLimitHeadersRfcVersion::Off as i32);
        assert!(config.rate_limited_status.is_none());
        assert_eq!(config.timeout.unwrap().seconds, 2);
    }

    #[test]
    fn filter_overrides() {
        let spec = HttpGlobalRateLimitSpec {
            fail_open: Some(true),
            enable_x_rate_limit_headers: Some(true),
            response_status_code: 503,
            ..spec()
        };
        let config = decode(&build_http_global_rate_limit(&spec));
        assert!(!config.failure_mode_deny);
        assert_eq!(config.enable_x_ratelimit_headers, XRateLimitHeadersRfcVersion::DraftVersion03 as i32);
        assert_eq!(config.rate_limited_status, Some(HttpStatus { code: 503 }));
    }

    #[test]
    fn actions_follow_descriptor_entries() {
        let descriptors = vec![
            HttpGlobalRateLimitDescriptor {
                entries: vec![
                    HttpGlobalRateLimitDescriptorEntry::GenericKey { value: "books".into(), key: None },
                    HttpGlobalRateLimitDescriptorEntry::RemoteAddress,
                ],
            },
            HttpGlobalRateLimitDescriptor {
                entries: vec![
                    HttpGlobalRateLimitDescriptorEntry::RequestHeader {
                        name: "x-user".into(),
                        key: "user".into(),
                    },
                    HttpGlobalRateLimitDescriptorEntry::HeaderValueMatch {
                        value: "gold".into(),
                        headers: vec![
                            HttpHeaderMatcher { name: "x-tier".into(), kind: HeaderMatchKind::Regex("gold.*".into()) },
                            HttpHeaderMatcher { name: "x-debug".into(), kind: HeaderMatchKind::Present(true) },
                        ],
                        key: Some("tier".into()),
                        expect_match: Some(false),
                    },
                ],
            },
        ];

        let limits = rate_limit_actions(&descriptors);
        assert_eq!(limits.len(), 2);
        assert_eq!(limits[0].actions.len(), 2);
        match &limits[0].actions[0].action_specifier {
            Some(action::ActionSpecifier::GenericKey(generic)) => {
                assert_eq!(generic.descriptor_value, "books");
                assert!(generic.descriptor_key.is_empty());
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(
            limits[0].actions[1].action_specifier,
            Some(action::ActionSpecifier::RemoteAddress(action::RemoteAddress {}))
        );

        match &limits[1].actions[1].action_specifier {
            Some(action::ActionSpecifier::HeaderValueMatch(m)) => {
                assert_eq!(m.descriptor_key, "tier");
                assert_eq!(m.expect_match, Some(BoolValue { value: false }));
                assert_eq!(
                    m.headers[0].header_match_specifier,
                    Some(string_match(MatchPattern::SafeRegex(safe_regex("gold.*"))))
                );
                assert_eq!(m.headers[1].header_match_specifier, Some(HeaderMatchSpecifier::PresentMatch(true)));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }
}

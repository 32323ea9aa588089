//! Health Check HTTP filter configuration helpers

use envoy_types::pb::envoy::config::route::v3::{header_matcher::HeaderMatchSpecifier, HeaderMatcher};
use envoy_types::pb::envoy::extensions::filters::http::health_check::v3::HealthCheck as HealthCheckProto;
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue};

use crate::xds::filters::any_from_message;

pub const HEALTH_CHECK_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.health_check.v3.HealthCheck";

/// Path answered by the proxy itself for active health checks.
pub const HEALTH_CHECK_PATH: &str = "/osm-healthcheck";

/// Filter answering `GET /osm-healthcheck` without reaching the application.
pub fn health_check_any() -> EnvoyAny {
    let proto = HealthCheckProto {
        pass_through_mode: Some(BoolValue { value: false }),
        headers: vec![HeaderMatcher {
            name: ":path".to_string(),
            header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                match_pattern: Some(MatchPattern::Exact(HEALTH_CHECK_PATH.to_string())),
                ignore_case: false,
            })),
            ..Default::default()
        }],
        ..Default::default()
    };

    any_from_message(HEALTH_CHECK_TYPE_URL, &proto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::filters::decode_any;

    #[test]
    fn matches_health_check_path_only() {
        let proto: HealthCheckProto = decode_any(&health_check_any(), HEALTH_CHECK_TYPE_URL).unwrap();
        assert_eq!(proto.pass_through_mode, Some(BoolValue { value: false }));
        assert_eq!(proto.headers.len(), 1);
        assert_eq!(proto.headers[0].name, ":path");
        assert_eq!(
            proto.headers[0].header_match_specifier,
            Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                match_pattern: Some(MatchPattern::Exact("/osm-healthcheck".into())),
                ignore_case: false,
            }))
        );
    }
}

//! Single routes: match, weighted-cluster action and retry policy.

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, retry_policy::RetryBackOff, route::Action,
    route_action::ClusterSpecifier, route_match::PathSpecifier, weighted_cluster::ClusterWeight,
    HeaderMatcher, RetryPolicy as RetryPolicyProto, Route, RouteAction, RouteMatch,
    WeightedCluster as WeightedClusterProto,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::{Duration as ProtoDuration, UInt32Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::WeightedCluster;
use crate::trafficpolicy::{
    PathMatchType, RetryPolicy, RouteWeightedClusters, HOST_HEADER, WILDCARD_METHOD,
    WILDCARD_PATH_REGEX,
};
use crate::xds::filters::http::rate_limit::rate_limit_actions;
use crate::xds::filters::{duration_from_millis, safe_regex};

pub const METHOD_HEADER: &str = ":method";
pub const AUTHORITY_HEADER: &str = ":authority";

fn regex_header(name: &str, regex: &str) -> HeaderMatcher {
    HeaderMatcher {
        name: name.to_string(),
        header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::SafeRegex(safe_regex(regex))),
            ignore_case: false,
        })),
        ..Default::default()
    }
}

/// Header matchers for one method plus the route's header patterns.
///
/// The `host` pattern is matched against `:authority` and placed right after
/// the method matcher.
pub fn route_headers(method: &str, headers: &BTreeMap<String, String>) -> Vec<HeaderMatcher> {
    let method_regex = if method == WILDCARD_METHOD { WILDCARD_PATH_REGEX } else { method };
    let mut matchers = vec![regex_header(METHOD_HEADER, method_regex)];

    if let Some(host) = headers.get(HOST_HEADER) {
        matchers.push(regex_header(AUTHORITY_HEADER, host));
    }

    matchers.extend(
        headers
            .iter()
            .filter(|(name, _)| name.as_str() != HOST_HEADER)
            .map(|(name, regex)| regex_header(name, regex)),
    );
    matchers
}

/// Weighted clusters sorted by name then weight, or `None` when the total
/// weight is below 1.
pub fn weighted_clusters(clusters: &BTreeSet<WeightedCluster>) -> Option<WeightedClusterProto> {
    let total = clusters.iter().map(|wc| wc.weight).fold(0u32, u32::saturating_add);
    if total < 1 {
        return None;
    }

    Some(WeightedClusterProto {
        clusters: clusters
            .iter()
            .map(|wc| ClusterWeight {
                name: wc.cluster_name.clone(),
                weight: Some(UInt32Value { value: wc.weight }),
                ..Default::default()
            })
            .collect(),
        #[allow(deprecated)]
        total_weight: Some(UInt32Value { value: total }),
        ..Default::default()
    })
}

pub fn retry_policy(retry: &RetryPolicy) -> RetryPolicyProto {
    RetryPolicyProto {
        retry_on: retry.retry_on.clone(),
        num_retries: retry.num_retries.map(|value| UInt32Value { value }),
        per_try_timeout: retry.per_try_timeout_ms.map(duration_from_millis),
        retry_back_off: retry.retry_backoff_base_interval_ms.map(|ms| RetryBackOff {
            base_interval: Some(duration_from_millis(ms)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn path_specifier(path: &str, kind: PathMatchType) -> Option<PathSpecifier> {
    match kind {
        PathMatchType::Regex => Some(PathSpecifier::SafeRegex(safe_regex(path))),
        PathMatchType::Exact => Some(PathSpecifier::Path(path.to_string())),
        PathMatchType::Prefix => Some(PathSpecifier::Prefix(path.to_string())),
        PathMatchType::Unspecified if path.is_empty() => Some(PathSpecifier::Prefix("/".to_string())),
        PathMatchType::Unspecified => Some(PathSpecifier::SafeRegex(safe_regex(path))),
    }
}

/// Route for `method` over the route's weighted clusters.
///
/// The upstream timeout is disabled; retries follow the route's policy and
/// per-route global rate-limit descriptors become route actions. Fails when
/// the clusters' total weight is below 1.
pub fn build_route(route: &RouteWeightedClusters, method: &str) -> crate::Result<Route> {
    let clusters = weighted_clusters(&route.weighted_clusters).ok_or_else(|| {
        crate::Error::validation_field(
            format!(
                "total weight of weighted clusters for route '{}' must be >= 1, got {}",
                route.http_route_match.path,
                route.total_weight()
            ),
            "weighted_clusters",
        )
    })?;

    let action = RouteAction {
        cluster_specifier: Some(ClusterSpecifier::WeightedClusters(clusters)),
        timeout: Some(ProtoDuration { seconds: 0, nanos: 0 }),
        retry_policy: route.retry_policy.as_ref().map(retry_policy),
        rate_limits: route
            .rate_limit
            .as_ref()
            .and_then(|rl| rl.global.as_ref())
            .map(|global| rate_limit_actions(&global.descriptors))
            .unwrap_or_default(),
        ..Default::default()
    };

    let matcher = &route.http_route_match;
    Ok(Route {
        r#match: Some(RouteMatch {
            path_specifier: path_specifier(&matcher.path, matcher.path_match_type),
            headers: route_headers(method, &matcher.headers),
            ..Default::default()
        }),
        action: Some(Action::Route(action)),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trafficpolicy::HttpRouteMatch;
    use proptest::prelude::*;

    fn regex_of(matcher: &HeaderMatcher) -> &str {
        match &matcher.header_match_specifier {
            Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                match_pattern: Some(MatchPattern::SafeRegex(regex)),
                ..
            })) => &regex.regex,
            other => panic!("unexpected matcher {:?}", other),
        }
    }

    fn route_with(path: &str, kind: PathMatchType, clusters: &[(&str, u32)]) -> RouteWeightedClusters {
        RouteWeightedClusters::new(
            HttpRouteMatch { path: path.into(), path_match_type: kind, ..Default::default() },
            clusters.iter().map(|(n, w)| WeightedCluster::new(*n, *w)),
        )
    }

    #[test]
    fn wildcard_method_matches_everything() {
        let headers = route_headers("*", &BTreeMap::new());
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].name, METHOD_HEADER);
        assert_eq!(regex_of(&headers[0]), ".*");
    }

    #[test]
    fn host_header_becomes_authority() {
        let headers = BTreeMap::from([
            ("x-user".to_string(), "alice".to_string()),
            ("host".to_string(), "bookstore.*".to_string()),
            ("a-first".to_string(), "1".to_string()),
        ]);
        let matchers = route_headers("GET", &headers);
        let names: Vec<&str> = matchers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec![":method", ":authority", "a-first", "x-user"]);
        assert_eq!(regex_of(&matchers[0]), "GET");
        assert_eq!(regex_of(&matchers[1]), "bookstore.*");
    }

    #[test]
    fn clusters_sorted_with_total() {
        let route = route_with("/books", PathMatchType::Prefix, &[("ns/b|80", 30), ("ns/a|80", 70)]);
        let built = build_route(&route, "GET").unwrap();

        assert_eq!(built.r#match.as_ref().unwrap().path_specifier, Some(PathSpecifier::Prefix("/books".into())));
        let action = match built.action {
            Some(Action::Route(action)) => action,
            other => panic!("unexpected action {:?}", other),
        };
        assert_eq!(action.timeout, Some(ProtoDuration { seconds: 0, nanos: 0 }));
        match action.cluster_specifier {
            Some(ClusterSpecifier::WeightedClusters(wc)) => {
                let names: Vec<&str> = wc.clusters.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["ns/a|80", "ns/b|80"]);
                #[allow(deprecated)]
                let total = wc.total_weight.clone();
                assert_eq!(total, Some(UInt32Value { value: 100 }));
            }
            other => panic!("unexpected clusters {:?}", other),
        }
    }

    #[test]
    fn empty_path_without_kind_matches_all() {
        let route = route_with("", PathMatchType::Unspecified, &[("c", 1)]);
        let built = build_route(&route, "*").unwrap();
        assert_eq!(built.r#match.unwrap().path_specifier, Some(PathSpecifier::Prefix("/".into())));
    }

    #[test]
    fn retry_policy_maps_all_fields() {
        let retry = RetryPolicy {
            retry_on: "5xx".into(),
            num_retries: Some(3),
            per_try_timeout_ms: Some(1500),
            retry_backoff_base_interval_ms: Some(25),
        };
        let proto = retry_policy(&retry);
        assert_eq!(proto.retry_on, "5xx");
        assert_eq!(proto.num_retries, Some(UInt32Value { value: 3 }));
        assert_eq!(proto.per_try_timeout, Some(ProtoDuration { seconds: 1, nanos: 500_000_000 }));
        assert_eq!(
            proto.retry_back_off.unwrap().base_interval,
            Some(ProtoDuration { seconds: 0, nanos: 25_000_000 })
        );
    }

    proptest! {
        #[test]
        fn zero_total_weight_never_builds(n in 1usize..5) {
            let clusters: Vec<(String, u32)> = (0..n).map(|i| (format!("c{}", i), 0)).collect();
            let route = RouteWeightedClusters::new(
                HttpRouteMatch::wildcard(),
                clusters.iter().map(|(name, w)| WeightedCluster::new(name.clone(), *w)),
            );
            prop_assert!(weighted_clusters(&route.weighted_clusters).is_none());
            prop_assert!(build_route(&route, "*").is_err());
        }
    }
}

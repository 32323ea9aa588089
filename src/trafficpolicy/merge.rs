//! Merging of policy contributions from multiple source objects.
//!
//! Bundles merge only when their hostname sets are identical. Output order is
//! first-seen: an incoming bundle that merges into an existing one keeps the
//! existing position, new bundles are appended.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::types::{
    HttpRouteMatch, InboundTrafficPolicy, OutboundTrafficPolicy, RouteWeightedClusters, Rule,
};
use crate::domain::WeightedCluster;
use tracing::warn;

/// Non-fatal report of two contributions routing the same match differently.
///
/// The existing contribution is kept; callers accumulate conflicts and continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeConflict {
    pub policy: String,
    pub route_match: HttpRouteMatch,
    pub kept: BTreeSet<WeightedCluster>,
    pub rejected: BTreeSet<WeightedCluster>,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |set: &BTreeSet<WeightedCluster>| {
            set.iter()
                .map(|wc| format!("{}:{}", wc.cluster_name, wc.weight))
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(
            f,
            "policy '{}' route '{}': kept [{}], rejected [{}]",
            self.policy,
            self.route_match.path,
            names(&self.kept),
            names(&self.rejected)
        )
    }
}

/// Result of a merge along with the conflicts it detected.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    pub items: Vec<T>,
    pub conflicts: Vec<MergeConflict>,
}

impl<T> Merged<T> {
    fn new(items: Vec<T>) -> Self {
        Self { items, conflicts: Vec::new() }
    }
}

/// Builds an inbound bundle from rules, merging rules with identical routes.
pub fn build_inbound_policy(
    name: impl Into<String>,
    hostnames: Vec<String>,
    rules: Vec<Rule>,
) -> InboundTrafficPolicy {
    let mut policy = InboundTrafficPolicy::new(name, hostnames);
    policy.rules = merge_rules(Vec::new(), rules).items;
    policy
}

/// Merges `incoming` rules into `existing`.
///
/// Rules with the same match and weighted clusters become one rule: their
/// principals are unioned and the first retry policy and rate limit are kept.
/// A rule whose match equals an existing rule's match but whose weighted
/// clusters differ is reported as a conflict and dropped.
pub fn merge_rules(existing: Vec<Rule>, incoming: Vec<Rule>) -> Merged<Rule> {
    merge_rules_for("", existing, incoming)
}

fn merge_rules_for(policy: &str, existing: Vec<Rule>, incoming: Vec<Rule>) -> Merged<Rule> {
    let mut merged = Merged::new(existing);

    for rule in incoming {
        let Some(current) = merged
            .items
            .iter_mut()
            .find(|r| r.route.http_route_match == rule.route.http_route_match)
        else {
            merged.items.push(rule);
            continue;
        };

        if current.route.weighted_clusters != rule.route.weighted_clusters {
            merged.conflicts.push(MergeConflict {
                policy: policy.to_string(),
                route_match: rule.route.http_route_match.clone(),
                kept: current.route.weighted_clusters.clone(),
                rejected: rule.route.weighted_clusters,
            });
            continue;
        }

        current.allowed_principals.extend(rule.allowed_principals);
        absorb_route_options(policy, &mut current.route, rule.route);
    }

    merged
}

/// Folds the retry policy and rate limit of `incoming` into `current`, which
/// routes the same match to the same clusters. Options already set on
/// `current` win.
fn absorb_route_options(policy: &str, current: &mut RouteWeightedClusters, incoming: RouteWeightedClusters) {
    if let Some(retry) = incoming.retry_policy {
        match &current.retry_policy {
            None => current.retry_policy = Some(retry),
            Some(kept) if *kept != retry => warn!(
                policy,
                path = %current.http_route_match.path,
                "Conflicting retry policies for the same route, keeping the first"
            ),
            Some(_) => {}
        }
    }

    if let Some(rate_limit) = incoming.rate_limit {
        match &current.rate_limit {
            None => current.rate_limit = Some(rate_limit),
            Some(kept) if *kept != rate_limit => warn!(
                policy,
                path = %current.http_route_match.path,
                "Conflicting rate limits for the same route, keeping the first"
            ),
            Some(_) => {}
        }
    }
}

/// Merges outbound routes, reporting matches that diverge on weighted clusters.
pub fn merge_routes(
    policy: &str,
    existing: Vec<RouteWeightedClusters>,
    incoming: Vec<RouteWeightedClusters>,
) -> Merged<RouteWeightedClusters> {
    let mut merged = Merged::new(existing);

    for route in incoming {
        match merged.items.iter().find(|r| r.http_route_match == route.http_route_match) {
            Some(current) if current.weighted_clusters != route.weighted_clusters => {
                merged.conflicts.push(MergeConflict {
                    policy: policy.to_string(),
                    route_match: route.http_route_match.clone(),
                    kept: current.weighted_clusters.clone(),
                    rejected: route.weighted_clusters,
                });
            }
            Some(_) => {}
            None => merged.items.push(route),
        }
    }

    merged
}

/// Merges inbound bundles, combining bundles with identical hostname sets.
pub fn merge_inbound_policies(
    existing: Vec<InboundTrafficPolicy>,
    incoming: impl IntoIterator<Item = InboundTrafficPolicy>,
) -> Merged<InboundTrafficPolicy> {
    let mut merged = Merged::new(existing);

    for policy in incoming {
        let target = merged
            .items
            .iter_mut()
            .find(|current| current.hostname_set() == policy.hostname_set());

        match target {
            Some(current) => {
                let rules = std::mem::take(&mut current.rules);
                let result = merge_rules_for(&current.name, rules, policy.rules);
                current.rules = result.items;
                if current.rate_limit.is_none() {
                    current.rate_limit = policy.rate_limit;
                }
                merged.conflicts.extend(result.conflicts);
            }
            None => merged.items.push(policy),
        }
    }

    merged
}

/// Merges outbound bundles, combining bundles with identical hostname sets.
pub fn merge_outbound_policies(
    existing: Vec<OutboundTrafficPolicy>,
    incoming: impl IntoIterator<Item = OutboundTrafficPolicy>,
) -> Merged<OutboundTrafficPolicy> {
    let mut merged = Merged::new(existing);

    for policy in incoming {
        let target = merged
            .items
            .iter_mut()
            .find(|current| current.hostname_set() == policy.hostname_set());

        match target {
            Some(current) => {
                let routes = std::mem::take(&mut current.routes);
                let result = merge_routes(&current.name, routes, policy.routes);
                current.routes = result.items;
                merged.conflicts.extend(result.conflicts);
            }
            None => merged.items.push(policy),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Principal;
    use crate::trafficpolicy::types::{PathMatchType, RetryPolicy};
    use crate::trafficpolicy::HttpPerRouteRateLimitSpec;
    use tracing_test::traced_test;

    fn books_route(clusters: &[(&str, u32)]) -> RouteWeightedClusters {
        RouteWeightedClusters::new(
            HttpRouteMatch {
                path: "/books".into(),
                path_match_type: PathMatchType::Prefix,
                methods: vec!["GET".into()],
                ..Default::default()
            },
            clusters.iter().map(|(n, w)| WeightedCluster::new(*n, *w)),
        )
    }

    fn inbound(hosts: &[&str], rules: Vec<Rule>) -> InboundTrafficPolicy {
        build_inbound_policy("bookstore", hosts.iter().map(|h| h.to_string()).collect(), rules)
    }

    #[test]
    fn merge_rules_unions_principals() {
        let a = Rule::new(books_route(&[("c", 100)]), [Principal::from("A")]);
        let b = Rule::new(books_route(&[("c", 100)]), [Principal::from("B")]);

        let merged = merge_rules(vec![a], vec![b]);
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.items.len(), 1);
        let principals: Vec<_> =
            merged.items[0].allowed_principals.iter().map(Principal::as_str).collect();
        assert_eq!(principals, vec!["A", "B"]);
    }

    #[test]
    fn merge_rules_reports_cluster_divergence() {
        let a = Rule::new(books_route(&[("c1", 100)]), [Principal::from("A")]);
        let b = Rule::new(books_route(&[("c2", 100)]), [Principal::from("B")]);

        let merged = merge_rules(vec![a.clone()], vec![b]);
        assert_eq!(merged.items, vec![a]);
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.conflicts[0].kept.iter().next().unwrap().cluster_name, "c1");
    }

    #[traced_test]
    #[test]
    fn merge_rules_folds_route_options() {
        let retry = |retry_on: &str| RetryPolicy { retry_on: retry_on.into(), ..Default::default() };

        let plain = Rule::new(books_route(&[("c", 100)]), [Principal::from("A")]);
        let mut with_retry = Rule::new(books_route(&[("c", 100)]), [Principal::from("B")]);
        with_retry.route.retry_policy = Some(retry("5xx"));
        let mut other_retry = Rule::new(books_route(&[("c", 100)]), [Principal::from("C")]);
        other_retry.route.retry_policy = Some(retry("connect-failure"));
        other_retry.route.rate_limit = Some(HttpPerRouteRateLimitSpec::default());

        let merged = merge_rules(vec![plain], vec![with_retry, other_retry]);
        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.items.len(), 1);

        let route = &merged.items[0].route;
        assert_eq!(route.retry_policy, Some(retry("5xx")));
        assert_eq!(route.rate_limit, Some(HttpPerRouteRateLimitSpec::default()));
        assert_eq!(merged.items[0].allowed_principals.len(), 3);
        assert!(logs_contain("Conflicting retry policies"));
    }

    #[test]
    fn inbound_bundles_merge_only_on_identical_hostnames() {
        let first = inbound(&["a", "b"], vec![Rule::new(books_route(&[("c", 100)]), [Principal::from("A")])]);
        let same = inbound(&["b", "a"], vec![Rule::new(books_route(&[("c", 100)]), [Principal::from("B")])]);
        let subset = inbound(&["a"], vec![Rule::new(books_route(&[("c", 100)]), [Principal::from("C")])]);

        let merged = merge_inbound_policies(vec![first], vec![same, subset]);
        assert_eq!(merged.items.len(), 2);
        assert_eq!(merged.items[0].rules.len(), 1);
        assert_eq!(merged.items[0].rules[0].allowed_principals.len(), 2);
        assert_eq!(merged.items[1].hostnames, vec!["a"]);
    }

    #[test]
    fn inbound_merge_is_idempotent() {
        let policy = inbound(&["a"], vec![Rule::new(books_route(&[("c", 100)]), [Principal::from("A")])]);
        let merged = merge_inbound_policies(vec![policy.clone()], vec![policy.clone()]);
        assert_eq!(merged.items, vec![policy]);
    }

    #[test]
    fn outbound_merge_keeps_original_on_conflict() {
        let mut first = OutboundTrafficPolicy::new("bookstore", vec!["bookstore".into()]);
        first.routes.push(books_route(&[("v1", 100)]));
        let mut second = OutboundTrafficPolicy::new("bookstore", vec!["bookstore".into()]);
        second.routes.push(books_route(&[("v2", 100)]));

        let merged = merge_outbound_policies(vec![first.clone()], vec![second]);
        assert_eq!(merged.items, vec![first]);
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.conflicts[0].policy, "bookstore");
        assert!(merged.conflicts[0].to_string().contains("rejected [v2:100]"));
    }
}

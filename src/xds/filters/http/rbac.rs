//! Route-scoped RBAC.
//!
//! The connection manager carries an RBAC filter with no rules; each inbound
//! route supplies the policy for its own authorized principals through
//! `typed_per_filter_config`.

use envoy_types::pb::envoy::config::rbac::v3::{rbac::Action, Rbac as RbacRules};
use envoy_types::pb::envoy::extensions::filters::http::rbac::v3::{
    Rbac as RbacProto, RbacPerRoute as RbacPerRouteProto,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use std::collections::HashMap;

use crate::domain::Principal;
use crate::xds::filters::any_from_message;
use crate::xds::rbac::allow_principals;

pub const RBAC_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.rbac.v3.RBAC";
pub const RBAC_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.rbac.v3.RBACPerRoute";

/// Name of the single policy in a route's RBAC config.
pub const ROUTE_POLICY_NAME: &str = "rbac-for-route";

/// Filter-level config with no rules, enforcing nothing by itself.
pub fn empty_rbac_any() -> EnvoyAny {
    any_from_message(RBAC_TYPE_URL, &RbacProto::default())
}

/// Per-route config allowing any of `principals`, with every permission.
///
/// The wildcard principal allows every caller. An empty set is an error, and
/// the route is left out.
pub fn per_route_rbac<'a>(
    principals: impl IntoIterator<Item = &'a Principal>,
) -> crate::Result<EnvoyAny> {
    let policy = allow_principals(principals)?;

    let per_route = RbacPerRouteProto {
        rbac: Some(RbacProto {
            rules: Some(RbacRules {
                action: Action::Allow as i32,
                policies: HashMap::from([(ROUTE_POLICY_NAME.to_string(), policy)]),
                ..Default::default()
            }),
            ..Default::default()
        }),
    };

    Ok(any_from_message(RBAC_PER_ROUTE_TYPE_URL, &per_route))
}

//! HTTP filter registry and builders
//!
//! Every HTTP connection manager of the mesh carries the same filter
//! pipeline. Filters are ordered by [`FilterStage`], not by the order the
//! caller adds them:
//!
//! 1. RBAC, inert until a route carries an `RBACPerRoute` config
//! 2. external authorization (inbound only)
//! 3. local rate limit, inert until a vhost or route carries a token bucket
//! 4. global rate limit
//! 5. caller-supplied filters (health check, stats, custom)
//! 6. router, always last
//!
//! Filters within a stage keep their insertion order.

pub mod ext_authz;
pub mod health_check;
pub mod local_rate_limit;
pub mod rate_limit;
pub mod rbac;

use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::http_filter::ConfigType as HttpFilterConfigType;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use crate::trafficpolicy::HttpGlobalRateLimitSpec;
use crate::xds::filters::{any_from_message, TypedConfig};

pub use ext_authz::ExtAuthzConfig;

/// Envoy's canonical router filter name
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
pub const RBAC_FILTER_NAME: &str = "envoy.filters.http.rbac";
pub const EXT_AUTHZ_FILTER_NAME: &str = "envoy.filters.http.ext_authz";
pub const LOCAL_RATE_LIMIT_FILTER_NAME: &str = "envoy.filters.http.local_ratelimit";
pub const RATE_LIMIT_FILTER_NAME: &str = "envoy.filters.http.ratelimit";
pub const HEALTH_CHECK_FILTER_NAME: &str = "envoy.filters.http.health_check";

const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

/// Position of a filter in the connection manager pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterStage {
    Rbac,
    ExtAuthz,
    LocalRateLimit,
    GlobalRateLimit,
    Extension,
    Router,
}

/// Supported HTTP filter types
#[derive(Debug, Clone)]
pub enum HttpFilterKind {
    /// Route-scoped access control
    Rbac,
    /// External authorization service check
    ExtAuthz(ExtAuthzConfig),
    /// Token bucket rate limiting configured per vhost/route
    LocalRateLimit { stat_prefix: String },
    /// Rate limiting delegated to a rate-limit service
    RateLimit(HttpGlobalRateLimitSpec),
    /// Answers proxy health checks on `/osm-healthcheck`
    HealthCheck,
    /// Built-in Envoy router filter
    Router,
    /// Arbitrary filter expressed as a typed config payload
    Custom { name: String, config: TypedConfig },
}

impl HttpFilterKind {
    pub fn stage(&self) -> FilterStage {
        match self {
            Self::Rbac => FilterStage::Rbac,
            Self::ExtAuthz(_) => FilterStage::ExtAuthz,
            Self::LocalRateLimit { .. } => FilterStage::LocalRateLimit,
            Self::RateLimit(_) => FilterStage::GlobalRateLimit,
            Self::HealthCheck | Self::Custom { .. } => FilterStage::Extension,
            Self::Router => FilterStage::Router,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Rbac => RBAC_FILTER_NAME,
            Self::ExtAuthz(_) => EXT_AUTHZ_FILTER_NAME,
            Self::LocalRateLimit { .. } => LOCAL_RATE_LIMIT_FILTER_NAME,
            Self::RateLimit(_) => RATE_LIMIT_FILTER_NAME,
            Self::HealthCheck => HEALTH_CHECK_FILTER_NAME,
            Self::Router => ROUTER_FILTER_NAME,
            Self::Custom { name, .. } => name,
        }
    }

    fn is_router(&self) -> bool {
        matches!(self, Self::Router) || self.name() == ROUTER_FILTER_NAME
    }

    fn to_any(&self) -> crate::Result<EnvoyAny> {
        match self {
            Self::Rbac => Ok(rbac::empty_rbac_any()),
            Self::ExtAuthz(config) => Ok(config.to_any()),
            Self::LocalRateLimit { stat_prefix } => Ok(local_rate_limit::inert_filter_any(stat_prefix)),
            Self::RateLimit(spec) => Ok(rate_limit::build_http_global_rate_limit(spec)),
            Self::HealthCheck => Ok(health_check::health_check_any()),
            Self::Router => Ok(any_from_message(ROUTER_TYPE_URL, &RouterFilter::default())),
            Self::Custom { config, .. } => Ok(config.to_any()),
        }
    }

    pub fn to_http_filter(&self) -> crate::Result<HttpFilter> {
        Ok(HttpFilter {
            name: self.name().to_string(),
            is_optional: false,
            disabled: false,
            config_type: Some(HttpFilterConfigType::TypedConfig(self.to_any()?)),
        })
    }
}

/// Builds the connection manager filter list from `entries`.
///
/// Entries are ordered by stage. The router filter is always last and is
/// added when missing; additional routers are ignored.
pub fn build_http_filters(entries: &[HttpFilterKind]) -> crate::Result<Vec<HttpFilter>> {
    let mut ordered: Vec<&HttpFilterKind> = Vec::with_capacity(entries.len() + 1);
    let mut router: Option<&HttpFilterKind> = None;

    for entry in entries {
        if entry.is_router() {
            router.get_or_insert(entry);
        } else {
            ordered.push(entry);
        }
    }
    ordered.sort_by_key(|entry| entry.stage());

    let mut filters = ordered
        .into_iter()
        .map(HttpFilterKind::to_http_filter)
        .collect::<crate::Result<Vec<_>>>()?;
    filters.push(router.unwrap_or(&HttpFilterKind::Router).to_http_filter()?);

    Ok(filters)
}

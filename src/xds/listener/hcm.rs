//! HTTP connection manager construction.
//!
//! The filter pipeline is ordered by [`FilterStage`](crate::xds::filters::http::FilterStage):
//! RBAC and the inert local rate limiter are always present, external
//! authorization only on connections terminated for this workload, and the
//! router is appended last.

use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log_filter::FilterSpecifier, AccessLogFilter, NotHealthCheckFilter,
};
use envoy_types::pb::envoy::config::listener::v3::Filter;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier, UpgradeConfig},
    HttpConnectionManager, LocalReplyConfig, Rds, ResponseMapper,
};
use envoy_types::pb::google::protobuf::BoolValue;

use super::ListenerOptions;
use crate::trafficpolicy::HttpGlobalRateLimitSpec;
use crate::xds::access_log::access_logs;
use crate::xds::filters::http::{build_http_filters, HttpFilterKind};
use crate::xds::filters::network::{
    typed_filter, HTTP_CONNECTION_MANAGER_FILTER_NAME, HTTP_CONNECTION_MANAGER_TYPE_URL,
};
use crate::xds::route::stats_response_headers;
use crate::xds::tls::ads_config_source;
use crate::xds::tracing::http_tracing;

const WEBSOCKET_UPGRADE: &str = "websocket";

/// Which side of the proxy the connection manager terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HcmDirection {
    /// Mesh or ingress traffic addressed to the local workload.
    Inbound,
    /// Mesh or egress traffic leaving the local workload.
    Outbound,
}

#[derive(Debug, Clone)]
enum RouteSource {
    Rds(String),
    Inline(RouteConfiguration),
}

/// Builder for an `HttpConnectionManager` network filter.
#[derive(Debug, Clone)]
pub struct HcmBuilder<'a> {
    stat_prefix: String,
    route: RouteSource,
    direction: HcmDirection,
    options: &'a ListenerOptions,
    global_rate_limit: Option<HttpGlobalRateLimitSpec>,
    filters: Vec<HttpFilterKind>,
    mesh_defaults: bool,
}

impl<'a> HcmBuilder<'a> {
    /// Connection manager fetching `route_config_name` over RDS.
    ///
    /// The stat prefix defaults to the route configuration name.
    pub fn rds(direction: HcmDirection, route_config_name: impl Into<String>, options: &'a ListenerOptions) -> Self {
        let name = route_config_name.into();
        Self {
            stat_prefix: name.clone(),
            route: RouteSource::Rds(name),
            direction,
            options,
            global_rate_limit: None,
            filters: Vec::new(),
            mesh_defaults: true,
        }
    }

    /// Connection manager with an inline route table and only the router
    /// filter; used for endpoints outside the mesh policy such as scraping.
    pub fn inline(stat_prefix: impl Into<String>, route_config: RouteConfiguration, options: &'a ListenerOptions) -> Self {
        Self {
            stat_prefix: stat_prefix.into(),
            route: RouteSource::Inline(route_config),
            direction: HcmDirection::Inbound,
            options,
            global_rate_limit: None,
            filters: Vec::new(),
            mesh_defaults: false,
        }
    }

    pub fn global_rate_limit(mut self, spec: Option<&HttpGlobalRateLimitSpec>) -> Self {
        self.global_rate_limit = spec.cloned();
        self
    }

    /// Adds a filter; the pipeline position is decided by its stage.
    pub fn filter(mut self, filter: HttpFilterKind) -> Self {
        self.filters.push(filter);
        self
    }

    fn http_filters(&self) -> Vec<HttpFilterKind> {
        let mut kinds = Vec::new();
        if self.mesh_defaults {
            kinds.push(HttpFilterKind::Rbac);
            kinds.push(HttpFilterKind::LocalRateLimit { stat_prefix: self.stat_prefix.clone() });

            if self.direction == HcmDirection::Inbound {
                if let Some(ext_authz) = &self.options.ext_authz {
                    kinds.push(HttpFilterKind::ExtAuthz(ext_authz.clone()));
                }
                if self.options.health_checks {
                    kinds.push(HttpFilterKind::HealthCheck);
                }
            }
            if let Some(spec) = &self.global_rate_limit {
                kinds.push(HttpFilterKind::RateLimit(spec.clone()));
            }
        }
        kinds.extend(self.filters.iter().cloned());
        kinds.push(HttpFilterKind::Router);
        kinds
    }

    fn local_reply_config(&self) -> Option<LocalReplyConfig> {
        if !self.mesh_defaults || self.options.stats_headers.is_empty() {
            return None;
        }
        Some(LocalReplyConfig {
            mappers: vec![ResponseMapper {
                filter: Some(AccessLogFilter {
                    filter_specifier: Some(FilterSpecifier::NotHealthCheckFilter(NotHealthCheckFilter::default())),
                }),
                headers_to_add: stats_response_headers(&self.options.stats_headers),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    pub fn build(&self) -> crate::Result<HttpConnectionManager> {
        let route_specifier = match &self.route {
            RouteSource::Rds(name) => RouteSpecifier::Rds(Rds {
                route_config_name: name.clone(),
                config_source: Some(ads_config_source()),
            }),
            RouteSource::Inline(config) => RouteSpecifier::RouteConfig(config.clone()),
        };

        let mut hcm = HttpConnectionManager {
            stat_prefix: self.stat_prefix.clone(),
            codec_type: CodecType::Auto as i32,
            route_specifier: Some(route_specifier),
            http_filters: build_http_filters(&self.http_filters())?,
            access_log: access_logs(&self.options.access_log)?,
            local_reply_config: self.local_reply_config(),
            ..Default::default()
        };

        if self.mesh_defaults {
            hcm.upgrade_configs = vec![UpgradeConfig {
                upgrade_type: WEBSOCKET_UPGRADE.to_string(),
                ..Default::default()
            }];
            if let Some(endpoint) = &self.options.tracing_endpoint {
                hcm.generate_request_id = Some(BoolValue { value: true });
                hcm.tracing = Some(http_tracing(endpoint));
            }
        }

        Ok(hcm)
    }

    /// The connection manager wrapped as a network filter.
    pub fn build_filter(&self) -> crate::Result<Filter> {
        Ok(typed_filter(HTTP_CONNECTION_MANAGER_FILTER_NAME, HTTP_CONNECTION_MANAGER_TYPE_URL, &self.build()?))
    }
}

/// Decodes the connection manager carried by a network filter.
#[cfg(test)]
pub(crate) fn decode_hcm(filter: &Filter) -> HttpConnectionManager {
    let any = crate::xds::filters::network::filter_payload(filter).expect("typed filter");
    crate::xds::filters::decode_any(any, HTTP_CONNECTION_MANAGER_TYPE_URL).expect("valid connection manager")
}

//! Compiled resource sets and their JSON renderings.

use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use serde::Serialize;
use tracing::error;

use crate::trafficpolicy::MergeConflict;
use crate::xds::filters::TypedConfig;

pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    fn new<M: Message>(name: &str, type_url: &str, msg: &M) -> Self {
        Self {
            name: name.to_string(),
            resource: Any { type_url: type_url.to_string(), value: msg.encode_to_vec() },
        }
    }

    pub fn into_any(self) -> Any {
        self.resource
    }
}

/// A resource left out of the output, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedResource {
    pub resource: String,
    pub reason: String,
}

/// Collects resource-scoped failures so sibling construction can continue.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub skipped: Vec<SkippedResource>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and logs that `resource` was not built.
    pub fn skip(&mut self, resource: impl Into<String>, err: &crate::Error) {
        let resource = resource.into();
        error!(resource = %resource, error = %err, "Skipping resource");
        self.skipped.push(SkippedResource { resource, reason: err.to_string() });
    }
}

/// Everything compiled for one proxy in one pass.
#[derive(Debug, Clone, Default)]
pub struct CompiledResources {
    pub proxy: String,
    pub listeners: Vec<Listener>,
    pub route_configs: Vec<RouteConfiguration>,
    pub secrets: Vec<Secret>,
    pub conflicts: Vec<MergeConflict>,
    pub skipped: Vec<SkippedResource>,
}

impl CompiledResources {
    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.name == name)
    }

    pub fn route_config(&self, name: &str) -> Option<&RouteConfiguration> {
        self.route_configs.iter().find(|r| r.name == name)
    }

    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets.iter().find(|s| s.name == name)
    }

    /// Listener, route and secret resources as typed payloads.
    pub fn built_resources(&self) -> Vec<BuiltResource> {
        let listeners =
            self.listeners.iter().map(|l| BuiltResource::new(&l.name, LISTENER_TYPE_URL, l));
        let routes =
            self.route_configs.iter().map(|r| BuiltResource::new(&r.name, ROUTE_TYPE_URL, r));
        let secrets = self.secrets.iter().map(|s| BuiltResource::new(&s.name, SECRET_TYPE_URL, s));
        listeners.chain(routes).chain(secrets).collect()
    }

    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            proxy: self.proxy.clone(),
            listeners: self
                .listeners
                .iter()
                .map(|l| ListenerSummary {
                    name: l.name.clone(),
                    filter_chains: l.filter_chains.iter().map(|fc| fc.name.clone()).collect(),
                    default_filter_chain: l.default_filter_chain.as_ref().map(|fc| fc.name.clone()),
                })
                .collect(),
            route_configs: self
                .route_configs
                .iter()
                .map(|r| RouteConfigSummary {
                    name: r.name.clone(),
                    virtual_hosts: r.virtual_hosts.iter().map(|vh| vh.name.clone()).collect(),
                })
                .collect(),
            secrets: self.secrets.iter().map(|s| s.name.clone()).collect(),
            conflicts: self.conflicts.iter().map(ToString::to_string).collect(),
            skipped: self.skipped.clone(),
        }
    }

    /// Full dump with each resource as a base64 typed payload.
    pub fn dump(&self) -> ResourceDump {
        ResourceDump {
            summary: self.summary(),
            resources: self
                .built_resources()
                .into_iter()
                .map(|r| NamedResource { name: r.name, resource: TypedConfig::from(&r.resource) })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerSummary {
    pub name: String,
    pub filter_chains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_filter_chain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteConfigSummary {
    pub name: String,
    pub virtual_hosts: Vec<String>,
}

/// Names of everything compiled, for human inspection.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSummary {
    pub proxy: String,
    pub listeners: Vec<ListenerSummary>,
    pub route_configs: Vec<RouteConfigSummary>,
    pub secrets: Vec<String>,
    pub conflicts: Vec<String>,
    pub skipped: Vec<SkippedResource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedResource {
    pub name: String,
    pub resource: TypedConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceDump {
    pub summary: ResourceSummary,
    pub resources: Vec<NamedResource>,
}

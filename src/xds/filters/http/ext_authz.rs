//! External Authorization HTTP filter configuration helpers
//!
//! Inbound connection managers consult an external gRPC authorization
//! service before routing when the mesh enables it.

use envoy_types::pb::envoy::config::core::v3::{ApiVersion, HeaderValue};
use envoy_types::pb::envoy::extensions::filters::http::ext_authz::v3::{
    ext_authz::Services, ExtAuthz as ExtAuthzProto,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::xds::filters::{any_from_message, duration_from_millis, envoy_grpc_service};

pub const EXT_AUTHZ_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthz";

fn default_timeout_ms() -> u64 {
    1000
}

/// External authorization service reached over gRPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthzConfig {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub stat_prefix: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Let requests through when the service errors or is unreachable
    #[serde(default)]
    pub failure_mode_allow: bool,
    /// Metadata sent with every check request
    #[serde(default)]
    pub initial_metadata: BTreeMap<String, String>,
}

impl ExtAuthzConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            stat_prefix: String::new(),
            timeout_ms: default_timeout_ms(),
            failure_mode_allow: false,
            initial_metadata: BTreeMap::new(),
        }
    }

    /// Cluster carrying the check requests.
    pub fn cluster_name(&self) -> String {
        format!("{}|{}", self.address, self.port)
    }

    pub fn to_any(&self) -> EnvoyAny {
        let mut grpc = envoy_grpc_service(self.cluster_name(), Some(duration_from_millis(self.timeout_ms)));
        grpc.initial_metadata = self
            .initial_metadata
            .iter()
            .map(|(key, value)| HeaderValue { key: key.clone(), value: value.clone(), ..Default::default() })
            .collect();

        let proto = ExtAuthzProto {
            services: Some(Services::GrpcService(grpc)),
            transport_api_version: ApiVersion::V3 as i32,
            failure_mode_allow: self.failure_mode_allow,
            stat_prefix: self.stat_prefix.clone(),
            ..Default::default()
        };

        any_from_message(EXT_AUTHZ_TYPE_URL, &proto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::filters::decode_any;
    use envoy_types::pb::envoy::config::core::v3::grpc_service::TargetSpecifier;

    #[test]
    fn grpc_service_targets_address_port() {
        let mut config = ExtAuthzConfig::new("opa.authz.svc.cluster.local", 9191);
        config.stat_prefix = "opa".into();
        config.initial_metadata.insert("x-mesh".into(), "bookstore".into());

        let proto: ExtAuthzProto = decode_any(&config.to_any(), EXT_AUTHZ_TYPE_URL).unwrap();
        assert!(!proto.failure_mode_allow);
        assert_eq!(proto.stat_prefix, "opa");
        assert_eq!(proto.transport_api_version, ApiVersion::V3 as i32);

        let grpc = match proto.services {
            Some(Services::GrpcService(grpc)) => grpc,
            other => panic!("unexpected services {:?}", other),
        };
        assert_eq!(grpc.timeout.unwrap().seconds, 1);
        assert_eq!(grpc.initial_metadata[0].key, "x-mesh");
        match grpc.target_specifier {
            Some(TargetSpecifier::EnvoyGrpc(envoy)) => {
                assert_eq!(envoy.cluster_name, "opa.authz.svc.cluster.local|9191")
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ExtAuthzConfig =
            serde_json::from_str(r#"{"address":"authz.ns","port":9000,"failure_mode_allow":true}"#).unwrap();
        assert_eq!(config.timeout_ms, 1000);
        assert!(config.failure_mode_allow);
        assert!(config.initial_metadata.is_empty());
    }
}

//! Downstream TLS termination backed by SDS secrets.
//!
//! Certificates are never inlined: the transport socket names the secrets
//! and the proxy fetches them over the same aggregated stream as listeners.

use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, transport_socket::ConfigType as TransportSocketConfigType,
    AggregatedConfigSource, ApiVersion, ConfigSource, TransportSocket,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, tls_parameters::TlsProtocol, CommonTlsContext,
    DownstreamTlsContext, SdsSecretConfig, TlsParameters,
};
use envoy_types::pb::google::protobuf::BoolValue;

use crate::domain::identity::{
    inbound_root_cert_secret_name, service_cert_secret_name, INGRESS_ROOT_CERT_SECRET_NAME,
};
use crate::domain::ServiceIdentity;
use crate::xds::filters::any_from_message;

pub const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";
pub const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// Transport protocol detected by the TLS inspector for TLS connections.
pub const TRANSPORT_PROTOCOL_TLS: &str = "tls";

/// ALPN advertised by mesh proxies on upstream connections.
pub const ALPN_IN_MESH: &str = "osm";

/// How the downstream peer certificate is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerValidation {
    /// Mesh mTLS: the client certificate is required and checked against the
    /// inbound mesh root.
    Mesh,
    /// Ingress TLS: checked against the ingress root, required unless client
    /// certificate validation is skipped.
    Ingress { require_client_certificate: bool },
}

/// Config source pointing at the aggregated discovery stream.
pub fn ads_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        resource_api_version: ApiVersion::V3 as i32,
        ..Default::default()
    }
}

fn sds_secret(name: String) -> SdsSecretConfig {
    SdsSecretConfig { name, sds_config: Some(ads_config_source()) }
}

pub fn tls_params() -> TlsParameters {
    TlsParameters {
        tls_minimum_protocol_version: TlsProtocol::TlSv12 as i32,
        tls_maximum_protocol_version: TlsProtocol::TlSv13 as i32,
        ..Default::default()
    }
}

/// TLS context presenting the service certificate of `identity`.
pub fn downstream_tls_context(identity: &ServiceIdentity, validation: PeerValidation) -> DownstreamTlsContext {
    let (validation_secret, require_client_certificate) = match validation {
        PeerValidation::Mesh => (inbound_root_cert_secret_name(identity), true),
        PeerValidation::Ingress { require_client_certificate } => {
            (INGRESS_ROOT_CERT_SECRET_NAME.to_string(), require_client_certificate)
        }
    };

    DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_params: Some(tls_params()),
            tls_certificate_sds_secret_configs: vec![sds_secret(service_cert_secret_name(identity))],
            validation_context_type: Some(ValidationContextType::ValidationContextSdsSecretConfig(
                sds_secret(validation_secret),
            )),
            ..Default::default()
        }),
        require_client_certificate: Some(BoolValue { value: require_client_certificate }),
        ..Default::default()
    }
}

/// TLS transport socket terminating downstream connections for `identity`.
pub fn downstream_transport_socket(identity: &ServiceIdentity, validation: PeerValidation) -> TransportSocket {
    TransportSocket {
        name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(any_from_message(
            DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
            &downstream_tls_context(identity, validation),
        ))),
    }
}

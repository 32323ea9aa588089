//! Typed filter payloads shared by the listener and route builders.
//!
//! Every Envoy filter carries its configuration as a `google.protobuf.Any`.
//! The submodules build those payloads:
//!
//! - [`network`]: L4 filters (RBAC, TCP rate limits, TCP proxy)
//! - [`http`]: HTTP connection manager filters and their per-route configs
//! - [`listener`]: listener filters (original destination, TLS/HTTP inspectors)
//!
//! This module also holds the pieces several filters share: the token bucket
//! of the local rate limiters and the gRPC reference to an external
//! rate-limit service.

pub mod http;
pub mod listener;
pub mod network;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use envoy_types::pb::envoy::config::core::v3::{
    grpc_service::{EnvoyGrpc, TargetSpecifier},
    ApiVersion, GrpcService,
};
use envoy_types::pb::envoy::config::ratelimit::v3::RateLimitServiceConfig;
use envoy_types::pb::envoy::r#type::matcher::v3::RegexMatcher;
use envoy_types::pb::envoy::r#type::v3::TokenBucket;
use envoy_types::pb::google::protobuf::{Any, Duration as ProtoDuration, UInt32Value};
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::trafficpolicy::RateLimitServiceRef;

/// Wrapper for binary protobuf payloads serialized as base64 in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Base64Bytes(pub Vec<u8>);

impl Serialize for Base64Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64_ENGINE.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = BASE64_ENGINE
            .decode(encoded.as_bytes())
            .map_err(|err| serde::de::Error::custom(err.to_string()))?;
        Ok(Base64Bytes(decoded))
    }
}

/// JSON form of a `google.protobuf.Any`, used when dumping compiled resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedConfig {
    pub type_url: String,
    #[serde(default)]
    pub value: Base64Bytes,
}

impl TypedConfig {
    pub fn from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Self {
        Self { type_url: type_url.into(), value: Base64Bytes(msg.encode_to_vec()) }
    }

    pub fn to_any(&self) -> Any {
        Any { type_url: self.type_url.clone(), value: self.value.0.clone() }
    }
}

impl From<&Any> for TypedConfig {
    fn from(any: &Any) -> Self {
        Self { type_url: any.type_url.clone(), value: Base64Bytes(any.value.clone()) }
    }
}

/// Encodes `msg` into an `Any` with the given type URL.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    TypedConfig::from_message(type_url, msg).to_any()
}

/// Decodes an `Any` payload, checking its type URL first.
pub fn decode_any<M: Message + Default>(any: &Any, type_url: &str) -> crate::Result<M> {
    if any.type_url != type_url {
        return Err(crate::Error::serialization(format!(
            "expected payload of type '{}', found '{}'",
            type_url, any.type_url
        )));
    }
    M::decode(any.value.as_slice()).map_err(|e| crate::Error::Serialization {
        context: format!("failed to decode '{}'", type_url),
        source: Some(Box::new(e)),
    })
}

/// Fill interval of a token bucket for a rate-limit unit.
pub fn fill_interval(unit: &str) -> Option<ProtoDuration> {
    let seconds = match unit {
        "second" => 1,
        "minute" => 60,
        "hour" => 3600,
        _ => return None,
    };
    Some(ProtoDuration { seconds, nanos: 0 })
}

/// Token bucket admitting `rate` tokens per `unit`, plus `burst` extra tokens.
///
/// `what` names the limited quantity in errors. A rate of 0 would leave an
/// empty bucket that is never refilled and is rejected.
pub fn token_bucket(rate: u32, burst: u32, unit: &str, what: &str) -> crate::Result<TokenBucket> {
    if rate == 0 {
        return Err(crate::Error::rate_limit(format!(
            "{} rate limit must admit at least 1 per {}",
            what, unit
        )));
    }
    let fill_interval = fill_interval(unit).ok_or_else(|| {
        crate::Error::rate_limit(format!("invalid unit '{}' for {} rate limiting", unit, what))
    })?;

    Ok(TokenBucket {
        max_tokens: rate.saturating_add(burst),
        tokens_per_fill: Some(UInt32Value { value: rate }),
        fill_interval: Some(fill_interval),
    })
}

/// RE2 regex matcher for `regex`.
pub fn safe_regex(regex: impl Into<String>) -> RegexMatcher {
    RegexMatcher { regex: regex.into(), ..Default::default() }
}

/// Protobuf duration from milliseconds.
pub fn duration_from_millis(ms: u64) -> ProtoDuration {
    ProtoDuration { seconds: (ms / 1000) as i64, nanos: ((ms % 1000) * 1_000_000) as i32 }
}

/// gRPC service reaching `cluster_name` through Envoy's own client.
pub fn envoy_grpc_service(cluster_name: String, timeout: Option<ProtoDuration>) -> GrpcService {
    GrpcService {
        timeout,
        target_specifier: Some(TargetSpecifier::EnvoyGrpc(EnvoyGrpc {
            cluster_name,
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// v3 rate-limit service reference used by both global rate-limit filters.
pub fn rate_limit_service(
    service: &RateLimitServiceRef,
    timeout: Option<ProtoDuration>,
) -> RateLimitServiceConfig {
    RateLimitServiceConfig {
        grpc_service: Some(envoy_grpc_service(service.cluster_name(), timeout)),
        transport_api_version: ApiVersion::V3 as i32,
    }
}

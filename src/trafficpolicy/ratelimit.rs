//! Rate-limit specifications attached to traffic matches, virtual hosts and routes.
//!
//! These are the declarative inputs; `crate::xds::filters` compiles them into
//! Envoy filter and route configuration.

use serde::{Deserialize, Serialize};

/// Rate limiting configured for an upstream service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitSpec {
    #[serde(default)]
    pub local: Option<LocalRateLimitSpec>,
    #[serde(default)]
    pub global: Option<GlobalRateLimitSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalRateLimitSpec {
    #[serde(default)]
    pub tcp: Option<TcpLocalRateLimitSpec>,
    #[serde(default)]
    pub http: Option<HttpLocalRateLimitSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalRateLimitSpec {
    #[serde(default)]
    pub tcp: Option<TcpGlobalRateLimitSpec>,
    #[serde(default)]
    pub http: Option<HttpGlobalRateLimitSpec>,
}

/// Connection rate limit enforced by each proxy independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpLocalRateLimitSpec {
    pub connections: u32,
    /// One of `second`, `minute` or `hour`.
    pub unit: String,
    #[serde(default)]
    pub burst: u32,
}

/// Request rate limit enforced by each proxy independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpLocalRateLimitSpec {
    pub requests: u32,
    pub unit: String,
    #[serde(default)]
    pub burst: u32,
    /// Status returned to rate-limited requests. Zero keeps the proxy default (429).
    #[serde(default)]
    pub response_status_code: u32,
    #[serde(default)]
    pub response_headers_to_add: Vec<HeaderValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderValue {
    pub name: String,
    pub value: String,
}

/// Address of an external rate-limit service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitServiceRef {
    pub host: String,
    pub port: u16,
}

impl RateLimitServiceRef {
    /// Upstream cluster the proxy uses to reach the rate-limit service.
    pub fn cluster_name(&self) -> String {
        format!("{}|{}", self.host, self.port)
    }
}

/// Connection rate limit delegated to an external rate-limit service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpGlobalRateLimitSpec {
    pub rate_limit_service: RateLimitServiceRef,
    pub domain: String,
    #[serde(default)]
    pub descriptors: Vec<TcpRateLimitDescriptor>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Allow traffic when the rate-limit service is unreachable.
    #[serde(default)]
    pub fail_open: Option<bool>,
}

/// Descriptor entries are ANDed together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpRateLimitDescriptor {
    pub entries: Vec<TcpRateLimitDescriptorEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpRateLimitDescriptorEntry {
    pub key: String,
    pub value: String,
}

/// Request rate limit delegated to an external rate-limit service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpGlobalRateLimitSpec {
    pub rate_limit_service: RateLimitServiceRef,
    pub domain: String,
    #[serde(default)]
    pub descriptors: Vec<HttpGlobalRateLimitDescriptor>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fail_open: Option<bool>,
    #[serde(default)]
    pub enable_x_rate_limit_headers: Option<bool>,
    #[serde(default)]
    pub response_status_code: u32,
}

/// An ordered group of descriptor entries, ANDed together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpGlobalRateLimitDescriptor {
    pub entries: Vec<HttpGlobalRateLimitDescriptorEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpGlobalRateLimitDescriptorEntry {
    GenericKey {
        value: String,
        #[serde(default)]
        key: Option<String>,
    },
    RemoteAddress,
    RequestHeader {
        name: String,
        key: String,
    },
    HeaderValueMatch {
        value: String,
        headers: Vec<HttpHeaderMatcher>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        expect_match: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpHeaderMatcher {
    pub name: String,
    #[serde(flatten)]
    pub kind: HeaderMatchKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMatchKind {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Regex(String),
    Contains(String),
    Present(bool),
}

/// Rate limits applied to a single HTTP route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpPerRouteRateLimitSpec {
    #[serde(default)]
    pub local: Option<HttpLocalRateLimitSpec>,
    #[serde(default)]
    pub global: Option<HttpGlobalPerRouteRateLimitSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpGlobalPerRouteRateLimitSpec {
    pub descriptors: Vec<HttpGlobalRateLimitDescriptor>,
}

impl RateLimitSpec {
    pub fn tcp_local(&self) -> Option<&TcpLocalRateLimitSpec> {
        self.local.as_ref().and_then(|l| l.tcp.as_ref())
    }

    pub fn tcp_global(&self) -> Option<&TcpGlobalRateLimitSpec> {
        self.global.as_ref().and_then(|g| g.tcp.as_ref())
    }

    pub fn http_local(&self) -> Option<&HttpLocalRateLimitSpec> {
        self.local.as_ref().and_then(|l| l.http.as_ref())
    }

    pub fn http_global(&self) -> Option<&HttpGlobalRateLimitSpec> {
        self.global.as_ref().and_then(|g| g.http.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_descriptor_entries() {
        let json = r#"{
            "rate_limit_service": { "host": "ratelimit.ns.svc.cluster.local", "port": 8081 },
            "domain": "bookstore",
            "descriptors": [{
                "entries": [
                    { "generic_key": { "value": "books" } },
                    "remote_address",
                    { "request_header": { "name": "x-user", "key": "user" } },
                    { "header_value_match": {
                        "value": "internal",
                        "headers": [
                            { "name": "x-tier", "prefix": "gold" },
                            { "name": "x-debug", "present": true }
                        ]
                    } }
                ]
            }],
            "fail_open": true
        }"#;
        let spec: HttpGlobalRateLimitSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.rate_limit_service.cluster_name(), "ratelimit.ns.svc.cluster.local|8081");
        let entries = &spec.descriptors[0].entries;
        assert_eq!(entries.len(), 4);
        assert!(matches!(entries[1], HttpGlobalRateLimitDescriptorEntry::RemoteAddress));
        match &entries[3] {
            HttpGlobalRateLimitDescriptorEntry::HeaderValueMatch { headers, .. } => {
                assert_eq!(headers[0].kind, HeaderMatchKind::Prefix("gold".into()));
                assert_eq!(headers[1].kind, HeaderMatchKind::Present(true));
            }
            other => panic!("unexpected entry {:?}", other),
        }
        assert_eq!(spec.fail_open, Some(true));
    }

    #[test]
    fn accessors_walk_nested_options() {
        let spec = RateLimitSpec {
            local: Some(LocalRateLimitSpec {
                tcp: Some(TcpLocalRateLimitSpec { connections: 10, unit: "minute".into(), burst: 0 }),
                http: None,
            }),
            global: None,
        };
        assert_eq!(spec.tcp_local().map(|t| t.connections), Some(10));
        assert!(spec.http_local().is_none());
        assert!(spec.tcp_global().is_none());
    }
}

//! Connected proxies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ServiceIdentity;

pub const STATS_NAMESPACE_HEADER: &str = "osm-stats-namespace";
pub const STATS_KIND_HEADER: &str = "osm-stats-kind";
pub const STATS_NAME_HEADER: &str = "osm-stats-name";
pub const STATS_POD_HEADER: &str = "osm-stats-pod";

/// Workload a proxy runs alongside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workload {
    /// e.g. `Deployment`
    pub kind: String,
    pub name: String,
    pub pod: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    /// Unique per connection, typically the node id the proxy reports.
    pub id: String,
    pub identity: ServiceIdentity,
    #[serde(default)]
    pub workload: Option<Workload>,
}

impl Proxy {
    pub fn new(id: impl Into<String>, identity: ServiceIdentity) -> Self {
        Self { id: id.into(), identity, workload: None }
    }

    /// Headers identifying the proxy's workload in responses it generates.
    pub fn stats_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(STATS_NAMESPACE_HEADER.to_string(), self.identity.namespace.clone());
        if let Some(workload) = &self.workload {
            headers.insert(STATS_KIND_HEADER.to_string(), workload.kind.clone());
            headers.insert(STATS_NAME_HEADER.to_string(), workload.name.clone());
            headers.insert(STATS_POD_HEADER.to_string(), workload.pod.clone());
        }
        headers
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_headers_include_workload() {
        let mut proxy = Proxy::new("node-1", ServiceIdentity::new("bookstore", "store"));
        assert_eq!(proxy.stats_headers().len(), 1);

        proxy.workload =
            Some(Workload { kind: "Deployment".into(), name: "bookstore-v1".into(), pod: "bookstore-v1-abc".into() });
        let headers = proxy.stats_headers();
        assert_eq!(headers[STATS_NAMESPACE_HEADER], "store");
        assert_eq!(headers[STATS_POD_HEADER], "bookstore-v1-abc");
        assert_eq!(proxy.to_string(), "node-1 (bookstore.store)");
    }
}

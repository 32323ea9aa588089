//! Mesh services, application protocols and weighted upstream clusters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Weight given to a cluster that receives all traffic for a route.
pub const CLUSTER_WEIGHT_ACCEPT_ALL: u32 = 100;

/// Application protocol of a service port.
///
/// Unknown protocol names are preserved so that the builders can reject the
/// affected traffic match and keep compiling its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Http,
    Https,
    Grpc,
    Tcp,
    TcpServerFirst,
    Unknown(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Grpc => "grpc",
            Protocol::Tcp => "tcp",
            Protocol::TcpServerFirst => "tcp-server-first",
            Protocol::Unknown(other) => other,
        }
    }

    /// Protocols terminated by an HTTP connection manager.
    pub fn is_http_like(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Grpc)
    }

    /// Protocols proxied as opaque TCP streams.
    pub fn is_tcp_like(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Https | Protocol::TcpServerFirst)
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "grpc" => Protocol::Grpc,
            "tcp" => Protocol::Tcp,
            "tcp-server-first" => Protocol::TcpServerFirst,
            _ => Protocol::Unknown(s),
        }
    }
}

impl From<&str> for Protocol {
    fn from(s: &str) -> Self {
        Protocol::from(s.to_string())
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One port of a Kubernetes-style service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshService {
    pub name: String,
    pub namespace: String,
    /// Port clients connect to.
    pub port: u16,
    /// Port the workload listens on.
    pub target_port: u16,
    pub protocol: Protocol,
}

impl MeshService {
    pub fn fqdn(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name, self.namespace)
    }

    /// Name of the upstream cluster a downstream proxy uses to reach this service.
    pub fn cluster_name(&self) -> String {
        format!("{}/{}|{}", self.namespace, self.name, self.target_port)
    }

    /// Name of the local cluster the service's own proxy forwards inbound traffic to.
    pub fn local_cluster_name(&self) -> String {
        format!("{}/{}|{}|local", self.namespace, self.name, self.target_port)
    }

    /// Hostnames a client in `client_namespace` may use to reach this service port.
    ///
    /// The short name is only resolvable from inside the service's namespace.
    /// Every form is also emitted with an explicit `:{port}` suffix.
    pub fn hostnames(&self, client_namespace: &str) -> Vec<String> {
        let mut bases = Vec::with_capacity(5);
        if client_namespace == self.namespace {
            bases.push(self.name.clone());
        }
        bases.push(format!("{}.{}", self.name, self.namespace));
        bases.push(format!("{}.{}.svc", self.name, self.namespace));
        bases.push(format!("{}.{}.svc.cluster", self.name, self.namespace));
        bases.push(self.fqdn());

        let mut hostnames = Vec::with_capacity(bases.len() * 2);
        for base in bases {
            hostnames.push(format!("{}:{}", base, self.port));
            hostnames.push(base);
        }
        hostnames
    }
}

impl fmt::Display for MeshService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A named upstream cluster with its share of a route's traffic.
///
/// Ordering is by name then weight, which is the order clusters appear in a
/// compiled route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeightedCluster {
    pub cluster_name: String,
    pub weight: u32,
}

impl WeightedCluster {
    pub fn new(cluster_name: impl Into<String>, weight: u32) -> Self {
        Self { cluster_name: cluster_name.into(), weight }
    }
}

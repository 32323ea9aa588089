//! Domain layer
//!
//! Mesh concepts shared by the policy model, the catalog and the xDS builders.
//! These types carry no Envoy protobuf dependencies.
//!
//! ## Module Organization
//!
//! - `identity`: workload identities, RBAC principals and SDS secret names
//! - `service`: mesh services, application protocols and weighted clusters
//! - `proxy`: connected proxies and the workload metadata they report

pub mod identity;
pub mod proxy;
pub mod service;

pub use identity::{Principal, ServiceIdentity, DEFAULT_TRUST_DOMAIN};
pub use proxy::{Proxy, Workload};
pub use service::{MeshService, Protocol, WeightedCluster, CLUSTER_WEIGHT_ACCEPT_ALL};

//! # meshplane
//!
//! meshplane is the configuration compiler of a service-mesh control plane. It
//! reads the mesh's policy objects (services, access grants, traffic splits,
//! egress and ingress rules) and compiles, per connected proxy, the Envoy
//! listeners, route tables and secrets that enforce them.
//!
//! ## Architecture
//!
//! ```text
//! PolicySource → MeshCatalog → traffic policies → xDS builders → CompiledResources
//!                                                       ↑
//!                                 Dispatcher (one worker per proxy, re-run on change)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshplane::{compile, CompilerConfig, Proxy, ServiceIdentity, Snapshot};
//!
//! fn main() -> meshplane::Result<()> {
//!     let snapshot = Snapshot::from_file("mesh.yaml")?;
//!     let proxy = Proxy::new("bookstore-0", ServiceIdentity::new("bookstore", "store"));
//!     let resources = compile(&proxy, &snapshot, &CompilerConfig::default(), None)?;
//!     println!("{} listeners", resources.listeners.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod certificate;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod trafficpolicy;
pub mod xds;

pub use catalog::{MeshCatalog, MeshConfig, PolicySource, Snapshot};
pub use certificate::{CertificateManager, PemBundle};
pub use compiler::compile;
pub use config::CompilerConfig;
pub use dispatcher::{ChangeEvent, Dispatcher, DispatcherHandle, ProxyState};
pub use domain::{MeshService, Protocol, Proxy, ServiceIdentity};
pub use errors::{Error, Result};
pub use observability::init_logging;
pub use xds::CompiledResources;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "meshplane");
    }
}

//! Envoy resource construction
//!
//! Turns traffic policies into xDS resources:
//! - LDS: listeners and their filter chains ([`listener`])
//! - RDS: per-port route tables ([`route`])
//! - SDS: the TLS secrets the listeners reference ([`tls`] names them,
//!   [`crate::certificate`] fills them)
//!
//! Typed filter configurations live under [`filters`]; the RBAC policy
//! algebra shared by the L4 and L7 access-control filters is in [`rbac`].

pub mod access_log;
pub mod filters;
pub mod listener;
pub mod rbac;
pub mod resources;
pub mod route;
pub mod tls;
pub mod tracing;

pub use resources::{CompiledResources, Diagnostics, SkippedResource};

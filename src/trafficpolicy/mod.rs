//! Traffic policy model
//!
//! The intermediate representation between source policy objects and Envoy
//! resources: traffic matches select connections, inbound/outbound policies
//! group routes by hostname set, and rate-limit specs describe the limits to
//! compile into filters.

pub mod merge;
pub mod ratelimit;
pub mod types;

pub use merge::{
    build_inbound_policy, merge_inbound_policies, merge_outbound_policies, merge_routes,
    merge_rules, MergeConflict, Merged,
};
pub use ratelimit::*;
pub use types::*;

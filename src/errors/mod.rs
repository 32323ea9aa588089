//! # Error Handling
//!
//! Error handling for the meshplane compiler. Builders return [`Result`];
//! resource-scoped failures are logged by the caller and the sibling resources
//! are still produced (see [`Error::is_resource_scoped`]).

pub mod types;

pub use types::{Error, Result};

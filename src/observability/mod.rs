//! # Observability Infrastructure
//!
//! Structured logging for the compiler process. Observability of the
//! proxies themselves (tracing, access logs, stats) is compiled into their
//! configuration by `crate::xds`.

pub mod logging;

pub use logging::{init_logging, log_config_info};

//! # Configuration Management
//!
//! Layers built-in defaults, an optional file and `MESHPLANE_` environment
//! variables into a validated [`CompilerConfig`].
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `MESHPLANE_LISTENERS__OUTBOUND_PORT=16001`.

pub mod settings;

pub use settings::{
    AccessLogConfig, CompilerConfig, DispatcherConfig, ListenerPorts, ObservabilityConfig,
    PrometheusConfig,
};

use crate::Result;
use std::path::Path;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MESHPLANE";

/// Load the configuration, validating the result.
///
/// The file format is inferred from the extension (YAML, JSON or TOML).
pub fn load(path: Option<&Path>) -> Result<CompilerConfig> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&CompilerConfig::default())?);

    if let Some(path) = path {
        if !path.exists() {
            return Err(crate::Error::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config: CompilerConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    config.validate()?;

    tracing::debug!(
        outbound_port = config.listeners.outbound_port,
        inbound_port = config.listeners.inbound_port,
        prometheus = config.prometheus.enabled,
        "Loaded compiler configuration"
    );

    Ok(config)
}

//! # Structured Logging
//!
//! Subscriber setup and span macros using the tracing ecosystem.
//!
//! Compilation emits `error!` for skipped resources, `warn!` for merge
//! conflicts, `info!` for per-pass summaries and `debug!` for per-resource
//! detail. In JSON mode span fields (proxy, operation id) are attached to
//! every event inside the span.

use crate::config::{CompilerConfig, ObservabilityConfig};
use crate::errors::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Create a tracing span for one compilation of a proxy's resources
///
/// ```rust,ignore
/// let span = compile_span!("compile", proxy.identity);
/// let span = compile_span!("inbound_listener", proxy.identity, chains = 3);
/// ```
#[macro_export]
macro_rules! compile_span {
    ($operation:expr, $proxy:expr) => {
        tracing::info_span!(
            "compile",
            operation = %$operation,
            proxy = %$proxy,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $proxy:expr, $($field:tt)*) => {
        tracing::info_span!(
            "compile",
            operation = %$operation,
            proxy = %$proxy,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. A subscriber that is
/// already installed (tests, embedding applications) is left in place.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            Error::config_with_source(
                format!("Invalid log level '{}'", config.log_level),
                Box::new(e),
            )
        })?;

    let result = if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Global subscriber already installed");
    }

    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &CompilerConfig) {
    tracing::info!(
        service_name = %config.observability.service_name,
        outbound_port = config.listeners.outbound_port,
        inbound_port = config.listeners.inbound_port,
        prometheus_enabled = config.prometheus.enabled,
        trust_domain = %config.trust_domain,
        access_log_enabled = config.access_log.enabled,
        "meshplane compiler configuration"
    );
}

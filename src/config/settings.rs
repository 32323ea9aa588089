//! # Configuration Settings
//!
//! Defines the configuration structure for the meshplane compiler.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Main compiler configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CompilerConfig {
    /// Ports of the mesh listeners
    #[validate(nested)]
    pub listeners: ListenerPorts,

    /// Optional Prometheus scrape listener
    #[validate(nested)]
    pub prometheus: PrometheusConfig,

    /// Trust domain appended to workload identities to form RBAC principals
    #[validate(length(min = 1, message = "Trust domain cannot be empty"))]
    pub trust_domain: String,

    /// Access logging on listeners and connection managers
    #[validate(nested)]
    pub access_log: AccessLogConfig,

    /// Per-proxy compile workers
    #[validate(nested)]
    pub dispatcher: DispatcherConfig,

    /// Logging of the compiler itself
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            listeners: ListenerPorts::default(),
            prometheus: PrometheusConfig::default(),
            trust_domain: crate::domain::DEFAULT_TRUST_DOMAIN.to_string(),
            access_log: AccessLogConfig::default(),
            dispatcher: DispatcherConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl CompilerConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Checks the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.listeners.outbound_port == self.listeners.inbound_port {
            return Err(Error::validation_field(
                "Outbound and inbound listener ports cannot be the same",
                "listeners",
            ));
        }

        if self.prometheus.enabled
            && (self.prometheus.port == self.listeners.outbound_port
                || self.prometheus.port == self.listeners.inbound_port)
        {
            return Err(Error::validation_field(
                "Prometheus port collides with a mesh listener port",
                "prometheus.port",
            ));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(Error::validation_field(
                "Prometheus path must start with '/'",
                "prometheus.path",
            ));
        }

        Ok(())
    }
}

/// Mesh listener ports
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ListenerPorts {
    /// Port of `outbound-listener`
    #[validate(range(min = 1, message = "Outbound port must be between 1 and 65535"))]
    pub outbound_port: u16,

    /// Port of `inbound-listener`
    #[validate(range(min = 1, message = "Inbound port must be between 1 and 65535"))]
    pub inbound_port: u16,
}

impl Default for ListenerPorts {
    fn default() -> Self {
        Self {
            outbound_port: 15001,
            inbound_port: 15003,
        }
    }
}

/// Prometheus scrape listener
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,

    #[validate(range(min = 1, message = "Prometheus port must be between 1 and 65535"))]
    pub port: u16,

    /// Path routed to the proxy's admin stats endpoint
    #[validate(length(min = 1, message = "Prometheus path cannot be empty"))]
    pub path: String,

    /// Cluster pointing at the proxy admin interface
    #[validate(length(min = 1, message = "Metrics cluster cannot be empty"))]
    pub cluster: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 15010,
            path: "/stats/prometheus".to_string(),
            cluster: "envoy-metrics-cluster".to_string(),
        }
    }
}

/// File access log settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AccessLogConfig {
    pub enabled: bool,

    #[validate(length(min = 1, message = "Access log path cannot be empty"))]
    pub path: String,

    /// JSON format overriding the built-in one
    pub json_format: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/dev/stdout".to_string(),
            json_format: None,
        }
    }
}

/// Change-event dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Capacity of each per-proxy event queue
    #[validate(range(
        min = 1,
        max = 65536,
        message = "Queue capacity must be between 1 and 65536"
    ))]
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name attached to startup logs
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "meshplane".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

//! # Error Types
//!
//! Error types for the meshplane compiler using `thiserror`.

/// Result alias used throughout the compiler
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mesh policy compiler
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors on policy or configuration input
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Conflicting policy contributions that cannot be merged
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// Invalid RBAC rule composition
    #[error("RBAC error: {message}")]
    Rbac { message: String },

    /// Invalid rate-limit specification
    #[error("Rate limit error: {message}")]
    RateLimit { message: String },

    /// Unsupported traffic protocol for a filter chain
    #[error("Unsupported protocol '{protocol}' for {context}")]
    UnsupportedProtocol { protocol: String, context: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    pub fn rbac<S: Into<String>>(message: S) -> Self {
        Self::Rbac { message: message.into() }
    }

    pub fn rate_limit<S: Into<String>>(message: S) -> Self {
        Self::RateLimit { message: message.into() }
    }

    pub fn unsupported_protocol<P: Into<String>, C: Into<String>>(protocol: P, context: C) -> Self {
        Self::UnsupportedProtocol { protocol: protocol.into(), context: context.into() }
    }

    /// Create a serialization error without an underlying source
    pub fn serialization<S: Into<String>>(context: S) -> Self {
        Self::Serialization { context: context.into(), source: None }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether this error only invalidates the resource being built.
    ///
    /// Resource-scoped errors are logged and the sibling resources are still
    /// produced; anything else aborts the surrounding filter chain.
    pub fn is_resource_scoped(&self) -> bool {
        matches!(
            self,
            Error::Rbac { .. }
                | Error::RateLimit { .. }
                | Error::UnsupportedProtocol { .. }
                | Error::Validation { .. }
                | Error::Conflict { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            context: "JSON serialization failed".to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization {
            context: "YAML deserialization failed".to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        // Nested struct failures are not field errors; fall back to the full report
        let message = if message.is_empty() { errors.to_string() } else { message };
        Self::validation(format!("Validation failed: {}", message))
    }
}

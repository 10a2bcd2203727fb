//! Centralized error types and handling

use crate::provider::ResourceKind;
use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Port manager error: {0}")]
    PortManager(#[from] PortManagerError),

    #[error("Network provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a network resource provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{operation} failed: {message}")]
    CallFailed { operation: String, message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("No free addresses left on network {network_id}")]
    Exhausted { network_id: String },
}

impl ProviderError {
    pub fn call_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CallFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the managed port operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortManagerError {
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to tag {kind} {id}: {source}")]
    Tagging {
        kind: ResourceKind,
        id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Expected floating IP was not found for port {port_id}")]
    FloatingIpMissing { port_id: String },

    #[error("Port {port_id} has no IP address assigned")]
    FixedIpMissing { port_id: String },

    #[error("Port {port_id} is not a managed port")]
    PortIsNil { port_id: String },

    #[error("Floating IPs are enabled but no floating IP network is configured")]
    FloatingNetworkMissing,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

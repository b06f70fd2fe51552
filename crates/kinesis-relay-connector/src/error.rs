//! Error types for the Kinesis relay connector.
//!
//! Startup failures (`ConfigError`, `ConnectivityError`) keep a worker from
//! accepting traffic. Per-write failures (`KeyResolutionError`,
//! `DeliveryError`) propagate to the host, which owns the retry policy.

use thiserror::Error;

/// Classification of a failed `PutRecord` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Provisioned throughput or request rate exceeded.
    Throttled,
    /// The framed payload is larger than the service accepts.
    PayloadTooLarge,
    /// Credentials were rejected or lack permission.
    AccessDenied,
    /// The stream disappeared after startup.
    StreamNotFound,
    /// The call did not complete in time.
    Timeout,
    /// The request never reached the service.
    Transport,
    /// Any other service-side rejection.
    Service,
}

impl DeliveryFailure {
    /// Whether a later retry of the same chunk can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DeliveryFailure::Throttled | DeliveryFailure::Timeout | DeliveryFailure::Transport
        )
    }
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Throttled => write!(f, "throttled"),
            DeliveryFailure::PayloadTooLarge => write!(f, "payload too large"),
            DeliveryFailure::AccessDenied => write!(f, "access denied"),
            DeliveryFailure::StreamNotFound => write!(f, "stream not found"),
            DeliveryFailure::Timeout => write!(f, "timeout"),
            DeliveryFailure::Transport => write!(f, "transport"),
            DeliveryFailure::Service => write!(f, "service"),
        }
    }
}

/// Errors that can occur while configuring or running the connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The target stream does not exist or cannot be reached.
    #[error("Connectivity error: {0}")]
    ConnectivityError(String),

    /// A partition key or explicit hash key could not be computed for a batch.
    #[error("Key resolution error: {0}")]
    KeyResolutionError(String),

    /// The stream service rejected a put, or the call failed in transit.
    #[error("Delivery error ({kind}): {message}")]
    DeliveryError {
        kind: DeliveryFailure,
        message: String,
    },
}

impl ConnectorError {
    /// Shorthand for building a [`ConnectorError::DeliveryError`].
    pub fn delivery(kind: DeliveryFailure, message: impl Into<String>) -> Self {
        ConnectorError::DeliveryError {
            kind,
            message: message.into(),
        }
    }

    /// Returns true for errors that are only raised at startup.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConfigError(_) | ConnectorError::ConnectivityError(_)
        )
    }
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

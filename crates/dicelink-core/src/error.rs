//! Unified error types for the dicelink core.
//!
//! The taxonomy follows the failure categories the connection engine works
//! with: transport failures (transient vs. fatal), per-frame parse failures,
//! correlated-call failures, and engine guard conflicts.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Dial or listen failed. Transient: the retry controller handles it.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL or listen address that failed.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The gateway rejected the handshake (bad credentials). Fatal.
    #[error("handshake rejected by {url}: {reason}")]
    Unauthorized {
        /// The URL that rejected us.
        url: String,
        /// Reason given, if any.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Connection attempt was cancelled (endpoint disabled or shutting down).
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl TransportError {
    /// Whether this failure should disable the endpoint instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::InvalidConfig(_))
    }
}

// =============================================================================
// Adapter Errors
// =============================================================================

/// Errors that can occur while translating wire frames.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Frame parsing failed. The frame is discarded; the connection is fine.
    #[error("failed to parse frame: {reason}")]
    ParseError {
        /// Reason for failure.
        reason: String,
    },

    /// Internal adapter error.
    #[error("adapter error: {0}")]
    Internal(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AdapterError {
    /// Creates a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError { reason: msg.into() }
    }

    /// Creates an internal adapter error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

// =============================================================================
// API (correlated call) Errors
// =============================================================================

/// Errors returned to callers of correlated API requests.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response arrived before the caller's deadline.
    #[error("API call timed out")]
    Timeout,

    /// The connection dropped while the call was pending.
    #[error("not connected")]
    NotConnected,

    /// The gateway answered with a non-zero return code.
    #[error("API returned error code {retcode}: {message}")]
    Retcode {
        /// Gateway return code.
        retcode: i64,
        /// Human-readable error from the gateway.
        message: String,
    },

    /// The platform does not support this operation.
    #[error("operation not supported on this platform")]
    NotSupported,

    /// Request or response (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Errors from the connection engine's guard layer.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A connection attempt is already in flight for this endpoint.
    ///
    /// Callers must fail fast on this; waiting for the other attempt risks
    /// deadlock.
    #[error("a connection attempt is already in flight")]
    AlreadyConnecting,

    /// The endpoint is disabled; no connection work is performed.
    #[error("endpoint is disabled")]
    Disabled,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for frame translation.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type for correlated API calls.
pub type ApiResult<T> = Result<T, ApiError>;

//! Error types for the Moonraker client.
//!
//! Two scopes of failure exist:
//!
//! - [`RpcError`]: the outcome of one JSON-RPC call. Always returned as a
//!   value, never propagated as a panic or through the read loop.
//! - [`ClientError`]: connection-scope failures. These end the current
//!   websocket session and the supervisor reconnects after the backoff.

use thiserror::Error;

/// Error codes reserved by this client.
///
/// These never collide with codes assigned by Moonraker, which uses the
/// JSON-RPC 2.0 range and HTTP-style status codes.
pub mod codes {
    /// No websocket was open (or not ready) when the request was sent.
    pub const WS_NOT_CONNECTED: i64 = 99_990_001;
    /// No response arrived before the request timeout.
    pub const TIMEOUT: i64 = 99_990_002;
    /// Anything else that went wrong locally.
    pub const EXCEPTION: i64 = 99_990_003;
}

/// The failure half of an [`RpcOutcome`](crate::RpcOutcome).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("No active websocket connected.")]
    NotConnected,

    #[error("Timeout waiting for RPC response.")]
    TimedOut,

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl RpcError {
    /// Numeric code for this error, remote or reserved.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::NotConnected => codes::WS_NOT_CONNECTED,
            RpcError::TimedOut => codes::TIMEOUT,
            RpcError::Remote { code, .. } => *code,
            RpcError::Transport(_) | RpcError::MalformedResponse(_) => codes::EXCEPTION,
        }
    }

    /// Human readable message without the code.
    pub fn message(&self) -> String {
        match self {
            RpcError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// `"{code} - {message}"`, the form used in log lines.
    pub fn logging_str(&self) -> String {
        format!("{} - {}", self.code(), self.message())
    }

    /// Build a remote error from a JSON-RPC `error` object.
    ///
    /// Missing fields fall back to [`codes::EXCEPTION`] and `"Unknown"`.
    pub fn from_error_object(error: &serde_json::Value) -> Self {
        let code = error
            .get("code")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(codes::EXCEPTION);
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        RpcError::Remote { code, message }
    }
}

/// Connection-scope failures. Each one ends the active session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("dispatch queue overflow: {capacity} unprocessed messages")]
    QueueOverflow { capacity: usize },

    #[error("dispatch worker stopped")]
    DispatchClosed,
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("config file has no [{0}] section")]
    MissingSection(String),

    #[error("config key '{0}' is missing")]
    MissingKey(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

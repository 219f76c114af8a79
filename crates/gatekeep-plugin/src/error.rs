//! Error types for session plugin operations.

use gatekeep_session::SessionError;
use thiserror::Error;

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Error type for plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Failed to spawn the plugin process.
    #[error("failed to spawn session plugin: {0}")]
    SpawnFailed(String),

    /// Failed to communicate with the plugin.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC framing or message error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The plugin did not complete the startup handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The plugin returned an error response.
    #[error("plugin error {code}: {message}")]
    ServerError {
        /// Error code from the plugin.
        code: i64,
        /// Error message from the plugin.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Timeout waiting for the plugin.
    #[error("timeout waiting for session plugin")]
    Timeout,
}

impl PluginError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a handshake error.
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create an error from a JSON-RPC error object.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }
}

impl From<PluginError> for SessionError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Timeout => SessionError::backend("session plugin timed out"),
            other => SessionError::backend(other.to_string()),
        }
    }
}

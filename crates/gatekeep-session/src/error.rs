//! Error types for session operations.

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend failed a get/put/delete/init/close.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A backend call did not finish in time.
    #[error("Backend call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend was already closed.
    #[error("Backend closed")]
    Closed,

    /// The cookie could not be encoded or verified.
    #[error("Cookie codec error: {0}")]
    Codec(String),

    /// Session values could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a codec error.
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

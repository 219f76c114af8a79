//! Error types for the OIDC client.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, OidcError>;

/// Errors that can occur while talking to the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// The session holds no usable id_token.
    #[error("unauthorized")]
    Unauthorized,

    /// Network/HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// The provider answered with an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// A token failed signature, issuer, audience or expiry checks.
    #[error("failed to verify ID token: {0}")]
    Verification(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OidcError {
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the user has to log in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl From<reqwest::Error> for OidcError {
    fn from(e: reqwest::Error) -> Self {
        OidcError::Network(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for OidcError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        OidcError::Verification(e.to_string())
    }
}

impl From<serde_json::Error> for OidcError {
    fn from(e: serde_json::Error) -> Self {
        OidcError::Serialization(e.to_string())
    }
}

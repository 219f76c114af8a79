//! Error types for the gateway.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use gatekeep_config::{ConfigError, FieldError};
use gatekeep_oidc::OidcError;
use gatekeep_plugin::PluginError;
use gatekeep_session::SessionError;
use serde::Serialize;
use thiserror::Error;

use crate::page::NotFoundPage;
use crate::registry::RegistryError;

/// Status sent when the client went away before the response was ready.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Every endpoint of a location refused the connection.
    #[error("no upstream endpoints available")]
    NoUpstream,

    /// The upstream request failed after connecting.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The upstream answered 404.
    #[error("{url}: Not Found")]
    UpstreamNotFound { url: String },

    /// No host or path matched.
    #[error("{0}")]
    NotFound(String),

    /// The client disconnected or sent a truncated body.
    #[error("client closed request")]
    ClientClosed,

    /// The authorization code could not be exchanged.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The callback received tokens it cannot use.
    #[error("{0}")]
    Callback(String),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("OIDC error: {0}")]
    Oidc(#[from] OidcError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("session plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("upstream registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An HTTP client or header could not be built.
    #[error("build error: {0}")]
    Build(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    pub fn watch(msg: impl Into<String>) -> Self {
        Self::Watch(msg.into())
    }

    /// Field errors of a rejected config, empty for anything else.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ProxyError::Config(e) => e.field_errors(),
            _ => &[],
        }
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoUpstream | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamNotFound { .. } | ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::ClientClosed => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ProxyError::TokenExchange(_) => StatusCode::UNAUTHORIZED,
            ProxyError::Oidc(e) => match e {
                OidcError::Unauthorized | OidcError::Verification(_) => StatusCode::UNAUTHORIZED,
                OidcError::Network(_) | OidcError::Provider(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render with a specific not-found page.
    pub fn into_response_with(self, page: &NotFoundPage) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "request failed");
        } else {
            tracing::warn!(status = %status, error = %message, "request rejected");
        }

        if status == StatusCode::NOT_FOUND {
            return page.response(&message);
        }

        (
            status,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            format!("{}\n", message),
        )
            .into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.into_response_with(&NotFoundPage::default())
    }
}

/// Body of the JSON 401 answer.
#[derive(Debug, Serialize)]
pub struct UnauthorizedBody {
    pub status_code: u16,
    pub message: &'static str,
}

/// The 401 answer for hosts that do not redirect to login.
///
/// `Location` still names the login path so API clients can start the flow.
pub fn unauthorized_response(login: &str) -> Response {
    let body = UnauthorizedBody {
        status_code: StatusCode::UNAUTHORIZED.as_u16(),
        message: "Unauthorized",
    };
    let mut response = (
        StatusCode::UNAUTHORIZED,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        serde_json::to_string(&body).unwrap_or_default(),
    )
        .into_response();
    if let Ok(location) = HeaderValue::from_str(login) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

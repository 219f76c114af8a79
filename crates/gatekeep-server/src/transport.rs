//! Upstream transport chain.
//!
//! A location forwards through a fixed stack, outermost first:
//!
//! 1. [`NotFoundTransport`] turns an upstream 404 into [`ProxyError::UpstreamNotFound`]
//! 2. [`AuthorizationTransport`] sets `Authorization: <scheme> <token>`
//! 3. [`DumpTransport`] logs the exchange line by line at debug level
//! 4. [`FailoverTransport`] tries each endpoint once, starting at the registry cursor

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use bytes::Bytes;
use reqwest::redirect::Policy;

use crate::config::GatewayOptions;
use crate::error::{ProxyError, Result};
use crate::registry::Registry;

/// Token attached to an upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub scheme: String,
    pub token: String,
}

impl Credential {
    pub fn new(scheme: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            token: token.into(),
        }
    }

    fn header_value(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("{} {}", self.scheme, self.token))
            .map_err(|e| ProxyError::build(format!("invalid Authorization header: {}", e)))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// A buffered request on its way upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path and query of the inbound request.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub credential: Option<Credential>,
}

/// One layer of the chain.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: UpstreamRequest) -> Result<reqwest::Response>;
}

/// Shared handle to a complete chain.
pub type SharedTransport = Arc<dyn Transport>;

/// Build the chain for one location.
pub fn chain(
    registry: Arc<Registry>,
    verify_tls: bool,
    dump: bool,
    options: &GatewayOptions,
) -> Result<SharedTransport> {
    let failover = FailoverTransport::new(registry, verify_tls, options)?;
    let dump = DumpTransport::new(Box::new(failover), dump);
    let auth = AuthorizationTransport::new(Box::new(dump));
    Ok(Arc::new(NotFoundTransport::new(Box::new(auth))))
}

/// Sends to the first endpoint that accepts a connection.
pub struct FailoverTransport {
    registry: Arc<Registry>,
    client: reqwest::Client,
}

impl FailoverTransport {
    pub fn new(registry: Arc<Registry>, verify_tls: bool, options: &GatewayOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .connect_timeout(options.connect_timeout)
            .timeout(options.response_timeout)
            .pool_idle_timeout(options.pool_idle_timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| ProxyError::build(format!("failed to build upstream client: {}", e)))?;
        Ok(Self { registry, client })
    }
}

#[async_trait]
impl Transport for FailoverTransport {
    async fn round_trip(&self, request: UpstreamRequest) -> Result<reqwest::Response> {
        for endpoint in self.registry.candidates() {
            let url = endpoint.join(&request.path_and_query);
            let result = self
                .client
                .request(request.method.clone(), url.clone())
                .headers(request.headers.clone())
                .body(request.body.clone())
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() => {
                    tracing::warn!(upstream = %url, error = %e, "upstream refused connection, trying next");
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!(upstream = %url, error = %e, "upstream timed out");
                    return Err(ProxyError::Upstream(e.to_string()));
                }
                Err(e) => return Err(ProxyError::Upstream(e.to_string())),
            }
        }
        Err(ProxyError::NoUpstream)
    }
}

/// Logs requests and responses when enabled.
pub struct DumpTransport {
    inner: Box<dyn Transport>,
    enabled: bool,
}

impl DumpTransport {
    pub fn new(inner: Box<dyn Transport>, enabled: bool) -> Self {
        Self { inner, enabled }
    }
}

#[async_trait]
impl Transport for DumpTransport {
    async fn round_trip(&self, request: UpstreamRequest) -> Result<reqwest::Response> {
        if self.enabled {
            for line in dump_request(&request).lines() {
                tracing::debug!("{}", line);
            }
        }

        let response = self.inner.round_trip(request).await?;
        tracing::debug!(upstream = %response.url(), status = %response.status(), "connected to upstream");

        if self.enabled {
            for line in dump_response(&response).lines() {
                tracing::debug!("{}", line);
            }
        }
        Ok(response)
    }
}

fn dump_request(request: &UpstreamRequest) -> String {
    let mut out = format!("{} {} HTTP/1.1\n", request.method, request.path_and_query);
    dump_headers(&mut out, &request.headers);
    if !request.body.is_empty() {
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(&request.body));
    }
    out
}

fn dump_response(response: &reqwest::Response) -> String {
    let mut out = format!("{:?} {}\n", response.version(), response.status());
    dump_headers(&mut out, response.headers());
    out
}

fn dump_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let value = if value.is_sensitive() {
            "<redacted>"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        out.push_str(&format!("{}: {}\n", name, value));
    }
}

/// Injects the resolved credential.
pub struct AuthorizationTransport {
    inner: Box<dyn Transport>,
}

impl AuthorizationTransport {
    pub fn new(inner: Box<dyn Transport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for AuthorizationTransport {
    async fn round_trip(&self, mut request: UpstreamRequest) -> Result<reqwest::Response> {
        if let Some(credential) = &request.credential {
            let value = credential.header_value()?;
            request.headers.insert(header::AUTHORIZATION, value);
        }
        self.inner.round_trip(request).await
    }
}

/// Tags upstream 404s so the caller can render the not-found page.
pub struct NotFoundTransport {
    inner: Box<dyn Transport>,
}

impl NotFoundTransport {
    pub fn new(inner: Box<dyn Transport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for NotFoundTransport {
    async fn round_trip(&self, request: UpstreamRequest) -> Result<reqwest::Response> {
        let response = self.inner.round_trip(request).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProxyError::UpstreamNotFound {
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }
}

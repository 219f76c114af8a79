//! Per-virtual-host request handling.
//!
//! A [`HostHandler`] owns one host's OIDC client, session store and location routes.
//! Login, callback and logout paths are answered here; everything matching a location
//! pattern is forwarded through that location's transport chain.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use cookie::Cookie;
use gatekeep_config::ServerConfig;
use gatekeep_oidc::{
    OidcClient, OidcError, REDIRECT, RefreshPolicy, ResolvedToken, STATE, generate_state,
    resolve_token, state_matches, store_tokens,
};
use gatekeep_session::{Session, SessionStore};
use http_body_util::LengthLimitError;
use tracing::Instrument;

use crate::config::GatewayOptions;
use crate::error::{ProxyError, Result, unauthorized_response};
use crate::page::NotFoundPage;
use crate::registry::Registry;
use crate::transport::{self, Credential, SharedTransport, UpstreamRequest};

/// Answered with an empty 200 when no location claims it.
pub const FAVICON_PATH: &str = "/favicon.ico";

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A location URL pattern bound to its transport chain.
struct Route {
    pattern: String,
    token_key: String,
    token_type: String,
    transport: SharedTransport,
}

/// Everything needed to serve one virtual host.
pub struct HostHandler {
    key: String,
    config: ServerConfig,
    scheme: &'static str,
    oidc: Arc<OidcClient>,
    store: Arc<SessionStore>,
    routes: Vec<Route>,
    page: NotFoundPage,
    max_body_size: usize,
}

impl std::fmt::Debug for HostHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandler")
            .field("key", &self.key)
            .field("routes", &self.routes.iter().map(|r| &r.pattern).collect::<Vec<_>>())
            .finish()
    }
}

impl HostHandler {
    /// Build the handler, one registry and transport chain per location.
    pub fn new(
        key: impl Into<String>,
        config: ServerConfig,
        store: Arc<SessionStore>,
        oidc: Arc<OidcClient>,
        options: &GatewayOptions,
        tls: bool,
    ) -> Result<Self> {
        let mut routes = Vec::new();
        for location in &config.locations {
            let registry = Arc::new(Registry::new(location.proxy_pass.urls())?);
            let chain = transport::chain(
                registry,
                location.proxy_ssl_verify.enabled(),
                config.logging.dump,
                options,
            )?;
            for url in &location.urls {
                routes.push(Route {
                    pattern: url.path.clone(),
                    token_key: url.token.clone(),
                    token_type: url.token_type.clone(),
                    transport: chain.clone(),
                });
            }
        }

        let page = options
            .not_found_template
            .as_deref()
            .map(NotFoundPage::new)
            .unwrap_or_default();

        Ok(Self {
            key: key.into(),
            config,
            scheme: if tls { "https" } else { "http" },
            oidc,
            store,
            routes,
            page,
            max_body_size: options.max_body_size,
        })
    }

    /// Router key, `server_name:port`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Serve one request inside the host's span.
    pub async fn handle(&self, request: Request) -> Response {
        let span = tracing::info_span!(
            "host",
            host = %self.key,
            level = self.config.logging.level.as_deref().unwrap_or("default"),
        );
        self.dispatch(request).instrument(span).await
    }

    async fn dispatch(&self, request: Request) -> Response {
        let path = request.uri().path().to_string();

        let result = if path == self.config.login {
            self.login(request).await
        } else if path == self.config.callback {
            self.callback(request).await
        } else if path == self.config.logout {
            self.logout(request).await
        } else if let Some(route) = self.match_route(&path) {
            self.proxy(route, request).await
        } else if path == FAVICON_PATH {
            Ok(StatusCode::OK.into_response())
        } else {
            Err(ProxyError::NotFound(format!("{}: Not Found", path)))
        };

        result.unwrap_or_else(|e| e.into_response_with(&self.page))
    }

    fn match_route(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| pattern_matches(&r.pattern, path))
            .max_by_key(|r| r.pattern.len())
    }

    async fn load_session(&self, headers: &HeaderMap) -> Session {
        self.store.load(headers, &self.config.cookie_name).await
    }

    async fn login(&self, request: Request) -> Result<Response> {
        if request.method() != Method::GET {
            return Ok((StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET")]).into_response());
        }

        let mut session = self.load_session(request.headers()).await;
        let state = generate_state();
        let url = self.oidc.authorize_url(&state).await?;
        session.insert(STATE, state);
        let cookie = self.store.save(&mut session).await?;

        tracing::debug!("redirecting to provider for login");
        Ok(with_cookie(Redirect::temporary(&url).into_response(), Some(cookie)))
    }

    async fn callback(&self, request: Request) -> Result<Response> {
        let query = request.uri().query().unwrap_or_default();
        let mut returned_state = String::new();
        let mut code = String::new();
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "state" => returned_state = value.into_owned(),
                "code" => code = value.into_owned(),
                _ => {}
            }
        }

        let mut session = self.load_session(request.headers()).await;
        let stored_state = session.get_str(STATE).unwrap_or_default().to_string();
        if !state_matches(&returned_state, &stored_state) {
            tracing::warn!("login state mismatch, restarting login");
            return Ok(Redirect::temporary(&self.config.login).into_response());
        }

        let tokens = self
            .oidc
            .exchange_code(&code)
            .await
            .map_err(|e| ProxyError::TokenExchange(e.to_string()))?;

        let Some(id_token) = tokens.id_token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(ProxyError::Callback(
                "No id_token field in oauth2 token.".to_string(),
            ));
        };
        if let Err(e) = self.oidc.verify_id_token(id_token).await {
            let reason = match e {
                OidcError::Verification(reason) => reason,
                other => other.to_string(),
            };
            return Err(ProxyError::Callback(format!(
                "Failed to verify ID Token: {}",
                reason
            )));
        }

        store_tokens(&mut session, &tokens);
        session.remove(STATE);
        let target = session
            .remove(REDIRECT)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| is_local_path(t))
            .unwrap_or_else(|| "/".to_string());
        let cookie = self.store.save(&mut session).await?;

        tracing::info!("login completed");
        Ok(with_cookie(Redirect::to(&target).into_response(), Some(cookie)))
    }

    async fn logout(&self, request: Request) -> Result<Response> {
        let url = self.oidc.logout_url()?;
        let mut session = self.load_session(request.headers()).await;
        session.expire();
        let cookie = self.store.save(&mut session).await?;

        tracing::debug!(target_url = %url, "session ended");
        Ok(with_cookie(Redirect::temporary(&url).into_response(), Some(cookie)))
    }

    async fn proxy(&self, route: &Route, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let mut session = self.load_session(&parts.headers).await;
        let mut cookie = None;
        let mut warned = false;

        let token = match resolve_token(
            &self.oidc,
            &mut session,
            &route.token_key,
            RefreshPolicy::IfInvalid,
        )
        .await
        {
            Ok(token) => token,
            Err(e) if requires_login(&e) => return self.unauthorized(&parts, session, e).await,
            Err(e) => return Err(e.into()),
        };
        self.note_fallback(route, &token, &mut warned);
        if token.refreshed {
            cookie = Some(self.store.save(&mut session).await?);
        }

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_body_size) {
            return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response());
        }
        let body = match axum::body::to_bytes(body, self.max_body_size).await {
            Ok(body) => body,
            Err(e) if exceeds_length_limit(&e) => {
                return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response());
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed to read request body");
                return Err(ProxyError::ClientClosed);
            }
        };

        let mut upstream = UpstreamRequest {
            method: parts.method.clone(),
            path_and_query: parts
                .uri
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            headers: self.forward_headers(&parts),
            body,
            credential: Some(Credential::new(&route.token_type, token.value)),
        };

        let response = route.transport.round_trip(upstream.clone()).await?;
        let status = response.status();
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            return Ok(relay(response, cookie));
        }
        drop(response);

        tracing::debug!(status = %status, "upstream rejected token, refreshing once");
        let token = match resolve_token(
            &self.oidc,
            &mut session,
            &route.token_key,
            RefreshPolicy::Force,
        )
        .await
        {
            Ok(token) => token,
            Err(e) if requires_login(&e) => return self.unauthorized(&parts, session, e).await,
            Err(e) => return Err(e.into()),
        };
        self.note_fallback(route, &token, &mut warned);
        if session.is_dirty() {
            cookie = Some(self.store.save(&mut session).await?);
        }

        upstream.credential = Some(Credential::new(&route.token_type, token.value));
        let response = route.transport.round_trip(upstream).await?;
        Ok(relay(response, cookie))
    }

    fn note_fallback(&self, route: &Route, token: &ResolvedToken, warned: &mut bool) {
        if token.used_fallback && !*warned {
            *warned = true;
            tracing::warn!(
                token_key = %route.token_key,
                path = %route.pattern,
                "configured token key not in session, forwarding id_token"
            );
        }
    }

    async fn unauthorized(
        &self,
        parts: &Parts,
        mut session: Session,
        reason: OidcError,
    ) -> Result<Response> {
        tracing::debug!(reason = %reason, redirect = self.config.redirect, "request not authenticated");
        if !self.config.redirect {
            return Ok(unauthorized_response(&self.config.login));
        }

        let original = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        session.insert(REDIRECT, original);
        let cookie = self.store.save(&mut session).await?;
        Ok(with_cookie(
            Redirect::temporary(&self.config.login).into_response(),
            Some(cookie),
        ))
    }

    fn forward_headers(&self, parts: &Parts) -> HeaderMap {
        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            let ip = addr.ip().to_string();
            let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{}, {}", prior, ip),
                None => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
        headers.insert(
            X_FORWARDED_PROTO,
            HeaderValue::from_static(self.scheme),
        );
        headers
    }
}

/// A refused refresh means the user has to log in again.
fn requires_login(e: &OidcError) -> bool {
    e.is_unauthorized() || matches!(e, OidcError::Provider(_))
}

/// Exact match, or prefix match for patterns ending in `/`.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

/// Whether a body read failed because it ran past the size limit.
fn exceeds_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return true;
        }
        source = err.source();
    }
    false
}

fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//")
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn with_cookie(mut response: Response, cookie: Option<Cookie<'static>>) -> Response {
    if let Some(cookie) = cookie
        && let Ok(value) = HeaderValue::from_str(&cookie.to_string())
    {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

/// Stream an upstream response back to the client.
fn relay(response: reqwest::Response, cookie: Option<Cookie<'static>>) -> Response {
    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    with_cookie(out, cookie)
}

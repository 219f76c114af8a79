//! Multi-host routing.
//!
//! The live [`RoutingTable`] sits behind an [`ArcSwap`]. A reload builds a complete
//! replacement and publishes it in one store; every request works against the
//! snapshot it loaded on entry.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Uri, header};
use axum::response::Response;
use gatekeep_config::{DEFAULT_PORT, DEFAULT_TLS_PORT};
use tower_http::trace::TraceLayer;

use crate::error::ProxyError;
use crate::host::HostHandler;
use crate::page::NotFoundPage;

/// Host handlers keyed by `host:port`.
#[derive(Debug, Default)]
pub struct RoutingTable {
    hosts: HashMap<String, Arc<HostHandler>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handler: Arc<HostHandler>) {
        self.hosts.insert(handler.key().to_string(), handler);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<HostHandler>> {
        self.hosts.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.hosts.keys()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Router key for a request: the `Host` header (or URI authority), lowercased, with the
/// scheme's default port appended when it carries none.
pub fn request_host_key(headers: &HeaderMap, uri: &Uri, tls: bool) -> Option<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))?;
    let host = host.trim().to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    let has_port = match host.rfind(']') {
        // Bracketed IPv6 literal: a port can only follow the closing bracket.
        Some(end) => host[end..].contains(':'),
        None => host.contains(':'),
    };
    if has_port {
        return Some(host);
    }
    let port = if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };
    Some(format!("{}:{}", host, port))
}

/// Dispatches requests to the host handler for their `Host`.
#[derive(Debug)]
pub struct GatewayRouter {
    table: ArcSwap<RoutingTable>,
    tls: bool,
    page: NotFoundPage,
}

impl GatewayRouter {
    pub fn new(tls: bool, page: NotFoundPage) -> Self {
        Self {
            table: ArcSwap::from_pointee(RoutingTable::new()),
            tls,
            page,
        }
    }

    /// Replace the live table. Returns the previous one.
    pub fn publish(&self, table: RoutingTable) -> Arc<RoutingTable> {
        self.table.swap(Arc::new(table))
    }

    /// The table in effect right now.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Route one request.
    pub async fn route(&self, request: Request) -> Response {
        let table = self.snapshot();
        let key = request_host_key(request.headers(), request.uri(), self.tls);

        match key.as_deref().and_then(|k| table.get(k)) {
            Some(handler) => handler.handle(request).await,
            None => {
                let host = key.unwrap_or_default();
                tracing::warn!(host = %host, path = %request.uri().path(), "no virtual host for request");
                ProxyError::NotFound(format!("{}: Not Found", host)).into_response_with(&self.page)
            }
        }
    }
}

/// The axum application serving every virtual host.
pub fn app(router: Arc<GatewayRouter>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn dispatch(State(router): State<Arc<GatewayRouter>>, request: Request) -> Response {
    router.route(request).await
}

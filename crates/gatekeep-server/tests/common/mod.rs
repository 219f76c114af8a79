//! Mock identity provider, mock upstreams and config builders for gateway tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{Form, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gatekeep_config::{
    Config, LocationConfig, OidcConfig, ProxyPass, ServerConfig, SessionConfig, UrlConfig,
};
use gatekeep_server::{Gateway, GatewayOptions};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tower::ServiceExt;

pub const HOST: &str = "app.example.com";
pub const CLIENT_ID: &str = "app";
pub const CLIENT_SECRET: &str = "secret";
pub const CODEC_KEY: &str = "0123456789abcdef0123456789abcdef";
const KEY_ID: &str = "test-key";

const PRIVATE_KEY: &str = include_str!("../fixtures/idp_key.pem");
const JWKS: &str = include_str!("../fixtures/idp_jwks.json");

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

async fn serve(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, handle)
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity provider
// ─────────────────────────────────────────────────────────────────────────────

pub struct IdpState {
    pub issuer: String,
    key: EncodingKey,
    codes: Mutex<HashSet<String>>,
    pub token_requests: Mutex<Vec<HashMap<String, String>>>,
    pub refresh_count: AtomicUsize,
    issued: AtomicUsize,
    /// Leave `id_token` out of token responses.
    pub omit_id_token: AtomicBool,
    /// Sign id_tokens for another client.
    pub wrong_audience: AtomicBool,
}

impl IdpState {
    fn issue(&self, refresh_token: bool) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KEY_ID.to_string());
        let audience = if self.wrong_audience.load(Ordering::SeqCst) {
            "another-app"
        } else {
            CLIENT_ID
        };
        let claims = json!({
            "iss": self.issuer,
            "sub": "user-1",
            "aud": audience,
            "iat": now(),
            "exp": now() + 3600,
        });
        let id_token = jsonwebtoken::encode(&header, &claims, &self.key).unwrap_or_default();

        let mut body = json!({
            "access_token": format!("access-{}", n),
            "id_token": id_token,
            "token_type": "Bearer",
            "expires_in": 3600,
        });
        if refresh_token {
            body["refresh_token"] = json!(format!("refresh-{}", n));
        }
        if self.omit_id_token.load(Ordering::SeqCst)
            && let Some(fields) = body.as_object_mut()
        {
            fields.remove("id_token");
        }
        body
    }
}

pub struct MockIdp {
    pub state: Arc<IdpState>,
    _handle: JoinHandle<()>,
}

impl MockIdp {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(IdpState {
            issuer: format!("http://{}", addr),
            key: EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap(),
            codes: Mutex::new(HashSet::new()),
            token_requests: Mutex::new(Vec::new()),
            refresh_count: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            omit_id_token: AtomicBool::new(false),
            wrong_audience: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/.well-known/jwks.json", get(jwks))
            .route("/oauth/token", post(token))
            .with_state(state.clone());
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            state,
            _handle: handle,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.state.issuer
    }

    pub fn issue_code(&self, code: &str) {
        self.state.codes.lock().insert(code.to_string());
    }

    pub fn omit_id_token(&self) {
        self.state.omit_id_token.store(true, Ordering::SeqCst);
    }

    pub fn sign_for_other_audience(&self) {
        self.state.wrong_audience.store(true, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.state.refresh_count.load(Ordering::SeqCst)
    }

    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig {
            provider: self.state.issuer.clone(),
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            redirect_url: format!("http://{}/oauth2/callback", HOST),
            ..Default::default()
        }
    }
}

async fn discovery(State(state): State<Arc<IdpState>>) -> Json<Value> {
    let issuer = &state.issuer;
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize", issuer),
        "token_endpoint": format!("{}/oauth/token", issuer),
        "jwks_uri": format!("{}/.well-known/jwks.json", issuer),
    }))
}

async fn jwks() -> Response {
    ([(header::CONTENT_TYPE, "application/json")], JWKS).into_response()
}

async fn token(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.lock().push(form.clone());
    let invalid = (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "invalid_grant"})),
    );

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            let code = form.get("code").cloned().unwrap_or_default();
            if !state.codes.lock().remove(&code) {
                return invalid.into_response();
            }
            Json(state.issue(true)).into_response()
        }
        Some("refresh_token") => {
            state.refresh_count.fetch_add(1, Ordering::SeqCst);
            Json(state.issue(false)).into_response()
        }
        _ => invalid.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstreams
// ─────────────────────────────────────────────────────────────────────────────

/// What an upstream saw for one request.
#[derive(Debug, Clone)]
pub struct Seen {
    pub path_and_query: String,
    pub headers: HeaderMap,
}

impl Seen {
    pub fn authorization(&self) -> &str {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

pub struct UpstreamState {
    pub name: String,
    pub seen: Mutex<Vec<Seen>>,
    /// Answer 401 to this many requests before serving normally.
    pub reject: AtomicUsize,
}

/// A recording upstream. `/missing` answers 404 and `/slow` stalls for a minute;
/// everything else echoes `"{name} {path_and_query}"`.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub state: Arc<UpstreamState>,
    _handle: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(name: &str) -> Self {
        let state = Arc::new(UpstreamState {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
            reject: AtomicUsize::new(0),
        });
        let app = Router::new().fallback(upstream).with_state(state.clone());
        let (addr, handle) = serve(app).await;
        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.state.seen.lock().len()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.state.seen.lock().clone()
    }

    pub fn reject_next(&self, n: usize) {
        self.state.reject.store(n, Ordering::SeqCst);
    }
}

async fn upstream(State(state): State<Arc<UpstreamState>>, request: Request) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();
    state.seen.lock().push(Seen {
        path_and_query: path_and_query.clone(),
        headers: request.headers().clone(),
    });

    let rejecting = state
        .reject
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if rejecting {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match request.uri().path() {
        "/missing" => return StatusCode::NOT_FOUND.into_response(),
        "/slow" => tokio::time::sleep(Duration::from_secs(60)).await,
        _ => {}
    }
    format!("{} {}", state.name, path_and_query).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Config and requests
// ─────────────────────────────────────────────────────────────────────────────

/// A location forwarding `paths` to `upstreams` with the given token key.
pub fn location(upstreams: &[String], paths: &[&str], token: &str) -> LocationConfig {
    LocationConfig {
        proxy_pass: ProxyPass(upstreams.to_vec()),
        urls: paths
            .iter()
            .map(|p| UrlConfig {
                path: p.to_string(),
                token: token.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

pub fn server(name: &str, idp: &MockIdp, locations: Vec<LocationConfig>) -> ServerConfig {
    ServerConfig {
        server_name: name.to_string(),
        oidc: idp.oidc_config(),
        session: SessionConfig {
            codecs: vec![CODEC_KEY.to_string()],
            ..Default::default()
        },
        locations,
        ..Default::default()
    }
}

pub fn config(servers: Vec<ServerConfig>) -> Config {
    Config {
        servers,
        ..Default::default()
    }
}

pub async fn gateway(config: &Config) -> Gateway {
    gateway_with(GatewayOptions::default(), config).await
}

pub async fn gateway_with(options: GatewayOptions, config: &Config) -> Gateway {
    let gateway = Gateway::new(options, false);
    gateway.apply(config).await.unwrap();
    gateway
}

pub async fn send(gateway: &Gateway, path: &str, cookie: Option<&str>) -> Response {
    send_to(gateway, HOST, path, cookie).await
}

pub async fn send_to(gateway: &Gateway, host: &str, path: &str, cookie: Option<&str>) -> Response {
    let mut request = axum::http::Request::builder()
        .uri(path)
        .header(header::HOST, host);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    send_request(gateway, request.body(Body::empty()).unwrap()).await
}

/// POST `body` to `path` without a `Content-Length` header.
pub async fn post_unsized(gateway: &Gateway, path: &str, cookie: &str, body: Vec<u8>) -> Response {
    let request = axum::http::Request::builder()
        .method("POST")
        .uri(path)
        .header(header::HOST, HOST)
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap();
    assert!(request.headers().get(header::CONTENT_LENGTH).is_none());
    send_request(gateway, request).await
}

pub async fn send_request(gateway: &Gateway, request: axum::http::Request<Body>) -> Response {
    gateway.app().oneshot(request).await.unwrap()
}

/// `name=value` of the response's session cookie.
pub fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn location_header(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Start a login and answer the callback with a freshly issued code.
pub async fn callback(gateway: &Gateway, idp: &MockIdp) -> (Response, String) {
    let response = send(gateway, "/oauth2/login", None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let cookie = session_cookie(&response).unwrap();
    let state = query_param(&location_header(&response), "state").unwrap();

    idp.issue_code("code-1");
    let path = format!("/oauth2/callback?state={}&code=code-1", state);
    (send(gateway, &path, Some(&cookie)).await, cookie)
}

/// Run login and callback; returns the logged-in session cookie.
pub async fn login(gateway: &Gateway, idp: &MockIdp) -> String {
    let (response, cookie) = callback(gateway, idp).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    session_cookie(&response).unwrap_or(cookie)
}

//! Mock identity provider for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gatekeep_config::OidcConfig;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

pub const CLIENT_ID: &str = "app";
pub const CLIENT_SECRET: &str = "secret";
pub const KEY_ID: &str = "test-key";

const PRIVATE_KEY: &str = include_str!("../fixtures/idp_key.pem");
const JWKS: &str = include_str!("../fixtures/idp_jwks.json");

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Knobs and recordings shared with the handlers.
pub struct IdpState {
    pub issuer: String,
    key: EncodingKey,
    codes: Mutex<HashSet<String>>,
    pub token_requests: Mutex<Vec<HashMap<String, String>>>,
    pub refresh_count: AtomicUsize,
    pub discovery_count: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub omit_id_token: AtomicBool,
    issued: AtomicUsize,
}

impl IdpState {
    /// Sign an id_token for `aud` that expires `ttl` seconds from now.
    pub fn mint_id_token(&self, aud: &str, ttl: i64) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KEY_ID.to_string());
        let claims = json!({
            "iss": self.issuer,
            "sub": "user-1",
            "aud": aud,
            "email": "user@example.com",
            "iat": now(),
            "exp": now() + ttl,
        });
        jsonwebtoken::encode(&header, &claims, &self.key).unwrap_or_default()
    }

    fn issue(&self, refresh_token: bool) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let mut body = json!({
            "access_token": format!("access-{}", n),
            "token_type": "Bearer",
            "expires_in": 3600,
        });
        if refresh_token {
            body["refresh_token"] = json!(format!("refresh-{}", n));
        }
        if !self.omit_id_token.load(Ordering::SeqCst) {
            body["id_token"] = json!(self.mint_id_token(CLIENT_ID, 3600));
        }
        body
    }
}

/// A running mock IdP.
pub struct MockIdp {
    pub addr: SocketAddr,
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
            discovery_count: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
            omit_id_token: AtomicBool::new(false),
            issued: AtomicUsize::new(0),
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
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.state.issuer
    }

    /// Register a one-shot authorization code.
    pub fn issue_code(&self, code: &str) {
        self.state.codes.lock().insert(code.to_string());
    }

    /// Client settings pointing at this provider.
    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig {
            provider: self.state.issuer.clone(),
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            redirect_url: "http://app.example.com/oauth2/callback".to_string(),
            ..Default::default()
        }
    }
}

async fn discovery(State(state): State<Arc<IdpState>>) -> Json<Value> {
    state.discovery_count.fetch_add(1, Ordering::SeqCst);
    let issuer = &state.issuer;
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize", issuer),
        "token_endpoint": format!("{}/oauth/token", issuer),
        "jwks_uri": format!("{}/.well-known/jwks.json", issuer),
    }))
}

async fn jwks() -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        JWKS,
    )
        .into_response()
}

async fn token(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.lock().push(form.clone());

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            let code = form.get("code").cloned().unwrap_or_default();
            if !state.codes.lock().remove(&code) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant"})),
                )
                    .into_response();
            }
            Json(state.issue(true)).into_response()
        }
        Some("refresh_token") => {
            state.refresh_count.fetch_add(1, Ordering::SeqCst);
            if state.fail_refresh.load(Ordering::SeqCst) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant"})),
                )
                    .into_response();
            }
            Json(state.issue(false)).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        )
            .into_response(),
    }
}

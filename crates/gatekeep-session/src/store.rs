//! Binds session cookies to backend records.

use std::future::Future;
use std::time::Duration;

use cookie::{Cookie, SameSite};
use data_encoding::BASE32_NOPAD;
use http::HeaderMap;
use http::header::COOKIE;
use rand::RngCore;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::backend::SharedBackend;
use crate::codec::CookieCodec;
use crate::error::{Result, SessionError};
use crate::session::Session;

/// Default cookie max-age (30 days).
pub const DEFAULT_MAX_AGE: i64 = 86400 * 30;

/// Default bound on each backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend key for a session ID.
pub fn backend_key(id: &str) -> String {
    format!("session_{}", id)
}

/// A new session ID: 32 random bytes, base32 without padding.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// Attributes set on the session cookie.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub path: String,
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age: DEFAULT_MAX_AGE,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

/// Session store for one virtual host.
///
/// Every backend call goes through one mutex. This is a known contention point:
/// requests for unrelated sessions on the same host queue behind each other.
pub struct SessionStore {
    backend: SharedBackend,
    codec: CookieCodec,
    options: CookieOptions,
    timeout: Duration,
    lock: Mutex<()>,
}

impl SessionStore {
    /// Create a store with default cookie options.
    pub fn new(backend: SharedBackend, codec: CookieCodec) -> Self {
        let options = CookieOptions::default();
        Self {
            backend,
            codec: codec.with_max_age(options.max_age.max(0) as u64),
            options,
            timeout: DEFAULT_BACKEND_TIMEOUT,
            lock: Mutex::new(()),
        }
    }

    /// Replace the cookie options.
    pub fn with_options(mut self, options: CookieOptions) -> Self {
        self.codec = self.codec.with_max_age(options.max_age.max(0) as u64);
        self.options = options;
        self
    }

    /// Set the bound on each backend call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let _guard = self.lock.lock().await;
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| SessionError::Timeout(self.timeout))?
    }

    /// Load the session named `name` from the request's cookies.
    ///
    /// Never fails: a missing, forged or expired cookie, or a backend error, yields a
    /// new empty session.
    pub async fn load(&self, headers: &HeaderMap, name: &str) -> Session {
        let Some(encoded) = find_cookie(headers, name) else {
            return Session::new(name, self.options.max_age);
        };

        match self.try_load(name, &encoded).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                trace!(cookie = name, "no stored session for cookie");
                Session::new(name, self.options.max_age)
            }
            Err(e) => {
                debug!(cookie = name, error = %e, "session load failed, starting a new one");
                Session::new(name, self.options.max_age)
            }
        }
    }

    async fn try_load(&self, name: &str, encoded: &str) -> Result<Option<Session>> {
        let id = self.codec.decode(name, encoded)?;
        let key = backend_key(&id);
        let Some(raw) = self.call(self.backend.get(&key)).await? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        let values: Map<String, Value> = serde_json::from_str(&raw)?;
        Ok(Some(Session::loaded(name, id, values, self.options.max_age)))
    }

    /// Persist the session and return the `Set-Cookie` to send.
    ///
    /// A negative max-age deletes the record and returns a removal cookie.
    pub async fn save(&self, session: &mut Session) -> Result<Cookie<'static>> {
        if session.max_age() < 0 {
            self.delete(session).await?;
            session.mark_clean();
            let mut removal = self.build_cookie(session.name().to_string(), String::new(), 0);
            removal.make_removal();
            return Ok(removal);
        }

        let id = match &session.id {
            Some(id) => id.clone(),
            None => {
                let id = generate_session_id();
                session.id = Some(id.clone());
                id
            }
        };

        let raw = serde_json::to_string(&session.values)?;
        self.call(self.backend.put(&backend_key(&id), &raw)).await?;

        let value = self.codec.encode(session.name(), &id)?;
        session.mark_clean();
        session.is_new = false;
        Ok(self.build_cookie(session.name().to_string(), value, session.max_age()))
    }

    /// Delete the session's backend record, if it has one.
    pub async fn delete(&self, session: &Session) -> Result<()> {
        match session.id() {
            Some(id) => self.call(self.backend.delete(&backend_key(id))).await,
            None => Ok(()),
        }
    }

    /// Close the backend.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.backend.close().await
    }

    fn build_cookie(&self, name: String, value: String, max_age: i64) -> Cookie<'static> {
        Cookie::build((name, value))
            .path(self.options.path.clone())
            .secure(self.options.secure)
            .http_only(self.options.http_only)
            .same_site(self.options.same_site)
            .max_age(cookie::time::Duration::seconds(max_age))
            .build()
    }
}

/// First value of the cookie called `name` across all `Cookie` headers.
fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|c| c.ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

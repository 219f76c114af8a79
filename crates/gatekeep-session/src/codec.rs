//! Signed cookie values.
//!
//! A cookie carries `base64url(ts|base64url(id)|mac)` where `mac` is HMAC-SHA256 over
//! `name|ts|base64url(id)`. Binding the cookie name into the MAC stops a value signed
//! for one cookie from being replayed under another. The first key signs; every key
//! is tried on decode so keys can be rotated by prepending a new one.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, SessionError};

type HmacSha256 = Hmac<Sha256>;

/// HMAC codec with key rotation.
#[derive(Clone)]
pub struct CookieCodec {
    keys: Vec<Vec<u8>>,
    max_age: Option<u64>,
}

impl std::fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec")
            .field("keys", &self.keys.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl CookieCodec {
    /// Create a codec. At least one non-empty key is required.
    pub fn new(keys: Vec<Vec<u8>>) -> Result<Self> {
        if keys.is_empty() || keys.iter().any(|k| k.is_empty()) {
            return Err(SessionError::codec("at least one non-empty codec key is required"));
        }
        Ok(Self {
            keys,
            max_age: None,
        })
    }

    /// Reject values signed more than `max_age` seconds ago.
    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = (max_age > 0).then_some(max_age);
        self
    }

    fn mac(key: &[u8], message: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| SessionError::codec(format!("invalid key: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(mac)
    }

    /// Sign `value` for the cookie called `name`.
    pub fn encode(&self, name: &str, value: &str) -> Result<String> {
        self.encode_at(name, value, now_secs())
    }

    fn encode_at(&self, name: &str, value: &str, ts: u64) -> Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(value);
        let message = format!("{}|{}|{}", name, ts, payload);
        let tag = Self::mac(&self.keys[0], &message)?.finalize().into_bytes();
        let joined = format!("{}|{}|{}", ts, payload, URL_SAFE_NO_PAD.encode(tag));
        Ok(URL_SAFE_NO_PAD.encode(joined))
    }

    /// Verify a cookie value for `name` and return the signed value.
    pub fn decode(&self, name: &str, encoded: &str) -> Result<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| SessionError::codec("cookie is not base64"))?;
        let raw = String::from_utf8(raw).map_err(|_| SessionError::codec("cookie is not utf-8"))?;

        let mut parts = raw.splitn(3, '|');
        let (Some(ts), Some(payload), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::codec("malformed cookie"));
        };
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| SessionError::codec("malformed signature"))?;

        let message = format!("{}|{}|{}", name, ts, payload);
        let mut verified = false;
        for key in &self.keys {
            if Self::mac(key, &message)?.verify_slice(&tag).is_ok() {
                verified = true;
                break;
            }
        }
        if !verified {
            return Err(SessionError::codec("signature mismatch"));
        }

        let ts: u64 = ts
            .parse()
            .map_err(|_| SessionError::codec("malformed timestamp"))?;
        if let Some(max_age) = self.max_age
            && ts.saturating_add(max_age) < now_secs()
        {
            return Err(SessionError::codec("cookie expired"));
        }

        let value = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::codec("malformed payload"))?;
        String::from_utf8(value).map_err(|_| SessionError::codec("payload is not utf-8"))
    }
}

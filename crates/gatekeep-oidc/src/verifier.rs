//! id_token verification against the provider's published keys.
//!
//! Keys are fetched from `jwks_uri` on first use and cached. A token whose `kid` is not
//! in the cache triggers one refetch, which picks up provider key rotation.

use std::sync::Arc;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OidcError, Result};

/// Signing algorithms accepted for id_tokens. Symmetric algorithms are never accepted
/// since the keys come from a public JWKS.
pub const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Claims of a verified id_token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Verifies id_tokens for one client of one issuer.
pub struct IdTokenVerifier {
    http: reqwest::Client,
    issuer: String,
    client_id: String,
    jwks_uri: String,
    keys: RwLock<Option<Arc<JwkSet>>>,
}

impl std::fmt::Debug for IdTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenVerifier")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("jwks_uri", &self.jwks_uri)
            .finish()
    }
}

impl IdTokenVerifier {
    pub fn new(
        http: reqwest::Client,
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        jwks_uri: impl Into<String>,
    ) -> Self {
        Self {
            http,
            issuer: issuer.into(),
            client_id: client_id.into(),
            jwks_uri: jwks_uri.into(),
            keys: RwLock::new(None),
        }
    }

    /// Check signature, issuer, audience and expiry of `raw`.
    pub async fn verify(&self, raw: &str) -> Result<IdTokenClaims> {
        let header = decode_header(raw)?;
        if !SUPPORTED_ALGORITHMS.contains(&header.alg) {
            return Err(OidcError::verification(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        let cached = self.keys.read().clone();
        let keys = match cached {
            Some(keys) if has_candidate(&keys, &header) => keys,
            _ => self.refresh_keys().await?,
        };

        self.verify_with(&keys, &header, raw)
    }

    fn verify_with(&self, keys: &JwkSet, header: &Header, raw: &str) -> Result<IdTokenClaims> {
        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);

        let candidates: Vec<&Jwk> = match &header.kid {
            Some(kid) => keys.find(kid).into_iter().collect(),
            None => keys.keys.iter().collect(),
        };
        if candidates.is_empty() {
            return Err(OidcError::verification("no matching signing key"));
        }

        let mut last_error = None;
        for jwk in candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            match decode::<IdTokenClaims>(raw, &key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .map(OidcError::from)
            .unwrap_or_else(|| OidcError::verification("no usable signing key")))
    }

    async fn refresh_keys(&self) -> Result<Arc<JwkSet>> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "fetching provider signing keys");
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::Network(format!("JWKS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(OidcError::provider(format!(
                "JWKS request failed with {}",
                response.status()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| OidcError::provider(format!("failed to parse JWKS: {}", e)))?;
        let keys = Arc::new(keys);
        *self.keys.write() = Some(keys.clone());
        Ok(keys)
    }
}

fn has_candidate(keys: &JwkSet, header: &Header) -> bool {
    match &header.kid {
        Some(kid) => keys.find(kid).is_some(),
        None => !keys.keys.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_symmetric_algorithm() {
        let verifier = IdTokenVerifier::new(
            reqwest::Client::new(),
            "https://idp.example.com",
            "app",
            "http://127.0.0.1:9/jwks",
        );
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({"iss": "https://idp.example.com", "sub": "u", "exp": 4102444800u64}),
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, OidcError::Verification(ref m) if m.contains("unsupported")));
    }

    #[tokio::test]
    async fn test_garbage_token_is_verification_error() {
        let verifier = IdTokenVerifier::new(
            reqwest::Client::new(),
            "https://idp.example.com",
            "app",
            "http://127.0.0.1:9/jwks",
        );
        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(OidcError::Verification(_))
        ));
    }

    #[test]
    fn test_has_candidate() {
        let keys: JwkSet = serde_json::from_str(include_str!("../tests/fixtures/idp_jwks.json"))
            .unwrap();
        let mut header = Header::new(Algorithm::RS256);
        assert!(has_candidate(&keys, &header));
        header.kid = Some("test-key".to_string());
        assert!(has_candidate(&keys, &header));
        header.kid = Some("rotated".to_string());
        assert!(!has_candidate(&keys, &header));
    }
}

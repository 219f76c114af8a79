//! Relying-party client for one virtual host.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use gatekeep_config::OidcConfig;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::OnceCell;

use crate::discovery::{ProviderMetadata, discover};
use crate::error::{OidcError, Result};
use crate::verifier::{IdTokenClaims, IdTokenVerifier};

/// Timeout applied to every request made to the provider.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Generate a random state string for CSRF protection.
pub fn generate_state() -> String {
    let mut state_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut state_bytes);
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Compare a returned state with the stored one in constant time.
pub fn state_matches(returned: &str, stored: &str) -> bool {
    !stored.is_empty() && bool::from(returned.as_bytes().ct_eq(stored.as_bytes()))
}

/// Tokens returned by the provider's token endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// OIDC client for one virtual host.
///
/// Provider metadata is discovered lazily on first use and cached; a failed discovery
/// is retried on the next call.
pub struct OidcClient {
    config: OidcConfig,
    http: reqwest::Client,
    provider: OnceCell<Provider>,
}

struct Provider {
    metadata: ProviderMetadata,
    verifier: IdTokenVerifier,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("provider", &self.config.provider)
            .field("client_id", &self.config.client_id)
            .field("discovered", &self.provider.initialized())
            .finish()
    }
}

impl OidcClient {
    /// Create a client with its own HTTP client.
    pub fn new(config: OidcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| OidcError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_http_client(config, http))
    }

    /// Create a client that reuses `http`.
    pub fn with_http_client(config: OidcConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            provider: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    async fn provider(&self) -> Result<&Provider> {
        self.provider
            .get_or_try_init(|| async {
                let metadata = discover(&self.http, &self.config.provider).await?;
                tracing::info!(
                    issuer = %metadata.issuer,
                    client_id = %self.config.client_id,
                    "discovered OIDC provider"
                );
                let verifier = IdTokenVerifier::new(
                    self.http.clone(),
                    metadata.issuer.clone(),
                    self.config.client_id.clone(),
                    metadata.jwks_uri.clone(),
                );
                Ok::<_, OidcError>(Provider { metadata, verifier })
            })
            .await
    }

    /// Provider metadata, discovering it if needed.
    pub async fn metadata(&self) -> Result<&ProviderMetadata> {
        Ok(&self.provider().await?.metadata)
    }

    /// Authorization-code URL for `state`, with configured audiences appended.
    pub async fn authorize_url(&self, state: &str) -> Result<String> {
        let endpoint = &self.metadata().await?.authorization_endpoint;
        let scope = self.config.scopes.join(" ");

        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state),
        ];
        params.extend(self.audience_params());

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let separator = if endpoint.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", endpoint, separator, query))
    }

    fn audience_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.config
            .audiences
            .iter()
            .map(|audience| ("audience", audience.as_str()))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];
        form.extend(self.audience_params());
        self.token_request(&form, "token exchange").await
    }

    /// Obtain fresh tokens with a refresh token.
    ///
    /// When the response carries no new refresh token the old one is kept.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let mut tokens = self.token_request(&form, "token refresh").await?;
        if tokens.refresh_token.as_deref().is_none_or(str::is_empty) {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    async fn token_request(&self, form: &[(&str, &str)], what: &str) -> Result<TokenSet> {
        let endpoint = &self.metadata().await?.token_endpoint;

        let response = self
            .http
            .post(endpoint)
            .basic_auth(
                urlencoding::encode(&self.config.client_id),
                Some(urlencoding::encode(&self.config.client_secret)),
            )
            .form(form)
            .send()
            .await
            .map_err(|e| OidcError::Network(format!("{} request failed: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OidcError::provider(format!(
                "{} failed with {}: {}",
                what, status, error_text
            )));
        }

        let tokens: TokenSet = response.json().await.map_err(|e| {
            OidcError::provider(format!("failed to parse {} response: {}", what, e))
        })?;
        if tokens.access_token.is_empty() {
            return Err(OidcError::provider(format!(
                "{} response has no access_token",
                what
            )));
        }
        Ok(tokens)
    }

    /// Verify an id_token's signature, issuer, audience and expiry.
    pub async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims> {
        self.provider().await?.verifier.verify(raw).await
    }

    /// Where logout sends the browser. Empty configuration means `/`.
    pub fn logout_url(&self) -> Result<String> {
        let logout = self.config.logout.trim();
        if logout.is_empty() {
            return Ok("/".to_string());
        }
        if logout.starts_with('/') {
            return Ok(logout.to_string());
        }
        url::Url::parse(logout)
            .map(|u| u.to_string())
            .map_err(|e| OidcError::config(format!("invalid logout URL {:?}: {}", logout, e)))
    }
}

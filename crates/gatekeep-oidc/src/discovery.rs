//! Provider metadata from `/.well-known/openid-configuration`.

use serde::{Deserialize, Serialize};

use crate::error::{OidcError, Result};

/// Path of the discovery document relative to the issuer.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// The subset of provider metadata the gateway needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// URL of the discovery document for `issuer`.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), DISCOVERY_PATH)
}

/// Fetch and check the provider's metadata.
///
/// The advertised issuer must equal the configured one, ignoring a trailing slash.
pub async fn discover(client: &reqwest::Client, issuer: &str) -> Result<ProviderMetadata> {
    let url = discovery_url(issuer);
    tracing::debug!(url = %url, "fetching provider metadata");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| OidcError::Network(format!("discovery request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(OidcError::provider(format!(
            "discovery failed with {}: {}",
            status, body
        )));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| OidcError::provider(format!("failed to parse provider metadata: {}", e)))?;

    if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(OidcError::provider(format!(
            "issuer did not match the issuer returned by provider, expected {:?} got {:?}",
            issuer, metadata.issuer
        )));
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_url() {
        assert_eq!(
            discovery_url("https://idp.example.com/"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://idp.example.com/realms/main"),
            "https://idp.example.com/realms/main/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_metadata_ignores_unknown_fields() {
        let json = r#"{
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/authorize",
            "token_endpoint": "https://idp.example.com/oauth/token",
            "jwks_uri": "https://idp.example.com/.well-known/jwks.json",
            "userinfo_endpoint": "https://idp.example.com/userinfo",
            "scopes_supported": ["openid"]
        }"#;
        let metadata: ProviderMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.token_endpoint, "https://idp.example.com/oauth/token");
        assert!(metadata.end_session_endpoint.is_none());
    }
}

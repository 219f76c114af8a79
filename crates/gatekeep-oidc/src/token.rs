//! Session token bookkeeping and forwarding-token resolution.

use gatekeep_session::Session;

use crate::client::{OidcClient, TokenSet};
use crate::error::{OidcError, Result};

/// Session key holding the raw id_token.
pub const ID_TOKEN: &str = "id_token";
/// Session key holding the access token.
pub const ACCESS_TOKEN: &str = "access_token";
/// Session key holding the refresh token.
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Session key holding the pending login state.
pub const STATE: &str = "state";
/// Session key holding where to go after login.
pub const REDIRECT: &str = "redirect";

/// Write a token response into the session.
///
/// A missing id_token or refresh token is stored as an empty string, which later reads
/// treat as absent.
pub fn store_tokens(session: &mut Session, tokens: &TokenSet) {
    session.insert(ID_TOKEN, tokens.id_token.clone().unwrap_or_default());
    session.insert(ACCESS_TOKEN, tokens.access_token.clone());
    session.insert(
        REFRESH_TOKEN,
        tokens.refresh_token.clone().unwrap_or_default(),
    );
}

/// When to go to the token endpoint during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Refresh only if the stored id_token fails verification.
    IfInvalid,
    /// Always refresh, as after the upstream rejected the token.
    Force,
}

/// The token to forward upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToken {
    /// Raw token value for the Authorization header.
    pub value: String,
    /// The configured key was absent and the id_token was used instead.
    pub used_fallback: bool,
    /// Tokens were refreshed and the session needs saving.
    pub refreshed: bool,
}

/// Resolve the token to forward for `token_key`.
///
/// No id_token in the session is [`OidcError::Unauthorized`]. An id_token that fails
/// verification (or any id_token under [`RefreshPolicy::Force`]) is refreshed with the
/// stored refresh token; a failed refresh is returned as-is and must not be retried.
/// After a refresh the session holds the new tokens and is marked dirty.
pub async fn resolve_token(
    client: &OidcClient,
    session: &mut Session,
    token_key: &str,
    policy: RefreshPolicy,
) -> Result<ResolvedToken> {
    let Some(id_token) = session.get_str(ID_TOKEN).map(str::to_string) else {
        return Err(OidcError::Unauthorized);
    };

    let needs_refresh = match policy {
        RefreshPolicy::Force => true,
        RefreshPolicy::IfInvalid => match client.verify_id_token(&id_token).await {
            Ok(_) => false,
            Err(OidcError::Verification(reason)) => {
                tracing::debug!(reason = %reason, "id_token rejected, refreshing");
                true
            }
            Err(e) => return Err(e),
        },
    };

    let mut refreshed = false;
    if needs_refresh {
        let Some(refresh_token) = session.get_str(REFRESH_TOKEN).map(str::to_string) else {
            tracing::debug!("no refresh token in session");
            return Err(OidcError::Unauthorized);
        };
        let tokens = client.refresh(&refresh_token).await?;
        store_tokens(session, &tokens);
        refreshed = true;
        tracing::debug!("tokens refreshed");
    }

    let Some(fallback) = session.get_str(ID_TOKEN).map(str::to_string) else {
        return Err(OidcError::Unauthorized);
    };

    Ok(match session.get_str(token_key) {
        Some(value) => ResolvedToken {
            value: value.to_string(),
            used_fallback: false,
            refreshed,
        },
        None => ResolvedToken {
            value: fallback,
            used_fallback: true,
            refreshed,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_config::OidcConfig;

    fn offline_client() -> OidcClient {
        let config = OidcConfig {
            provider: "http://127.0.0.1:9".to_string(),
            client_id: "app".to_string(),
            ..Default::default()
        };
        OidcClient::with_http_client(config, reqwest::Client::new())
    }

    #[test]
    fn test_store_tokens() {
        let mut session = Session::new("session", 60);
        store_tokens(
            &mut session,
            &TokenSet {
                access_token: "a".to_string(),
                token_type: "Bearer".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
                id_token: Some("i".to_string()),
            },
        );
        assert!(session.is_dirty());
        assert_eq!(session.get_str(ID_TOKEN), Some("i"));
        assert_eq!(session.get_str(ACCESS_TOKEN), Some("a"));
        assert_eq!(session.get_str(REFRESH_TOKEN), None);
    }

    #[tokio::test]
    async fn test_no_id_token_is_unauthorized_without_network() {
        let client = offline_client();
        let mut session = Session::new("session", 60);
        session.insert(ACCESS_TOKEN, "a");

        let err = resolve_token(&client, &mut session, ACCESS_TOKEN, RefreshPolicy::IfInvalid)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());

        session.insert(ID_TOKEN, "");
        let err = resolve_token(&client, &mut session, ACCESS_TOKEN, RefreshPolicy::Force)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_forced_refresh_without_refresh_token_is_unauthorized() {
        let client = offline_client();
        let mut session = Session::new("session", 60);
        session.insert(ID_TOKEN, "i");

        let err = resolve_token(&client, &mut session, ID_TOKEN, RefreshPolicy::Force)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }
}

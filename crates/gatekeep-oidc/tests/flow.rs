//! OIDC client tests against a mock identity provider.

mod common;

use std::sync::atomic::Ordering;

use common::{CLIENT_ID, MockIdp};
use gatekeep_oidc::{
    ACCESS_TOKEN, ID_TOKEN, OidcClient, OidcError, REFRESH_TOKEN, RefreshPolicy, resolve_token,
    store_tokens,
};
use gatekeep_session::Session;

fn client(idp: &MockIdp) -> OidcClient {
    OidcClient::new(idp.oidc_config()).unwrap()
}

#[tokio::test]
async fn test_discovery_is_lazy_and_cached() {
    let idp = MockIdp::start().await;
    let client = client(&idp);
    assert_eq!(idp.state.discovery_count.load(Ordering::SeqCst), 0);

    let metadata = client.metadata().await.unwrap();
    assert_eq!(metadata.issuer, idp.issuer());
    client.metadata().await.unwrap();
    assert_eq!(idp.state.discovery_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_discovery_failure_is_retried() {
    let mut config = gatekeep_config::OidcConfig {
        provider: "http://127.0.0.1:1".to_string(),
        client_id: CLIENT_ID.to_string(),
        ..Default::default()
    };
    let unreachable = OidcClient::new(config.clone()).unwrap();
    assert!(matches!(
        unreachable.metadata().await,
        Err(OidcError::Network(_))
    ));
    assert!(unreachable.metadata().await.is_err());

    let idp = MockIdp::start().await;
    config.provider = format!("{}/", idp.issuer());
    let ok = OidcClient::new(config).unwrap();
    assert!(ok.metadata().await.is_ok());
}

#[tokio::test]
async fn test_authorize_url() {
    let idp = MockIdp::start().await;
    let mut config = idp.oidc_config();
    config.audiences = vec!["https://api.example.com".to_string()];
    let client = OidcClient::new(config).unwrap();

    let url = client.authorize_url("st4te").await.unwrap();
    assert!(url.starts_with(&format!("{}/authorize?", idp.issuer())));
    assert!(url.contains("client_id=app"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("state=st4te"));
    assert!(url.contains("scope=email%20openid%20offline_access%20profile"));
    assert!(url.contains("redirect_uri=http%3A%2F%2Fapp.example.com%2Foauth2%2Fcallback"));
    assert!(url.contains("audience=https%3A%2F%2Fapi.example.com"));
}

#[tokio::test]
async fn test_exchange_and_verify() {
    let idp = MockIdp::start().await;
    let client = client(&idp);
    idp.issue_code("abc");

    let tokens = client.exchange_code("abc").await.unwrap();
    let id_token = tokens.id_token.clone().unwrap();
    let claims = client.verify_id_token(&id_token).await.unwrap();
    assert_eq!(claims.sub, "user-1");
    assert_eq!(claims.iss, idp.issuer());
    assert_eq!(claims.extra["email"], "user@example.com");

    let form = idp.state.token_requests.lock()[0].clone();
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["redirect_uri"], "http://app.example.com/oauth2/callback");

    // Codes are single use.
    assert!(matches!(
        client.exchange_code("abc").await,
        Err(OidcError::Provider(_))
    ));
}

#[tokio::test]
async fn test_verification_rejects_wrong_audience_and_expiry() {
    let idp = MockIdp::start().await;
    let client = client(&idp);

    let other_audience = idp.state.mint_id_token("someone-else", 3600);
    assert!(matches!(
        client.verify_id_token(&other_audience).await,
        Err(OidcError::Verification(_))
    ));

    let expired = idp.state.mint_id_token(CLIENT_ID, -3600);
    assert!(matches!(
        client.verify_id_token(&expired).await,
        Err(OidcError::Verification(_))
    ));
}

#[tokio::test]
async fn test_refresh_keeps_old_refresh_token() {
    let idp = MockIdp::start().await;
    let client = client(&idp);

    let tokens = client.refresh("refresh-0").await.unwrap();
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-0"));
    assert!(tokens.id_token.is_some());
}

fn authenticated_session(idp: &MockIdp, ttl: i64) -> Session {
    let mut session = Session::new("session", 60);
    session.insert(ID_TOKEN, idp.state.mint_id_token(CLIENT_ID, ttl));
    session.insert(ACCESS_TOKEN, "access-0");
    session.insert(REFRESH_TOKEN, "refresh-0");
    session
}

#[tokio::test]
async fn test_resolve_valid_token_without_refresh() {
    let idp = MockIdp::start().await;
    let client = client(&idp);
    let mut session = authenticated_session(&idp, 3600);

    let resolved = resolve_token(&client, &mut session, ACCESS_TOKEN, RefreshPolicy::IfInvalid)
        .await
        .unwrap();
    assert_eq!(resolved.value, "access-0");
    assert!(!resolved.used_fallback);
    assert!(!resolved.refreshed);
    assert_eq!(idp.state.refresh_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolve_falls_back_to_id_token() {
    let idp = MockIdp::start().await;
    let client = client(&idp);
    let mut session = authenticated_session(&idp, 3600);
    let id_token = session.get_str(ID_TOKEN).unwrap().to_string();

    let resolved = resolve_token(&client, &mut session, "custom_token", RefreshPolicy::IfInvalid)
        .await
        .unwrap();
    assert_eq!(resolved.value, id_token);
    assert!(resolved.used_fallback);
}

#[tokio::test]
async fn test_resolve_refreshes_expired_id_token() {
    let idp = MockIdp::start().await;
    let client = client(&idp);
    let mut session = authenticated_session(&idp, -3600);
    let stale = session.get_str(ID_TOKEN).unwrap().to_string();

    let resolved = resolve_token(&client, &mut session, ACCESS_TOKEN, RefreshPolicy::IfInvalid)
        .await
        .unwrap();
    assert!(resolved.refreshed);
    assert_eq!(resolved.value, "access-1");
    assert_eq!(idp.state.refresh_count.load(Ordering::SeqCst), 1);
    assert!(session.is_dirty());
    assert_ne!(session.get_str(ID_TOKEN), Some(stale.as_str()));
    assert_eq!(session.get_str(REFRESH_TOKEN), Some("refresh-0"));
}

#[tokio::test]
async fn test_forced_refresh_and_failure() {
    let idp = MockIdp::start().await;
    let client = client(&idp);
    let mut session = authenticated_session(&idp, 3600);

    let resolved = resolve_token(&client, &mut session, ACCESS_TOKEN, RefreshPolicy::Force)
        .await
        .unwrap();
    assert!(resolved.refreshed);
    assert_eq!(idp.state.refresh_count.load(Ordering::SeqCst), 1);

    idp.state.fail_refresh.store(true, Ordering::SeqCst);
    let err = resolve_token(&client, &mut session, ACCESS_TOKEN, RefreshPolicy::Force)
        .await
        .unwrap_err();
    assert!(matches!(err, OidcError::Provider(_)));
    assert_eq!(idp.state.refresh_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_refresh_without_id_token_ends_session() {
    let idp = MockIdp::start().await;
    let client = client(&idp);
    let mut session = authenticated_session(&idp, 3600);

    idp.state.omit_id_token.store(true, Ordering::SeqCst);
    let tokens = client.refresh("refresh-0").await.unwrap();
    store_tokens(&mut session, &tokens);

    let err = resolve_token(&client, &mut session, ACCESS_TOKEN, RefreshPolicy::IfInvalid)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

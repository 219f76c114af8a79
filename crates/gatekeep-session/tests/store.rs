//! Session store integration tests against the memory backend.

use std::sync::Arc;

use gatekeep_session::{
    CookieCodec, MemoryBackend, SessionBackend, SessionStore, SharedBackend, backend_key,
};
use http::header::COOKIE;
use http::{HeaderMap, HeaderValue};

fn codec(keys: &[&str]) -> CookieCodec {
    CookieCodec::new(keys.iter().map(|k| k.as_bytes().to_vec()).collect()).unwrap()
}

fn cookie_header(name: &str, value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&format!("{}={}", name, value)).unwrap(),
    );
    headers
}

#[tokio::test]
async fn test_concurrent_sessions_stay_isolated() {
    let backend: SharedBackend = Arc::new(MemoryBackend::default());
    backend.init(&Default::default()).await.unwrap();
    let store = Arc::new(SessionStore::new(
        backend.clone(),
        codec(&["0123456789abcdef0123"]),
    ));

    let mut tasks = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut session = store.load(&HeaderMap::new(), "session").await;
            session.insert("user", format!("user-{}", i));
            let cookie = store.save(&mut session).await.unwrap();
            (i, cookie.value().to_string())
        }));
    }

    for task in tasks {
        let (i, value) = task.await.unwrap();
        let session = store.load(&cookie_header("session", &value), "session").await;
        assert_eq!(session.get_str("user"), Some(format!("user-{}", i).as_str()));
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_key_rotation_keeps_existing_sessions() {
    let backend: SharedBackend = Arc::new(MemoryBackend::default());

    let before = SessionStore::new(backend.clone(), codec(&["old-key-0123456789"]));
    let mut session = before.load(&HeaderMap::new(), "session").await;
    session.insert("id_token", "t");
    let cookie = before.save(&mut session).await.unwrap();

    let after = SessionStore::new(
        backend.clone(),
        codec(&["new-key-0123456789", "old-key-0123456789"]),
    );
    let loaded = after
        .load(&cookie_header("session", cookie.value()), "session")
        .await;
    assert!(!loaded.is_new());
    assert_eq!(loaded.get_str("id_token"), Some("t"));

    let dropped = SessionStore::new(backend.clone(), codec(&["new-key-0123456789"]));
    let orphan = dropped
        .load(&cookie_header("session", cookie.value()), "session")
        .await;
    assert!(orphan.is_new());
}

#[tokio::test]
async fn test_corrupt_record_starts_new_session() {
    let backend: SharedBackend = Arc::new(MemoryBackend::default());
    let store = SessionStore::new(backend.clone(), codec(&["0123456789abcdef0123"]));

    let mut session = store.load(&HeaderMap::new(), "session").await;
    session.insert("a", 1);
    let cookie = store.save(&mut session).await.unwrap();

    backend
        .put(&backend_key(session.id().unwrap()), "{not json")
        .await
        .unwrap();

    let loaded = store
        .load(&cookie_header("session", cookie.value()), "session")
        .await;
    assert!(loaded.is_new());
    assert!(loaded.values().is_empty());
}

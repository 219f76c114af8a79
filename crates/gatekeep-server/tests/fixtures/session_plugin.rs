//! Session plugin used by the gateway tests.
//!
//! Serves an in-memory backend. When `init` carries a `record` setting, the plugin
//! writes its pid and the log level it was handed to that file, one per line.

use async_trait::async_trait;
use gatekeep_session::{MemoryBackend, SessionBackend};
use serde_json::{Map, Value};

const LOG_LEVEL_ENV: &str = "SESSION_PLUGIN_LOG_LEVEL";

#[derive(Default)]
struct RecordingBackend {
    inner: MemoryBackend,
}

#[async_trait]
impl SessionBackend for RecordingBackend {
    async fn init(&self, settings: &Map<String, Value>) -> gatekeep_session::Result<()> {
        if let Some(path) = settings.get("record").and_then(Value::as_str) {
            let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_default();
            let record = format!("{}\n{}\n", std::process::id(), level);
            std::fs::write(path, record)
                .map_err(|e| gatekeep_session::SessionError::backend(e.to_string()))?;
        }
        self.inner.init(settings).await
    }

    async fn get(&self, key: &str) -> gatekeep_session::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> gatekeep_session::Result<()> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> gatekeep_session::Result<()> {
        self.inner.delete(key).await
    }

    async fn close(&self) -> gatekeep_session::Result<()> {
        self.inner.close().await
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = gatekeep_plugin::serve(RecordingBackend::default()).await {
        eprintln!("gateway-session-plugin: {}", e);
        std::process::exit(1);
    }
}

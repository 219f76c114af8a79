//! Gateway context: builds host handlers from a config and owns their resources.
//!
//! One [`Gateway`] is constructed at startup and shared by the listener, the config
//! watcher and shutdown. It replaces any process-wide registry: tests can run several
//! gateways side by side.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use gatekeep_config::{Config, DEFAULT_PORT, DEFAULT_TLS_PORT, ServerConfig, load_config};
use gatekeep_oidc::OidcClient;
use gatekeep_plugin::{PluginBackend, PluginConfig};
use gatekeep_session::{
    CookieCodec, MemoryBackend, SessionError, SessionStore, SharedBackend,
};
use parking_lot::Mutex;

use crate::config::GatewayOptions;
use crate::error::Result;
use crate::host::HostHandler;
use crate::page::NotFoundPage;
use crate::router::{self, GatewayRouter, RoutingTable};

/// Environment variable carrying the host's log level to a plugin backend.
pub const PLUGIN_LOG_LEVEL_ENV: &str = "SESSION_PLUGIN_LOG_LEVEL";

/// Live resources owned on behalf of one virtual host.
pub struct DisposeHandle {
    key: String,
    kind: &'static str,
    store: Arc<SessionStore>,
}

impl std::fmt::Debug for DisposeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeHandle")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish()
    }
}

impl DisposeHandle {
    pub fn new(key: impl Into<String>, kind: &'static str, store: Arc<SessionStore>) -> Self {
        Self {
            key: key.into(),
            kind,
            store,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `memory` or `plugin`.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Close the store. For plugin backends this also stops the subprocess.
    pub async fn close(&self) {
        match self.store.close().await {
            Ok(()) => tracing::debug!(host = %self.key, kind = self.kind, "session backend closed"),
            Err(e) => {
                tracing::warn!(host = %self.key, kind = self.kind, error = %e, "failed to close session backend")
            }
        }
    }
}

/// One live handle per host key.
///
/// The mutex is only held to swap map entries; handles are closed by the caller after
/// the lock is released.
#[derive(Debug, Default)]
pub struct DisposeRegistry {
    handles: Mutex<HashMap<String, Arc<DisposeHandle>>>,
}

impl DisposeRegistry {
    /// Install `handle`, returning the one it replaces.
    pub fn replace(&self, handle: Arc<DisposeHandle>) -> Option<Arc<DisposeHandle>> {
        self.handles.lock().insert(handle.key().to_string(), handle)
    }

    /// Remove every handle whose key is not in `keep`.
    pub fn retain(&self, keep: &HashSet<String>) -> Vec<Arc<DisposeHandle>> {
        let mut handles = self.handles.lock();
        let stale: Vec<String> = handles
            .keys()
            .filter(|k| !keep.contains(*k))
            .cloned()
            .collect();
        stale.iter().filter_map(|k| handles.remove(k)).collect()
    }

    /// Remove every handle.
    pub fn drain(&self) -> Vec<Arc<DisposeHandle>> {
        self.handles.lock().drain().map(|(_, h)| h).collect()
    }

    pub fn get(&self, key: &str) -> Option<Arc<DisposeHandle>> {
        self.handles.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

/// The running gateway.
pub struct Gateway {
    options: GatewayOptions,
    tls: bool,
    router: Arc<GatewayRouter>,
    dispose: DisposeRegistry,
    reload_lock: tokio::sync::Mutex<()>,
}

impl Gateway {
    /// Create a gateway with an empty routing table.
    pub fn new(options: GatewayOptions, tls: bool) -> Self {
        let page = options
            .not_found_template
            .as_deref()
            .map(NotFoundPage::new)
            .unwrap_or_default();
        Self {
            router: Arc::new(GatewayRouter::new(tls, page)),
            options,
            tls,
            dispose: DisposeRegistry::default(),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Port assumed for hosts and requests that name none.
    pub fn default_port(&self) -> u16 {
        if self.tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT }
    }

    pub fn router(&self) -> &Arc<GatewayRouter> {
        &self.router
    }

    pub fn dispose(&self) -> &DisposeRegistry {
        &self.dispose
    }

    /// The axum application for the listener.
    pub fn app(&self) -> axum::Router {
        router::app(self.router.clone())
    }

    /// Build handlers for every host in `config` and publish them.
    ///
    /// Nothing is published unless every host builds; on failure the handles built so
    /// far are closed and the previous table stays live. After publishing, replaced
    /// handles and handles of removed hosts are closed once the reload lock is released.
    pub async fn apply(&self, config: &Config) -> Result<()> {
        let guard = self.reload_lock.lock().await;

        let mut table = RoutingTable::new();
        let mut built: Vec<Arc<DisposeHandle>> = Vec::new();
        for server in &config.servers {
            let key = server.host_key(self.default_port());
            match self.build_host(&key, server).await {
                Ok((handler, handle)) => {
                    table.insert(handler);
                    built.push(handle);
                }
                Err(e) => {
                    tracing::error!(host = %key, error = %e, "failed to build virtual host");
                    drop(guard);
                    for handle in built {
                        handle.close().await;
                    }
                    return Err(e);
                }
            }
        }

        let keys: HashSet<String> = table.keys().cloned().collect();
        self.router.publish(table);

        let mut stale = Vec::new();
        for handle in built {
            if let Some(old) = self.dispose.replace(handle) {
                stale.push(old);
            }
        }
        stale.extend(self.dispose.retain(&keys));
        drop(guard);

        tracing::info!(hosts = keys.len(), "routing table published");
        for handle in stale {
            handle.close().await;
        }
        Ok(())
    }

    /// Load, validate and apply the config file at `path`.
    pub async fn reload_from(&self, path: &Path) -> Result<()> {
        let config = load_config(path)?;
        self.apply(&config).await
    }

    /// Close every dispose handle.
    pub async fn shutdown(&self) {
        let handles = self.dispose.drain();
        tracing::info!(hosts = handles.len(), "closing session backends");
        for handle in handles {
            handle.close().await;
        }
    }

    async fn build_host(
        &self,
        key: &str,
        server: &ServerConfig,
    ) -> Result<(Arc<HostHandler>, Arc<DisposeHandle>)> {
        let codec = CookieCodec::new(server.session.codec_keys())?;
        let oidc = Arc::new(OidcClient::new(server.oidc.clone())?);

        let (backend, kind) = self.build_backend(server).await?;
        let store = Arc::new(
            SessionStore::new(backend, codec).with_timeout(self.options.backend_timeout),
        );
        let handle = Arc::new(DisposeHandle::new(key, kind, store.clone()));

        match HostHandler::new(key, server.clone(), store, oidc, &self.options, self.tls) {
            Ok(handler) => {
                tracing::debug!(host = %key, backend = kind, "virtual host built");
                Ok((Arc::new(handler), handle))
            }
            Err(e) => {
                handle.close().await;
                Err(e)
            }
        }
    }

    async fn build_backend(&self, server: &ServerConfig) -> Result<(SharedBackend, &'static str)> {
        let session = &server.session;
        let (backend, kind): (SharedBackend, &'static str) = if session.plugin {
            let mut config = PluginConfig::new(session.plugin_path());
            if let Some(level) = &server.logging.level {
                config = config.with_env(PLUGIN_LOG_LEVEL_ENV, level.clone());
            }
            (Arc::new(PluginBackend::spawn(config).await?), "plugin")
        } else {
            (Arc::new(MemoryBackend::default()), "memory")
        };

        let timeout = self.options.backend_timeout;
        let init = tokio::time::timeout(timeout, backend.init(&session.args)).await;
        let error = match init {
            Ok(Ok(())) => return Ok((backend, kind)),
            Ok(Err(e)) => e,
            Err(_) => SessionError::Timeout(timeout),
        };
        if let Err(e) = backend.close().await {
            tracing::debug!(error = %e, "failed to close backend after init failure");
        }
        Err(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_session::MemoryConfig;

    fn handle(key: &str) -> Arc<DisposeHandle> {
        let backend: SharedBackend = Arc::new(MemoryBackend::new(MemoryConfig::default()));
        let codec = CookieCodec::new(vec![b"0123456789abcdef".to_vec()]).unwrap();
        Arc::new(DisposeHandle::new(
            key,
            "memory",
            Arc::new(SessionStore::new(backend, codec)),
        ))
    }

    #[test]
    fn test_replace_returns_previous() {
        let registry = DisposeRegistry::default();
        assert!(registry.replace(handle("a:80")).is_none());
        let old = registry.replace(handle("a:80")).unwrap();
        assert_eq!(old.key(), "a:80");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_retain_removes_absent_hosts() {
        let registry = DisposeRegistry::default();
        registry.replace(handle("a:80"));
        registry.replace(handle("b:80"));
        registry.replace(handle("c:80"));

        let keep: HashSet<String> = ["b:80".to_string()].into_iter().collect();
        let mut removed: Vec<String> = registry
            .retain(&keep)
            .iter()
            .map(|h| h.key().to_string())
            .collect();
        removed.sort();
        assert_eq!(removed, vec!["a:80", "c:80"]);
        assert!(registry.get("b:80").is_some());
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_empty_config_publishes_empty_table() {
        let gateway = Gateway::new(GatewayOptions::default(), false);
        gateway.apply(&Config::default()).await.unwrap();
        assert!(gateway.router().snapshot().is_empty());
        assert_eq!(gateway.default_port(), 80);
        assert_eq!(Gateway::new(GatewayOptions::default(), true).default_port(), 443);
    }
}

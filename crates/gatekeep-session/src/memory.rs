//! In-process session backend.
//!
//! Every write stores the value with an absolute expiry of `now + ttl`. Reads do not
//! look at expiry; a background sweep started by [`MemoryBackend::init`] removes
//! expired entries on a fixed interval and stops when the backend is closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::backend::SessionBackend;
use crate::error::{Result, SessionError};

/// Default entry lifetime (90 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(90 * 60);

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "memory";

/// Configuration for the memory backend.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Lifetime of each written entry.
    pub ttl: Duration,
    /// How often expired entries are swept.
    pub sweep_interval: Duration,
    /// Namespace joined in front of every key.
    pub prefix: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl MemoryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Overlay `ttl` (minutes) and `prefix` from backend settings.
    pub fn apply_settings(mut self, settings: &Map<String, Value>) -> Self {
        if let Some(minutes) = settings.get("ttl").and_then(Value::as_u64) {
            self.ttl = Duration::from_secs(minutes * 60);
        }
        if let Some(prefix) = settings.get("prefix").and_then(Value::as_str) {
            self.prefix = prefix.to_string();
        }
        self
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-process backend guarded by a single mutex.
pub struct MemoryBackend {
    config: Mutex<MemoryConfig>,
    entries: Entries,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryBackend {
    /// Create a backend. The sweep starts on [`SessionBackend::init`].
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config: Mutex::new(config),
            entries: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> MemoryConfig {
        self.config.lock().clone()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether the background sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Remove every entry whose expiry has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.entries, Instant::now())
    }

    fn full_key(&self, key: &str) -> String {
        let config = self.config.lock();
        if config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", config.prefix.trim_end_matches('/'), key)
        }
    }

    fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if let Some(old) = sweeper.take() {
            old.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let entries = self.entries.clone();
        let interval = self.config.lock().sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = sweep(&entries, Instant::now());
                        if removed > 0 {
                            trace!(removed, "swept expired session entries");
                        }
                    }
                }
            }
        });

        *sweeper = Some(Sweeper { cancel, handle });
    }
}

fn sweep(entries: &Entries, now: Instant) -> usize {
    let mut entries = entries.lock();
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before - entries.len()
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn init(&self, settings: &Map<String, Value>) -> Result<()> {
        {
            let mut config = self.config.lock();
            *config = config.clone().apply_settings(settings);
            debug!(
                ttl_secs = config.ttl.as_secs(),
                prefix = %config.prefix,
                "memory session backend initialised"
            );
        }
        self.start_sweeper();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.full_key(key);
        let value = self.entries.lock().get(&key).map(|e| e.value.clone());
        trace!(key = %key, found = value.is_some(), "[GET]");
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let key = self.full_key(key);
        let expires_at = Instant::now() + self.config.lock().ttl;
        trace!(key = %key, "[PUT]");
        self.entries.lock().insert(
            key,
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.full_key(key);
        trace!(key = %key, "[DEL]");
        self.entries.lock().remove(&key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let sweeper = self.sweeper.lock().take();
        match sweeper {
            Some(sweeper) => {
                sweeper.cancel.cancel();
                sweeper
                    .handle
                    .await
                    .map_err(|e| SessionError::backend(format!("sweep task failed: {}", e)))?;
                debug!("memory session backend closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.cancel.cancel();
        }
    }
}

//! The session backend contract.
//!
//! A backend is a plain string key/value store. [`crate::SessionStore`] is the only
//! caller inside the gateway; the memory backend and the out-of-process plugin
//! client both implement it, so callers never branch on which one is active.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

/// Key/value capability behind a session store.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Configure the backend with the host's free-form `session.args`.
    async fn init(&self, settings: &Map<String, Value>) -> Result<()>;

    /// Read a value. `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Release resources. The backend must not be used afterwards.
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a backend.
pub type SharedBackend = Arc<dyn SessionBackend>;

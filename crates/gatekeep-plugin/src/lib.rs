//! Out-of-process session backends.
//!
//! A session plugin is an executable that serves a [`SessionBackend`] over its
//! stdin/stdout. The host launches it with [`PluginBackend::spawn`], which performs
//! the startup handshake and then forwards `init`, `get`, `put`, `delete` and
//! `close` as JSON-RPC calls. Plugin authors call [`serve`] from `main`.
//!
//! [`SessionBackend`]: gatekeep_session::SessionBackend

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{DEFAULT_CLOSE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, PluginBackend, PluginConfig};
pub use error::{PluginError, Result};
pub use protocol::{MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION};
pub use server::{serve, serve_io};

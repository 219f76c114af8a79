//! Cookie-bound sessions over pluggable key/value backends.
//!
//! The browser only ever holds a signed session ID. Session content lives in a
//! [`SessionBackend`] under `session_<id>` as a flat JSON object.
//!
//! # Components
//!
//! - [`backend`]: the five-operation backend contract
//! - [`memory`]: in-process backend with TTL and a background sweep
//! - [`codec`]: HMAC cookie codec with key rotation
//! - [`store`]: binds cookies to backend records
//!
//! # Example
//!
//! ```rust,ignore
//! use gatekeep_session::{CookieCodec, MemoryBackend, SessionStore};
//!
//! let backend = Arc::new(MemoryBackend::default());
//! backend.init(&settings).await?;
//! let store = SessionStore::new(backend, CookieCodec::new(keys)?);
//!
//! let mut session = store.load(request.headers(), "session").await;
//! session.insert("state", state);
//! let cookie = store.save(&mut session).await?;
//! ```

pub mod backend;
pub mod codec;
pub mod error;
pub mod memory;
pub mod session;
pub mod store;

pub use backend::{SessionBackend, SharedBackend};
pub use codec::CookieCodec;
pub use error::{Result, SessionError};
pub use memory::{MemoryBackend, MemoryConfig};
pub use session::Session;
pub use store::{CookieOptions, DEFAULT_MAX_AGE, SessionStore, backend_key, generate_session_id};

//! OpenID Connect relying party for gatekeep.
//!
//! [`OidcClient`] covers one virtual host's provider: lazy discovery, the
//! authorization-code URL, code exchange, refresh and id_token verification over the
//! provider's JWKS. [`resolve_token`] picks the token to forward upstream from a
//! session, refreshing it when the id_token no longer verifies.

pub mod client;
pub mod discovery;
pub mod error;
pub mod token;
pub mod verifier;

pub use client::{DEFAULT_PROVIDER_TIMEOUT, OidcClient, TokenSet, generate_state, state_matches};
pub use discovery::{ProviderMetadata, discover};
pub use error::{OidcError, Result};
pub use token::{
    ACCESS_TOKEN, ID_TOKEN, REDIRECT, REFRESH_TOKEN, RefreshPolicy, ResolvedToken, STATE,
    resolve_token, store_tokens,
};
pub use verifier::{IdTokenClaims, IdTokenVerifier};

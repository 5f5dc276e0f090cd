//! Bearer credentials: the login handshake, the on-disk token cache and the
//! per-session broker that ties them together.

mod broker;
mod cookies;
mod handshake;
mod token_cache;

pub use broker::{CredentialAcquirer, CredentialBroker};
pub use cookies::CookieJar;
pub use handshake::{
    AuthEndpoints, AuthError, AuthStage, IssuedToken, LoginHandshake, DEFAULT_DISCOVERY_URL,
    DEFAULT_IDENTITY_BASE_URL, DEFAULT_TOKEN_URL,
};
pub use token_cache::{CacheError, CachedToken, TokenCache};

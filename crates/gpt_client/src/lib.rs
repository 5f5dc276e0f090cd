//! gpt_client - multi-turn chat sessions against a chat completion API or a
//! conversation backend reached through a browser-less email/password login.
//!
//! - `auth` - login handshake, token cache and per-session credential broker
//! - `stream` - decoder for the backend's streamed replies
//! - `api` - [`ChatClient`] and the wire models
//! - `error` - [`ChatError`]

pub mod api;
pub mod auth;
pub mod error;
pub mod stream;
pub mod utils;

pub use api::{AskOptions, AuthMode, ChatClient, ChatResponse, DEFAULT_CONVERSATION};
pub use auth::{
    AuthEndpoints, AuthError, AuthStage, CredentialAcquirer, CredentialBroker, IssuedToken,
    LoginHandshake, TokenCache,
};
pub use error::{ChatError, Result};
pub use stream::{DecodedFrame, StreamDecoder, StreamError};

pub use chat_core::{ClientConfig, ConfigError, Credential};
pub use tokio_util::sync::CancellationToken;

pub mod client;
pub mod models;

pub use client::{AuthMode, ChatClient, DEFAULT_CONVERSATION};
pub use models::{AskOptions, ChatResponse};

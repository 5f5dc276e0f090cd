//! `context_manager` keeps per-conversation history and decides which part of it
//! is sent to the provider.
//!
//! Every conversation starts with a system message. After each append the
//! window cost is estimated with a character heuristic and compared against the
//! model's budget; once over budget the history collapses to the system message
//! plus the latest user turn.

pub mod budget;
pub mod conversation;
pub mod error;
pub mod store;

pub use budget::{estimate_tokens, token_limit_for, TokenMeasure, DEFAULT_TOKEN_LIMIT};
pub use conversation::Conversation;
pub use error::ContextError;
pub use store::ConversationStore;

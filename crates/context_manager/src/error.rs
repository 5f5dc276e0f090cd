use std::error::Error;
use std::fmt::{self, Display};

/// Errors that can occur while manipulating the conversation store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// No conversation is stored under the given id.
    ConversationNotFound(String),
    /// A conversation handed to the store does not start with a system message.
    MissingSystemMessage(String),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::ConversationNotFound(id) => {
                write!(f, "conversation with id {id} not found")
            }
            ContextError::MissingSystemMessage(id) => {
                write!(f, "conversation {id} must start with a system message")
            }
        }
    }
}

impl Error for ContextError {}

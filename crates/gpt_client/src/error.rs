use chat_core::ConfigError;
use context_manager::ContextError;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::auth::{AuthError, CacheError};
use crate::stream::StreamError;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider error (HTTP {status}): {message}")]
    Provider {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("stream protocol error: {0}")]
    StreamProtocol(#[from] StreamError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("conversation with id {0} not found")]
    ConversationNotFound(String),

    #[error("invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("token cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request was cancelled")]
    Cancelled,

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl ChatError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Provider { status, .. } => Some(*status),
            ChatError::Auth(err) => err.status(),
            ChatError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

impl From<ContextError> for ChatError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::ConversationNotFound(id) => ChatError::ConversationNotFound(id),
            other => ChatError::InvalidConversation(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorFields,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorFields {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

/// Build a [`ChatError::Provider`] from a non-200 response body.
///
/// Understands the chat completion error shape (`{"error": {...}}`) and the
/// backend's `{"detail": ...}`; anything else is carried as raw text.
pub(crate) fn provider_error(status: StatusCode, body: &str) -> ChatError {
    let code = status.as_u16();

    if let Ok(parsed) = serde_json::from_str::<ProviderErrorBody>(body) {
        let message = parsed
            .error
            .message
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| body.to_string());
        let code_text = parsed.error.code.and_then(|value| match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        });
        return ChatError::Provider {
            status: code,
            message,
            code: code_text,
        };
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        if let Some(detail) = map.get("detail").filter(|value| !value.is_null()) {
            let message = match detail {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            return ChatError::Provider {
                status: code,
                message,
                code: None,
            };
        }
    }

    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    } else {
        body.to_string()
    };
    ChatError::Provider {
        status: code,
        message,
        code: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openai_error_body() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","param":null,"code":"invalid_api_key"}}"#;
        match provider_error(StatusCode::UNAUTHORIZED, body) {
            ChatError::Provider {
                status,
                message,
                code,
            } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
                assert_eq!(code.as_deref(), Some("invalid_api_key"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn parses_backend_detail_body() {
        let body = r#"{"detail":"Too many requests in 1 hour. Try again later."}"#;
        match provider_error(StatusCode::TOO_MANY_REQUESTS, body) {
            ChatError::Provider { status, message, .. } => {
                assert_eq!(status, 429);
                assert!(message.starts_with("Too many requests"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn keeps_raw_text_and_falls_back_to_reason() {
        match provider_error(StatusCode::BAD_GATEWAY, "upstream down") {
            ChatError::Provider { message, .. } => assert_eq!(message, "upstream down"),
            other => panic!("unexpected error {other:?}"),
        }
        match provider_error(StatusCode::BAD_GATEWAY, "") {
            ChatError::Provider { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn context_errors_map_to_chat_errors() {
        let err: ChatError = ContextError::ConversationNotFound("c1".into()).into();
        assert!(matches!(err, ChatError::ConversationNotFound(id) if id == "c1"));
    }
}

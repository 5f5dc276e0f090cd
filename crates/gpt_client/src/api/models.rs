use chat_core::{new_turn_id, Message, Role};
use serde::{Deserialize, Serialize};

use crate::stream::DecodedFrame;

// Chat completion (API-key mode)

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub top_p: f64,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, temperature: f64) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature,
            top_p: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    /// Text of the first choice.
    pub fn reply(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }
}

// Backend conversation (access-token mode)

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackendContent {
    pub content_type: String,
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackendMessage {
    pub id: String,
    pub role: Role,
    pub content: BackendContent,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationRequest {
    pub action: String,
    pub messages: Vec<BackendMessage>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub parent_message_id: String,
}

impl ConversationRequest {
    /// A `next` turn. A fresh parent id is generated when none is given.
    pub fn next(
        prompt: impl Into<String>,
        model: impl Into<String>,
        conversation_id: Option<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            action: "next".to_string(),
            messages: vec![BackendMessage {
                id: new_turn_id(),
                role: Role::User,
                content: BackendContent {
                    content_type: "text".to_string(),
                    parts: vec![prompt.into()],
                },
            }],
            model: model.into(),
            conversation_id: conversation_id.filter(|id| !id.is_empty()),
            parent_message_id: parent_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_turn_id),
        }
    }
}

// Caller-facing types

/// Where an ask continues. Both fields empty starts a new conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AskOptions {
    pub conversation_id: Option<String>,
    pub parent_id: Option<String>,
}

impl AskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn parent(mut self, id: impl Into<String>) -> Self {
        self.parent_id = Some(id.into());
        self
    }

    /// Options continuing after `response`.
    pub fn after(response: &ChatResponse) -> Self {
        Self {
            conversation_id: Some(response.conversation_id.clone()),
            parent_id: response.parent_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub conversation_id: String,
    /// Turn id to pass as the parent of the next ask; backend mode only.
    pub parent_id: Option<String>,
    pub model: String,
}

impl ChatResponse {
    pub fn from_frame(frame: DecodedFrame, model: impl Into<String>) -> Self {
        Self {
            message: frame.text,
            conversation_id: frame.conversation_id,
            parent_id: Some(frame.turn_id),
            model: model.into(),
        }
    }
}

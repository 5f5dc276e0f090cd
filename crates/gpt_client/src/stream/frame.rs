use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded update of an assistant turn. `text` is the full reply so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedFrame {
    pub conversation_id: String,
    pub turn_id: String,
    pub text: String,
    pub is_terminal: bool,
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    end_turn: Option<bool>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    parts: Option<Vec<Value>>,
}

/// What a `data:` payload turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameShape {
    Text(DecodedFrame),
    /// A well-formed frame whose content is not text.
    NonText(String),
    /// Text frame with nothing to show yet.
    Empty,
    /// The provider reported an error in place of a frame.
    Detail(String),
    Mismatch(&'static str),
}

pub(crate) fn detail_message(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn decode_frame(payload: &str) -> FrameShape {
    let frame: WireFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(_) => return FrameShape::Mismatch("payload is not a frame object"),
    };

    if let Some(detail) = frame.detail.as_ref().filter(|value| !value.is_null()) {
        return FrameShape::Detail(detail_message(detail));
    }

    let Some(message) = frame.message else {
        return FrameShape::Mismatch("no message");
    };
    let Some(content) = message.content else {
        return FrameShape::Mismatch("no content");
    };
    let Some(first_part) = content.parts.as_ref().and_then(|parts| parts.first()) else {
        return FrameShape::Mismatch("no parts");
    };

    let content_type = content.content_type.unwrap_or_default();
    if content_type != "text" {
        return FrameShape::NonText(content_type);
    }

    let Some(turn_id) = message.id.filter(|id| !id.is_empty()) else {
        return FrameShape::Mismatch("no message id");
    };
    let Some(conversation_id) = frame.conversation_id.filter(|id| !id.is_empty()) else {
        return FrameShape::Mismatch("no conversation id");
    };

    let text = match first_part {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if text.is_empty() {
        return FrameShape::Empty;
    }

    let is_terminal = message.end_turn == Some(true)
        || message.status.as_deref() == Some("finished_successfully");

    FrameShape::Text(DecodedFrame {
        conversation_id,
        turn_id,
        text,
        is_terminal,
    })
}

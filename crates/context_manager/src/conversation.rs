use chat_core::{Message, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Content of the system message at position 0.
    pub init_message: String,
    /// Content of the most recently appended message.
    pub last_message: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(init_message: impl Into<String>) -> Self {
        let init_message = init_message.into();
        Self {
            last_message: init_message.clone(),
            messages: vec![Message::system(init_message.clone())],
            init_message,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.last_message = message.content.clone();
        self.messages.push(message);
    }

    pub fn starts_with_system(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|message| message.role == Role::System)
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    /// Drop every intermediate turn, keeping the system message and the latest user turn.
    pub fn collapse(&mut self) {
        let last_user = self
            .last_user_message()
            .unwrap_or(&self.last_message)
            .to_string();
        self.messages = vec![
            Message::system(self.init_message.clone()),
            Message::user(last_user),
        ];
    }
}

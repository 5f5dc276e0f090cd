use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chat_core::Message;
use log::debug;

use crate::budget::{token_limit_for, TokenMeasure};
use crate::conversation::Conversation;
use crate::error::ContextError;

/// Conversation histories of one client, shared by all of its concurrent calls.
#[derive(Debug)]
pub struct ConversationStore {
    state: Mutex<StoreState>,
}

#[derive(Debug)]
struct StoreState {
    conversations: HashMap<String, Conversation>,
    model: String,
    init_message: String,
    measure: TokenMeasure,
}

impl StoreState {
    fn entry(&mut self, id: &str) -> &mut Conversation {
        let init_message = &self.init_message;
        self.conversations
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(init_message.clone()))
    }

    fn append(&mut self, id: &str, message: Message) -> bool {
        let limit = token_limit_for(&self.model);
        let measure = self.measure;
        let conversation = self.entry(id);
        conversation.push(message);

        let cost = measure.cost(conversation);
        if cost > limit {
            debug!("Conversation {id} costs ~{cost} tokens (budget {limit}), collapsing window");
            conversation.collapse();
            return true;
        }
        false
    }
}

impl ConversationStore {
    pub fn new(model: impl Into<String>, init_message: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                conversations: HashMap::new(),
                model: model.into(),
                init_message: init_message.into(),
                measure: TokenMeasure::default(),
            }),
        }
    }

    pub fn with_measure(self, measure: TokenMeasure) -> Self {
        self.lock().measure = measure;
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> String {
        self.lock().model.clone()
    }

    /// Budget lookups use this model from the next append on.
    pub fn set_model(&self, model: impl Into<String>) {
        self.lock().model = model.into();
    }

    /// Only conversations created after this call use the new init message.
    pub fn set_init_message(&self, init_message: impl Into<String>) {
        self.lock().init_message = init_message.into();
    }

    pub fn get_or_create(&self, id: &str) -> Conversation {
        self.lock().entry(id).clone()
    }

    /// Append a user turn. Returns true when the window was collapsed.
    pub fn append_user(&self, id: &str, text: impl Into<String>) -> bool {
        self.lock().append(id, Message::user(text))
    }

    /// Append an assistant turn. Returns true when the window was collapsed.
    pub fn append_assistant(&self, id: &str, text: impl Into<String>) -> bool {
        self.lock().append(id, Message::assistant(text))
    }

    /// The window to send for `id`, creating the conversation on first use.
    pub fn current_messages(&self, id: &str) -> Vec<Message> {
        self.lock().entry(id).messages.clone()
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.lock().conversations.get(id).cloned()
    }

    pub fn set(&self, id: &str, conversation: Conversation) -> Result<(), ContextError> {
        if !conversation.starts_with_system() {
            return Err(ContextError::MissingSystemMessage(id.to_string()));
        }
        self.lock()
            .conversations
            .insert(id.to_string(), conversation);
        Ok(())
    }

    pub fn reset(&self, id: &str) -> Result<(), ContextError> {
        self.lock()
            .conversations
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ContextError::ConversationNotFound(id.to_string()))
    }

    pub fn reset_all(&self) {
        self.lock().conversations.clear();
    }

    pub fn snapshot(&self) -> HashMap<String, Conversation> {
        self.lock().conversations.clone()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().conversations.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Model budgets and the character-based token heuristic.
//!
//! The heuristic is a rough approximation (four characters per token), not a
//! tokenizer. It only needs to be good enough to decide when to collapse.

use crate::conversation::Conversation;

/// Budget used for models that match no entry of [`MODEL_TOKEN_LIMITS`].
pub const DEFAULT_TOKEN_LIMIT: usize = 4000;

pub const CHARS_PER_TOKEN: usize = 4;

/// Model name fragments and their budgets. The first fragment contained in the model name wins.
pub const MODEL_TOKEN_LIMITS: &[(&str, usize)] = &[
    ("text-davinci-", 4000),
    ("gpt-3.5-", 4000),
    ("gpt-4-32", 32000),
    ("gpt-4-8", 8000),
];

pub fn token_limit_for(model: &str) -> usize {
    MODEL_TOKEN_LIMITS
        .iter()
        .find(|(fragment, _)| model.contains(fragment))
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_TOKEN_LIMIT)
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// What part of a conversation counts against the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenMeasure {
    /// Every message currently in the window.
    #[default]
    WholeWindow,
    /// Only the init (system) message, as older clients measured it.
    InitMessageOnly,
}

impl TokenMeasure {
    pub fn cost(&self, conversation: &Conversation) -> usize {
        match self {
            TokenMeasure::WholeWindow => conversation
                .messages
                .iter()
                .map(|message| estimate_tokens(&message.content))
                .sum(),
            TokenMeasure::InitMessageOnly => estimate_tokens(&conversation.init_message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_get_their_budget() {
        assert_eq!(token_limit_for("gpt-3.5-turbo"), 4000);
        assert_eq!(token_limit_for("gpt-4-32k-0613"), 32000);
        assert_eq!(token_limit_for("gpt-4-8k"), 8000);
        assert_eq!(token_limit_for("text-davinci-002-render-sha"), 4000);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(token_limit_for("gpt-4o"), DEFAULT_TOKEN_LIMIT);
        assert_eq!(token_limit_for(""), DEFAULT_TOKEN_LIMIT);
    }

    #[test]
    fn estimate_counts_characters_not_bytes() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("ééééé"), 1);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn measures_differ_on_long_history() {
        let mut conversation = Conversation::new("sys!");
        conversation.push(chat_core::Message::user("x".repeat(400)));

        assert_eq!(TokenMeasure::InitMessageOnly.cost(&conversation), 1);
        assert_eq!(TokenMeasure::WholeWindow.cost(&conversation), 101);
    }
}

//! Language-model side of the voice chat service: chat completion, prompt
//! composition and the conversation-storage client.

pub mod conversation;
pub mod error;
pub mod openai;
pub mod prompt;

use serde::{Deserialize, Serialize};

pub use conversation::{ConversationStore, HttpConversationStore};
pub use error::{ConversationError, LlmError, PromptError};
pub use openai::{ChatCompletion, LlmProvider, OpenAiClient};
pub use prompt::PromptComposer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One `(role, content)` entry of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

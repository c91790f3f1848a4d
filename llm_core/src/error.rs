use thiserror::Error;

/// Prompt template resolution and composition failures.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Invalid prompt template name: {0:?}")]
    InvalidTemplateName(String),

    #[error("Prompt template not found: {0}")]
    TemplateNotFound(String),

    #[error("Prompt template is empty: {0}")]
    EmptyTemplate(String),

    #[error("Conversation context cannot be empty")]
    EmptyContext,

    #[error("Error reading prompt template {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Conversation-storage service failures.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Conversation context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Failed to save message: {0}")]
    PersistenceFailed(String),
}

/// Chat-completion provider failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY must be set in the environment")]
    MissingApiKey,

    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM returned no reply")]
    EmptyReply,
}

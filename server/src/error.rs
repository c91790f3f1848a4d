use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llm_core::{LlmError, PromptError};
use serde::Serialize;
use thiserror::Error;
use tts_core::TtsError;

/// Application close codes sent when a session ends abnormally.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const MISSING_MESSAGES: u16 = 4000;
    pub const SYNTHESIZER_INIT: u16 = 4001;
    pub const PROCESSING_ERROR: u16 = 4002;
}

/// Close frame reasons are capped at 123 bytes by the WebSocket protocol.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("TTS error: {0}")]
    TtsError(#[from] TtsError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Prompt(e) => {
                tracing::error!("Prompt error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Prompt error: {e}"))
            }
            ApiError::LlmError(msg) => {
                tracing::error!("LLM error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::TtsError(e) => {
                tracing::error!("TTS error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("TTS error: {e}"))
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<LlmError> for ApiError {
    fn from(e: LlmError) -> Self {
        ApiError::LlmError(e.to_string())
    }
}

/// Transport-level send/close failures. Never leave the registry.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Failures that end a session with a close frame.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Missing 'messages' in JSON body")]
    MissingMessages,

    #[error("Invalid JSON body: {0}")]
    MalformedTurn(String),

    #[error("TTS initialization failed: {0}")]
    SynthesizerInit(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl SessionError {
    pub fn close_code(&self) -> u16 {
        match self {
            SessionError::MissingMessages | SessionError::MalformedTurn(_) => {
                close_code::MISSING_MESSAGES
            }
            SessionError::SynthesizerInit(_) => close_code::SYNTHESIZER_INIT,
            SessionError::Processing(_) => close_code::PROCESSING_ERROR,
        }
    }

    pub fn close_reason(&self) -> String {
        truncate_reason(&self.to_string())
    }
}

impl From<PromptError> for SessionError {
    fn from(e: PromptError) -> Self {
        SessionError::Processing(e.to_string())
    }
}

impl From<LlmError> for SessionError {
    fn from(e: LlmError) -> Self {
        SessionError::Processing(e.to_string())
    }
}

/// Cut `reason` to fit a close frame without splitting a UTF-8 character.
pub fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

use llm_core::ChatMessage;
use serde::Deserialize;

use crate::error::{ApiError, SessionError};

/// Maximum length of a conversation id in a WebSocket path
const MAX_SESSION_ID_LENGTH: usize = 128;

/// Body of one client turn, and of `POST /api/voice_chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
}

impl TurnRequest {
    /// Messages of the turn, rejecting an absent or empty list.
    pub fn into_messages(self) -> Option<Vec<ChatMessage>> {
        self.messages.filter(|messages| !messages.is_empty())
    }
}

/// Parse a text frame into the message list of one turn.
pub fn parse_turn(text: &str) -> Result<Vec<ChatMessage>, SessionError> {
    let request: TurnRequest =
        serde_json::from_str(text).map_err(|e| SessionError::MalformedTurn(e.to_string()))?;
    request.into_messages().ok_or(SessionError::MissingMessages)
}

/// Validate an HTTP voice chat body.
pub fn validate_voice_chat_request(request: TurnRequest) -> Result<Vec<ChatMessage>, ApiError> {
    request
        .into_messages()
        .ok_or_else(|| ApiError::InvalidInput("Missing 'messages' in JSON body".to_string()))
}

/// Validate a conversation id taken from the URL path.
pub fn validate_session_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() {
        return Err(ApiError::InvalidInput(
            "Conversation id cannot be empty".to_string(),
        ));
    }
    if id.len() > MAX_SESSION_ID_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Conversation id too long (max {} characters)",
            MAX_SESSION_ID_LENGTH
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(ApiError::InvalidInput(format!(
            "Invalid conversation id: {}. Allowed characters: A-Z, a-z, 0-9, '-', '_'",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::Role;

    #[test]
    fn test_parse_turn_valid() {
        let messages =
            parse_turn(r#"{"messages":[{"role":"user","content":"Hello"}]}"#).unwrap();
        assert_eq!(messages, vec![ChatMessage::user("Hello")]);
    }

    #[test]
    fn test_parse_turn_keeps_client_order() {
        let messages = parse_turn(
            r#"{"messages":[
                {"role":"user","content":"Hi"},
                {"role":"assistant","content":"Hello!"},
                {"role":"user","content":"How are you?"}
            ]}"#,
        )
        .unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn test_parse_turn_missing_or_empty_messages() {
        for body in [r#"{}"#, r#"{"messages":[]}"#, r#"{"messages":null}"#] {
            let err = parse_turn(body).unwrap_err();
            assert!(matches!(err, SessionError::MissingMessages), "{body}");
            assert_eq!(err.close_code(), 4000);
        }
    }

    #[test]
    fn test_parse_turn_malformed() {
        let err = parse_turn("not json").unwrap_err();
        assert!(matches!(err, SessionError::MalformedTurn(_)));
        assert_eq!(err.close_code(), 4000);

        let err = parse_turn(r#"{"messages":[{"role":"tool","content":"x"}]}"#).unwrap_err();
        assert!(matches!(err, SessionError::MalformedTurn(_)));
    }

    #[test]
    fn test_validate_voice_chat_request() {
        let ok = TurnRequest {
            messages: Some(vec![ChatMessage::user("Hi")]),
        };
        assert!(validate_voice_chat_request(ok).is_ok());

        let result = validate_voice_chat_request(TurnRequest::default());
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("messages"));
        } else {
            panic!("expected InvalidInput");
        }
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("abc").is_ok());
        assert!(validate_session_id("conv_42-b").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id("a b").is_err());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
        assert!(validate_session_id(&"x".repeat(128)).is_ok());
    }
}

//! Client for the external conversation-storage service.
//!
//! `GET  {base}/conversations/{id}`          -> `{"context": "..."}`
//! `POST {base}/conversations/{id}/messages` <- `{"isUserMessage": false, "message": "..."}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::ConversationError;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Stored context for a conversation, or an empty string if it has none.
    async fn fetch_context(&self, conversation_id: &str) -> Result<String, ConversationError>;

    /// Append an assistant message to the conversation.
    async fn save_assistant_message(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<(), ConversationError>;
}

#[derive(Deserialize)]
struct ConversationDetails {
    #[serde(default)]
    context: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMessage<'a> {
    is_user_message: bool,
    message: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpConversationStore {
    base_url: Url,
    client: Client,
}

impl HttpConversationStore {
    /// `accept_invalid_certs` is for local development services running with
    /// self-signed certificates.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, ConversationError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ConversationError::ContextUnavailable(format!("invalid base URL {base_url}: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConversationError::ContextUnavailable(format!(
                "base URL cannot have path segments: {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| ConversationError::ContextUnavailable(format!("HTTP client error: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/conversations/{id}/{tail...}` with the id percent-encoded.
    fn conversation_url(&self, conversation_id: &str, tail: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("conversations").push(conversation_id);
            segments.extend(tail);
        }
        url
    }
}

#[async_trait]
impl ConversationStore for HttpConversationStore {
    async fn fetch_context(&self, conversation_id: &str) -> Result<String, ConversationError> {
        let url = self.conversation_url(conversation_id, &[]);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ConversationError::ContextUnavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(conversation_id, "conversation has no stored record");
            return Ok(String::new());
        }
        let response = response
            .error_for_status()
            .map_err(|e| ConversationError::ContextUnavailable(e.to_string()))?;

        let details: ConversationDetails = response
            .json()
            .await
            .map_err(|e| {
                ConversationError::ContextUnavailable(format!("invalid response body: {e}"))
            })?;
        Ok(details.context.unwrap_or_default())
    }

    async fn save_assistant_message(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<(), ConversationError> {
        let url = self.conversation_url(conversation_id, &["messages"]);
        let response = self
            .client
            .post(url)
            .json(&NewMessage {
                is_user_message: false,
                message,
            })
            .send()
            .await
            .map_err(|e| ConversationError::PersistenceFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            error!(
                conversation_id,
                status = status.as_u16(),
                "Failed to save message: {}",
                status.canonical_reason().unwrap_or("unknown status")
            );
            return Err(ConversationError::PersistenceFailed(format!(
                "storage service returned {status}"
            )));
        }
        Ok(())
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::LlmError, ChatMessage};

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Send the composed message list and return the assistant's reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Chat providers speaking the OpenAI `/chat/completions` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl LlmProvider {
    /// Unknown names fall back to OpenAI.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" => LlmProvider::Ollama,
            _ => LlmProvider::OpenAI,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-4.1",
            LlmProvider::Ollama => "llama3.2:1b",
        }
    }
}

/// Structure for the Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

/// Structure for the Chat API response
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    provider: LlmProvider,
    api_key: Option<String>,
    client: Client,
    model: String,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(
        provider: LlmProvider,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        if provider == LlmProvider::OpenAI && api_key.as_deref().map_or(true, str::is_empty) {
            return Err(LlmError::MissingApiKey);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            provider,
            api_key,
            client,
            model: model.to_string(),
            endpoint: completions_endpoint(provider.default_base_url()),
        })
    }

    /// Create a client, reading the API key from the `OPENAI_API_KEY` env variable.
    pub fn from_env(
        provider: LlmProvider,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        Self::new(provider, model, api_key, timeout)
    }

    /// Point the client at a different OpenAI-compatible base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.endpoint = completions_endpoint(base_url);
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn completions_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let req_body = ChatRequest {
            model: &self.model,
            messages,
        };

        let mut request = self.client.post(&self.endpoint).json(&req_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response = response.json::<ChatResponse>().await?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyReply)?;

        debug!(model = %self.model, reply_len = reply.len(), "chat completion received");
        Ok(reply)
    }
}

// Configuration for the server, read from the environment

use std::time::Duration;

use llm_core::LlmProvider;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub llm_timeout_secs: u64,
    pub context_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub llm_base_url: Option<String>,
    pub prompts_dir: String,
    pub default_prompt: String,
    pub http_voice_prompt: String,
    pub conversation_api_url: String,
    pub conversation_api_insecure: bool,
    pub voice_config: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            llm_timeout_secs: 120,
            context_timeout_secs: 10,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            llm_provider: LlmProvider::OpenAI,
            llm_model: LlmProvider::OpenAI.default_model().to_string(),
            llm_base_url: None,
            prompts_dir: "prompts".to_string(),
            default_prompt: "Lexa".to_string(),
            http_voice_prompt: "RealPerson".to_string(),
            conversation_api_url: "https://localhost:7185/api/ai".to_string(),
            conversation_api_insecure: false,
            voice_config: "models/voice.onnx.json".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let llm_provider = env_string("LLM_PROVIDER")
            .map(|name| LlmProvider::from_name(&name))
            .unwrap_or(defaults.llm_provider);
        let llm_model = env_string("LLM_MODEL")
            .unwrap_or_else(|| llm_provider.default_model().to_string());

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE")
                .unwrap_or(defaults.rate_limit_per_minute),
            llm_timeout_secs: env_parse("LLM_TIMEOUT_SECS").unwrap_or(defaults.llm_timeout_secs),
            context_timeout_secs: env_parse("CONTEXT_TIMEOUT_SECS")
                .unwrap_or(defaults.context_timeout_secs),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            cors_allowed_origins,
            llm_provider,
            llm_model,
            llm_base_url: env_string("LLM_BASE_URL"),
            prompts_dir: env_string("PROMPTS_DIR").unwrap_or(defaults.prompts_dir),
            default_prompt: env_string("DEFAULT_PROMPT").unwrap_or(defaults.default_prompt),
            http_voice_prompt: env_string("HTTP_VOICE_PROMPT")
                .unwrap_or(defaults.http_voice_prompt),
            conversation_api_url: env_string("CONVERSATION_API_URL")
                .unwrap_or(defaults.conversation_api_url),
            conversation_api_insecure: env_flag("CONVERSATION_API_INSECURE")
                .unwrap_or(defaults.conversation_api_insecure),
            voice_config: env_string("VOICE_CONFIG").unwrap_or(defaults.voice_config),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8085);
        assert_eq!(config.llm_model, "gpt-4.1");
        assert_eq!(config.default_prompt, "Lexa");
        assert_eq!(config.http_voice_prompt, "RealPerson");
        assert_eq!(config.llm_timeout(), Duration::from_secs(120));
        assert_eq!(config.context_timeout(), Duration::from_secs(10));
    }
}

use std::{net::SocketAddr, sync::Arc, time::Duration};

use llm_core::{
    ChatCompletion, ConversationStore, HttpConversationStore, OpenAiClient, PromptComposer,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tts_core::SpeechSynthesizer;

use voicechat_server::{
    config::ServerConfig,
    error::close_code,
    metrics::SessionMetrics,
    registry::ConnectionRegistry,
    session::{SessionServices, SessionSettings},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice chat server...");

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, llm_timeout={}s, context_timeout={}s",
        config.port,
        config.rate_limit_per_minute,
        config.llm_timeout_secs,
        config.context_timeout_secs
    );

    let mut chat =
        OpenAiClient::from_env(config.llm_provider, &config.llm_model, config.llm_timeout())?;
    if let Some(base_url) = config.llm_base_url.as_deref() {
        chat = chat.with_base_url(base_url);
    }
    info!("LLM provider {:?}, model {}", chat.provider(), chat.model());

    if config.conversation_api_insecure {
        warn!("Accepting invalid certificates from the conversation service");
    }
    let conversations = HttpConversationStore::new(
        &config.conversation_api_url,
        config.context_timeout(),
        config.conversation_api_insecure,
    )?;
    info!("Conversation service at {}", conversations.base_url());

    let prompts = PromptComposer::new(&config.prompts_dir);
    // Fail early on a missing default template rather than on the first turn.
    for name in [&config.default_prompt, &config.http_voice_prompt] {
        if let Err(e) = prompts.load_template(name).await {
            warn!("Prompt template {name} unavailable: {e}");
        }
    }

    let synthesizer = load_synthesizer(&config)?;

    let registry = Arc::new(ConnectionRegistry::new());
    let services = Arc::new(SessionServices {
        registry: Arc::clone(&registry),
        chat: Arc::new(chat) as Arc<dyn ChatCompletion>,
        conversations: Arc::new(conversations) as Arc<dyn ConversationStore>,
        prompts,
        synthesizer,
        metrics: Arc::new(SessionMetrics::new()),
        settings: SessionSettings {
            default_template: config.default_prompt.clone(),
            llm_timeout: config.llm_timeout(),
            context_timeout: config.context_timeout(),
        },
    });

    let state = AppState::new(services, config.clone());
    let app = voicechat_server::app(state)?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;
    info!("Server stopped");
    Ok(())
}

#[cfg(feature = "piper")]
fn load_synthesizer(config: &ServerConfig) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    let voice = tts_core::PiperVoice::new(&config.voice_config);
    info!("Piper voice config {}", voice.config_path().display());
    Ok(Arc::new(voice))
}

#[cfg(not(feature = "piper"))]
fn load_synthesizer(_config: &ServerConfig) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    anyhow::bail!("built without a speech synthesis engine; enable the `piper` feature")
}

async fn shutdown_signal(registry: Arc<ConnectionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown requested, closing {} session(s)", registry.len());
    let close = registry.close_all(close_code::GOING_AWAY, "Server shutting down");
    if tokio::time::timeout(Duration::from_secs(5), close).await.is_err() {
        warn!("Timed out closing sessions");
    }
}

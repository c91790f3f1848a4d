use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::MetricsSnapshot;
use crate::registry::BroadcastReport;
use crate::state::AppState;
use crate::validation::{validate_voice_chat_request, TurnRequest};
use crate::ws::ws_chat_handler;

/// Routes without middleware, served both at the root and under `/api`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/voice_chat", post(voice_chat_endpoint))
        .route("/admin/broadcast", post(broadcast_endpoint))
        .route("/ws/chat/{conversation_id}", get(ws_chat_handler));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
}

/// Full application: routes plus request id, tracing, rate limiting,
/// timeout and CORS layers.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();
    let cors = cors_layer(&config);

    // Global key: every request shares one bucket.
    let per_second = u64::from((config.rate_limit_per_minute / 60).max(1));
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(per_second)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    Ok(router(state)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    // A hyphenated UUID is always a valid header value.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }
    next.run(request).await
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

pub async fn health_check() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
    pub live_sessions: usize,
    pub sessions: MetricsSnapshot,
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg").ok().and_then(|loadavg| {
                loadavg
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<f64>().ok())
            })
        }
        #[cfg(not(unix))]
        None
    };

    let sessions = &state.sessions;
    Json(MetricsResponse {
        cpu_usage_percent: system.global_cpu_info().cpu_usage(),
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        request_count: state.request_count.load(Ordering::Relaxed),
        uptime_seconds: sessions.metrics.uptime_seconds(),
        system_load,
        live_sessions: sessions.registry.len(),
        sessions: sessions.metrics.snapshot(),
    })
}

#[derive(Deserialize)]
pub struct BroadcastRequest {
    text: String,
}

/// `POST /admin/broadcast`: push a text frame to every live session.
pub async fn broadcast_endpoint(
    State(state): State<AppState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<BroadcastReport>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    if req.text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    let report = state.sessions.registry.broadcast_text(&req.text).await;
    info!(delivered = report.delivered, dropped = report.dropped, "broadcast sent");
    Ok(Json(report))
}

/// `POST /voice_chat`: one-shot chat answered with a chunked raw PCM body.
pub async fn voice_chat_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let messages = validate_voice_chat_request(req)?;
    let services = &state.sessions;

    let messages = services
        .prompts
        .compose_with_named_template(messages, &state.config.http_voice_prompt)
        .await?;

    let timeout = state.config.llm_timeout();
    let reply = tokio::time::timeout(timeout, services.chat.complete(&messages))
        .await
        .map_err(|_| {
            ApiError::LlmError(format!("Request timed out after {} seconds", timeout.as_secs()))
        })??;
    debug!(chars = reply.len(), "voice chat reply received");

    services.synthesizer.prepare().await?;
    let audio = services
        .synthesizer
        .synthesize(&reply)
        .map(|chunk| chunk.map(|chunk| Bytes::from(chunk.into_inner())));

    let content_type = format!(
        "audio/L16; rate={}; channels=1",
        services.synthesizer.sample_rate()
    );
    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(audio),
    )
        .into_response())
}

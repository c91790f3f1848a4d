use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::session::SessionServices;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionServices>,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(sessions: Arc<SessionServices>, config: ServerConfig) -> Self {
        Self {
            sessions,
            request_count: Arc::new(AtomicU64::new(0)),
            config,
        }
    }
}

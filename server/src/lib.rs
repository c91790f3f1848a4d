//! Realtime voice chat server: one WebSocket session per conversation,
//! streaming the assistant's reply as text and then as PCM audio.

pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;
pub mod validation;
pub mod ws;

pub use routes::{app, router};
pub use state::AppState;

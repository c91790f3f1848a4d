// WebSocket transport for voice chat sessions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{future, stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ApiError, TransportError};
use crate::registry::{Connection, Frame};
use crate::session::{run_session, InboundFrame, SessionServices};
use crate::state::AppState;
use crate::validation::validate_session_id;

/// Sending half of an upgraded socket.
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    open: AtomicBool,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
        }
    }

    /// Called by the reader when the peer closes or the socket errors.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        let mut sink = self.sink.lock().await;
        sink.send(message).await.map_err(|e| {
            self.mark_closed();
            TransportError::Send(e.to_string())
        })
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// `GET /ws/chat/{conversation_id}`
pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Response, ApiError> {
    validate_session_id(&conversation_id)?;
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let services = Arc::clone(&state.sessions);
    Ok(ws.on_upgrade(move |socket| serve_socket(services, conversation_id, socket)))
}

async fn serve_socket(services: Arc<SessionServices>, conversation_id: String, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let conn = Arc::new(WsConnection::new(sink));

    let reader = Arc::clone(&conn);
    let inbound = stream.filter_map(move |message| {
        let frame = match message {
            Ok(Message::Text(text)) => Some(InboundFrame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => Some(InboundFrame::Binary(bytes.len())),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Ok(Message::Close(frame)) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "peer sent close");
                reader.mark_closed();
                Some(InboundFrame::Closed)
            }
            Err(e) => {
                debug!(error = %e, "websocket receive failed");
                reader.mark_closed();
                Some(InboundFrame::Closed)
            }
        };
        future::ready(frame)
    });

    run_session(services, conversation_id, conn, inbound).await;
}

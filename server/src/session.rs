//! Per-connection voice chat pipeline.
//!
//! One task per session. A session moves through
//! `Connecting -> Active -> Closing -> Closed`: it registers its connection,
//! fetches the conversation context once, then handles turns strictly in
//! order. Each turn goes prompt -> chat completion -> reply text -> audio
//! chunks -> [`END_OF_STREAM`]. While a turn is in flight the inbound stream
//! is still watched; a disconnect drops the turn future, cancelling the chat
//! request and the synthesis worker. Turns arriving meanwhile are queued, up
//! to [`MAX_PENDING_TURNS`]; one more closes the session with 4002.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use llm_core::{ChatCompletion, ChatMessage, ConversationStore, LlmError, PromptComposer};
use tracing::{debug, info, info_span, warn, Instrument};
use tts_core::{SpeechSynthesizer, TtsError};

use crate::error::{close_code, SessionError};
use crate::metrics::SessionMetrics;
use crate::registry::{ConnectionRef, ConnectionRegistry, Registration};
use crate::validation::parse_turn;

/// Text frame sent after the last audio chunk of every completed turn.
pub const END_OF_STREAM: &str = "[[VOICE_STREAM_END]]";

/// Turns a session holds while one is in flight.
pub const MAX_PENDING_TURNS: usize = 8;

/// Close reason given to a connection replaced by a reconnect.
pub const SUPERSEDED_REASON: &str = "Superseded by a new connection";

/// Inbound event, already decoded from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Binary payload of the given length. Not part of the protocol.
    Binary(usize),
    /// Close frame or transport error.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_template: String,
    pub llm_timeout: Duration,
    pub context_timeout: Duration,
}

/// Everything a session task needs, shared by all sessions.
pub struct SessionServices {
    pub registry: Arc<ConnectionRegistry>,
    pub chat: Arc<dyn ChatCompletion>,
    pub conversations: Arc<dyn ConversationStore>,
    pub prompts: PromptComposer,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub metrics: Arc<SessionMetrics>,
    pub settings: SessionSettings,
}

enum TurnOutcome {
    Completed,
    /// A send was dropped; the peer is gone.
    Disconnected,
}

struct Session {
    services: Arc<SessionServices>,
    registration: Registration,
    context: String,
    state: SessionState,
}

/// Run one session to completion. Returns once the peer has gone or the
/// session was closed with an error code; the registry entry is released
/// either way.
pub async fn run_session<S>(
    services: Arc<SessionServices>,
    session_id: String,
    conn: ConnectionRef,
    inbound: S,
) where
    S: Stream<Item = InboundFrame> + Unpin + Send,
{
    let span = info_span!("session", session_id = %session_id);
    drive(services, session_id, conn, inbound)
        .instrument(span)
        .await
}

async fn drive<S>(
    services: Arc<SessionServices>,
    session_id: String,
    conn: ConnectionRef,
    mut inbound: S,
) where
    S: Stream<Item = InboundFrame> + Unpin + Send,
{
    services.metrics.record_session_opened();
    let (registration, previous) = services.registry.register(&session_id, conn);
    info!("session connected");

    if let Some(previous) = previous {
        info!("closing superseded connection");
        if previous.is_open() {
            if let Err(e) = previous.close(close_code::NORMAL, SUPERSEDED_REASON).await {
                debug!(error = %e, "superseded connection did not close cleanly");
            }
        }
    }

    let context = fetch_context(&services, &session_id).await;
    let mut session = Session {
        services: Arc::clone(&services),
        registration,
        context,
        state: SessionState::Connecting,
    };

    let result = match session.prepare().await {
        Ok(()) => {
            session.transition(SessionState::Active);
            session.serve(&mut inbound).await
        }
        Err(e) => Err(e),
    };

    session.transition(SessionState::Closing);
    if let Err(e) = result {
        warn!(code = e.close_code(), error = %e, "closing session");
        session
            .registration
            .close(e.close_code(), &e.close_reason())
            .await;
    }
    session.transition(SessionState::Closed);
    drop(session);
    services.metrics.record_session_closed();
    info!("session closed");
}

/// Context for the session, or an empty string when the lookup fails.
async fn fetch_context(services: &SessionServices, session_id: &str) -> String {
    let timeout = services.settings.context_timeout;
    match tokio::time::timeout(timeout, services.conversations.fetch_context(session_id)).await {
        Ok(Ok(context)) => {
            debug!(bytes = context.len(), "conversation context loaded");
            context
        }
        Ok(Err(e)) => {
            warn!(error = %e, "context unavailable, using default prompt");
            String::new()
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "context fetch timed out, using default prompt"
            );
            String::new()
        }
    }
}

/// Next turn payload, skipping binary frames. `None` once the peer is gone.
async fn next_turn<S>(inbound: &mut S) -> Option<String>
where
    S: Stream<Item = InboundFrame> + Unpin,
{
    while let Some(frame) = inbound.next().await {
        match frame {
            InboundFrame::Text(text) => return Some(text),
            InboundFrame::Binary(len) => warn!(len, "ignoring binary frame"),
            InboundFrame::Closed => return None,
        }
    }
    None
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    async fn prepare(&self) -> Result<(), SessionError> {
        self.services.synthesizer.prepare().await.map_err(|e| {
            SessionError::SynthesizerInit(match e {
                TtsError::Initialization(msg) => msg,
                other => other.to_string(),
            })
        })
    }

    async fn serve<S>(&self, inbound: &mut S) -> Result<(), SessionError>
    where
        S: Stream<Item = InboundFrame> + Unpin + Send,
    {
        let metrics = &self.services.metrics;
        let mut pending: VecDeque<String> = VecDeque::new();

        loop {
            let text = match pending.pop_front() {
                Some(text) => text,
                None => match next_turn(inbound).await {
                    Some(text) => text,
                    None => {
                        info!("peer disconnected");
                        return Ok(());
                    }
                },
            };
            let messages = parse_turn(&text)?;

            let turn = self.handle_turn(messages);
            tokio::pin!(turn);
            let outcome = loop {
                tokio::select! {
                    biased;
                    outcome = &mut turn => break Some(outcome),
                    frame = inbound.next() => match frame {
                        Some(InboundFrame::Text(text)) => {
                            if pending.len() >= MAX_PENDING_TURNS {
                                warn!(queued = pending.len(), "turn queue full");
                                break Some(Err(SessionError::Processing(format!(
                                    "more than {MAX_PENDING_TURNS} turns queued"
                                ))));
                            }
                            pending.push_back(text);
                        }
                        Some(InboundFrame::Binary(len)) => warn!(len, "ignoring binary frame"),
                        Some(InboundFrame::Closed) | None => break None,
                    },
                }
            };

            match outcome {
                Some(Ok(TurnOutcome::Completed)) => metrics.record_turn_completed(),
                Some(Ok(TurnOutcome::Disconnected)) => {
                    info!("peer went away while sending");
                    return Ok(());
                }
                Some(Err(e)) => {
                    metrics.record_turn_failed();
                    return Err(e);
                }
                None => {
                    info!("peer disconnected mid-turn, turn cancelled");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_turn(&self, messages: Vec<ChatMessage>) -> Result<TurnOutcome, SessionError> {
        let messages = self.compose(messages).await?;

        let timeout = self.services.settings.llm_timeout;
        let reply = tokio::time::timeout(timeout, self.services.chat.complete(&messages))
            .await
            .map_err(|_| LlmError::Timeout)??;
        debug!(chars = reply.len(), "reply received");

        self.persist(&reply);

        if !self.registration.send_text(&reply).await.is_delivered() {
            return Ok(TurnOutcome::Disconnected);
        }

        let mut audio = self.services.synthesizer.synthesize(&reply);
        let mut chunks = 0usize;
        while let Some(item) = audio.next().await {
            match item {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => {
                    if !self.registration.send_bytes(chunk.into_inner()).await.is_delivered() {
                        return Ok(TurnOutcome::Disconnected);
                    }
                    self.services.metrics.record_audio_chunk();
                    chunks += 1;
                }
                Err(e) => {
                    warn!(error = %e, chunks, "synthesis failed, ending audio for this turn");
                    break;
                }
            }
        }

        if !self.registration.send_text(END_OF_STREAM).await.is_delivered() {
            return Ok(TurnOutcome::Disconnected);
        }
        debug!(chunks, "turn complete");
        Ok(TurnOutcome::Completed)
    }

    async fn compose(&self, messages: Vec<ChatMessage>) -> Result<Vec<ChatMessage>, SessionError> {
        let prompts = &self.services.prompts;
        let template = &self.services.settings.default_template;
        let composed = if self.context.trim().is_empty() {
            prompts.compose_with_named_template(messages, template).await?
        } else {
            prompts
                .compose_with_context(messages, &self.context, template)
                .await?
        };
        Ok(composed)
    }

    /// Save the reply in the background. Failures are only logged.
    fn persist(&self, reply: &str) {
        let store = Arc::clone(&self.services.conversations);
        let session_id = self.registration.id().to_string();
        let reply = reply.to_string();
        let timeout = self.services.settings.context_timeout;

        tokio::spawn(async move {
            let save = store.save_assistant_message(&session_id, &reply);
            match tokio::time::timeout(timeout, save).await {
                Ok(Ok(())) => debug!(session_id = %session_id, "reply saved"),
                Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "failed to save reply"),
                Err(_) => warn!(session_id = %session_id, "saving reply timed out"),
            }
        });
    }
}

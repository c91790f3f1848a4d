//! Common utilities for integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use llm_core::{
    ChatCompletion, ChatMessage, ConversationError, ConversationStore, LlmError, PromptComposer,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tts_core::{AudioChunk, AudioStream, SpeechSynthesizer, TtsError};

use voicechat_server::config::ServerConfig;
use voicechat_server::error::TransportError;
use voicechat_server::metrics::SessionMetrics;
use voicechat_server::registry::{Connection, ConnectionRef, ConnectionRegistry, Frame};
use voicechat_server::session::{
    run_session, InboundFrame, SessionServices, SessionSettings, END_OF_STREAM,
};
use voicechat_server::AppState;

pub const LEXA: &str = "You are Lexa, a warm and concise voice assistant.";
pub const REAL_PERSON: &str = "You are a real person chatting casually.";

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a client would see on its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Frame(Frame),
    Closed(u16, String),
}

/// Connection that reports every frame and close on a channel.
pub struct RecordingConnection {
    open: AtomicBool,
    events: mpsc::UnboundedSender<Observed>,
}

impl RecordingConnection {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Observed>) {
        let (events, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            open: AtomicBool::new(true),
            events,
        });
        (conn, rx)
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let _ = self.events.send(Observed::Frame(frame));
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(Observed::Closed(code, reason.to_string()));
        }
        Ok(())
    }
}

/// Chat provider answering from a script. Falls back to `"ok"`.
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    delay: Option<Duration>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            ..Self::default()
        }
    }

    pub fn failing(error: LlmError) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(error)])),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("ok".to_string()))
    }
}

/// In-memory conversation storage.
#[derive(Default)]
pub struct MemoryStore {
    contexts: HashMap<String, String>,
    fail_fetch: bool,
    fail_save: bool,
    saved: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn with_context(id: &str, context: &str) -> Self {
        Self {
            contexts: HashMap::from([(id.to_string(), context.to_string())]),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_fetch: true,
            ..Self::default()
        }
    }

    pub fn read_only() -> Self {
        Self {
            fail_save: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<(String, String)> {
        self.saved.lock().unwrap().clone()
    }

    /// Persistence runs in the background; poll until `count` saves landed.
    pub async fn wait_for_saves(&self, count: usize) -> Vec<(String, String)> {
        for _ in 0..200 {
            if self.saved.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.saved()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn fetch_context(&self, conversation_id: &str) -> Result<String, ConversationError> {
        if self.fail_fetch {
            return Err(ConversationError::ContextUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(self.contexts.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn save_assistant_message(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<(), ConversationError> {
        if self.fail_save {
            return Err(ConversationError::PersistenceFailed("403 Forbidden".to_string()));
        }
        self.saved
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), message.to_string()));
        Ok(())
    }
}

/// Synthesizer emitting fixed chunks, optionally failing part way.
#[derive(Default)]
pub struct ScriptedSynth {
    chunks: Vec<Vec<u8>>,
    fail_after: Option<usize>,
    fail_prepare: bool,
    pub texts: Mutex<Vec<String>>,
}

impl ScriptedSynth {
    pub fn chunks(chunks: &[&[u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn broken() -> Self {
        Self {
            fail_prepare: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynth {
    async fn prepare(&self) -> Result<(), TtsError> {
        if self.fail_prepare {
            return Err(TtsError::Initialization("voice model missing".to_string()));
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn synthesize(&self, text: &str) -> AudioStream {
        self.texts.lock().unwrap().push(text.to_string());
        let mut items: Vec<Result<AudioChunk, TtsError>> = Vec::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if self.fail_after == Some(i) {
                items.push(Err(TtsError::Synthesis("engine crashed".to_string())));
                break;
            }
            items.push(Ok(AudioChunk::new(chunk.clone())));
        }
        Box::pin(stream::iter(items))
    }
}

/// Fakes wired into shared session services, with prompts in a temp dir.
pub struct Setup {
    pub chat: ScriptedChat,
    pub store: MemoryStore,
    pub synth: ScriptedSynth,
    pub llm_timeout: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            chat: ScriptedChat::default(),
            store: MemoryStore::default(),
            synth: ScriptedSynth::default(),
            llm_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Harness {
    pub services: Arc<SessionServices>,
    pub chat: Arc<ScriptedChat>,
    pub store: Arc<MemoryStore>,
    pub synth: Arc<ScriptedSynth>,
    _prompts: tempfile::TempDir,
}

impl Setup {
    pub fn build(self) -> Harness {
        let prompts = tempfile::tempdir().unwrap();
        std::fs::write(prompts.path().join("Lexa.md"), format!("{LEXA}\n")).unwrap();
        std::fs::write(prompts.path().join("RealPerson.md"), REAL_PERSON).unwrap();

        let chat = Arc::new(self.chat);
        let store = Arc::new(self.store);
        let synth = Arc::new(self.synth);
        let services = Arc::new(SessionServices {
            registry: Arc::new(ConnectionRegistry::new()),
            chat: chat.clone(),
            conversations: store.clone(),
            prompts: PromptComposer::new(prompts.path()),
            synthesizer: synth.clone(),
            metrics: Arc::new(SessionMetrics::new()),
            settings: SessionSettings {
                default_template: "Lexa".to_string(),
                llm_timeout: self.llm_timeout,
                context_timeout: Duration::from_secs(1),
            },
        });

        Harness {
            services,
            chat,
            store,
            synth,
            _prompts: prompts,
        }
    }
}

impl Harness {
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.services.registry
    }

    pub fn app_state(&self) -> AppState {
        let config = ServerConfig {
            llm_timeout_secs: 5,
            ..ServerConfig::default()
        };
        AppState::new(Arc::clone(&self.services), config)
    }

    /// Start a session over an in-memory connection.
    pub fn connect(&self, id: &str) -> Client {
        let (conn, events) = RecordingConnection::new();
        let (inbound, rx) = mpsc::channel(16);
        let task = tokio::spawn(run_session(
            Arc::clone(&self.services),
            id.to_string(),
            conn.clone() as ConnectionRef,
            ReceiverStream::new(rx),
        ));
        Client {
            inbound,
            events,
            conn,
            task,
        }
    }

    /// Wait until `id` is registered.
    pub async fn wait_registered(&self, id: &str) {
        for _ in 0..200 {
            if self.registry().contains(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{id} was never registered");
    }
}

pub struct Client {
    pub inbound: mpsc::Sender<InboundFrame>,
    pub events: mpsc::UnboundedReceiver<Observed>,
    pub conn: Arc<RecordingConnection>,
    pub task: JoinHandle<()>,
}

impl Client {
    pub async fn send_text(&self, text: &str) {
        self.inbound
            .send(InboundFrame::Text(text.to_string()))
            .await
            .unwrap();
    }

    pub async fn say(&self, content: &str) {
        let body = serde_json::json!({"messages": [{"role": "user", "content": content}]});
        self.send_text(&body.to_string()).await;
    }

    pub async fn next_event(&mut self) -> Observed {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for the session")
            .expect("connection dropped")
    }

    /// Frames of one turn, up to and including the end-of-stream marker.
    pub async fn turn_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.next_event().await {
                Observed::Frame(frame) => {
                    let done = frame == Frame::Text(END_OF_STREAM.to_string());
                    frames.push(frame);
                    if done {
                        return frames;
                    }
                }
                Observed::Closed(code, reason) => {
                    panic!("closed with {code} ({reason}) after {frames:?}")
                }
            }
        }
    }

    /// Peer goes away; waits for the session task to finish.
    pub async fn disconnect(self) {
        self.conn.mark_closed();
        let _ = self.inbound.send(InboundFrame::Closed).await;
        self.finished().await;
    }

    pub async fn finished(self) {
        tokio::time::timeout(EVENT_TIMEOUT, self.task)
            .await
            .expect("session did not finish")
            .unwrap();
    }
}

pub fn text(s: &str) -> Frame {
    Frame::Text(s.to_string())
}

pub fn binary(bytes: &[u8]) -> Frame {
    Frame::Binary(bytes::Bytes::copy_from_slice(bytes))
}

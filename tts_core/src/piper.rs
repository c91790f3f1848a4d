use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use piper_rs::synth::PiperSpeechSynthesizer;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info};

use crate::{
    text::speech_text, AudioChunk, AudioStream, SpeechSynthesizer, TtsError, DEFAULT_SAMPLE_RATE,
};

/// Parts buffered between the blocking Piper worker and the consumer.
const CHUNK_BUFFER: usize = 32;

struct LoadedVoice {
    synth: PiperSpeechSynthesizer,
    sample_rate: u32,
}

// PiperSpeechSynthesizer has no Debug impl
impl std::fmt::Debug for LoadedVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedVoice")
            .field("synth", &"<PiperSpeechSynthesizer>")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl LoadedVoice {
    fn load(cfg_path: &Path) -> Result<Self, TtsError> {
        let sample_rate = read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(cfg_path)
            .map_err(|e| TtsError::Initialization(format!("piper load error: {e}")))?;
        let synth = PiperSpeechSynthesizer::new(model)
            .map_err(|e| TtsError::Initialization(format!("piper synthesizer error: {e}")))?;
        Ok(Self { synth, sample_rate })
    }

    /// Runs on a blocking thread. Stops as soon as the receiver is gone.
    fn render(&self, text: String, tx: mpsc::Sender<Result<AudioChunk, TtsError>>) {
        let parts = match self.synth.synthesize_parallel(text, None) {
            Ok(parts) => parts,
            Err(e) => {
                let err = TtsError::Synthesis(format!("piper synth error: {e}"));
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };

        for part in parts {
            let item = part
                .map(|samples| AudioChunk::from_samples(&samples.into_vec()))
                .map_err(|e| TtsError::Synthesis(format!("chunk error: {e}")));
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() {
                debug!("audio consumer dropped, stopping synthesis");
                return;
            }
            if failed {
                return;
            }
        }
    }
}

/// Read `audio.sample_rate` from a Piper voice config JSON.
fn read_sample_rate(cfg_path: &Path) -> Result<u32, TtsError> {
    let text = fs::read_to_string(cfg_path).map_err(|e| {
        TtsError::Initialization(format!("failed to read {}: {e}", cfg_path.display()))
    })?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| TtsError::Initialization(format!("voice config is not valid JSON: {e}")))?;

    json.get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .map(|sr| sr as u32)
        .ok_or_else(|| {
            TtsError::Initialization("missing 'audio.sample_rate' in voice config".into())
        })
}

#[derive(Debug)]
struct VoiceSlot {
    cfg_path: PathBuf,
    loaded: OnceCell<Arc<LoadedVoice>>,
}

impl VoiceSlot {
    async fn get(self: &Arc<Self>) -> Result<Arc<LoadedVoice>, TtsError> {
        let slot = Arc::clone(self);
        self.loaded
            .get_or_try_init(|| async move {
                let cfg_path = slot.cfg_path.clone();
                let voice = tokio::task::spawn_blocking(move || LoadedVoice::load(&cfg_path))
                    .await
                    .map_err(|e| TtsError::Worker(format!("voice load task failed: {e}")))??;
                info!(
                    config = %slot.cfg_path.display(),
                    sample_rate = voice.sample_rate,
                    "Piper voice loaded"
                );
                Ok(Arc::new(voice))
            })
            .await
            .cloned()
    }
}

/// A single Piper voice, loaded on first use and shared by every session.
#[derive(Debug, Clone)]
pub struct PiperVoice {
    slot: Arc<VoiceSlot>,
}

impl PiperVoice {
    pub fn new<P: Into<PathBuf>>(cfg_path: P) -> Self {
        Self {
            slot: Arc::new(VoiceSlot {
                cfg_path: cfg_path.into(),
                loaded: OnceCell::new(),
            }),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.slot.cfg_path
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperVoice {
    async fn prepare(&self) -> Result<(), TtsError> {
        self.slot.get().await.map(|_| ())
    }

    fn sample_rate(&self) -> u32 {
        self.slot
            .loaded
            .get()
            .map(|voice| voice.sample_rate)
            .unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    fn synthesize(&self, text: &str) -> AudioStream {
        let slot = Arc::clone(&self.slot);
        let text = speech_text(text);

        Box::pin(async_stream::stream! {
            match slot.get().await {
                Err(e) => yield Err(e),
                Ok(voice) => {
                    let (tx, mut rx) = mpsc::channel(CHUNK_BUFFER);
                    let worker = tokio::task::spawn_blocking(move || voice.render(text, tx));

                    while let Some(item) = rx.recv().await {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            break;
                        }
                    }

                    if let Err(e) = worker.await {
                        yield Err(TtsError::Worker(format!("synthesis task failed: {e}")));
                    }
                }
            }
        })
    }
}

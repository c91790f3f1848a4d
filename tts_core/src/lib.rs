//! Speech synthesis for the voice chat service.
//!
//! A [`SpeechSynthesizer`] turns reply text into a lazy, finite stream of
//! [`AudioChunk`]s holding 16-bit signed mono PCM. The stream is consumed
//! once; an engine failure shows up as a terminal `Err` item rather than a
//! silently shortened stream.

mod pcm;
#[cfg(feature = "piper")]
mod piper;
pub mod text;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

pub use pcm::pcm16_bytes;
#[cfg(feature = "piper")]
pub use piper::PiperVoice;

/// Sample rate reported before a voice has been loaded.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// One unit of synthesized audio: raw 16-bit signed little-endian mono PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub pcm: Vec<u8>,
}

impl AudioChunk {
    pub fn new(pcm: Vec<u8>) -> Self {
        Self { pcm }
    }

    /// Build a chunk from normalized `[-1.0, 1.0]` float samples.
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            pcm: pcm16_bytes(samples),
        }
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.pcm
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("TTS initialization failed: {0}")]
    Initialization(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Synthesis worker failed: {0}")]
    Worker(String),
}

/// Ordered chunk sequence produced by one `synthesize` call.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, TtsError>> + Send>>;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Make sure the engine is ready. Called once per session before the
    /// first turn; engines that need no warm-up keep the default.
    async fn prepare(&self) -> Result<(), TtsError> {
        Ok(())
    }

    fn sample_rate(&self) -> u32;

    /// Start synthesizing `text`. Nothing runs until the stream is polled.
    fn synthesize(&self, text: &str) -> AudioStream;
}

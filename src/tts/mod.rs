//! Text-to-speech: engine abstraction, frame normalization and the
//! serial playback queue.
//!
//! Engines emit audio in whatever shape they like ([`SynthFrame`]); the
//! [`adapter`] turns every frame into mono f32 at the output rate before it
//! reaches the sink. The [`queue`] processor is the only place sentences are
//! spoken, one at a time.

pub mod adapter;
pub mod http;
pub mod queue;

use crate::config::TtsConfig;
use crate::error::Result;

pub use adapter::{PlayOutcome, SynthesisAdapter};
pub use http::HttpSpeechEngine;
pub use queue::{PlaybackState, TtsQueue, TtsQueueProcessor};

/// One chunk of synthesized audio, in any of the shapes engines produce.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthFrame {
    /// Samples with an explicit sample rate.
    Rated { sample_rate: u32, samples: Vec<f32> },
    /// Samples at the engine's implicit source rate.
    Samples(Vec<f32>),
    /// Raw little-endian f32 bytes at the implicit source rate.
    Bytes(Vec<u8>),
}

/// Lazy sequence of frames for one sentence. An `Err` item aborts the
/// sentence.
pub type FrameStream = Box<dyn Iterator<Item = Result<SynthFrame>> + Send>;

/// Voice parameters passed to every synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsOptions {
    pub voice: String,
    pub speed: f32,
    pub lang: String,
}

impl From<&TtsConfig> for TtsOptions {
    fn from(config: &TtsConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            speed: config.speed,
            lang: config.lang.clone(),
        }
    }
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self::from(&TtsConfig::default())
    }
}

/// A speech synthesis engine.
pub trait SynthesisEngine: Send {
    /// Start synthesizing `text`. Frames are pulled lazily so playback can
    /// begin before synthesis finishes and stop without synthesizing the rest.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Tts`](crate::SpeechError::Tts) if synthesis
    /// cannot start.
    fn stream_tts(&mut self, text: &str, options: &TtsOptions) -> Result<FrameStream>;
}

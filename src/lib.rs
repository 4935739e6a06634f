//! Voxline: streaming voice interaction for language-model agents.
//!
//! This crate turns an incrementally streamed agent response into speech,
//! sentence by sentence, while the text is still arriving:
//! Agent stream → segmenter → sanitizer → TTS queue → speaker
//!
//! # Architecture
//!
//! - **Text**: sentence segmentation over a growing buffer and speech
//!   sanitization of markdown, URLs and acronyms
//! - **TTS**: a single processor thread drains a FIFO of sentences, so audio
//!   never overlaps and can be cancelled within one frame
//! - **STT**: a bounded worker pool transcribes captured audio off the UI thread
//! - **Audio**: playback via `cpal` or recording to WAV via `hound`
//! - **Agent**: an OpenAI-compatible streaming chat client
//!
//! Workers report back to the UI only through [`PipelineEvent`]s on a
//! bounded channel.

pub mod agent;
pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod stt;
pub mod text;
pub mod tts;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::SpeechConfig;
pub use error::{Result, SpeechError};
pub use pipeline::{CancellationToken, Collaborators, PipelineController};
pub use runtime::PipelineEvent;

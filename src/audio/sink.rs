//! The output side of the pipeline: somewhere synthesized samples go.

use crate::error::Result;

/// Exclusive mono f32 audio output at the pipeline's fixed output rate.
///
/// Only the TTS queue processor thread ever holds a sink, so implementations
/// need not be `Send` (a cpal stream is not).
pub trait AudioSink {
    /// Queue `samples` for output.
    ///
    /// May block while the device catches up, but never for much longer
    /// than one frame, so the caller can check for cancellation between
    /// writes.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Audio`](crate::SpeechError::Audio) if the
    /// device has failed. The caller drops the sink and reopens it for the
    /// next item.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Block until everything written so far has been played.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails while draining.
    fn drain(&mut self) -> Result<()>;

    /// Discard audio that has been written but not yet played.
    fn clear(&mut self);

    /// Sample rate the sink expects, in Hz.
    fn sample_rate(&self) -> u32;
}

/// Builds a sink on the thread that will own it.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn AudioSink>> + Send>;

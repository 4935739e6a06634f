//! Error types for the voxline pipeline.

/// Top-level error type for the voice-interaction pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Audio device open/write failure. Skips the current item only.
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech synthesis error. Aborts the current item only.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language-model agent request or transport error.
    #[error("agent error: {0}")]
    Agent(String),

    /// Unexpected stream-event or tool-payload shape.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;

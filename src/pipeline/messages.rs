//! Message types passed between pipeline stages.

/// A sanitized sentence waiting in the TTS queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtsJob {
    /// Text to speak, already sanitized.
    pub text: String,
    /// Strictly increasing enqueue order. Diagnostics and tests only.
    pub sequence: u64,
    /// Utterance epoch the job was queued under. A job whose epoch is older
    /// than the queue's current epoch was cancelled and is never spoken.
    pub utterance: u64,
}

/// Captured audio to transcribe.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Correlates the request with its [`SttCompleted`](crate::PipelineEvent::SttCompleted) event.
    pub request_id: String,
    /// Mono samples in `[-1, 1]` (louder input is normalized).
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl TranscriptionRequest {
    /// Build a request with a fresh id.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            samples,
            sample_rate,
        }
    }

    /// Duration of the captured audio in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

//! Notifications emitted by the pipeline for the UI thread.
//!
//! Workers never touch UI-owned state. Everything the UI needs to know
//! arrives as a [`PipelineEvent`] on a single bounded channel that the UI
//! drains on its own thread.

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

/// Events that describe what the pipeline is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The queue processor started playing a sentence.
    SpeakingStarted {
        /// Sequence number of the job being spoken.
        sequence: u64,
    },
    /// The sentence finished playing, was cancelled, or failed.
    SpeakingEnded {
        /// Sequence number of the job that ended.
        sequence: u64,
        /// Whether playback stopped early because of a cancel.
        interrupted: bool,
    },
    /// Raw response text for live display, forwarded before segmentation.
    TextDelta { message_id: String, text: String },
    /// A transcription job finished (empty when cancelled or failed).
    SttCompleted { request_id: String, text: String },
    /// The agent started a tool call.
    ToolCall { id: String, name: String },
    /// The agent finished a tool call.
    ToolResult {
        id: String,
        name: String,
        /// Best-effort textual output for display.
        output_text: Option<String>,
    },
    /// The agent is updating its memory.
    MemoryUpdating { message_id: String },
    /// The response is complete; `text` is the final display text,
    /// including any formatted references.
    MessageComplete { message_id: String, text: String },
    /// A per-item failure. The pipeline keeps running.
    Error { message: String },
}

/// Create the notification channel.
///
/// The channel is bounded: a UI that stops draining it applies back-pressure
/// to the workers rather than losing events.
pub fn notification_channel(capacity: usize) -> (Notifier, Receiver<PipelineEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (Notifier { tx }, rx)
}

/// Sending half of the notification channel, cloned into every worker.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<PipelineEvent>,
}

impl Notifier {
    /// Send an event to the UI. A disconnected UI is not an error for the
    /// worker; the event is dropped and logged.
    pub fn emit(&self, event: PipelineEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("notification dropped, UI receiver gone: {:?}", e.0);
        }
    }

    /// Convenience for [`PipelineEvent::Error`].
    pub fn error(&self, message: impl Into<String>) {
        self.emit(PipelineEvent::Error {
            message: message.into(),
        });
    }
}

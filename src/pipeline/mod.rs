//! Pipeline coordination: cancellation, per-request stream consumption and
//! the controller that owns the long-lived workers.

pub mod cancel;
pub mod consumer;
pub mod controller;
pub mod messages;

pub use cancel::CancellationToken;
pub use consumer::ResponseStreamConsumer;
pub use controller::{Collaborators, PipelineController};
pub use messages::{TranscriptionRequest, TtsJob};

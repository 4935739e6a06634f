//! Audio I/O: the sink trait, its speaker and WAV implementations, and
//! microphone capture.

pub mod capture;
pub mod playback;
pub mod sink;
pub mod wav;

pub use capture::CpalCapture;
pub use playback::CpalPlayback;
pub use sink::{AudioSink, SinkFactory};
pub use wav::WavFileSink;

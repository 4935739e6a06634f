//! Shared test doubles for the speech pipeline's unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::audio::{AudioSink, SinkFactory};
use crate::error::{Result, SpeechError};
use crate::runtime::PipelineEvent;
use crate::tts::{FrameStream, SynthFrame, SynthesisEngine, TtsOptions};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct SinkLog {
    samples: Vec<f32>,
    write_sizes: Vec<usize>,
    drains: usize,
    clears: usize,
    opens: usize,
}

/// In-memory sink. Clones share one log, so a test can keep a clone while
/// the processor thread owns another.
#[derive(Clone)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    sample_rate: u32,
    write_delay: Duration,
}

impl RecordingSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            log: Arc::new(Mutex::new(SinkLog::default())),
            sample_rate,
            write_delay: Duration::ZERO,
        }
    }

    /// Sleep on every write, standing in for real-time playback.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn factory(&self) -> SinkFactory {
        self.factory_failing_first(0)
    }

    /// A factory whose first `failures` opens return an audio error.
    pub fn factory_failing_first(&self, failures: usize) -> SinkFactory {
        let template = self.clone();
        let attempts = AtomicUsize::new(0);
        Box::new(move || {
            if attempts.fetch_add(1, Ordering::SeqCst) < failures {
                return Err(SpeechError::Audio("device busy".into()));
            }
            template.log.lock().expect("sink log").opens += 1;
            Ok(Box::new(template.clone()) as Box<dyn AudioSink>)
        })
    }

    pub fn samples(&self) -> Vec<f32> {
        self.log.lock().expect("sink log").samples.clone()
    }

    pub fn write_sizes(&self) -> Vec<usize> {
        self.log.lock().expect("sink log").write_sizes.clone()
    }

    pub fn drains(&self) -> usize {
        self.log.lock().expect("sink log").drains
    }

    pub fn clears(&self) -> usize {
        self.log.lock().expect("sink log").clears
    }

    pub fn opens(&self) -> usize {
        self.log.lock().expect("sink log").opens
    }
}

impl AudioSink for RecordingSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        let mut log = self.log.lock().expect("sink log");
        log.samples.extend_from_slice(samples);
        log.write_sizes.push(samples.len());
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.log.lock().expect("sink log").drains += 1;
        Ok(())
    }

    fn clear(&mut self) {
        self.log.lock().expect("sink log").clears += 1;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Engine that "synthesizes" the same samples for every sentence and
/// records what it was asked to say.
pub struct ScriptedEngine {
    samples: Vec<f32>,
    chunk: usize,
    fail_on: Option<String>,
    spoken: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            chunk: 64,
            fail_on: None,
            spoken: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail `stream_tts` for exactly this text.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_owned());
        self
    }

    pub fn spoken(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.spoken)
    }
}

impl SynthesisEngine for ScriptedEngine {
    fn stream_tts(&mut self, text: &str, _options: &TtsOptions) -> Result<FrameStream> {
        if self.fail_on.as_deref() == Some(text) {
            return Err(SpeechError::Tts(format!("cannot synthesize '{text}'")));
        }
        self.spoken.lock().expect("spoken log").push(text.to_owned());
        let frames: Vec<Result<SynthFrame>> = self
            .samples
            .chunks(self.chunk)
            .map(|c| Ok(SynthFrame::Samples(c.to_vec())))
            .collect();
        Ok(Box::new(frames.into_iter()))
    }
}

/// Collect `count` speaking start/end events, ignoring everything else.
pub fn speaking_events(
    rx: &Receiver<PipelineEvent>,
    count: usize,
    timeout: Duration,
) -> Vec<PipelineEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while events.len() < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(
                event @ (PipelineEvent::SpeakingStarted { .. }
                | PipelineEvent::SpeakingEnded { .. }),
            ) => events.push(event),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    events
}

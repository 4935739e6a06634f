//! Serial speech queue and its dedicated processor thread.
//!
//! Sentences are spoken strictly in enqueue order, never overlapping. A
//! single long-lived thread owns the synthesis engine and the audio sink;
//! everything else talks to it through the [`TtsQueue`] handle.

use crate::audio::{AudioSink, SinkFactory};
use crate::error::{Result, SpeechError};
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::messages::TtsJob;
use crate::runtime::{Notifier, PipelineEvent};
use crate::tts::{PlayOutcome, SynthesisAdapter, SynthesisEngine, TtsOptions};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Whether the processor is currently playing a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Speaking,
}

/// Cloneable handle to the speech queue.
///
/// Producers enqueue under an utterance epoch obtained from
/// [`begin_utterance`](Self::begin_utterance). [`cancel`](Self::cancel)
/// stops the sentence being played, purges the queue and retires the
/// current epoch, so jobs from a cancelled utterance that race the purge
/// are still never spoken.
#[derive(Debug, Clone)]
pub struct TtsQueue {
    tx: Sender<TtsJob>,
    rx: Receiver<TtsJob>,
    epoch: Arc<AtomicU64>,
    cancel: CancellationToken,
    speaking: Arc<AtomicBool>,
    /// Accepted jobs not yet spoken, dropped or purged.
    pending: Arc<AtomicUsize>,
}

impl Default for TtsQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            epoch: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            speaking: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current utterance epoch. Jobs enqueued under it are spoken until the
    /// next [`cancel`](Self::cancel).
    pub fn begin_utterance(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Queue `text` for speech. Blank text is ignored and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Channel`] if the queue has been torn down.
    pub fn enqueue(&self, text: impl Into<String>, utterance: u64) -> Result<Option<u64>> {
        let text = text.into();
        if text.trim().is_empty() {
            return Ok(None);
        }
        let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::SeqCst);
        debug!(sequence, utterance, "enqueue: {text}");
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = self.tx.send(TtsJob {
            text,
            sequence,
            utterance,
        });
        if let Err(e) = sent {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SpeechError::Channel(format!("tts queue closed: {e}")));
        }
        Ok(Some(sequence))
    }

    /// Stop the current sentence and drop everything still queued.
    ///
    /// Returns the number of purged jobs.
    pub fn cancel(&self) -> usize {
        // Epoch first: a processor that resets the token and then checks the
        // epoch either sees the retired epoch or is cancelled afterwards.
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        let mut purged = 0;
        while self.rx.try_recv().is_ok() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            purged += 1;
        }
        info!("speech cancelled, purged {purged} queued sentence(s)");
        purged
    }

    /// Number of jobs waiting (excluding the one being played).
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True once every accepted sentence has been spoken, dropped or
    /// purged.
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Snapshot of the processor's state.
    pub fn playback_state(&self) -> PlaybackState {
        if self.speaking.load(Ordering::SeqCst) {
            PlaybackState::Speaking
        } else {
            PlaybackState::Idle
        }
    }

    /// The token the processor checks between frames.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[cfg(test)]
    pub(crate) fn try_pop(&self) -> Option<TtsJob> {
        let job = self.rx.try_recv().ok();
        if job.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        job
    }
}

/// Tunables for the processor thread.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// How long to block on an empty queue before checking for shutdown.
    pub poll_interval: Duration,
    /// Silence written before each sentence.
    pub preroll_samples: usize,
    /// Rate assumed for engine frames without their own rate.
    pub source_rate: u32,
    /// Rate of the sink.
    pub output_rate: u32,
    /// Maximum samples per sink write.
    pub frame_len: usize,
    pub voice: TtsOptions,
}

impl ProcessorOptions {
    pub fn from_config(config: &crate::config::SpeechConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.tts.queue_poll_ms.max(1)),
            preroll_samples: config.tts.preroll_samples,
            source_rate: config.tts.source_sample_rate,
            output_rate: config.audio.output_sample_rate,
            frame_len: config.audio.buffer_size as usize,
            voice: TtsOptions::from(&config.tts),
        }
    }
}

/// Owner of the speech thread.
pub struct TtsQueueProcessor {
    handle: Option<JoinHandle<()>>,
    shutdown: tokio_util::sync::CancellationToken,
    queue: TtsQueue,
}

impl TtsQueueProcessor {
    /// Start the processor thread for `queue`.
    ///
    /// The sink is not opened here: `sink_factory` runs on the processor
    /// thread when the first sentence arrives, and again after a sink fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(
        queue: TtsQueue,
        engine: Box<dyn SynthesisEngine>,
        sink_factory: SinkFactory,
        notifier: Notifier,
        options: ProcessorOptions,
    ) -> Result<Self> {
        let shutdown = tokio_util::sync::CancellationToken::new();
        let worker_queue = queue.clone();
        let worker_shutdown = shutdown.clone();
        let adapter =
            SynthesisAdapter::new(options.source_rate, options.output_rate, options.frame_len);
        let handle = std::thread::Builder::new()
            .name("voxline-tts".to_owned())
            .spawn(move || {
                // Built on this thread: the sink it opens never leaves it.
                Worker {
                    queue: worker_queue,
                    engine,
                    sink_factory,
                    sink: None,
                    notifier,
                    adapter,
                    options,
                    shutdown: worker_shutdown,
                }
                .run();
            })
            .map_err(|e| SpeechError::Pipeline(format!("failed to spawn tts thread: {e}")))?;
        Ok(Self {
            handle: Some(handle),
            shutdown,
            queue,
        })
    }

    pub fn queue(&self) -> &TtsQueue {
        &self.queue
    }

    /// Stop the thread and wait for it. Current playback is cancelled and
    /// the queue purged.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.cancel();
        self.queue.cancel();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("tts thread panicked");
        }
    }
}

impl Drop for TtsQueueProcessor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

struct Worker {
    queue: TtsQueue,
    engine: Box<dyn SynthesisEngine>,
    sink_factory: SinkFactory,
    sink: Option<Box<dyn AudioSink>>,
    notifier: Notifier,
    adapter: SynthesisAdapter,
    options: ProcessorOptions,
    shutdown: tokio_util::sync::CancellationToken,
}

impl Worker {
    fn run(mut self) {
        info!("tts processor started");
        while !self.shutdown.is_cancelled() {
            match self.queue.rx.recv_timeout(self.options.poll_interval) {
                Ok(job) => {
                    self.process(job);
                    self.queue.pending.fetch_sub(1, Ordering::SeqCst);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("tts processor stopped");
    }

    fn process(&mut self, job: TtsJob) {
        let cancel = &self.queue.cancel;
        cancel.reset();
        if job.utterance < self.queue.epoch.load(Ordering::SeqCst) {
            debug!(sequence = job.sequence, "dropping sentence from cancelled utterance");
            return;
        }

        self.queue.speaking.store(true, Ordering::SeqCst);
        self.notifier.emit(PipelineEvent::SpeakingStarted {
            sequence: job.sequence,
        });

        let interrupted = match self.speak(&job) {
            Ok(PlayOutcome::Completed) => false,
            Ok(PlayOutcome::Cancelled) => {
                debug!(sequence = job.sequence, "playback cancelled");
                true
            }
            Err(e) => {
                error!(sequence = job.sequence, "speech failed: {e}");
                if matches!(e, SpeechError::Audio(_)) {
                    // Reopened for the next sentence.
                    self.sink = None;
                }
                self.notifier.error(e.to_string());
                true
            }
        };

        self.queue.speaking.store(false, Ordering::SeqCst);
        self.notifier.emit(PipelineEvent::SpeakingEnded {
            sequence: job.sequence,
            interrupted,
        });
    }

    fn speak(&mut self, job: &TtsJob) -> Result<PlayOutcome> {
        let cancel = self.queue.cancel.clone();
        if self.sink.is_none() {
            self.sink = Some((self.sink_factory)()?);
        }
        let frames = self.engine.stream_tts(&job.text, &self.options.voice)?;
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| SpeechError::Audio("audio sink unavailable".into()))?;

        if cancel.is_cancelled() {
            sink.clear();
            return Ok(PlayOutcome::Cancelled);
        }
        if self.options.preroll_samples > 0 {
            sink.write(&vec![0.0; self.options.preroll_samples])?;
        }
        if sink.sample_rate() != self.options.output_rate {
            warn!(
                "sink plays at {} Hz but frames are resampled to {} Hz",
                sink.sample_rate(),
                self.options.output_rate
            );
        }
        self.adapter.play(frames, &mut **sink, &cancel)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::runtime::notification_channel;
    use crate::test_utils::{RecordingSink, ScriptedEngine, speaking_events};

    fn options() -> ProcessorOptions {
        ProcessorOptions {
            poll_interval: Duration::from_millis(10),
            preroll_samples: 0,
            source_rate: 16_000,
            output_rate: 16_000,
            frame_len: 160,
            voice: TtsOptions::default(),
        }
    }

    #[test]
    fn blank_text_is_not_queued() {
        let queue = TtsQueue::new();
        assert_eq!(queue.enqueue("   ", 0).unwrap(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn sequences_strictly_increase() {
        let queue = TtsQueue::new();
        let a = queue.enqueue("one.", 0).unwrap().unwrap();
        let b = queue.enqueue("two.", 0).unwrap().unwrap();
        assert!(b > a);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn cancel_purges_and_advances_epoch() {
        let queue = TtsQueue::new();
        let epoch = queue.begin_utterance();
        queue.enqueue("one.", epoch).unwrap();
        queue.enqueue("two.", epoch).unwrap();
        assert!(!queue.is_idle());
        assert_eq!(queue.cancel(), 2);
        assert!(queue.is_empty());
        assert!(queue.is_idle());
        assert!(queue.cancel_token().is_cancelled());
        assert_eq!(queue.begin_utterance(), epoch + 1);
    }

    #[test]
    fn cancel_token_is_never_set_before_the_epoch_advances() {
        let queue = TtsQueue::new();
        for _ in 0..1_000 {
            let token = queue.cancel_token();
            token.reset();
            let before = queue.begin_utterance();
            let observer = {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    while !token.is_cancelled() {
                        std::hint::spin_loop();
                    }
                    queue.begin_utterance()
                })
            };
            queue.cancel();
            assert_eq!(observer.join().unwrap(), before + 1);
        }
    }

    #[test]
    fn queue_is_idle_only_after_the_last_sentence_is_spoken() {
        let queue = TtsQueue::new();
        let sink = RecordingSink::new(16_000);
        let (notifier, _rx) = notification_channel(64);
        let processor = TtsQueueProcessor::spawn(
            queue.clone(),
            Box::new(ScriptedEngine::new(vec![0.1; 320])),
            sink.factory(),
            notifier,
            options(),
        )
        .unwrap();
        assert!(queue.is_idle());

        let utterance = queue.begin_utterance();
        queue.enqueue("One.", utterance).unwrap();
        queue.enqueue("Two.", utterance).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !queue.is_idle() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        processor.shutdown();
        assert!(queue.is_idle());
        assert_eq!(sink.samples().len(), 2 * 320);
    }

    #[test]
    fn speaks_in_order_with_paired_events() {
        let queue = TtsQueue::new();
        let sink = RecordingSink::new(16_000);
        let (notifier, rx) = notification_channel(64);
        let processor = TtsQueueProcessor::spawn(
            queue.clone(),
            Box::new(ScriptedEngine::new(vec![0.1; 320])),
            sink.factory(),
            notifier,
            options(),
        )
        .unwrap();

        let utterance = queue.begin_utterance();
        let seqs: Vec<u64> = ["A.", "B.", "C."]
            .iter()
            .map(|t| queue.enqueue(*t, utterance).unwrap().unwrap())
            .collect();

        let events = speaking_events(&rx, 6, Duration::from_secs(5));
        processor.shutdown();

        let mut expected = Vec::new();
        for seq in &seqs {
            expected.push(PipelineEvent::SpeakingStarted { sequence: *seq });
            expected.push(PipelineEvent::SpeakingEnded {
                sequence: *seq,
                interrupted: false,
            });
        }
        assert_eq!(events, expected);
        assert_eq!(sink.samples().len(), 3 * 320);
        assert_eq!(sink.opens(), 1);
    }

    #[test]
    fn stale_utterance_is_never_spoken() {
        let queue = TtsQueue::new();
        let sink = RecordingSink::new(16_000);
        let (notifier, rx) = notification_channel(64);
        let stale = queue.begin_utterance();
        queue.cancel();
        // Enqueued after the purge under the retired epoch.
        queue.enqueue("too late.", stale).unwrap();
        let fresh = queue.enqueue("on time.", queue.begin_utterance()).unwrap().unwrap();

        let processor = TtsQueueProcessor::spawn(
            queue.clone(),
            Box::new(ScriptedEngine::new(vec![0.1; 16])),
            sink.factory(),
            notifier,
            options(),
        )
        .unwrap();
        let events = speaking_events(&rx, 2, Duration::from_secs(5));
        processor.shutdown();

        assert_eq!(events[0], PipelineEvent::SpeakingStarted { sequence: fresh });
        assert_eq!(sink.samples().len(), 16);
    }

    #[test]
    fn synthesis_failure_is_reported_and_next_item_plays() {
        let queue = TtsQueue::new();
        let sink = RecordingSink::new(16_000);
        let (notifier, rx) = notification_channel(64);
        let engine = ScriptedEngine::new(vec![0.1; 16]).failing_on("broken.");
        let processor = TtsQueueProcessor::spawn(
            queue.clone(),
            Box::new(engine),
            sink.factory(),
            notifier,
            options(),
        )
        .unwrap();

        let u = queue.begin_utterance();
        let bad = queue.enqueue("broken.", u).unwrap().unwrap();
        let good = queue.enqueue("fine.", u).unwrap().unwrap();

        let mut saw_error = false;
        let mut ended = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ended.len() < 2 && std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(PipelineEvent::Error { .. }) => saw_error = true,
                Ok(PipelineEvent::SpeakingEnded {
                    sequence,
                    interrupted,
                }) => ended.push((sequence, interrupted)),
                _ => {}
            }
        }
        processor.shutdown();

        assert!(saw_error);
        assert_eq!(ended, vec![(bad, true), (good, false)]);
    }

    #[test]
    fn failed_sink_open_is_retried_on_next_item() {
        let queue = TtsQueue::new();
        let sink = RecordingSink::new(16_000);
        let (notifier, rx) = notification_channel(64);
        let processor = TtsQueueProcessor::spawn(
            queue.clone(),
            Box::new(ScriptedEngine::new(vec![0.1; 16])),
            sink.factory_failing_first(1),
            notifier,
            options(),
        )
        .unwrap();

        let u = queue.begin_utterance();
        queue.enqueue("first.", u).unwrap();
        queue.enqueue("second.", u).unwrap();
        let events = speaking_events(&rx, 4, Duration::from_secs(5));
        processor.shutdown();

        assert!(matches!(
            events[1],
            PipelineEvent::SpeakingEnded {
                interrupted: true,
                ..
            }
        ));
        assert!(matches!(
            events[3],
            PipelineEvent::SpeakingEnded {
                interrupted: false,
                ..
            }
        ));
        assert_eq!(sink.opens(), 1);
    }

    #[test]
    fn shutdown_returns_promptly_when_idle() {
        let queue = TtsQueue::new();
        let (notifier, _rx) = notification_channel(4);
        let processor = TtsQueueProcessor::spawn(
            queue.clone(),
            Box::new(ScriptedEngine::new(vec![0.0; 4])),
            RecordingSink::new(16_000).factory(),
            notifier,
            options(),
        )
        .unwrap();
        assert_eq!(queue.playback_state(), PlaybackState::Idle);
        let started = std::time::Instant::now();
        processor.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

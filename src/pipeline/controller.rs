//! Process-lifetime owner of the pipeline.
//!
//! Holds the speech queue and its processor thread, the transcription pool
//! and the notification channel. Each submitted prompt runs on its own
//! consumer thread; the UI only ever talks to the pipeline through this
//! type and hears back through [`PipelineEvent`]s.

use crate::agent::AgentStream;
use crate::audio::SinkFactory;
use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::consumer::ResponseStreamConsumer;
use crate::pipeline::messages::TranscriptionRequest;
use crate::runtime::{Notifier, PipelineEvent, notification_channel};
use crate::stt::{SpeechToText, SttWorkerPool};
use crate::text::{flush, sanitize, segment};
use crate::tts::queue::ProcessorOptions;
use crate::tts::{PlaybackState, SynthesisEngine, TtsQueue, TtsQueueProcessor};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// External collaborators the pipeline is wired to.
pub struct Collaborators {
    pub agent: Arc<dyn AgentStream>,
    pub synthesizer: Box<dyn SynthesisEngine>,
    /// Opens the audio output on the speech thread.
    pub sink_factory: SinkFactory,
    pub transcriber: Arc<dyn SpeechToText>,
}

/// A response currently streaming on a consumer thread.
struct ActiveRequest {
    message_id: String,
    muted: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Entry point for the UI.
pub struct PipelineController {
    config: SpeechConfig,
    agent: Arc<dyn AgentStream>,
    queue: TtsQueue,
    processor: Option<TtsQueueProcessor>,
    stt: Option<SttWorkerPool>,
    stt_cancel: CancellationToken,
    notifier: Notifier,
    active: Mutex<Vec<ActiveRequest>>,
}

impl PipelineController {
    /// Start the speech thread and transcription pool.
    ///
    /// Returns the controller and the receiving end of the notification
    /// channel, which the UI drains on its own thread.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn start(
        config: SpeechConfig,
        collaborators: Collaborators,
    ) -> Result<(Self, Receiver<PipelineEvent>)> {
        let (notifier, events) = notification_channel(config.pipeline.notification_capacity);
        let queue = TtsQueue::new();
        let processor = TtsQueueProcessor::spawn(
            queue.clone(),
            collaborators.synthesizer,
            collaborators.sink_factory,
            notifier.clone(),
            ProcessorOptions::from_config(&config),
        )?;
        let stt_cancel = CancellationToken::new();
        let stt = SttWorkerPool::new(
            collaborators.transcriber,
            config.stt.max_workers,
            stt_cancel.clone(),
            notifier.clone(),
        )?;
        info!("pipeline started");

        Ok((
            Self {
                config,
                agent: collaborators.agent,
                queue,
                processor: Some(processor),
                stt: Some(stt),
                stt_cancel,
                notifier,
                active: Mutex::new(Vec::new()),
            },
            events,
        ))
    }

    /// Stream a response to `prompt`. Returns the message id used in the
    /// request's notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer thread cannot be spawned.
    pub fn submit_text(&self, prompt: &str) -> Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let muted = Arc::new(AtomicBool::new(false));
        // Held until the request is registered, so a concurrent
        // stop_speaking either mutes it or retires the epoch it captured.
        let mut active = self.lock_active()?;
        let consumer = ResponseStreamConsumer::new(
            message_id.clone(),
            self.queue.clone(),
            self.notifier.clone(),
            &self.config.pipeline,
            Arc::clone(&muted),
        );
        let agent = Arc::clone(&self.agent);
        let notifier = self.notifier.clone();
        let prompt = prompt.to_owned();

        let handle = std::thread::Builder::new()
            .name("voxline-response".to_owned())
            .spawn(move || match agent.run(&prompt) {
                Ok(events) => {
                    consumer.run(events);
                }
                Err(e) => {
                    error!("agent run failed: {e}");
                    notifier.error(e.to_string());
                }
            })
            .map_err(|e| SpeechError::Pipeline(format!("failed to spawn consumer: {e}")))?;

        active.retain(|r| !r.handle.is_finished());
        active.push(ActiveRequest {
            message_id: message_id.clone(),
            muted,
            handle,
        });
        Ok(message_id)
    }

    /// Speak `text` without going through the agent.
    ///
    /// The text is segmented and sanitized like a streamed response and
    /// queued as one utterance. Returns the sequence numbers of the queued
    /// sentences, in speaking order.
    ///
    /// # Errors
    ///
    /// Returns an error if the speech thread has stopped.
    pub fn speak(&self, text: &str) -> Result<Vec<u64>> {
        let utterance = self.queue.begin_utterance();
        let out = segment(text, 0);
        let tail = flush(text, out.consumed);
        let mut sequences = Vec::new();
        for sentence in out.sentences.iter().chain(tail.iter()) {
            if let Some(sequence) = self.queue.enqueue(sanitize(sentence), utterance)? {
                sequences.push(sequence);
            }
        }
        Ok(sequences)
    }

    /// Transcribe captured audio off the calling thread.
    ///
    /// The transcript arrives on the returned receiver and as an
    /// [`PipelineEvent::SttCompleted`]; it is empty if the audio was
    /// cancelled or could not be transcribed. A new submission clears an
    /// earlier [`cancel_transcriptions`](Self::cancel_transcriptions).
    ///
    /// # Errors
    ///
    /// Returns an error after [`shutdown`](Self::shutdown).
    pub fn submit_audio(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<oneshot::Receiver<String>> {
        let stt = self
            .stt
            .as_ref()
            .ok_or_else(|| SpeechError::Pipeline("pipeline is shut down".into()))?;
        self.stt_cancel.reset();
        stt.submit(TranscriptionRequest::new(samples, sample_rate))
    }

    /// Discard the results of transcriptions in flight.
    pub fn cancel_transcriptions(&self) {
        self.stt_cancel.cancel();
    }

    /// Stop speaking now.
    ///
    /// Every active response is muted (its text keeps streaming to the
    /// display), the current sentence stops within one frame and the queue
    /// is purged. Returns the number of purged sentences.
    pub fn stop_speaking(&self) -> usize {
        match self.active.lock() {
            Ok(active) => {
                for request in active.iter() {
                    request.muted.store(true, Ordering::SeqCst);
                }
            }
            Err(e) => warn!("active request list poisoned: {e}"),
        }
        self.queue.cancel()
    }

    /// Snapshot of the speech thread's state.
    pub fn playback_state(&self) -> PlaybackState {
        self.queue.playback_state()
    }

    /// Ids of responses still streaming.
    pub fn active_requests(&self) -> Vec<String> {
        self.active
            .lock()
            .map(|active| {
                active
                    .iter()
                    .filter(|r| !r.handle.is_finished())
                    .map(|r| r.message_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Wait for every streaming response to finish.
    pub fn wait_for_responses(&self) {
        let handles: Vec<JoinHandle<()>> = match self.active.lock() {
            Ok(mut active) => active.drain(..).map(|r| r.handle).collect(),
            Err(e) => {
                warn!("active request list poisoned: {e}");
                return;
            }
        };
        for handle in handles {
            if handle.join().is_err() {
                error!("response consumer panicked");
            }
        }
    }

    /// The speech queue, for callers that enqueue text directly.
    pub fn queue(&self) -> &TtsQueue {
        &self.queue
    }

    /// Stop speaking, then stop the speech thread and the transcription
    /// pool. Responses still streaming are muted and left to finish on their
    /// own threads.
    pub fn shutdown(mut self) {
        self.stop_speaking();
        self.cancel_transcriptions();
        if let Some(processor) = self.processor.take() {
            processor.shutdown();
        }
        if let Some(stt) = self.stt.take() {
            stt.shutdown();
        }
        let still_running = self.active_requests().len();
        if still_running > 0 {
            info!("{still_running} response(s) still streaming at shutdown");
        }
        info!("pipeline stopped");
    }

    fn lock_active(&self) -> Result<std::sync::MutexGuard<'_, Vec<ActiveRequest>>> {
        self.active
            .lock()
            .map_err(|e| SpeechError::Pipeline(format!("active request list poisoned: {e}")))
    }
}

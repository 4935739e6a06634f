//! Speech-to-text off the UI thread.
//!
//! Transcription engines are blocking. [`SttWorkerPool`] runs them on a
//! fixed set of threads fed by a job channel, so submitting audio never
//! blocks the caller. Each job answers exactly once: on a one-shot receiver
//! and as an [`SttCompleted`](crate::PipelineEvent::SttCompleted) event.

pub mod http;

use crate::error::{Result, SpeechError};
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::messages::TranscriptionRequest;
use crate::runtime::{Notifier, PipelineEvent};
use crossbeam_channel::Sender;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

pub use http::HttpTranscriber;

/// A blocking transcription engine. May return an empty string.
pub trait SpeechToText: Send + Sync {
    /// Transcribe mono `samples` recorded at `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Stt`] if the engine fails.
    fn stt(&self, sample_rate: u32, samples: &[f32]) -> Result<String>;
}

/// Run one transcription, honouring `cancel`.
///
/// The token is checked before the engine is called and again as soon as it
/// returns; a cancellation at either point yields an empty transcript.
/// Audio louder than full scale is peak-normalized first.
///
/// # Errors
///
/// Propagates the engine's error.
pub fn transcribe(
    engine: &dyn SpeechToText,
    cancel: &CancellationToken,
    request: &TranscriptionRequest,
) -> Result<String> {
    if cancel.is_cancelled() {
        debug!(request_id = %request.request_id, "transcription cancelled before start");
        return Ok(String::new());
    }

    let peak = request
        .samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0f32, f32::max);
    let normalized;
    let samples = if peak > 1.0 {
        debug!("normalizing audio, peak was {peak:.3}");
        normalized = request.samples.iter().map(|s| s / peak).collect::<Vec<_>>();
        &normalized
    } else {
        &request.samples
    };

    let started = Instant::now();
    info!(
        "transcribing {:.1}s audio segment (peak={peak:.3})",
        request.duration_secs()
    );
    let text = engine.stt(request.sample_rate, samples)?;

    if cancel.is_cancelled() {
        debug!(request_id = %request.request_id, "transcription cancelled, discarding result");
        return Ok(String::new());
    }
    info!(
        "transcribed in {:.0}ms: \"{text}\"",
        started.elapsed().as_millis()
    );
    Ok(text.trim().to_owned())
}

struct SttJob {
    request: TranscriptionRequest,
    reply: oneshot::Sender<String>,
}

/// Bounded pool of transcription threads.
pub struct SttWorkerPool {
    tx: Option<Sender<SttJob>>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl SttWorkerPool {
    /// Start `max_workers` threads (at least one) sharing `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn new(
        engine: Arc<dyn SpeechToText>,
        max_workers: usize,
        cancel: CancellationToken,
        notifier: Notifier,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<SttJob>();
        let count = max_workers.max(1);
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let rx = rx.clone();
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            let notifier = notifier.clone();
            let handle = std::thread::Builder::new()
                .name(format!("voxline-stt-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        run_job(engine.as_ref(), &cancel, &notifier, job);
                    }
                })
                .map_err(|e| SpeechError::Pipeline(format!("failed to spawn stt worker: {e}")))?;
            workers.push(handle);
        }
        info!("STT pool started with {count} worker(s)");
        Ok(Self {
            tx: Some(tx),
            workers,
            cancel,
        })
    }

    /// Queue `request` for transcription.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Channel`] after [`shutdown`](Self::shutdown).
    pub fn submit(&self, request: TranscriptionRequest) -> Result<oneshot::Receiver<String>> {
        let (reply, rx) = oneshot::channel();
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SpeechError::Channel("stt pool is shut down".into()))?;
        tx.send(SttJob { request, reply })
            .map_err(|e| SpeechError::Channel(format!("stt queue closed: {}", e.0.request.request_id)))?;
        Ok(rx)
    }

    /// Token checked by every job.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Finish queued jobs and join the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("stt worker panicked");
            }
        }
    }
}

impl Drop for SttWorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_job(engine: &dyn SpeechToText, cancel: &CancellationToken, notifier: &Notifier, job: SttJob) {
    let SttJob { request, reply } = job;
    // A panicking engine must not take the worker down with it.
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        transcribe(engine, cancel, &request)
    }));
    let text = match outcome {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            error!(request_id = %request.request_id, "transcription failed: {e}");
            notifier.error(e.to_string());
            String::new()
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error!(request_id = %request.request_id, "transcription engine panicked: {message}");
            notifier.error(format!("transcription panicked: {message}"));
            String::new()
        }
    };
    notifier.emit(PipelineEvent::SttCompleted {
        request_id: request.request_id,
        text: text.clone(),
    });
    if reply.send(text).is_err() {
        debug!("transcript receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::runtime::notification_channel;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStt {
        calls: AtomicUsize,
        peaks: Mutex<Vec<f32>>,
    }

    impl SpeechToText for CountingStt {
        fn stt(&self, _sample_rate: u32, samples: &[f32]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
            self.peaks.lock().unwrap().push(peak);
            if samples.is_empty() {
                return Err(SpeechError::Stt("no audio".into()));
            }
            Ok(format!(" heard {} samples ", samples.len()))
        }
    }

    #[test]
    fn pre_set_token_skips_the_engine() {
        let engine = CountingStt::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let text = transcribe(&engine, &cancel, &TranscriptionRequest::new(vec![0.1; 8], 16_000))
            .unwrap();
        assert_eq!(text, "");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_during_call_discards_result() {
        struct CancellingStt(CancellationToken);
        impl SpeechToText for CancellingStt {
            fn stt(&self, _: u32, _: &[f32]) -> Result<String> {
                self.0.cancel();
                Ok("too late".into())
            }
        }
        let cancel = CancellationToken::new();
        let engine = CancellingStt(cancel.clone());
        let text = transcribe(&engine, &cancel, &TranscriptionRequest::new(vec![0.1], 16_000))
            .unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn loud_audio_is_peak_normalized() {
        let engine = CountingStt::default();
        let cancel = CancellationToken::new();
        let request = TranscriptionRequest::new(vec![0.5, -4.0, 2.0], 16_000);
        let text = transcribe(&engine, &cancel, &request).unwrap();
        assert_eq!(text, "heard 3 samples");
        let peak = engine.peaks.lock().unwrap()[0];
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn quiet_audio_is_passed_through() {
        let engine = CountingStt::default();
        let request = TranscriptionRequest::new(vec![0.25, -0.5], 16_000);
        transcribe(&engine, &CancellationToken::new(), &request).unwrap();
        assert_eq!(engine.peaks.lock().unwrap()[0], 0.5);
    }

    #[test]
    fn pool_answers_every_job_and_survives_failures() {
        let (notifier, events) = notification_channel(64);
        let pool = SttWorkerPool::new(
            Arc::new(CountingStt::default()),
            2,
            CancellationToken::new(),
            notifier,
        )
        .unwrap();

        let failing = pool.submit(TranscriptionRequest::new(Vec::new(), 16_000)).unwrap();
        let ok = pool.submit(TranscriptionRequest::new(vec![0.1; 4], 16_000)).unwrap();

        assert_eq!(failing.blocking_recv().unwrap(), "");
        assert_eq!(ok.blocking_recv().unwrap(), "heard 4 samples");
        pool.shutdown();

        let collected: Vec<PipelineEvent> = events.try_iter().collect();
        let completed = collected
            .iter()
            .filter(|e| matches!(e, PipelineEvent::SttCompleted { .. }))
            .count();
        let errors = collected
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Error { .. }))
            .count();
        assert_eq!(completed, 2);
        assert_eq!(errors, 1);
    }

    #[test]
    fn pool_survives_a_panicking_engine() {
        struct PanickingStt;
        impl SpeechToText for PanickingStt {
            fn stt(&self, _: u32, samples: &[f32]) -> Result<String> {
                if samples.is_empty() {
                    panic!("decoder blew up");
                }
                Ok("still here".into())
            }
        }

        let (notifier, events) = notification_channel(16);
        let pool =
            SttWorkerPool::new(Arc::new(PanickingStt), 1, CancellationToken::new(), notifier)
                .unwrap();

        let crashed = pool.submit(TranscriptionRequest::new(Vec::new(), 16_000)).unwrap();
        assert_eq!(crashed.blocking_recv().unwrap(), "");
        let next = pool.submit(TranscriptionRequest::new(vec![0.1; 4], 16_000)).unwrap();
        assert_eq!(next.blocking_recv().unwrap(), "still here");
        pool.shutdown();

        assert!(events.try_iter().any(|e| matches!(
            e,
            PipelineEvent::Error { ref message } if message.contains("decoder blew up")
        )));
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let (notifier, _events) = notification_channel(4);
        let mut pool = SttWorkerPool::new(
            Arc::new(CountingStt::default()),
            1,
            CancellationToken::new(),
            notifier,
        )
        .unwrap();
        pool.stop();
        assert!(matches!(
            pool.submit(TranscriptionRequest::new(vec![0.1], 16_000)),
            Err(SpeechError::Channel(_))
        ));
    }
}

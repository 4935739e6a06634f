//! Normalizes engine frames to the output format and feeds them to a sink.

use crate::audio::AudioSink;
use crate::error::Result;
use crate::pipeline::cancel::CancellationToken;
use crate::tts::{FrameStream, SynthFrame};
use tracing::{debug, warn};

/// How a single sentence's playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Every frame was written and the sink drained.
    Completed,
    /// The cancellation token was set; pending audio was discarded.
    Cancelled,
}

/// Converts heterogeneous engine output to mono f32 at a fixed rate.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisAdapter {
    /// Rate assumed for frames that do not carry one.
    source_rate: u32,
    /// Rate the sink plays at.
    output_rate: u32,
    /// Samples per sink write; bounds cancellation latency.
    frame_len: usize,
}

impl SynthesisAdapter {
    pub fn new(source_rate: u32, output_rate: u32, frame_len: usize) -> Self {
        Self {
            source_rate,
            output_rate,
            frame_len: frame_len.max(1),
        }
    }

    /// Normalize one frame. Returns `None` for frames with nothing playable.
    pub fn normalize(&self, frame: SynthFrame) -> Option<Vec<f32>> {
        let (rate, mut samples) = match frame {
            SynthFrame::Rated {
                sample_rate,
                samples,
            } => {
                let rate = if sample_rate == 0 {
                    debug!("frame without a sample rate, assuming {} Hz", self.source_rate);
                    self.source_rate
                } else {
                    sample_rate
                };
                (rate, samples)
            }
            SynthFrame::Samples(samples) => (self.source_rate, samples),
            SynthFrame::Bytes(bytes) => {
                if bytes.len() % 4 != 0 {
                    debug!("truncating {} trailing byte(s) of a pcm frame", bytes.len() % 4);
                }
                let samples = bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                (self.source_rate, samples)
            }
        };

        for s in &mut samples {
            if !s.is_finite() {
                *s = 0.0;
            }
        }
        if samples.is_empty() {
            return None;
        }
        let out = resample_linear(&samples, rate, self.output_rate);
        if out.is_empty() { None } else { Some(out) }
    }

    /// Play every frame of `frames` into `sink`.
    ///
    /// The token is checked before each write of at most `frame_len`
    /// samples. On cancel the sink's pending audio is cleared and the rest of
    /// the stream is dropped without being pulled.
    ///
    /// # Errors
    ///
    /// Returns the first engine or sink error. The caller treats it as a
    /// failure of this sentence only.
    pub fn play(
        &self,
        frames: FrameStream,
        sink: &mut dyn AudioSink,
        cancel: &CancellationToken,
    ) -> Result<PlayOutcome> {
        let mut skipped = 0usize;
        for frame in frames {
            if cancel.is_cancelled() {
                sink.clear();
                return Ok(PlayOutcome::Cancelled);
            }
            let Some(samples) = self.normalize(frame?) else {
                skipped += 1;
                continue;
            };
            for chunk in samples.chunks(self.frame_len) {
                if cancel.is_cancelled() {
                    sink.clear();
                    return Ok(PlayOutcome::Cancelled);
                }
                sink.write(chunk)?;
            }
        }
        if skipped > 0 {
            warn!("skipped {skipped} empty or malformed synthesis frame(s)");
        }
        if cancel.is_cancelled() {
            sink.clear();
            return Ok(PlayOutcome::Cancelled);
        }
        sink.drain()?;
        Ok(PlayOutcome::Completed)
    }
}

/// Linear-interpolation resampler for mono audio.
pub fn resample_linear(samples: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if samples.is_empty() || in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }
    if in_rate == out_rate {
        return samples.to_vec();
    }

    let ratio = out_rate as f64 / in_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = (i as f64) / ratio;
        let idx0 = (src.floor() as usize).min(last);
        let idx1 = (idx0 + 1).min(last);
        let frac = (src - src.floor()) as f32;
        out.push(samples[idx0] + (samples[idx1] - samples[idx0]) * frac);
    }
    out
}

//! Audio sink that records to a WAV file instead of the speakers.

use crate::audio::AudioSink;
use crate::error::{Result, SpeechError};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

/// Writes 16-bit mono PCM to a WAV file.
///
/// Every item spoken while the sink is open lands in the same file, in
/// playback order. The header is finalized when the sink is dropped.
pub struct WavFileSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    written: usize,
}

impl WavFileSink {
    /// Create (or truncate) `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| SpeechError::Audio(format!("failed to create wav writer: {e}")))?;
        info!("recording speech to {}", path.display());
        Ok(Self {
            writer: Some(writer),
            sample_rate,
            written: 0,
        })
    }

    /// Number of samples written so far.
    pub fn samples_written(&self) -> usize {
        self.written
    }

    /// Flush and finalize the WAV header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn finalize(mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer
                .finalize()
                .map_err(|e| SpeechError::Audio(format!("failed to finalize wav: {e}"))),
            None => Ok(()),
        }
    }

    fn writer(&mut self) -> Result<&mut hound::WavWriter<BufWriter<File>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| SpeechError::Audio("wav sink already finalized".into()))
    }
}

impl AudioSink for WavFileSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self.writer()?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(v)
                .map_err(|e| SpeechError::Audio(format!("failed to write wav sample: {e}")))?;
        }
        self.written += samples.len();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.writer()?
            .flush()
            .map_err(|e| SpeechError::Audio(format!("failed to flush wav: {e}")))
    }

    // A file has no pending audio to discard.
    fn clear(&mut self) {}

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.finalize()
        {
            warn!("failed to finalize wav on drop: {e}");
        }
    }
}

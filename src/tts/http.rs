//! Speech synthesis through an OpenAI-compatible HTTP server.
//!
//! Works with any server exposing `POST /v1/audio/speech`:
//! - Kokoro-FastAPI (`http://localhost:8880`)
//! - OpenAI, LocalAI, etc.
//!
//! Audio is requested as raw `pcm` (16-bit little-endian mono) and streamed
//! back in fixed-size chunks, so playback starts before the whole sentence
//! has been synthesized.

use crate::config::TtsConfig;
use crate::error::{Result, SpeechError};
use crate::tts::{FrameStream, SynthFrame, SynthesisEngine, TtsOptions};
use std::io::Read;
use tracing::{debug, info};

/// Synthesis engine backed by an HTTP speech endpoint.
pub struct HttpSpeechEngine {
    url: String,
    model: String,
    sample_rate: u32,
    chunk_bytes: usize,
    agent: ureq::Agent,
}

impl HttpSpeechEngine {
    pub fn new(config: &TtsConfig) -> Self {
        let trimmed = config.api_url.trim_end_matches('/');
        let base = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
        let url = format!("{base}/v1/audio/speech");
        info!("HTTP TTS configured: {url} model={}", config.model);
        Self {
            url,
            model: config.model.clone(),
            sample_rate: config.source_sample_rate,
            chunk_bytes: config.http_chunk_bytes.max(2),
            agent: ureq::agent(),
        }
    }
}

impl SynthesisEngine for HttpSpeechEngine {
    fn stream_tts(&mut self, text: &str, options: &TtsOptions) -> Result<FrameStream> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": options.voice,
            "speed": options.speed,
            "lang_code": options.lang,
            "response_format": "pcm",
            "stream": true,
        });
        let body_str = serde_json::to_string(&body)
            .map_err(|e| SpeechError::Tts(format!("JSON serialization failed: {e}")))?;
        debug!("synthesizing via {}: {text}", self.url);

        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e| match e {
                ureq::Error::Status(code, resp) => {
                    let detail = resp.into_string().unwrap_or_default();
                    SpeechError::Tts(format!("speech server returned {code}: {detail}"))
                }
                other => SpeechError::Tts(format!("speech request failed: {other}")),
            })?;

        Ok(Box::new(PcmFrames {
            reader: response.into_reader(),
            chunk_bytes: self.chunk_bytes,
            sample_rate: self.sample_rate,
            carry: None,
            done: false,
        }))
    }
}

/// Turns a 16-bit PCM byte stream into [`SynthFrame::Rated`] frames.
struct PcmFrames {
    reader: Box<dyn Read + Send + Sync + 'static>,
    chunk_bytes: usize,
    sample_rate: u32,
    // Odd byte left over from the previous read.
    carry: Option<u8>,
    done: bool,
}

impl Iterator for PcmFrames {
    type Item = Result<SynthFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_bytes];
        let n = match self.reader.read(&mut buf) {
            Ok(0) => {
                self.done = true;
                return None;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => 0,
            Err(e) => {
                self.done = true;
                return Some(Err(SpeechError::Tts(format!("speech stream read failed: {e}"))));
            }
        };

        let mut bytes = Vec::with_capacity(n + 1);
        bytes.extend(self.carry.take());
        bytes.extend_from_slice(&buf[..n]);
        if bytes.len() % 2 == 1 {
            self.carry = bytes.pop();
        }
        Some(Ok(SynthFrame::Rated {
            sample_rate: self.sample_rate,
            samples: pcm16_to_f32(&bytes),
        }))
    }
}

fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn frames(bytes: Vec<u8>, chunk_bytes: usize) -> Vec<SynthFrame> {
        PcmFrames {
            reader: Box::new(std::io::Cursor::new(bytes)),
            chunk_bytes,
            sample_rate: 24_000,
            carry: None,
            done: false,
        }
        .map(|f| f.unwrap())
        .collect()
    }

    #[test]
    fn pcm16_scales_to_unit_range() {
        let bytes = [0x00, 0x80, 0xFF, 0x7F, 0x00, 0x00];
        let out = pcm16_to_f32(&bytes);
        assert_eq!(out[0], -1.0);
        assert!((out[1] - 1.0).abs() < 1e-4);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn odd_chunk_boundary_carries_the_split_sample() {
        let samples: Vec<i16> = vec![100, -200, 300];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let decoded: Vec<f32> = frames(bytes, 3)
            .into_iter()
            .flat_map(|f| match f {
                SynthFrame::Rated {
                    sample_rate,
                    samples,
                } => {
                    assert_eq!(sample_rate, 24_000);
                    samples
                }
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        let expected: Vec<f32> = samples.iter().map(|&s| s as f32 / 32_768.0).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn endpoint_url_accepts_v1_suffix() {
        let config = TtsConfig {
            api_url: "http://localhost:8880/v1/".to_owned(),
            ..TtsConfig::default()
        };
        let engine = HttpSpeechEngine::new(&config);
        assert_eq!(engine.url, "http://localhost:8880/v1/audio/speech");
    }
}

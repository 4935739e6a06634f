//! Transcription through an OpenAI-compatible `/v1/audio/transcriptions`
//! endpoint (faster-whisper-server, whisper.cpp server, OpenAI).

use crate::config::SttConfig;
use crate::error::{Result, SpeechError};
use crate::stt::SpeechToText;
use reqwest::blocking::multipart::{Form, Part};
use std::io::Cursor;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Speech-to-text engine backed by an HTTP transcription server.
pub struct HttpTranscriber {
    url: String,
    model: String,
    language: Option<String>,
    // Built on first use, on a pool thread: the blocking client must not be
    // created inside an async runtime.
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpTranscriber {
    pub fn new(config: &SttConfig) -> Self {
        let trimmed = config.api_url.trim_end_matches('/');
        let base = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
        let url = format!("{base}/v1/audio/transcriptions");
        info!("HTTP STT configured: {url} model={}", config.model);
        Self {
            url,
            model: config.model.clone(),
            language: config.language.clone(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| SpeechError::Stt(format!("failed to build HTTP client: {e}")))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn form(&self, wav: Vec<u8>) -> Result<Form> {
        let file = Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::Stt(format!("invalid upload mime type: {e}")))?;
        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }
        Ok(form.part("file", file))
    }
}

impl SpeechToText for HttpTranscriber {
    fn stt(&self, sample_rate: u32, samples: &[f32]) -> Result<String> {
        let wav = encode_wav(sample_rate, samples)?;
        debug!("uploading {} bytes of audio to {}", wav.len(), self.url);

        let response = self
            .client()?
            .post(&self.url)
            .multipart(self.form(wav)?)
            .send()
            .map_err(|e| SpeechError::Stt(format!("transcription request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| SpeechError::Stt(format!("read error: {e}")))?;
        if !status.is_success() {
            return Err(SpeechError::Stt(format!(
                "transcription server returned {}: {text}",
                status.as_u16()
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| SpeechError::Stt(format!("JSON parse error: {e}")))?;
        json["text"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| SpeechError::Stt("response has no text field".into()))
    }
}

/// 16-bit mono WAV in memory.
fn encode_wav(sample_rate: u32, samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SpeechError::Stt(format!("failed to create wav writer: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(v)
                .map_err(|e| SpeechError::Stt(format!("failed to write wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SpeechError::Stt(format!("failed to finalize wav: {e}")))?;
    }
    Ok(cursor.into_inner())
}

//! Configuration types for the voice-interaction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Audio playback settings.
    pub audio: AudioConfig,
    /// Speech-to-text worker settings.
    pub stt: SttConfig,
    /// Language model (agent) settings.
    pub llm: LlmConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Stream consumer and notification settings.
    pub pipeline: PipelineConfig,
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output sample rate in Hz. Every synthesized frame is resampled to this rate.
    pub output_sample_rate: u32,
    /// Output frame size in samples (1024–2048 keeps cancellation latency low).
    pub buffer_size: u32,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Rate captured audio is downsampled to before transcription.
    pub input_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 44_100,
            buffer_size: 2048,
            output_device: None,
            input_device: None,
            input_sample_rate: 16_000,
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Maximum number of concurrent transcription jobs.
    pub max_workers: usize,
    /// Base URL of an OpenAI-compatible transcription server
    /// (`/v1/audio/transcriptions`).
    pub api_url: String,
    /// Transcription model identifier.
    pub model: String,
    /// ISO-639-1 language hint (None = let the server detect it).
    pub language: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            api_url: "http://localhost:8000".to_owned(),
            model: "whisper-1".to_owned(),
            language: Some("en".to_owned()),
        }
    }
}

/// OpenAI-compatible chat endpoint used by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the API server (with or without the `/v1` suffix).
    pub api_url: String,
    /// Model identifier sent with every request.
    pub api_model: String,
    /// Bearer token (empty = no `Authorization` header).
    pub api_key: String,
    /// System prompt prepended to the conversation.
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per response.
    pub max_tokens: usize,
    /// Number of user/assistant messages kept in history (system prompt excluded).
    pub max_history_messages: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            // Ollama's OpenAI-compatible endpoint.
            api_url: "http://localhost:11434".to_owned(),
            api_model: "qwen2.5:14b-instruct-q8_0".to_owned(),
            api_key: String::new(),
            system_prompt: "You are a helpful research assistant. Answer concisely; \
                            your replies are read aloud."
                .to_owned(),
            temperature: 0.7,
            max_tokens: 1024,
            max_history_messages: 24,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Base URL of an OpenAI-compatible speech server (`/v1/audio/speech`).
    pub api_url: String,
    /// Speech model identifier.
    pub model: String,
    /// Voice name (e.g. "bf_emma").
    pub voice: String,
    /// Speech speed multiplier (0.5–2.0).
    pub speed: f32,
    /// Language code passed to the engine.
    pub lang: String,
    /// Sample rate the engine emits when a frame does not carry its own rate.
    pub source_sample_rate: u32,
    /// How long the queue processor blocks on an empty queue before polling
    /// for shutdown, in milliseconds.
    pub queue_poll_ms: u64,
    /// Samples of silence written before each item to prime the device.
    pub preroll_samples: usize,
    /// Bytes read from the speech server per frame.
    pub http_chunk_bytes: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8880".to_owned(),
            model: "kokoro".to_owned(),
            voice: "bf_emma".to_owned(),
            speed: 1.0,
            lang: "en-us".to_owned(),
            source_sample_rate: 24_000,
            queue_poll_ms: 500,
            preroll_samples: 1024,
            http_chunk_bytes: 4096,
        }
    }
}

/// Stream consumer and notification channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the notification channel into the UI loop.
    pub notification_capacity: usize,
    /// Short utterance spoken when the agent starts a tool call (empty = silent).
    pub tool_call_filler: String,
    /// Whether completed sentences are spoken at all.
    pub speak_responses: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            notification_capacity: 256,
            tool_call_filler: "Researching.".to_owned(),
            speak_responses: true,
        }
    }
}

impl SpeechConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SpeechError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voxline/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/voxline-config"))
            .join("voxline")
            .join("config.toml")
    }

    /// Returns the default log directory: `<data dir>/voxline/logs`.
    pub fn default_log_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("voxline")
            .join("logs")
    }
}

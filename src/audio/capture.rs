//! Microphone recording using cpal.
//!
//! Records at the device's native sample rate and converts to mono at the
//! configured input rate for transcription.

use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use crate::tts::adapter::resample_linear;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Push-to-talk recorder for the system microphone.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    /// Rate of the returned recording (e.g. 16kHz).
    target_sample_rate: u32,
}

impl CpalCapture {
    /// Open the configured input device.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then converts in software.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| SpeechError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| SpeechError::Audio("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| SpeechError::Audio(format!("no default input config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
        })
    }

    /// Rate of the samples returned by [`record`](Self::record).
    pub fn sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Record until `stop` is cancelled and return mono samples at
    /// [`sample_rate`](Self::sample_rate).
    ///
    /// # Errors
    ///
    /// Returns an error if the input stream cannot be created.
    pub async fn record(&self, stop: CancellationToken) -> Result<Vec<f32>> {
        let native_rate = self.stream_config.sample_rate;
        let channels = self.stream_config.channels;
        let recorded = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = Arc::clone(&recorded);

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = sink.lock() {
                        if channels > 1 {
                            buf.extend(to_mono(data, channels));
                        } else {
                            buf.extend_from_slice(data);
                        }
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| SpeechError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| SpeechError::Audio(format!("failed to start input stream: {e}")))?;
        info!("recording at {native_rate}Hz, {channels} channel(s)");

        stop.cancelled().await;
        drop(stream);

        let samples = std::mem::take(
            &mut *recorded
                .lock()
                .map_err(|e| SpeechError::Audio(format!("recording buffer poisoned: {e}")))?,
        );
        info!(
            "recorded {:.1}s of audio",
            samples.len() as f32 / native_rate.max(1) as f32
        );
        Ok(resample_linear(&samples, native_rate, self.target_sample_rate))
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

//! Audio playback to system speakers via cpal.

use crate::audio::AudioSink;
use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// How often a blocked writer re-checks the device buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Audio playback to system speakers via cpal.
///
/// One output stream stays open for the lifetime of the value. Writes are
/// appended to a shared buffer that the device callback drains; a writer
/// blocks once more than two frames are pending, which bounds how much
/// audio is already committed when a cancel arrives.
pub struct CpalPlayback {
    // Kept alive for its callback; dropping it closes the device.
    _stream: cpal::Stream,
    shared: Arc<SharedBuffer>,
    high_water: usize,
    sample_rate: u32,
}

/// State shared with the device callback.
struct SharedBuffer {
    pending: Mutex<VecDeque<f32>>,
    failed: AtomicBool,
}

impl CpalPlayback {
    /// Open the configured output device and start a silent stream.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available or the stream
    /// cannot be started.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| SpeechError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| SpeechError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!(
            "using output device: {device_name} ({} Hz, frame {})",
            config.output_sample_rate, config.buffer_size
        );

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(SharedBuffer {
            pending: Mutex::new(VecDeque::new()),
            failed: AtomicBool::new(false),
        });
        let callback_shared = Arc::clone(&shared);
        let error_shared = Arc::clone(&shared);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let Ok(mut pending) = callback_shared.pending.lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for sample in data.iter_mut() {
                        *sample = pending.pop_front().unwrap_or(0.0);
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                    error_shared.failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| SpeechError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| SpeechError::Audio(format!("failed to start output stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            shared,
            high_water: (config.buffer_size as usize).max(256) * 2,
            sample_rate: config.output_sample_rate,
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }

    fn pending_len(&self) -> Result<usize> {
        self.check_failed()?;
        self.shared
            .pending
            .lock()
            .map(|p| p.len())
            .map_err(|e| SpeechError::Audio(format!("playback buffer lock poisoned: {e}")))
    }

    fn check_failed(&self) -> Result<()> {
        if self.shared.failed.load(Ordering::SeqCst) {
            return Err(SpeechError::Audio("output stream failed".into()));
        }
        Ok(())
    }
}

impl AudioSink for CpalPlayback {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        while self.pending_len()? > self.high_water {
            std::thread::sleep(POLL_INTERVAL);
        }
        self.shared
            .pending
            .lock()
            .map_err(|e| SpeechError::Audio(format!("playback buffer lock poisoned: {e}")))?
            .extend(samples.iter().copied());
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        while self.pending_len()? > 0 {
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    fn clear(&mut self) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.clear();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

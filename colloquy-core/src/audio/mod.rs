//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate, block on a lock, or perform I/O. The callback here
//! only downmixes into a reused scratch buffer and pushes into the lock-free
//! SPSC ring; everything else (resampling, framing, encoding) happens on the
//! session relay thread.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `MicCapture` must therefore be created and dropped on the same
//! thread; the session controller opens it inside the relay thread.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    buffering::{AudioProducer, Producer},
    error::{ColloquyError, Result},
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active microphone capture stream.
///
/// Not `Send`: bound to its creation thread. The `running` flag gates the
/// callback; once it reads `false` the callback no-ops until the stream is
/// dropped, so deactivation is immediate even before the device is released.
pub struct MicCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: cpal::Stream,
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Downmix an interleaved frame block to mono into `out`.
///
/// `to_f32` converts one raw sample to normalized f32.
#[cfg(feature = "audio-cpal")]
fn downmix_to_mono<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    if channels == 1 {
        for (dst, src) in out.iter_mut().zip(data.iter()) {
            *dst = to_f32(*src);
        }
        return;
    }
    for (f, dst) in out.iter_mut().enumerate() {
        let base = f * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += to_f32(data[base + c]);
        }
        *dst = sum / channels as f32;
    }
}

impl MicCapture {
    /// Open an input device by preferred name, falling back to the system
    /// default and then the first available device.
    ///
    /// Echo cancellation and noise suppression are the capture backend's
    /// responsibility; cpal exposes no knobs for them, so whatever the OS
    /// audio stack provides is what the model hears.
    ///
    /// # Errors
    /// `ColloquyError::NoDefaultInputDevice` when no microphone exists, or
    /// `ColloquyError::AudioStream` if cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected = None;

        if let Some(preferred) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected = devices
                        .find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                    if selected.is_none() {
                        warn!("preferred input device '{preferred}' not found, falling back");
                    }
                }
                Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
            }
        }

        let device = if let Some(device) = selected {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| ColloquyError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(ColloquyError::NoDefaultInputDevice)?;
            warn!("no default input device, using first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening microphone"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| ColloquyError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = channels as usize;
        let running_cb = Arc::clone(&running);
        let mut scratch: Vec<f32> = Vec::new();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_to_mono(data, ch, &mut scratch, |s| s);
                    let written = producer.push_slice(&scratch);
                    if written < scratch.len() {
                        warn!("capture ring full: dropped {} samples", scratch.len() - written);
                    }
                },
                |err| error!("capture stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_to_mono(data, ch, &mut scratch, |s| s as f32 / 32768.0);
                    let written = producer.push_slice(&scratch);
                    if written < scratch.len() {
                        warn!("capture ring full: dropped {} samples", scratch.len() - written);
                    }
                },
                |err| error!("capture stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(ColloquyError::AudioStream(format!(
                    "unsupported capture sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ColloquyError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ColloquyError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl MicCapture {
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(ColloquyError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

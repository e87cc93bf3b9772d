//! Output device abstraction for scheduled playback.
//!
//! The scheduler talks to a [`OutputSink`]: a monotonic clock plus
//! "start this buffer at exactly time T" and "stop that buffer now". The
//! production implementation is [`CpalSink`], which hosts a cpal output
//! stream on a dedicated thread (cpal streams are `!Send`) and crosses into
//! the real-time callback exclusively through a crossbeam command channel
//! and an atomic frame counter. The callback never locks or allocates.

#[cfg(feature = "audio-cpal")]
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::codec::DecodedAudio;
#[cfg(feature = "audio-cpal")]
use crate::error::ColloquyError;
use crate::error::Result;

/// Identifier for one scheduled buffer on the output device.
pub type PlaybackId = u64;

/// An output device that plays buffers at explicit start times against its
/// own monotonic clock.
///
/// Implementations must treat `stop` of an unknown or already-finished id as
/// a benign no-op; interruption stops every live handle without checking
/// which ones already drained naturally.
pub trait OutputSink: Send {
    /// Sample rate this sink plays at (Hz).
    fn sample_rate(&self) -> u32;

    /// Channel count this sink accepts.
    fn channels(&self) -> u16;

    /// Current position of the device clock, in seconds since the sink
    /// opened. Monotonic, advances only while the device runs.
    fn current_time(&self) -> f64;

    /// Schedule `audio` to begin playing at `start_time` (device clock).
    ///
    /// The caller guarantees `start_time` is not in the past and that the
    /// buffer matches the sink's rate and channel count; the scheduler
    /// rejects mismatched buffers before they ever reach a sink.
    fn schedule(&mut self, audio: DecodedAudio, start_time: f64) -> Result<PlaybackId>;

    /// Stop a scheduled or playing buffer immediately. Idempotent.
    fn stop(&mut self, id: PlaybackId) -> Result<()>;
}

/// Commands crossing from the sink handle to the real-time callback.
#[cfg(feature = "audio-cpal")]
enum SinkCommand {
    Schedule {
        id: PlaybackId,
        start_frame: u64,
        samples: Vec<f32>,
    },
    Stop {
        id: PlaybackId,
    },
}

/// One buffer inside the callback's mix timeline.
#[cfg(feature = "audio-cpal")]
struct MixEntry {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<f32>,
    cursor: usize,
}

/// cpal-backed [`OutputSink`] playing 24 kHz mono by default.
///
/// The cpal stream lives on a dedicated playback thread (created in
/// [`CpalSink::open`]) because `cpal::Stream` is `!Send`; the handle itself
/// is `Send` and only holds the command channel, the frame clock, and the
/// thread's shutdown signal.
#[cfg(feature = "audio-cpal")]
pub struct CpalSink {
    cmd_tx: crossbeam_channel::Sender<SinkCommand>,
    frames_emitted: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u16,
    next_id: PlaybackId,
    shutdown: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(feature = "audio-cpal")]
impl CpalSink {
    /// Open the system default output device at `sample_rate` Hz mono.
    ///
    /// Blocks until the playback thread confirms the stream is running.
    pub fn open(sample_rate: u32) -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use tracing::{error, info};

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<SinkCommand>();
        let frames_emitted = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let frames_cb = Arc::clone(&frames_emitted);
        let shutdown_thread = Arc::clone(&shutdown);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("colloquy-playback".into())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_output_device() else {
                    let _ = open_tx.send(Err(ColloquyError::NoDefaultOutputDevice));
                    return;
                };

                info!(
                    device = device.name().unwrap_or_default().as_str(),
                    sample_rate, "opening playback device"
                );

                let config = cpal::StreamConfig {
                    channels: 1,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let mut entries: Vec<MixEntry> = Vec::new();
                let stream = match device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _info| {
                        while let Ok(cmd) = cmd_rx.try_recv() {
                            match cmd {
                                SinkCommand::Schedule {
                                    id,
                                    start_frame,
                                    samples,
                                } => entries.push(MixEntry {
                                    id,
                                    start_frame,
                                    samples,
                                    cursor: 0,
                                }),
                                SinkCommand::Stop { id } => entries.retain(|e| e.id != id),
                            }
                        }

                        let base = frames_cb.load(Ordering::Relaxed);
                        for (i, slot) in out.iter_mut().enumerate() {
                            let t = base + i as u64;
                            let mut acc = 0f32;
                            for entry in entries.iter_mut() {
                                if entry.start_frame <= t && entry.cursor < entry.samples.len() {
                                    acc += entry.samples[entry.cursor];
                                    entry.cursor += 1;
                                }
                            }
                            *slot = acc.clamp(-1.0, 1.0);
                        }
                        entries.retain(|e| e.cursor < e.samples.len());
                        frames_cb.fetch_add(out.len() as u64, Ordering::Relaxed);
                    },
                    |err| error!("playback stream error: {err}"),
                    None,
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = open_tx.send(Err(ColloquyError::AudioStream(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = open_tx.send(Err(ColloquyError::AudioStream(e.to_string())));
                    return;
                }
                let _ = open_tx.send(Ok(()));

                // Keep the !Send stream alive on this thread until shutdown.
                while !shutdown_thread.load(Ordering::Acquire) {
                    std::thread::park_timeout(std::time::Duration::from_millis(50));
                }
                drop(stream);
            })
            .map_err(|e| ColloquyError::AudioStream(format!("playback thread spawn: {e}")))?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                frames_emitted,
                sample_rate,
                channels: 1,
                next_id: 0,
                shutdown,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(ColloquyError::AudioStream(
                "playback thread died before confirming open".into(),
            )),
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl OutputSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn current_time(&self) -> f64 {
        self.frames_emitted.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, audio: DecodedAudio, start_time: f64) -> Result<PlaybackId> {
        let id = self.next_id;
        self.next_id += 1;

        let start_frame = (start_time.max(0.0) * self.sample_rate as f64).round() as u64;
        self.cmd_tx
            .send(SinkCommand::Schedule {
                id,
                start_frame,
                samples: audio.samples,
            })
            .map_err(|_| ColloquyError::SinkClosed)?;
        Ok(id)
    }

    fn stop(&mut self, id: PlaybackId) -> Result<()> {
        // A closed channel means nothing is audible anyway.
        let _ = self.cmd_tx.send(SinkCommand::Stop { id });
        Ok(())
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

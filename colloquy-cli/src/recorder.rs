//! WAV tap for received model speech.
//!
//! Wraps the real playback sink and writes every scheduled buffer to a
//! 24 kHz mono 16-bit WAV file as it goes to the device. Debug aid only;
//! playback timing is untouched.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colloquy_core::codec::DecodedAudio;
use colloquy_core::error::Result;
use colloquy_core::playback::{OutputSink, PlaybackId, PLAYBACK_SAMPLE_RATE};
use parking_lot::Mutex;
use tracing::warn;

type Writer = hound::WavWriter<BufWriter<File>>;

/// Shared handle to the WAV file; clones feed the same writer.
#[derive(Clone)]
pub struct WavTap {
    writer: Arc<Mutex<Option<Writer>>>,
}

impl WavTap {
    /// Create the WAV file up front so path errors surface before start.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: PLAYBACK_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("creating WAV file {}", path.display()))?;
        Ok(Self {
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn append(&self, samples: &[f32]) {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            if let Err(e) = writer.write_sample(value) {
                warn!("WAV write failed, stopping the tap: {e}");
                *guard = None;
                return;
            }
        }
    }

    /// Flush and close the file. Later writes are silently ignored.
    pub fn finalize(&self) {
        if let Some(writer) = self.writer.lock().take() {
            if let Err(e) = writer.finalize() {
                warn!("WAV finalize failed: {e}");
            }
        }
    }
}

/// An [`OutputSink`] that tees scheduled audio into a [`WavTap`].
pub struct TeeSink {
    inner: Box<dyn OutputSink>,
    tap: WavTap,
}

impl TeeSink {
    pub fn new(inner: Box<dyn OutputSink>, tap: WavTap) -> Self {
        Self { inner, tap }
    }
}

impl OutputSink for TeeSink {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn current_time(&self) -> f64 {
        self.inner.current_time()
    }

    fn schedule(&mut self, audio: DecodedAudio, start_time: f64) -> Result<PlaybackId> {
        self.tap.append(&audio.samples);
        self.inner.schedule(audio, start_time)
    }

    fn stop(&mut self, id: PlaybackId) -> Result<()> {
        self.inner.stop(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::playback::PLAYBACK_CHANNELS;

    struct NullSink;

    impl OutputSink for NullSink {
        fn sample_rate(&self) -> u32 {
            PLAYBACK_SAMPLE_RATE
        }

        fn channels(&self) -> u16 {
            PLAYBACK_CHANNELS
        }

        fn current_time(&self) -> f64 {
            0.0
        }

        fn schedule(&mut self, _audio: DecodedAudio, _start_time: f64) -> Result<PlaybackId> {
            Ok(0)
        }

        fn stop(&mut self, _id: PlaybackId) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tee_writes_scheduled_samples_to_the_wav_file() {
        let path = std::env::temp_dir().join(format!(
            "colloquy-tap-test-{}.wav",
            std::process::id()
        ));
        let tap = WavTap::create(&path).expect("create tap");
        let mut sink = TeeSink::new(Box::new(NullSink), tap.clone());

        let audio = DecodedAudio::new(vec![0.5; 240], PLAYBACK_SAMPLE_RATE, PLAYBACK_CHANNELS);
        sink.schedule(audio, 0.0).expect("schedule through tee");
        tap.finalize();

        let reader = hound::WavReader::open(&path).expect("open recorded wav");
        assert_eq!(reader.spec().sample_rate, PLAYBACK_SAMPLE_RATE);
        assert_eq!(reader.len(), 240);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn finalize_is_idempotent_and_later_writes_are_ignored() {
        let path = std::env::temp_dir().join(format!(
            "colloquy-tap-idem-{}.wav",
            std::process::id()
        ));
        let tap = WavTap::create(&path).expect("create tap");
        tap.finalize();
        tap.finalize();
        tap.append(&[0.1; 16]);
        let _ = std::fs::remove_file(&path);
    }
}

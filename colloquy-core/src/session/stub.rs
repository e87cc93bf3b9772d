//! `EchoConnector` — in-process loopback stream used before a real transport
//! is wired in.
//!
//! Every capture chunk sent outbound is decoded, naively resampled from the
//! 16 kHz capture rate to the 24 kHz playback rate, and delivered straight
//! back as an inbound [`ServerEvent::Audio`]. The full engine path (gate →
//! encode → stream → decode → schedule → sink) can therefore be exercised
//! end-to-end with nothing but a microphone and speakers: you hear yourself
//! with a slight pitch-true delay.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::capture::CAPTURE_SAMPLE_RATE;
use crate::codec::{decode_pcm16, encode_pcm16, wire::WireAudioChunk};
use crate::error::{ColloquyError, Result};
use crate::playback::PLAYBACK_SAMPLE_RATE;
use crate::session::stream::{
    DuplexStream, OpenStream, ServerEvent, StreamConfig, StreamConnector,
};

/// Transcript emitted every [`TRANSCRIPT_EVERY_CHUNKS`] echoed chunks, so
/// hosts can exercise their transcript path against the stub.
const STUB_TRANSCRIPT: &str = "[echo]";
const TRANSCRIPT_EVERY_CHUNKS: u64 = 8;

/// Loopback [`StreamConnector`].
#[derive(Default)]
pub struct EchoConnector {
    /// Control text messages received by every stream this connector opened.
    control_log: Arc<Mutex<Vec<String>>>,
}

impl EchoConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared log of control texts, for hosts and tests.
    pub fn control_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.control_log)
    }
}

impl StreamConnector for EchoConnector {
    fn connect(&mut self, config: &StreamConfig) -> Result<OpenStream> {
        debug!(language = config.language.name(), "echo stream opened");
        let (event_tx, events) = unbounded();
        Ok(OpenStream {
            stream: Box::new(EchoStream {
                event_tx,
                control_log: Arc::clone(&self.control_log),
                open: true,
                chunks_echoed: 0,
            }),
            events,
        })
    }
}

struct EchoStream {
    event_tx: Sender<ServerEvent>,
    control_log: Arc<Mutex<Vec<String>>>,
    open: bool,
    chunks_echoed: u64,
}

impl EchoStream {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(ColloquyError::Stream("echo stream is closed".into()))
        }
    }
}

impl DuplexStream for EchoStream {
    fn send_audio(&mut self, chunk: &WireAudioChunk) -> Result<()> {
        self.ensure_open()?;

        let bytes = chunk.decode_payload()?;
        let Some(audio) = decode_pcm16(&bytes, CAPTURE_SAMPLE_RATE, 1) else {
            return Err(ColloquyError::Stream("unusable echo payload".into()));
        };

        let upsampled = resample_linear(&audio.samples, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE);
        let echoed = WireAudioChunk::from_pcm(&encode_pcm16(&upsampled), PLAYBACK_SAMPLE_RATE);
        self.event_tx
            .send(ServerEvent::Audio(echoed))
            .map_err(|_| ColloquyError::Stream("echo receiver dropped".into()))?;

        self.chunks_echoed += 1;
        if self.chunks_echoed % TRANSCRIPT_EVERY_CHUNKS == 0 {
            let _ = self
                .event_tx
                .send(ServerEvent::Transcript(STUB_TRANSCRIPT.into()));
        }
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        self.ensure_open()?;
        self.control_log.lock().push(text.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            let _ = self.event_tx.send(ServerEvent::Closed { reason: None });
        }
        Ok(())
    }
}

/// Linear-interpolation resampler, good enough for a loopback demo.
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::language::{system_instruction, SupportedLanguage};
    use crate::session::stream::ResponseModality;

    fn open_echo() -> (OpenStream, Arc<Mutex<Vec<String>>>) {
        let mut connector = EchoConnector::new();
        let log = connector.control_log();
        let open = connector
            .connect(&StreamConfig {
                language: SupportedLanguage::Kannada,
                response_modality: ResponseModality::Audio,
                system_instruction: system_instruction(SupportedLanguage::Kannada),
            })
            .expect("echo connect cannot fail");
        (open, log)
    }

    #[test]
    fn echoes_audio_back_at_the_playback_rate() {
        let (mut open, _log) = open_echo();

        let outbound =
            WireAudioChunk::from_pcm(&encode_pcm16(&vec![0.25; 1600]), CAPTURE_SAMPLE_RATE);
        open.stream.send_audio(&outbound).unwrap();

        match open.events.try_recv().expect("echoed event") {
            ServerEvent::Audio(chunk) => {
                assert_eq!(chunk.sample_rate(), Some(PLAYBACK_SAMPLE_RATE));
                // 1600 samples at 16 kHz become 2400 at 24 kHz.
                assert_eq!(chunk.decode_payload().unwrap().len(), 2400 * 2);
            }
            other => panic!("expected audio event, got {other:?}"),
        }
    }

    #[test]
    fn control_texts_are_logged_not_echoed() {
        let (mut open, log) = open_echo();

        open.stream.send_text("Please switch to Hindi.").unwrap();
        assert_eq!(log.lock().as_slice(), &["Please switch to Hindi."]);
        assert!(open.events.try_recv().is_err());
    }

    #[test]
    fn close_emits_closed_and_rejects_further_sends() {
        let (mut open, _log) = open_echo();

        open.stream.close().unwrap();
        assert!(matches!(
            open.events.try_recv(),
            Ok(ServerEvent::Closed { .. })
        ));
        assert!(open.stream.send_text("anything").is_err());

        // Double close is a no-op.
        open.stream.close().unwrap();
    }

    #[test]
    fn linear_resampling_preserves_constant_signals() {
        let out = resample_linear(&[0.5; 160], 16_000, 24_000);
        assert_eq!(out.len(), 240);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }
}

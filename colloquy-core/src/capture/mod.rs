//! Outbound capture encoding: mic frames → wire chunks.
//!
//! The encoder is driven by the capture cadence alone (one 4096-sample frame
//! ≈ 256 ms at 16 kHz); there is no polling. Each frame passes a peak-energy
//! silence gate, is PCM16-encoded, base64-wrapped, and handed to the active
//! duplex stream. A frame that fails anywhere is logged and dropped; the
//! cadence must never stall on a single bad frame.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, warn};

use crate::{
    buffering::frame::AudioFrame,
    codec::{encode_pcm16, wire::WireAudioChunk},
    session::stream::DuplexStream,
};

/// Sample rate of the outbound capture path (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Samples per outbound frame: 4096 ≈ 256 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = 4_096;

/// A frame whose peak |sample| is below this is treated as silence and not
/// sent. Bandwidth optimization only; a misclassified quiet frame is lost,
/// never retried.
pub const SILENCE_PEAK_THRESHOLD: f32 = 0.01;

/// What became of one capture frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Encoded and handed to the stream.
    Sent,
    /// Below the silence gate; dropped before encoding.
    Gated,
    /// Streaming is deactivated; dropped without encoding.
    Inactive,
    /// Encode or send failed; logged and dropped.
    Failed,
}

/// Encodes live capture frames into [`WireAudioChunk`]s for the outbound
/// stream.
pub struct CaptureEncoder {
    /// Checked before every send. The session controller clears it on stop;
    /// the encoder itself never stops the capture device.
    streaming: Arc<AtomicBool>,
    threshold: f32,
}

impl CaptureEncoder {
    pub fn new(streaming: Arc<AtomicBool>, threshold: f32) -> Self {
        Self {
            streaming,
            threshold,
        }
    }

    /// Process one capture frame end to end.
    pub fn process_frame(
        &mut self,
        frame: &AudioFrame,
        stream: &mut dyn DuplexStream,
    ) -> FrameOutcome {
        if !self.streaming.load(Ordering::Relaxed) {
            return FrameOutcome::Inactive;
        }

        if is_silent(&frame.samples, self.threshold) {
            return FrameOutcome::Gated;
        }

        let chunk = WireAudioChunk::from_pcm(&encode_pcm16(&frame.samples), CAPTURE_SAMPLE_RATE);
        match stream.send_audio(&chunk) {
            Ok(()) => {
                debug!(seq = frame.seq, samples = frame.samples.len(), "frame sent");
                FrameOutcome::Sent
            }
            Err(e) => {
                warn!(seq = frame.seq, error = %e, "dropping frame after send failure");
                FrameOutcome::Failed
            }
        }
    }
}

/// Peak-amplitude silence test: true when no sample exceeds `threshold`.
fn is_silent(samples: &[f32], threshold: f32) -> bool {
    samples.iter().all(|s| s.abs() < threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ColloquyError, Result};

    /// Records sent chunks; optionally fails every send.
    struct RecordingStream {
        sent: Vec<WireAudioChunk>,
        texts: Vec<String>,
        fail_sends: bool,
    }

    impl RecordingStream {
        fn new(fail_sends: bool) -> Self {
            Self {
                sent: Vec::new(),
                texts: Vec::new(),
                fail_sends,
            }
        }
    }

    impl DuplexStream for RecordingStream {
        fn send_audio(&mut self, chunk: &WireAudioChunk) -> Result<()> {
            if self.fail_sends {
                return Err(ColloquyError::Stream("intentional test failure".into()));
            }
            self.sent.push(chunk.clone());
            Ok(())
        }

        fn send_text(&mut self, text: &str) -> Result<()> {
            self.texts.push(text.to_string());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn frame(samples: Vec<f32>, seq: u64) -> AudioFrame {
        AudioFrame { samples, seq }
    }

    fn active_flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[test]
    fn loud_frame_is_encoded_and_sent() {
        let mut enc = CaptureEncoder::new(active_flag(), SILENCE_PEAK_THRESHOLD);
        let mut stream = RecordingStream::new(false);

        let outcome = enc.process_frame(&frame(vec![0.5; 64], 0), &mut stream);
        assert_eq!(outcome, FrameOutcome::Sent);
        assert_eq!(stream.sent.len(), 1);
        assert_eq!(stream.sent[0].mime_type, "audio/pcm;rate=16000");
        assert_eq!(stream.sent[0].decode_payload().unwrap().len(), 128);
    }

    #[test]
    fn silent_frame_is_gated_not_sent() {
        let mut enc = CaptureEncoder::new(active_flag(), SILENCE_PEAK_THRESHOLD);
        let mut stream = RecordingStream::new(false);

        let outcome = enc.process_frame(&frame(vec![0.0009; 64], 1), &mut stream);
        assert_eq!(outcome, FrameOutcome::Gated);
        assert!(stream.sent.is_empty());
    }

    #[test]
    fn single_over_threshold_sample_defeats_the_gate() {
        let mut enc = CaptureEncoder::new(active_flag(), SILENCE_PEAK_THRESHOLD);
        let mut stream = RecordingStream::new(false);

        let mut samples = vec![0.0; 64];
        samples[40] = -0.02;
        let outcome = enc.process_frame(&frame(samples, 2), &mut stream);
        assert_eq!(outcome, FrameOutcome::Sent);
    }

    #[test]
    fn deactivated_streaming_drops_loud_frames() {
        let flag = active_flag();
        let mut enc = CaptureEncoder::new(Arc::clone(&flag), SILENCE_PEAK_THRESHOLD);
        let mut stream = RecordingStream::new(false);

        flag.store(false, Ordering::Relaxed);
        let outcome = enc.process_frame(&frame(vec![0.5; 64], 3), &mut stream);
        assert_eq!(outcome, FrameOutcome::Inactive);
        assert!(stream.sent.is_empty());
    }

    #[test]
    fn send_failure_does_not_poison_subsequent_frames() {
        let mut enc = CaptureEncoder::new(active_flag(), SILENCE_PEAK_THRESHOLD);

        let mut failing = RecordingStream::new(true);
        assert_eq!(
            enc.process_frame(&frame(vec![0.5; 64], 4), &mut failing),
            FrameOutcome::Failed
        );

        let mut working = RecordingStream::new(false);
        assert_eq!(
            enc.process_frame(&frame(vec![0.5; 64], 5), &mut working),
            FrameOutcome::Sent
        );
    }
}

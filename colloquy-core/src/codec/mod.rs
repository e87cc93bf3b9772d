//! PCM16 wire codec.
//!
//! The live model speaks signed 16-bit little-endian PCM in both directions:
//! 16 kHz mono outbound (microphone) and 24 kHz mono inbound (synthesized
//! speech). This module converts between that byte format and the normalized
//! f32 samples the rest of the engine works with.
//!
//! Both functions are pure. `decode_pcm16` deliberately returns `Option`
//! rather than `Result`: a truncated or odd-length payload is not worth
//! surfacing to the session, the caller just drops it and moves on.

pub mod wire;

/// A block of decoded audio ready for playback scheduling.
///
/// Owned exclusively by the playback scheduler from decode until it is either
/// scheduled on the output device or discarded by an interruption.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (24 000 for inbound model speech).
    pub sample_rate: u32,
    /// Channel count (always 1 for the live model).
    pub channels: u16,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Playback duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels as usize) as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encode normalized f32 samples as PCM16-LE bytes.
///
/// Samples are clamped to [-1.0, 1.0] first. Scaling is asymmetric: negative
/// values map onto [-32768, 0) and non-negative values onto [0, 32767], so
/// both rails are reachable without overflow.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * 32767.0) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode PCM16-LE bytes into a [`DecodedAudio`] buffer.
///
/// Returns `None` when the payload is unusable: fewer than two bytes, or an
/// odd byte count (a dangling half-sample means the chunk was truncated in
/// transit). Callers treat `None` as "drop silently", not as an error.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Option<DecodedAudio> {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return None;
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| {
            let word = u16::from_le_bytes([pair[0], pair[1]]);
            // Words above i16::MAX are negative values seen through u16.
            let signed = if word > 32767 {
                word as i32 - 65536
            } else {
                word as i32
            };
            signed as f32 / 32768.0
        })
        .collect();

    Some(DecodedAudio::new(samples, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn encode_scales_rails_asymmetrically() {
        let bytes = encode_pcm16(&[-1.0, 0.0, 1.0]);
        assert_eq!(bytes, vec![0x00, 0x80, 0x00, 0x00, 0xFF, 0x7F]);
    }

    #[test]
    fn encode_clamps_out_of_range_input() {
        let bytes = encode_pcm16(&[-2.5, 1.5]);
        assert_eq!(bytes, encode_pcm16(&[-1.0, 1.0]));
    }

    #[test]
    fn decode_empty_returns_none() {
        assert!(decode_pcm16(&[], 24_000, 1).is_none());
    }

    #[test]
    fn decode_odd_length_returns_none() {
        assert!(decode_pcm16(&[0x00, 0x01, 0x02], 24_000, 1).is_none());
    }

    #[test]
    fn decode_reconstructs_signed_rails() {
        let audio = decode_pcm16(&[0x00, 0x80, 0xFF, 0x7F], 24_000, 1).unwrap();
        assert_eq!(audio.samples.len(), 2);
        assert_abs_diff_eq!(audio.samples[0], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(audio.samples[1], 32767.0 / 32768.0, epsilon = 1e-6);
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.channels, 1);
    }

    #[test]
    fn round_trip_within_one_quantization_step() {
        let original: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.8)
            .collect();

        let decoded = decode_pcm16(&encode_pcm16(&original), 16_000, 1).unwrap();
        assert_eq!(decoded.samples.len(), original.len());
        for (a, b) in original.iter().zip(decoded.samples.iter()) {
            assert!(
                (a - b).abs() <= 1.0 / 32768.0,
                "sample drifted more than one step: {a} vs {b}"
            );
        }
    }

    #[test]
    fn duration_reflects_rate_and_channel_count() {
        let mono = DecodedAudio::new(vec![0.0; 2400], 24_000, 1);
        assert_abs_diff_eq!(mono.duration_secs(), 0.1, epsilon = 1e-9);

        let stereo = DecodedAudio::new(vec![0.0; 2400], 24_000, 2);
        assert_abs_diff_eq!(stereo.duration_secs(), 0.05, epsilon = 1e-9);
    }
}

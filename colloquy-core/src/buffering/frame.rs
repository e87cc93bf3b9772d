//! Fixed-size frame assembly for the outbound capture path.
//!
//! The capture device delivers samples in whatever block sizes the backend
//! chooses; the wire wants exact 4096-sample frames. `FrameAssembler`
//! accumulates incoming samples and emits complete frames, carrying the
//! remainder over to the next call.

/// One fixed-length window of capture audio, tagged with its sequence order.
///
/// Ephemeral: created once per capture cadence tick, discarded after encode.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0], always exactly the frame length.
    pub samples: Vec<f32>,
    /// Monotonically increasing capture order, starting at 0.
    pub seq: u64,
}

/// Accumulates arbitrary-size sample blocks into exact fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    pending: Vec<f32>,
    next_seq: u64,
}

impl FrameAssembler {
    /// # Panics
    /// Panics if `frame_len` is zero.
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len > 0, "frame length must be non-zero");
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
            next_seq: 0,
        }
    }

    /// Feed samples in; get every now-complete frame out, in capture order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            let full = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame {
                samples: full,
                seq: self.next_seq,
            });
            self.next_seq += 1;
        }
        frames
    }

    /// Samples currently buffered toward the next frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard any partial frame and restart the sequence counter.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_seq = 0;
    }
}

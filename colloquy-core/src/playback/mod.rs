//! Gapless playback scheduling with instant cancellation.
//!
//! ## Algorithm
//!
//! ```text
//! inbound chunk ──decode──► queue (FIFO) ──drain tick──► sink.schedule(buf, t)
//!                                              │             t = next_scheduled_time
//!                                              │             next_scheduled_time += duration
//!                                              └──► live set of handles (for barge-in)
//! ```
//!
//! Gaplessness comes from the clock cursor: every buffer starts exactly where
//! the previous one ends, not "now". The cursor is resynchronized to
//! `current_time + lead margin` whenever the device clock has caught up with
//! it, so a buffer is never scheduled in the past.
//!
//! Scheduling happens on *drain ticks*, never inside the arrival call: an
//! arrival appends to the queue and requests a drain, and the driving loop
//! runs [`PlaybackScheduler::drain_tick`] until the queue is empty. Each tick
//! schedules at most [`MAX_BUFFERS_PER_TICK`] buffers, so a burst of chunks
//! can never monopolize the loop. The `busy` flag makes the request
//! idempotent: chunks arriving while a drain cycle is pending just queue up
//! behind it instead of starting a second, interleaved cycle.
//!
//! Interruption models voice "barge-in": the user spoke over the model, so
//! every queued and in-flight buffer must vanish at once, and the clock
//! cursor snaps back to the present for whatever the model says next.

pub mod sink;

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::codec::wire::WireAudioChunk;
use crate::codec::{self, DecodedAudio};

pub use sink::{OutputSink, PlaybackId};

/// Sample rate of inbound model speech (Hz).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Channel count of inbound model speech.
pub const PLAYBACK_CHANNELS: u16 = 1;

/// Margin added when resynchronizing the clock cursor, so the first buffer
/// after a resync still lands slightly ahead of the device clock (seconds).
pub const LEAD_MARGIN_SECS: f64 = 0.05;

/// Upper bound on buffers scheduled per drain tick.
pub const MAX_BUFFERS_PER_TICK: usize = 5;

/// One buffer currently scheduled (or playing) on the output device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledHandle {
    pub id: PlaybackId,
    /// Device-clock time this buffer starts.
    pub start_time: f64,
    /// Buffer duration in seconds.
    pub duration: f64,
}

impl ScheduledHandle {
    /// Device-clock time this buffer ends.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Result of an arrival or a drain tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Queue is empty and no drain cycle is pending.
    Idle,
    /// Buffers remain queued; the driving loop must keep ticking.
    Rescheduled,
    /// A drain cycle was already pending; the arrival only queued.
    Busy,
}

/// FIFO jitter buffer plus continuous-time scheduler over an [`OutputSink`].
pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    queue: VecDeque<DecodedAudio>,
    live: Vec<ScheduledHandle>,
    /// Device-clock time at which the next buffer will begin.
    next_scheduled_time: f64,
    /// True while a drain cycle is pending; guards against a second,
    /// interleaved cycle being started by a concurrent arrival.
    busy: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        let next_scheduled_time = sink.current_time() + LEAD_MARGIN_SECS;
        Self {
            sink,
            queue: VecDeque::new(),
            live: Vec::new(),
            next_scheduled_time,
            busy: false,
        }
    }

    /// Decode an inbound wire chunk, append it, and request a drain.
    ///
    /// Undecodable chunks (bad base64, truncated PCM) are dropped silently;
    /// transient loss is expected in real-time audio and must not disturb
    /// the cadence.
    pub fn on_chunk_arrived(&mut self, chunk: &WireAudioChunk) -> DrainStatus {
        match chunk.decode_payload() {
            Ok(bytes) => {
                match codec::decode_pcm16(&bytes, PLAYBACK_SAMPLE_RATE, PLAYBACK_CHANNELS) {
                    Some(audio) => return self.enqueue(audio),
                    None => debug!(len = bytes.len(), "dropping undecodable PCM chunk"),
                }
            }
            Err(e) => debug!(error = %e, "dropping chunk with bad payload"),
        }
        self.status()
    }

    /// Append a decoded buffer to the queue tail and request a drain.
    ///
    /// Buffers that would be rejected by the output device (empty, or a
    /// rate/channel mismatch) are refused here and never submitted.
    pub fn enqueue(&mut self, audio: DecodedAudio) -> DrainStatus {
        if audio.is_empty()
            || audio.sample_rate != self.sink.sample_rate()
            || audio.channels != self.sink.channels()
        {
            warn!(
                samples = audio.samples.len(),
                sample_rate = audio.sample_rate,
                channels = audio.channels,
                "rejecting buffer incompatible with output sink"
            );
            return self.status();
        }

        self.queue.push_back(audio);
        self.request_drain()
    }

    /// Mark a drain cycle pending (idempotent) and resync the clock cursor
    /// if the device has caught up with it.
    fn request_drain(&mut self) -> DrainStatus {
        if self.busy {
            return DrainStatus::Busy;
        }
        if self.queue.is_empty() {
            return DrainStatus::Idle;
        }

        self.reap_finished();
        self.resync_cursor();
        self.busy = true;
        DrainStatus::Rescheduled
    }

    /// Run one bounded scheduling batch of a pending drain cycle.
    ///
    /// The driving loop calls this once per iteration while it returns
    /// [`DrainStatus::Rescheduled`]; yielding between calls is what keeps a
    /// deep queue from monopolizing the thread.
    pub fn drain_tick(&mut self) -> DrainStatus {
        if !self.busy {
            return DrainStatus::Idle;
        }

        // The cursor may have fallen behind if the loop stalled between
        // ticks; never schedule in the past.
        self.resync_cursor();

        let mut processed = 0;
        while processed < MAX_BUFFERS_PER_TICK {
            let Some(audio) = self.queue.pop_front() else {
                break;
            };
            processed += 1;

            let duration = audio.duration_secs();
            let start_time = self.next_scheduled_time;
            match self.sink.schedule(audio, start_time) {
                Ok(id) => {
                    // Register in the live set before advancing the cursor;
                    // the live set must always cover everything submitted.
                    self.live.push(ScheduledHandle {
                        id,
                        start_time,
                        duration,
                    });
                    self.next_scheduled_time = start_time + duration;
                }
                Err(e) => {
                    // One failed buffer is dropped; the cursor does not
                    // advance past audio that will never play.
                    warn!(error = %e, "dropping buffer after schedule failure");
                }
            }
        }

        if self.queue.is_empty() {
            self.busy = false;
            DrainStatus::Idle
        } else {
            DrainStatus::Rescheduled
        }
    }

    /// Barge-in: synchronously discard everything queued and audible.
    ///
    /// After this returns the queue and live set are empty, no drain cycle
    /// is pending, and the clock cursor sits at the device's current time so
    /// the next chunk starts immediately rather than at a stale future
    /// offset.
    pub fn interrupt(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();

        let stopped = self.live.len();
        for handle in std::mem::take(&mut self.live) {
            // Stopping an already-finished buffer is a benign no-op.
            if let Err(e) = self.sink.stop(handle.id) {
                debug!(id = handle.id, error = %e, "stop of finished handle ignored");
            }
        }

        self.busy = false;
        self.next_scheduled_time = self.sink.current_time();
        info!(dropped, stopped, "playback interrupted");
    }

    /// Remove handles whose buffers finished playing naturally.
    ///
    /// Keeps the live set equal to "what is audible or pending right now",
    /// which is the only invariant interruption relies on.
    pub fn reap_finished(&mut self) {
        let now = self.sink.current_time();
        self.live.retain(|h| h.end_time() > now);
    }

    /// Whether a drain cycle is pending and the loop must keep ticking.
    pub fn needs_tick(&self) -> bool {
        self.busy
    }

    /// Buffers received but not yet scheduled.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Handles currently scheduled or playing.
    pub fn live_handles(&self) -> &[ScheduledHandle] {
        &self.live
    }

    /// Device-clock time the next buffer would start at.
    pub fn next_scheduled_time(&self) -> f64 {
        self.next_scheduled_time
    }

    /// Current device clock reading.
    pub fn device_time(&self) -> f64 {
        self.sink.current_time()
    }

    fn resync_cursor(&mut self) {
        let now = self.sink.current_time();
        if now >= self.next_scheduled_time {
            self.next_scheduled_time = now + LEAD_MARGIN_SECS;
        }
    }

    fn status(&self) -> DrainStatus {
        if self.busy {
            DrainStatus::Busy
        } else {
            DrainStatus::Idle
        }
    }
}

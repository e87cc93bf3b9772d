//! Blocking relay loop: one thread, both directions.
//!
//! ## Per-iteration stages
//!
//! ```text
//! 1. Apply pending session commands (language change)
//! 2. Drain capture ring → resample to 16 kHz → assemble 4096-sample frames
//!    → silence gate → encode → stream.send_audio
//! 3. Drain inbound events → scheduler.on_chunk_arrived / interrupt /
//!    transcript broadcast (+ language-switch detection)
//! 4. Reap finished playback handles; run a continuation drain tick if the
//!    previous tick hit its batch limit
//! 5. Sleep briefly when nothing happened
//! ```
//!
//! The browser original ran both directions as callbacks on one cooperative
//! event loop; here a single blocking thread interleaves them, so every
//! scheduler mutation runs to completion before the next event is looked at.
//! The thread owns the microphone stream and the outbound stream handle; the
//! controller reaches the scheduler only through its shared mutex.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{frame::FrameAssembler, AudioConsumer, Consumer},
    capture::{CaptureEncoder, FrameOutcome, CAPTURE_SAMPLE_RATE, FRAME_SAMPLES},
    playback::PlaybackScheduler,
    session::{
        events::{SessionState, SessionStatusEvent, TranscriptEvent},
        language::{detect_language_request, switch_instruction, SupportedLanguage},
        stream::{DuplexStream, ServerEvent},
    },
};

/// Samples drained from the capture ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when an iteration had nothing to do, to avoid burning a core.
const IDLE_SLEEP_MS: u64 = 5;

/// Commands from the controller to the relay thread.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Switch the tutoring language mid-session.
    SetLanguage(SupportedLanguage),
}

/// Relay counters for observability.
#[derive(Default)]
pub struct SessionDiagnostics {
    pub samples_in: AtomicUsize,
    pub frames_assembled: AtomicUsize,
    pub frames_gated: AtomicUsize,
    pub chunks_sent: AtomicUsize,
    pub send_errors: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub transcripts: AtomicUsize,
    pub interrupts: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.frames_assembled.store(0, Ordering::Relaxed);
        self.frames_gated.store(0, Ordering::Relaxed);
        self.chunks_sent.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.transcripts.store(0, Ordering::Relaxed);
        self.interrupts.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            frames_assembled: self.frames_assembled.load(Ordering::Relaxed),
            frames_gated: self.frames_gated.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            transcripts: self.transcripts.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub frames_assembled: usize,
    pub frames_gated: usize,
    pub chunks_sent: usize,
    pub send_errors: usize,
    pub chunks_received: usize,
    pub transcripts: usize,
    pub interrupts: usize,
}

/// Everything the relay loop needs, passed as one struct.
pub struct RelayContext {
    pub consumer: AudioConsumer,
    pub capture_sample_rate: u32,
    pub encoder: CaptureEncoder,
    pub stream: Box<dyn DuplexStream>,
    pub events: Receiver<ServerEvent>,
    pub commands: Receiver<SessionCommand>,
    pub scheduler: Arc<Mutex<Option<PlaybackScheduler>>>,
    pub running: Arc<AtomicBool>,
    pub streaming: Arc<AtomicBool>,
    pub state: Arc<Mutex<SessionState>>,
    pub transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub seq: Arc<AtomicU64>,
    pub language: Arc<Mutex<SupportedLanguage>>,
    pub auto_language_switch: bool,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// Run the relay until `ctx.running` becomes false or the remote ends the
/// stream. Performs full teardown of the stream and playback before
/// returning; the caller drops the microphone afterwards.
pub fn run(mut ctx: RelayContext) {
    info!("relay started");

    let mut converter = match RateConverter::new(
        ctx.capture_sample_rate,
        CAPTURE_SAMPLE_RATE,
        DRAIN_CHUNK,
    ) {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to create capture resampler: {e}");
            ctx.running.store(false, Ordering::SeqCst);
            teardown(&mut ctx, Some(format!("capture resampler failed: {e}")));
            return;
        }
    };

    let mut assembler = FrameAssembler::new(FRAME_SAMPLES);
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut close_detail: Option<String> = None;

    'relay: loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }
        let mut did_work = false;

        // ── 1. Controller commands ────────────────────────────────────────
        while let Ok(cmd) = ctx.commands.try_recv() {
            did_work = true;
            match cmd {
                SessionCommand::SetLanguage(lang) => {
                    apply_language_switch(&mut ctx, lang);
                }
            }
        }

        // ── 2. Outbound: ring → frames → encode → stream ──────────────────
        let popped = ctx.consumer.pop_slice(&mut raw);
        if popped > 0 {
            did_work = true;
            ctx.diagnostics
                .samples_in
                .fetch_add(popped, Ordering::Relaxed);

            let resampled = converter.process(&raw[..popped]);
            for frame in assembler.push(&resampled) {
                ctx.diagnostics
                    .frames_assembled
                    .fetch_add(1, Ordering::Relaxed);
                match ctx.encoder.process_frame(&frame, ctx.stream.as_mut()) {
                    FrameOutcome::Sent => {
                        ctx.diagnostics.chunks_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    FrameOutcome::Gated => {
                        ctx.diagnostics.frames_gated.fetch_add(1, Ordering::Relaxed);
                    }
                    FrameOutcome::Failed => {
                        ctx.diagnostics.send_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    FrameOutcome::Inactive => {}
                }
            }
        }

        // ── 3. Inbound: events → scheduler / transcripts ──────────────────
        loop {
            match ctx.events.try_recv() {
                Ok(ServerEvent::Audio(chunk)) => {
                    did_work = true;
                    ctx.diagnostics
                        .chunks_received
                        .fetch_add(1, Ordering::Relaxed);
                    if let Some(scheduler) = ctx.scheduler.lock().as_mut() {
                        scheduler.on_chunk_arrived(&chunk);
                    }
                }
                Ok(ServerEvent::Transcript(text)) => {
                    did_work = true;
                    ctx.diagnostics.transcripts.fetch_add(1, Ordering::Relaxed);
                    emit_transcript(&mut ctx, &text);

                    if ctx.auto_language_switch {
                        let current = *ctx.language.lock();
                        if let Some(requested) = detect_language_request(&text) {
                            if requested != current {
                                info!(
                                    from = current.name(),
                                    to = requested.name(),
                                    "language change detected in transcript"
                                );
                                apply_language_switch(&mut ctx, requested);
                            }
                        }
                    }
                }
                Ok(ServerEvent::Interrupted) => {
                    did_work = true;
                    ctx.diagnostics.interrupts.fetch_add(1, Ordering::Relaxed);
                    if let Some(scheduler) = ctx.scheduler.lock().as_mut() {
                        scheduler.interrupt();
                    }
                }
                Ok(ServerEvent::Closed { reason }) => {
                    info!(reason = ?reason, "remote closed the stream");
                    close_detail = reason;
                    ctx.running.store(false, Ordering::SeqCst);
                    break 'relay;
                }
                Ok(ServerEvent::Error(message)) => {
                    warn!(error = %message, "remote stream error");
                    close_detail = Some(message);
                    ctx.running.store(false, Ordering::SeqCst);
                    break 'relay;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("inbound event channel disconnected");
                    close_detail = Some("stream event channel closed".into());
                    ctx.running.store(false, Ordering::SeqCst);
                    break 'relay;
                }
            }
        }

        // ── 4. Playback housekeeping ──────────────────────────────────────
        if let Some(scheduler) = ctx.scheduler.lock().as_mut() {
            scheduler.reap_finished();
            if scheduler.needs_tick() {
                did_work = true;
                scheduler.drain_tick();
            }
        }

        if !did_work {
            std::thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
        }
    }

    teardown(&mut ctx, close_detail);
}

fn apply_language_switch(ctx: &mut RelayContext, language: SupportedLanguage) {
    *ctx.language.lock() = language;
    if let Err(e) = ctx.stream.send_text(&switch_instruction(language)) {
        warn!(language = language.name(), error = %e, "language switch message failed");
    } else {
        info!(language = language.name(), "language switch message sent");
    }
}

fn emit_transcript(ctx: &mut RelayContext, text: &str) {
    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.transcript_tx.send(TranscriptEvent {
        seq,
        text: text.to_string(),
    });
}

/// Full teardown: capture gate off, stream closed, playback interrupted.
///
/// Runs the same interruption path as barge-in so no audio trails after the
/// session ends, then reports `Idle`.
fn teardown(ctx: &mut RelayContext, detail: Option<String>) {
    ctx.streaming.store(false, Ordering::SeqCst);

    if let Err(e) = ctx.stream.close() {
        debug!("stream close reported: {e}");
    }

    if let Some(scheduler) = ctx.scheduler.lock().as_mut() {
        scheduler.interrupt();
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        frames_assembled = snap.frames_assembled,
        frames_gated = snap.frames_gated,
        chunks_sent = snap.chunks_sent,
        send_errors = snap.send_errors,
        chunks_received = snap.chunks_received,
        transcripts = snap.transcripts,
        interrupts = snap.interrupts,
        "relay stopped"
    );

    *ctx.state.lock() = SessionState::Idle;
    let _ = ctx.status_tx.send(SessionStatusEvent {
        state: SessionState::Idle,
        detail,
    });
}

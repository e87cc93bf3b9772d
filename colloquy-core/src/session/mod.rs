//! `SessionController` — top-level session lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//! SessionController::new()
//!     └─► start()       → mic open, stream connected, state = Streaming
//!         ├─► interrupt() → barge-in: playback cleared, stream stays open
//!         ├─► set_language() → control text on the existing stream
//!         └─► stop()      → capture gate off, stream closed, mic released,
//!                           full playback cleanup, state = Idle
//! ```
//!
//! `stop()` is idempotent: calling it while already `Idle` is a no-op, not
//! an error. `start()` on a running session fails with `AlreadyRunning`.
//!
//! ## Threading
//!
//! `cpal` streams are `!Send` on Windows/macOS, so the microphone is opened
//! *inside* the relay thread and never crosses a thread boundary; a sync
//! channel reports open success or failure back to `start()`. The controller
//! is the sole owner of the microphone, the duplex stream, and the playback
//! sink; nothing else may close or release them.

pub mod events;
pub mod language;
pub mod relay;
pub mod stream;
pub mod stub;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    buffering::create_audio_ring,
    capture::{CaptureEncoder, SILENCE_PEAK_THRESHOLD},
    error::{ColloquyError, Result},
    playback::{OutputSink, PlaybackScheduler},
    session::{
        events::{SessionState, SessionStatusEvent, TranscriptEvent},
        language::{system_instruction, SupportedLanguage},
        relay::{DiagnosticsSnapshot, RelayContext, SessionCommand, SessionDiagnostics},
        stream::{ResponseModality, StreamConfig, StreamConnector},
    },
};

use crate::audio::MicCapture;

#[cfg(feature = "audio-cpal")]
use crate::playback::{sink::CpalSink, PLAYBACK_SAMPLE_RATE};

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Factory producing the playback sink when a session starts.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn OutputSink>> + Send>;

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Language the tutor starts the session in. Default: Kannada.
    pub language: SupportedLanguage,
    /// What the model should answer with. Default: audio.
    pub response_modality: ResponseModality,
    /// Preferred microphone by name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Whether transcripts are scanned for spoken language-switch requests.
    /// Default: true.
    pub auto_language_switch: bool,
    /// Peak-amplitude silence gate for outbound frames. Default: 0.01.
    pub silence_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: SupportedLanguage::Kannada,
            response_modality: ResponseModality::Audio,
            preferred_input_device: None,
            auto_language_switch: true,
            silence_threshold: SILENCE_PEAK_THRESHOLD,
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn default_sink_factory() -> SinkFactory {
    Box::new(|| {
        let sink = CpalSink::open(PLAYBACK_SAMPLE_RATE)?;
        Ok(Box::new(sink) as Box<dyn OutputSink>)
    })
}

#[cfg(not(feature = "audio-cpal"))]
fn default_sink_factory() -> SinkFactory {
    Box::new(|| {
        Err(ColloquyError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    })
}

/// The top-level session handle.
///
/// `SessionController` is `Send + Sync`; all fields use interior mutability,
/// so it can sit in an `Arc` shared between a host UI and event-forwarding
/// tasks.
pub struct SessionController {
    config: SessionConfig,
    connector: Arc<Mutex<Box<dyn StreamConnector>>>,
    sink_factory: Arc<Mutex<SinkFactory>>,
    /// True from a successful `start()` until `stop()` or remote close.
    running: Arc<AtomicBool>,
    /// Capture gate: cleared first on stop so no frame is sent afterwards.
    streaming: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    scheduler: Arc<Mutex<Option<PlaybackScheduler>>>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    seq: Arc<AtomicU64>,
    language: Arc<Mutex<SupportedLanguage>>,
    diagnostics: Arc<SessionDiagnostics>,
    cmd_tx: Mutex<Option<crossbeam_channel::Sender<SessionCommand>>>,
    relay_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SessionController {
    /// Create a controller with the default (cpal) playback sink.
    pub fn new(config: SessionConfig, connector: Box<dyn StreamConnector>) -> Self {
        Self::with_sink_factory(config, connector, default_sink_factory())
    }

    /// Create a controller with a custom playback sink factory.
    pub fn with_sink_factory(
        config: SessionConfig,
        connector: Box<dyn StreamConnector>,
        sink_factory: SinkFactory,
    ) -> Self {
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let language = config.language;

        Self {
            config,
            connector: Arc::new(Mutex::new(connector)),
            sink_factory: Arc::new(Mutex::new(sink_factory)),
            running: Arc::new(AtomicBool::new(false)),
            streaming: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            scheduler: Arc::new(Mutex::new(None)),
            transcript_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            language: Arc::new(Mutex::new(language)),
            diagnostics: Arc::new(SessionDiagnostics::default()),
            cmd_tx: Mutex::new(None),
            relay_handle: Mutex::new(None),
        }
    }

    /// Start a session: open the microphone, open the duplex stream, begin
    /// relaying. Blocks until both resources are confirmed open.
    ///
    /// On any acquisition failure every partially acquired resource is
    /// released and the session returns to `Idle` before the error is
    /// returned; no leaked microphone or half-open stream survives.
    ///
    /// # Errors
    /// - `ColloquyError::AlreadyRunning` if a session is active.
    /// - Device or stream errors from acquisition.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ColloquyError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.set_state(SessionState::Connecting, None);
        *self.language.lock() = self.config.language;

        let (producer, consumer) = create_audio_ring();
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        // Sync channel: relay thread reports open success (capture rate) or
        // the first acquisition failure back to this call.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let config = self.config.clone();
        let connector = Arc::clone(&self.connector);
        let sink_factory = Arc::clone(&self.sink_factory);
        let running = Arc::clone(&self.running);
        let streaming = Arc::clone(&self.streaming);
        let state = Arc::clone(&self.state);
        let scheduler = Arc::clone(&self.scheduler);
        let transcript_tx = self.transcript_tx.clone();
        let status_tx = self.status_tx.clone();
        let seq = Arc::clone(&self.seq);
        let language = Arc::clone(&self.language);
        let diagnostics = Arc::clone(&self.diagnostics);

        let handle = std::thread::Builder::new()
            .name("colloquy-relay".into())
            .spawn(move || {
                // ── Microphone (must open on THIS thread — cpal is !Send) ──
                let capture = match MicCapture::open(
                    producer,
                    Arc::clone(&running),
                    config.preferred_input_device.as_deref(),
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                // stop() may have raced in while the device was opening.
                if !running.load(Ordering::SeqCst) {
                    let _ = open_tx.send(Err(ColloquyError::Stream(
                        "session stopped during startup".into(),
                    )));
                    drop(capture);
                    return;
                }

                // ── Playback sink + scheduler ──────────────────────────────
                let sink = match (*sink_factory.lock())() {
                    Ok(s) => s,
                    Err(e) => {
                        capture.stop();
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                *scheduler.lock() = Some(PlaybackScheduler::new(sink));

                // ── Duplex stream ──────────────────────────────────────────
                let stream_config = StreamConfig {
                    language: config.language,
                    response_modality: config.response_modality,
                    system_instruction: system_instruction(config.language),
                };
                let open = match connector.lock().connect(&stream_config) {
                    Ok(o) => o,
                    Err(e) => {
                        *scheduler.lock() = None;
                        capture.stop();
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                let capture_sample_rate = capture.sample_rate;
                let _ = open_tx.send(Ok(capture_sample_rate));
                streaming.store(true, Ordering::SeqCst);

                let encoder =
                    CaptureEncoder::new(Arc::clone(&streaming), config.silence_threshold);

                relay::run(RelayContext {
                    consumer,
                    capture_sample_rate,
                    encoder,
                    stream: open.stream,
                    events: open.events,
                    commands: cmd_rx,
                    scheduler: Arc::clone(&scheduler),
                    running,
                    streaming,
                    state,
                    transcript_tx,
                    status_tx,
                    seq,
                    language,
                    auto_language_switch: config.auto_language_switch,
                    diagnostics,
                });

                // The scheduler (and its sink) die with the session.
                *scheduler.lock() = None;
                // Microphone released here, on its creation thread.
                drop(capture);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                self.set_state(SessionState::Idle, Some(e.to_string()));
                ColloquyError::AudioStream(format!("relay thread spawn: {e}"))
            })?;

        *self.relay_handle.lock() = Some(handle);
        *self.cmd_tx.lock() = Some(cmd_tx);

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                self.set_state(SessionState::Streaming, None);
                info!(capture_sample_rate = rate, "session streaming");
                Ok(())
            }
            Ok(Err(e)) => {
                self.finish_failed_start();
                self.set_state(SessionState::Idle, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel dropped before a message: the relay thread died.
                self.finish_failed_start();
                self.set_state(SessionState::Idle, Some("relay died during start".into()));
                Err(ColloquyError::Other(anyhow::anyhow!(
                    "relay thread died unexpectedly during start"
                )))
            }
        }
    }

    /// Barge-in: discard all queued and in-flight playback immediately.
    ///
    /// The duplex stream stays open; the next inbound chunk plays from the
    /// present. Safe to call at any time, including while idle (no-op).
    pub fn interrupt(&self) {
        if let Some(scheduler) = self.scheduler.lock().as_mut() {
            scheduler.interrupt();
            self.diagnostics
                .interrupts
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stop the session: capture gate off, stream closed, microphone
    /// released, playback fully cleared, state back to `Idle`.
    ///
    /// Idempotent: stopping an idle session is a no-op.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            // Already stopping or idle; make sure a finished relay is reaped.
            self.join_relay();
            return Ok(());
        }

        self.set_state(SessionState::Closing, None);
        // Gate capture first so no frame is sent past this point, then clear
        // playback so no audio trails while the relay finishes teardown.
        self.streaming.store(false, Ordering::SeqCst);
        if let Some(scheduler) = self.scheduler.lock().as_mut() {
            scheduler.interrupt();
        }

        self.join_relay();
        info!("session stopped");
        Ok(())
    }

    /// Switch the tutoring language mid-session.
    ///
    /// Sends a control text message on the existing stream; the session is
    /// not reopened. A no-op when no session is running.
    pub fn set_language(&self, language: SupportedLanguage) -> Result<()> {
        let guard = self.cmd_tx.lock();
        if let Some(tx) = guard.as_ref() {
            tx.send(SessionCommand::SetLanguage(language))
                .map_err(|_| ColloquyError::Stream("relay is not running".into()))?;
        }
        Ok(())
    }

    /// Current session state (snapshot).
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Language currently in effect.
    pub fn language(&self) -> SupportedLanguage {
        *self.language.lock()
    }

    /// Subscribe to transcript events.
    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    /// Subscribe to session state change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of relay counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn join_relay(&self) {
        let handle = self.relay_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        *self.cmd_tx.lock() = None;
    }

    fn finish_failed_start(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
        self.join_relay();
        *self.scheduler.lock() = None;
    }

    fn set_state(&self, state: SessionState, detail: Option<String>) {
        *self.state.lock() = state;
        let _ = self.status_tx.send(SessionStatusEvent { state, detail });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::stub::EchoConnector;

    /// Controller whose sink factory always fails; lifecycle paths that do
    /// not reach device acquisition stay fully deterministic.
    fn idle_controller() -> SessionController {
        SessionController::with_sink_factory(
            SessionConfig::default(),
            Box::new(EchoConnector::new()),
            Box::new(|| Err(ColloquyError::AudioStream("no sink in tests".into()))),
        )
    }

    #[test]
    fn controller_starts_out_idle() {
        let controller = idle_controller();
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.language(), SupportedLanguage::Kannada);
    }

    #[test]
    fn stop_when_idle_is_an_idempotent_noop() {
        let controller = idle_controller();
        controller.stop().expect("first stop");
        controller.stop().expect("second stop");
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn interrupt_when_idle_is_a_noop() {
        let controller = idle_controller();
        controller.interrupt();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn set_language_when_idle_does_nothing() {
        let controller = idle_controller();
        controller
            .set_language(SupportedLanguage::Hindi)
            .expect("idle set_language");
        // Next start would use the configured language, not the request.
        assert_eq!(controller.language(), SupportedLanguage::Kannada);
    }

    #[test]
    fn default_config_matches_the_live_contract() {
        let config = SessionConfig::default();
        assert_eq!(config.language, SupportedLanguage::Kannada);
        assert_eq!(config.response_modality, ResponseModality::Audio);
        assert!(config.auto_language_switch);
        assert!((config.silence_threshold - 0.01).abs() < 1e-9);
        assert!(config.preferred_input_device.is_none());
    }
}

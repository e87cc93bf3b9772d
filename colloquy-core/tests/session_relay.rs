//! Relay-loop integration: capture → stream, stream → playback, barge-in,
//! language mediation, and teardown, driven with scripted collaborators.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use colloquy_core::buffering::{create_audio_ring, Producer};
use colloquy_core::capture::{CaptureEncoder, CAPTURE_SAMPLE_RATE, FRAME_SAMPLES,
    SILENCE_PEAK_THRESHOLD};
use colloquy_core::codec::{encode_pcm16, wire::WireAudioChunk, DecodedAudio};
use colloquy_core::error::Result;
use colloquy_core::playback::{
    OutputSink, PlaybackId, PlaybackScheduler, PLAYBACK_CHANNELS, PLAYBACK_SAMPLE_RATE,
};
use colloquy_core::session::events::{SessionState, SessionStatusEvent, TranscriptEvent};
use colloquy_core::session::language::{switch_instruction, SupportedLanguage};
use colloquy_core::session::relay::{self, RelayContext, SessionCommand, SessionDiagnostics};
use colloquy_core::session::stream::{DuplexStream, ServerEvent};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;

// ── Scripted collaborators ──────────────────────────────────────────────

#[derive(Default)]
struct StreamLog {
    audio: Vec<WireAudioChunk>,
    texts: Vec<String>,
    closes: usize,
}

struct RecordingStream {
    log: Arc<Mutex<StreamLog>>,
}

impl DuplexStream for RecordingStream {
    fn send_audio(&mut self, chunk: &WireAudioChunk) -> Result<()> {
        self.log.lock().audio.push(chunk.clone());
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        self.log.lock().texts.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().closes += 1;
        Ok(())
    }
}

#[derive(Default)]
struct SinkState {
    now: f64,
    next_id: PlaybackId,
    scheduled: Vec<(PlaybackId, f64)>,
    stopped: Vec<PlaybackId>,
}

struct ManualSink {
    state: Arc<Mutex<SinkState>>,
}

impl OutputSink for ManualSink {
    fn sample_rate(&self) -> u32 {
        PLAYBACK_SAMPLE_RATE
    }

    fn channels(&self) -> u16 {
        PLAYBACK_CHANNELS
    }

    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn schedule(&mut self, audio: DecodedAudio, start_time: f64) -> Result<PlaybackId> {
        let _ = audio;
        let mut st = self.state.lock();
        let id = st.next_id;
        st.next_id += 1;
        st.scheduled.push((id, start_time));
        Ok(id)
    }

    fn stop(&mut self, id: PlaybackId) -> Result<()> {
        self.state.lock().stopped.push(id);
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    running: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    scheduler: Arc<Mutex<Option<PlaybackScheduler>>>,
    stream_log: Arc<Mutex<StreamLog>>,
    sink_state: Arc<Mutex<SinkState>>,
    events_tx: Sender<ServerEvent>,
    commands_tx: Sender<SessionCommand>,
    transcript_rx: broadcast::Receiver<TranscriptEvent>,
    language: Arc<Mutex<SupportedLanguage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Harness {
    /// Spin up a relay with scripted stream and sink. `mic_samples` are
    /// preloaded into the capture ring at 16 kHz (passthrough, no resample).
    fn start(mic_samples: &[f32]) -> Self {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(mic_samples);

        let stream_log = Arc::new(Mutex::new(StreamLog::default()));
        let sink_state = Arc::new(Mutex::new(SinkState::default()));
        let (events_tx, events_rx) = unbounded();
        let (commands_tx, commands_rx) = unbounded();
        let (transcript_tx, transcript_rx) = broadcast::channel(64);
        let (status_tx, _) = broadcast::channel(64);

        let running = Arc::new(AtomicBool::new(true));
        let streaming = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(SessionState::Streaming));
        let language = Arc::new(Mutex::new(SupportedLanguage::Kannada));

        let scheduler = Arc::new(Mutex::new(Some(PlaybackScheduler::new(Box::new(
            ManualSink {
                state: Arc::clone(&sink_state),
            },
        )))));

        let ctx = RelayContext {
            consumer,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            encoder: CaptureEncoder::new(Arc::clone(&streaming), SILENCE_PEAK_THRESHOLD),
            stream: Box::new(RecordingStream {
                log: Arc::clone(&stream_log),
            }),
            events: events_rx,
            commands: commands_rx,
            scheduler: Arc::clone(&scheduler),
            running: Arc::clone(&running),
            streaming: Arc::clone(&streaming),
            state: Arc::clone(&state),
            transcript_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            language: Arc::clone(&language),
            auto_language_switch: true,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        };

        let handle = thread::spawn(move || relay::run(ctx));

        Self {
            running,
            streaming,
            state,
            scheduler,
            stream_log,
            sink_state,
            events_tx,
            commands_tx,
            transcript_rx,
            language,
            handle: Some(handle),
        }
    }

    fn stop_and_join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().expect("relay thread panicked");
        }
    }

    fn wait_until(&self, timeout: Duration, mut cond: impl FnMut(&Self) -> bool) {
        let start = Instant::now();
        while !cond(self) {
            assert!(start.elapsed() < timeout, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn speech_chunk_ms(ms: u64) -> WireAudioChunk {
    let samples = (PLAYBACK_SAMPLE_RATE as u64 * ms / 1000) as usize;
    WireAudioChunk::from_pcm(&encode_pcm16(&vec![0.3; samples]), PLAYBACK_SAMPLE_RATE)
}

// ── Tests ───────────────────────────────────────────────────────────────

#[test]
fn loud_mic_audio_is_framed_encoded_and_sent() {
    let mut harness = Harness::start(&vec![0.4; FRAME_SAMPLES]);

    harness.wait_until(Duration::from_secs(2), |h| {
        !h.stream_log.lock().audio.is_empty()
    });

    let log = harness.stream_log.lock();
    assert_eq!(log.audio.len(), 1);
    assert_eq!(log.audio[0].mime_type, "audio/pcm;rate=16000");
    assert_eq!(
        log.audio[0].decode_payload().unwrap().len(),
        FRAME_SAMPLES * 2
    );
    drop(log);

    harness.stop_and_join();
}

#[test]
fn silent_mic_audio_never_reaches_the_stream() {
    let mut harness = Harness::start(&vec![0.002; FRAME_SAMPLES * 2]);

    // Give the relay ample time to mis-send before checking.
    thread::sleep(Duration::from_millis(150));
    assert!(harness.stream_log.lock().audio.is_empty());

    harness.stop_and_join();
}

#[test]
fn inbound_chunks_are_scheduled_gaplessly_in_order() {
    let mut harness = Harness::start(&[]);

    for _ in 0..3 {
        harness
            .events_tx
            .send(ServerEvent::Audio(speech_chunk_ms(100)))
            .unwrap();
    }

    harness.wait_until(Duration::from_secs(2), |h| {
        h.sink_state.lock().scheduled.len() == 3
    });

    let st = harness.sink_state.lock();
    let t = st.scheduled[0].1;
    assert!((st.scheduled[1].1 - (t + 0.1)).abs() < 1e-9);
    assert!((st.scheduled[2].1 - (t + 0.2)).abs() < 1e-9);
    drop(st);

    harness.stop_and_join();
}

#[test]
fn interrupted_event_silences_everything_and_next_chunk_restarts() {
    let mut harness = Harness::start(&[]);

    for _ in 0..4 {
        harness
            .events_tx
            .send(ServerEvent::Audio(speech_chunk_ms(200)))
            .unwrap();
    }
    harness.wait_until(Duration::from_secs(2), |h| {
        h.sink_state.lock().scheduled.len() == 4
    });

    harness.events_tx.send(ServerEvent::Interrupted).unwrap();
    harness.wait_until(Duration::from_secs(2), |h| {
        h.sink_state.lock().stopped.len() == 4
    });

    {
        let scheduler = harness.scheduler.lock();
        let scheduler = scheduler.as_ref().expect("scheduler alive");
        assert_eq!(scheduler.queued(), 0);
        assert!(scheduler.live_handles().is_empty());
    }

    // The next chunk schedules fresh, from the device's present.
    harness
        .events_tx
        .send(ServerEvent::Audio(speech_chunk_ms(100)))
        .unwrap();
    harness.wait_until(Duration::from_secs(2), |h| {
        h.sink_state.lock().scheduled.len() == 5
    });

    harness.stop_and_join();
}

#[test]
fn transcripts_are_broadcast_and_language_requests_mediate_a_switch() {
    let mut harness = Harness::start(&[]);

    harness
        .events_tx
        .send(ServerEvent::Transcript("please speak in hindi".into()))
        .unwrap();

    harness.wait_until(Duration::from_secs(2), |h| !h.stream_log.lock().texts.is_empty());

    let event = harness.transcript_rx.try_recv().expect("transcript event");
    assert_eq!(event.text, "please speak in hindi");
    assert_eq!(event.seq, 0);

    assert_eq!(*harness.language.lock(), SupportedLanguage::Hindi);
    assert_eq!(
        harness.stream_log.lock().texts.as_slice(),
        &[switch_instruction(SupportedLanguage::Hindi)]
    );

    // Repeating the same request does not resend the instruction.
    harness
        .events_tx
        .send(ServerEvent::Transcript("speak in hindi please".into()))
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(harness.stream_log.lock().texts.len(), 1);

    harness.stop_and_join();
}

#[test]
fn explicit_language_command_sends_the_control_message() {
    let mut harness = Harness::start(&[]);

    harness
        .commands_tx
        .send(SessionCommand::SetLanguage(SupportedLanguage::Tamil))
        .unwrap();

    harness.wait_until(Duration::from_secs(2), |h| !h.stream_log.lock().texts.is_empty());
    assert_eq!(*harness.language.lock(), SupportedLanguage::Tamil);
    assert_eq!(
        harness.stream_log.lock().texts.as_slice(),
        &[switch_instruction(SupportedLanguage::Tamil)]
    );

    harness.stop_and_join();
}

#[test]
fn remote_close_tears_the_session_down_to_idle() {
    let mut harness = Harness::start(&[]);

    harness
        .events_tx
        .send(ServerEvent::Closed {
            reason: Some("server going away".into()),
        })
        .unwrap();

    harness.wait_until(Duration::from_secs(2), |h| {
        *h.state.lock() == SessionState::Idle
    });
    assert!(!harness.running.load(Ordering::SeqCst));
    assert!(!harness.streaming.load(Ordering::SeqCst));
    assert!(harness.stream_log.lock().closes >= 1);

    harness.stop_and_join();
}

#[test]
fn stop_gates_capture_closes_the_stream_and_clears_playback() {
    let mut harness = Harness::start(&[]);

    for _ in 0..2 {
        harness
            .events_tx
            .send(ServerEvent::Audio(speech_chunk_ms(500)))
            .unwrap();
    }
    harness.wait_until(Duration::from_secs(2), |h| {
        h.sink_state.lock().scheduled.len() == 2
    });

    harness.stop_and_join();

    assert_eq!(*harness.state.lock(), SessionState::Idle);
    assert!(!harness.streaming.load(Ordering::SeqCst));
    assert_eq!(harness.stream_log.lock().closes, 1);
    // Teardown runs the same total-interruption path as barge-in.
    assert_eq!(harness.sink_state.lock().stopped.len(), 2);
}

#[test]
fn status_event_reports_idle_after_remote_error() {
    let (status_probe_tx, mut status_probe_rx) = broadcast::channel::<SessionStatusEvent>(8);

    // Rebuild a harness whose status channel we can observe.
    let (_producer, consumer) = create_audio_ring();
    let stream_log = Arc::new(Mutex::new(StreamLog::default()));
    let sink_state = Arc::new(Mutex::new(SinkState::default()));
    let (events_tx, events_rx) = unbounded();
    let (_commands_tx, commands_rx) = unbounded::<SessionCommand>();
    let (transcript_tx, _) = broadcast::channel(8);

    let running = Arc::new(AtomicBool::new(true));
    let ctx = RelayContext {
        consumer,
        capture_sample_rate: CAPTURE_SAMPLE_RATE,
        encoder: CaptureEncoder::new(Arc::new(AtomicBool::new(true)), SILENCE_PEAK_THRESHOLD),
        stream: Box::new(RecordingStream {
            log: Arc::clone(&stream_log),
        }),
        events: events_rx,
        commands: commands_rx,
        scheduler: Arc::new(Mutex::new(Some(PlaybackScheduler::new(Box::new(
            ManualSink { state: sink_state },
        ))))),
        running: Arc::clone(&running),
        streaming: Arc::new(AtomicBool::new(true)),
        state: Arc::new(Mutex::new(SessionState::Streaming)),
        transcript_tx,
        status_tx: status_probe_tx,
        seq: Arc::new(AtomicU64::new(0)),
        language: Arc::new(Mutex::new(SupportedLanguage::Kannada)),
        auto_language_switch: false,
        diagnostics: Arc::new(SessionDiagnostics::default()),
    };

    let handle = thread::spawn(move || relay::run(ctx));
    events_tx
        .send(ServerEvent::Error("quota exceeded".into()))
        .unwrap();
    handle.join().expect("relay thread panicked");

    let status = status_probe_rx.try_recv().expect("status event");
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.detail.as_deref(), Some("quota exceeded"));
}

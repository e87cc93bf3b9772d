//! # colloquy-core
//!
//! Real-time bidirectional audio engine for conversational tutoring.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → MicCapture → SPSC RingBuffer → relay thread
//!                                                │
//!                              resample 16 kHz → FrameAssembler
//!                                                │
//!                               silence gate → PCM16 → base64
//!                                                │
//!                                       DuplexStream.send_audio ──► remote model
//!
//! remote model ──► ServerEvent::Audio ──► decode PCM16 @ 24 kHz
//!                                                │
//!                                  PlaybackScheduler (FIFO + clock cursor)
//!                                                │
//!                                      OutputSink.schedule(buf, t) → speakers
//! ```
//!
//! Both directions run continuously for the lifetime of a session, relayed
//! by a single blocking thread. Barge-in (`interrupt`) clears all queued and
//! in-flight playback synchronously. The remote transport itself is a
//! collaborator behind [`session::stream::StreamConnector`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod playback;
pub mod session;
pub mod vision;

// Convenience re-exports for downstream crates
pub use codec::{decode_pcm16, encode_pcm16, wire::WireAudioChunk, DecodedAudio};
pub use error::ColloquyError;
pub use playback::{OutputSink, PlaybackScheduler};
pub use session::events::{SessionState, SessionStatusEvent, TranscriptEvent};
pub use session::language::SupportedLanguage;
pub use session::{SessionConfig, SessionController};

//! Duplex stream collaborator boundary.
//!
//! Transport and session negotiation with the remote speech model are not
//! this crate's business. The engine sees only these traits: an outbound
//! handle accepting audio chunks and control text, and an inbound event
//! receiver. A production transport (WebSocket, WebRTC, whatever the
//! provider speaks) implements them outside; [`super::stub::EchoConnector`]
//! implements them in-process for development and tests.

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::codec::wire::WireAudioChunk;
use crate::error::Result;
use crate::session::language::SupportedLanguage;

/// Outbound audio message: `{ "audio": { "data": ..., "mimeType": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundAudioMessage {
    pub audio: WireAudioChunk,
}

/// Outbound control message: `{ "text": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTextMessage {
    pub text: String,
}

/// What the model wants back from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Configuration handed to a [`StreamConnector`] when opening a session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Language the model should teach in at session open.
    pub language: SupportedLanguage,
    pub response_modality: ResponseModality,
    /// System instruction sent at session open.
    pub system_instruction: String,
}

/// Inbound events delivered by the remote model.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Synthesized speech chunk, PCM16 at 24 kHz.
    Audio(WireAudioChunk),
    /// Transcript text of the model's (or the user's) speech.
    Transcript(String),
    /// The user spoke over the model; all pending playback must vanish.
    Interrupted,
    /// The remote closed the stream.
    Closed { reason: Option<String> },
    /// Remote-side error; the session will be torn down.
    Error(String),
}

/// Outbound half of an open duplex stream.
pub trait DuplexStream: Send {
    /// Send one capture audio chunk.
    fn send_audio(&mut self, chunk: &WireAudioChunk) -> Result<()>;

    /// Send a control text message (e.g. a language-switch instruction).
    fn send_text(&mut self, text: &str) -> Result<()>;

    /// Close the stream. Further sends fail; inbound events end with
    /// [`ServerEvent::Closed`].
    fn close(&mut self) -> Result<()>;
}

/// An opened duplex stream: the outbound handle plus the inbound event feed.
pub struct OpenStream {
    pub stream: Box<dyn DuplexStream>,
    pub events: Receiver<ServerEvent>,
}

/// Factory opening duplex streams toward the remote model.
///
/// `connect` blocks until the remote confirms the stream is open (or fails);
/// the session controller transitions to `Streaming` only after it returns.
pub trait StreamConnector: Send {
    fn connect(&mut self, config: &StreamConfig) -> Result<OpenStream>;
}

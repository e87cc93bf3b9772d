//! Wire representation of one audio chunk on the duplex stream.
//!
//! Both directions carry the same shape: a base64 PCM16-LE payload plus a
//! MIME-style tag naming the encoding and sample rate, e.g.
//! `audio/pcm;rate=16000`. Serialization is camelCase to match the remote
//! contract (`{ "data": "...", "mimeType": "audio/pcm;rate=16000" }`).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{ColloquyError, Result};

/// MIME prefix shared by all PCM chunks on the wire.
const PCM_MIME_PREFIX: &str = "audio/pcm;rate=";

/// One immutable audio chunk as exchanged over the duplex stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAudioChunk {
    /// Base64-encoded PCM16-LE bytes.
    pub data: String,
    /// Encoding tag, e.g. `audio/pcm;rate=24000`.
    pub mime_type: String,
}

impl WireAudioChunk {
    /// Wrap raw PCM16 bytes as a wire chunk tagged with `sample_rate`.
    pub fn from_pcm(bytes: &[u8], sample_rate: u32) -> Self {
        Self {
            data: BASE64.encode(bytes),
            mime_type: format!("{PCM_MIME_PREFIX}{sample_rate}"),
        }
    }

    /// Decode the base64 payload back into raw PCM16 bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.data)
            .map_err(|e| ColloquyError::Payload(format!("base64 decode failed: {e}")))
    }

    /// Sample rate parsed from the MIME tag, if the tag is a PCM tag.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .strip_prefix(PCM_MIME_PREFIX)
            .and_then(|rate| rate.parse().ok())
    }
}

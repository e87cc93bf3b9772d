//! Still-image snapshot capture and description.
//!
//! Independent of the streaming path: one snapshot in, one description out.
//! Camera access and the vision model are both collaborators behind traits;
//! this module only defines the exchange.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::Result;
use crate::session::language::SupportedLanguage;

/// One captured still image.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Encoded image bytes (typically JPEG).
    pub data: Vec<u8>,
    /// MIME type of `data`, e.g. `image/jpeg`.
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

impl Snapshot {
    /// Render as a `data:` URL, the form the vision endpoint accepts.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.data))
    }
}

/// A camera (or any other source) that can take one snapshot on demand.
pub trait SnapshotSource: Send {
    fn capture(&mut self) -> Result<Snapshot>;
}

/// A vision model that describes a snapshot in the requested language.
pub trait VisionDescriber: Send {
    fn describe(&mut self, snapshot: &Snapshot, language: SupportedLanguage) -> Result<String>;
}

/// Capture one snapshot and describe it. Convenience for hosts.
pub fn capture_and_describe(
    source: &mut dyn SnapshotSource,
    describer: &mut dyn VisionDescriber,
    language: SupportedLanguage,
) -> Result<String> {
    let snapshot = source.capture()?;
    describer.describe(&snapshot, language)
}

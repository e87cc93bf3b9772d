//! Persistent host settings (JSON file in the user config directory).

use std::fs;
use std::path::{Path, PathBuf};

use colloquy_core::SupportedLanguage;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Microphone by name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Tutoring language at session start.
    pub language: SupportedLanguage,
    /// Scan transcripts for spoken language-switch requests.
    pub auto_language_switch: bool,
    /// Peak-amplitude silence gate for outbound frames.
    pub silence_threshold: f32,
    /// When set, received model speech is also dumped to this WAV file.
    pub record_path: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            language: SupportedLanguage::Kannada,
            auto_language_switch: true,
            silence_threshold: 0.01,
            record_path: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.silence_threshold = self.silence_threshold.clamp(0.0, 0.5);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }
}

/// Default settings location: `<config dir>/colloquy/settings.json`.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("colloquy")
        .join("settings.json")
}

/// Load settings, falling back to defaults on a missing or corrupt file.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = ?path, "settings file is corrupt ({e}); using defaults");
                AppSettings::default()
            }
        },
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

//! Tutoring language table and language-change mediation.
//!
//! A language switch can come from the host UI or from the user simply
//! asking for it mid-conversation ("please speak in Hindi"). Switch requests
//! are detected in inbound transcripts with plain keyword matching; no
//! language-identification model is involved. The switch itself is a control
//! text message on the existing stream, never a reconnect.

use serde::{Deserialize, Serialize};

/// Languages the tutor can teach in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedLanguage {
    Kannada,
    English,
    Hindi,
    Tamil,
    Telugu,
    Marathi,
    Gujarati,
    Bengali,
    Malayalam,
    Punjabi,
    Urdu,
    Sanskrit,
}

impl SupportedLanguage {
    pub const ALL: [SupportedLanguage; 12] = [
        SupportedLanguage::Kannada,
        SupportedLanguage::English,
        SupportedLanguage::Hindi,
        SupportedLanguage::Tamil,
        SupportedLanguage::Telugu,
        SupportedLanguage::Marathi,
        SupportedLanguage::Gujarati,
        SupportedLanguage::Bengali,
        SupportedLanguage::Malayalam,
        SupportedLanguage::Punjabi,
        SupportedLanguage::Urdu,
        SupportedLanguage::Sanskrit,
    ];

    /// English name of the language.
    pub fn name(self) -> &'static str {
        match self {
            SupportedLanguage::Kannada => "Kannada",
            SupportedLanguage::English => "English",
            SupportedLanguage::Hindi => "Hindi",
            SupportedLanguage::Tamil => "Tamil",
            SupportedLanguage::Telugu => "Telugu",
            SupportedLanguage::Marathi => "Marathi",
            SupportedLanguage::Gujarati => "Gujarati",
            SupportedLanguage::Bengali => "Bengali",
            SupportedLanguage::Malayalam => "Malayalam",
            SupportedLanguage::Punjabi => "Punjabi",
            SupportedLanguage::Urdu => "Urdu",
            SupportedLanguage::Sanskrit => "Sanskrit",
        }
    }

    /// Name in the language's own script.
    pub fn native_name(self) -> &'static str {
        match self {
            SupportedLanguage::Kannada => "ಕನ್ನಡ",
            SupportedLanguage::English => "English",
            SupportedLanguage::Hindi => "हिंदी",
            SupportedLanguage::Tamil => "தமிழ்",
            SupportedLanguage::Telugu => "తెలుగు",
            SupportedLanguage::Marathi => "मराठी",
            SupportedLanguage::Gujarati => "ગુજરાતી",
            SupportedLanguage::Bengali => "বাংলা",
            SupportedLanguage::Malayalam => "മലയാളം",
            SupportedLanguage::Punjabi => "ਪੰਜਾਬੀ",
            SupportedLanguage::Urdu => "اردو",
            SupportedLanguage::Sanskrit => "संस्कृतम्",
        }
    }
}

/// Verbs that signal a switch request ("speak in...", "switch to...").
const SWITCH_VERBS: &[&str] = &[
    "speak", "talk", "reply", "respond", "answer", "use", "switch", "change",
];

/// Detect a language-change request in a transcript.
///
/// Requires both a switch verb and a language name (Latin token or native
/// script) in the same message, so ordinary mentions of a language inside an
/// answer do not trigger a switch.
pub fn detect_language_request(message: &str) -> Option<SupportedLanguage> {
    let lowered = message.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let has_verb = tokens.iter().any(|t| SWITCH_VERBS.contains(t));
    if !has_verb {
        return None;
    }

    SupportedLanguage::ALL.into_iter().find(|lang| {
        let latin = lang.name().to_lowercase();
        tokens.iter().any(|t| *t == latin) || message.contains(lang.native_name())
    })
}

/// Control message asking the model to switch languages mid-session.
pub fn switch_instruction(language: SupportedLanguage) -> String {
    format!(
        "Please switch to {name} ({native}) language. From now on, respond only in {name}.",
        name = language.name(),
        native = language.native_name(),
    )
}

/// System instruction sent when the stream opens.
pub fn system_instruction(language: SupportedLanguage) -> String {
    format!(
        "You are a helpful AI tutor that teaches subjects in simple {name} ({native}). \
         Always respond in {name} language. Be friendly, clear, and educational. \
         Break down complex topics into simple explanations that are easy to understand.",
        name = language.name(),
        native = language.native_name(),
    )
}

//! Speech output units and voice selection

use serde::{Deserialize, Serialize};

/// Neutral pitch applied to every utterance
pub const NEUTRAL_PITCH: f32 = 1.0;

/// Neutral volume applied to every utterance
pub const NEUTRAL_VOLUME: f32 = 1.0;

/// Vendor markers that indicate a higher quality voice
const PREFERRED_VOICE_MARKERS: [&str; 3] = ["Microsoft", "Google", "Natural"];

/// A voice offered by an output device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    /// BCP 47 language tag, e.g. `en-US`
    pub lang: String,
}

impl VoiceInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }

    fn is_english(&self) -> bool {
        self.lang.starts_with("en")
    }
}

/// Pick the default voice when the user has not chosen one
///
/// First English voice from a preferred vendor, then the first English
/// voice, otherwise none (the device default).
#[must_use]
pub fn select_default_voice(voices: &[VoiceInfo]) -> Option<&VoiceInfo> {
    let mut english = voices.iter().filter(|v| v.is_english());

    english
        .clone()
        .find(|v| PREFERRED_VOICE_MARKERS.iter().any(|m| v.name.contains(m)))
        .or_else(|| english.next())
}

/// One immutable unit of speech output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    text: String,
    voice: Option<String>,
    rate: f32,
}

impl Utterance {
    /// Build an utterance; pitch and volume are fixed at neutral
    #[must_use]
    pub fn new(text: impl Into<String>, voice: Option<String>, rate: f32) -> Self {
        Self {
            text: text.into(),
            voice,
            rate,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Voice name; `None` lets the device choose
    #[must_use]
    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    #[must_use]
    pub const fn rate(&self) -> f32 {
        self.rate
    }

    #[must_use]
    pub const fn pitch(&self) -> f32 {
        NEUTRAL_PITCH
    }

    #[must_use]
    pub const fn volume(&self) -> f32 {
        NEUTRAL_VOLUME
    }

    /// Whether there is anything to say
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<VoiceInfo> {
        vec![
            VoiceInfo::new("Thomas", "fr-FR"),
            VoiceInfo::new("Alex", "en-US"),
            VoiceInfo::new("Google UK English Female", "en-GB"),
            VoiceInfo::new("Microsoft Zira", "en-US"),
        ]
    }

    #[test]
    fn prefers_vendor_english_voice() {
        let voices = catalog();
        let voice = select_default_voice(&voices).unwrap();
        assert_eq!(voice.name, "Google UK English Female");
    }

    #[test]
    fn falls_back_to_first_english_voice() {
        let voices = vec![
            VoiceInfo::new("Anna", "de-DE"),
            VoiceInfo::new("Samantha", "en-US"),
            VoiceInfo::new("Daniel", "en-GB"),
        ];
        assert_eq!(select_default_voice(&voices).unwrap().name, "Samantha");
    }

    #[test]
    fn no_english_voice_means_device_default() {
        let voices = vec![VoiceInfo::new("Google Deutsch", "de-DE")];
        assert!(select_default_voice(&voices).is_none());
        assert!(select_default_voice(&[]).is_none());
    }

    #[test]
    fn utterance_uses_neutral_pitch_and_volume() {
        let u = Utterance::new("Lights are on", Some("alloy".to_string()), 1.25);
        assert_eq!(u.text(), "Lights are on");
        assert_eq!(u.voice(), Some("alloy"));
        assert!((u.rate() - 1.25).abs() < f32::EPSILON);
        assert!((u.pitch() - NEUTRAL_PITCH).abs() < f32::EPSILON);
        assert!((u.volume() - NEUTRAL_VOLUME).abs() < f32::EPSILON);
    }

    #[test]
    fn whitespace_utterance_is_blank() {
        assert!(Utterance::new("  \n ", None, 1.0).is_blank());
        assert!(!Utterance::new(" ok ", None, 1.0).is_blank());
    }
}

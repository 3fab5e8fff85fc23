//! Text-to-speech (TTS) over the `OpenAI` speech API

use super::VoiceInfo;
use crate::{Error, Result};

/// Speech synthesis endpoint
const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Voices offered by the `OpenAI` speech API
pub const OPENAI_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Voice used when an utterance names one the API does not know
pub const FALLBACK_VOICE: &str = "alloy";

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI` with a custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    /// Voices this backend can render, all English
    #[must_use]
    pub fn voices() -> Vec<VoiceInfo> {
        OPENAI_VOICES
            .iter()
            .map(|name| VoiceInfo::new(*name, "en-US"))
            .collect()
    }

    /// Map a requested voice onto one the API accepts
    #[must_use]
    pub fn resolve_voice(requested: Option<&str>) -> &str {
        requested
            .and_then(|r| OPENAI_VOICES.iter().find(|v| v.eq_ignore_ascii_case(r)))
            .copied()
            .unwrap_or(FALLBACK_VOICE)
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, voice: Option<&str>, speed: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: Self::resolve_voice(voice),
            speed: speed.clamp(0.25, 4.0),
        };

        tracing::debug!(chars = text.chars().count(), voice = request.voice, speed = request.speed, "synthesizing");

        let response = self
            .client
            .post(SPEECH_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_voice_falls_back() {
        assert_eq!(TextToSpeech::resolve_voice(Some("Microsoft Zira")), FALLBACK_VOICE);
        assert_eq!(TextToSpeech::resolve_voice(None), FALLBACK_VOICE);
        assert_eq!(TextToSpeech::resolve_voice(Some("Nova")), "nova");
    }

    #[test]
    fn advertised_voices_are_english() {
        let voices = TextToSpeech::voices();
        assert_eq!(voices.len(), OPENAI_VOICES.len());
        assert!(voices.iter().all(|v| v.lang.starts_with("en")));
    }

    #[test]
    fn missing_key_is_config_error() {
        assert!(matches!(
            TextToSpeech::new_openai(String::new(), "tts-1".to_string()),
            Err(Error::Config(_))
        ));
    }
}

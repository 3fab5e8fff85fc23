//! Configuration management for the Jarvis voice front-end

pub mod file;

use std::time::Duration;

use crate::controller::ControllerConfig;
use crate::settings::{MAX_RATE, MIN_RATE, Settings};
use crate::voice::{ChunkPacing, WakeWordPoller};
use crate::{Error, Result};

use file::JarvisConfigFile;

/// Default chat backend URL
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Jarvis configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat backend connection
    pub backend: BackendConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Speech device configuration
    pub voice: VoiceConfig,

    /// Initial user preferences
    pub settings: Settings,

    /// Timing and wake word values for the controller
    pub controller: ControllerConfig,
}

/// Chat backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL; `/chat` and `/health` are resolved against it
    pub url: String,

    /// Per-request timeout
    pub timeout: Duration,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<String>,
}

/// Speech device configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,
}

impl Config {
    /// Load configuration from the environment and the TOML config file
    ///
    /// Precedence is env > toml > default.
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed config file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn resolve(fc: JarvisConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let controller = Self::controller_config(&fc)?;

        let backend = BackendConfig {
            url: env("JARVIS_BACKEND_URL")
                .or(fc.backend.url)
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            timeout: Duration::from_secs(fc.backend.timeout_secs.unwrap_or(30)),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
        };

        let voice = VoiceConfig {
            stt_model: env("JARVIS_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: env("JARVIS_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
        };

        let defaults = Settings::default();
        let settings = Settings {
            voice: env("JARVIS_VOICE").or(fc.settings.voice),
            rate: Self::initial_rate(fc.settings.rate)?.unwrap_or(defaults.rate),
            wake_word_enabled: fc
                .settings
                .wake_word_enabled
                .unwrap_or(defaults.wake_word_enabled),
            auto_speak: fc.settings.auto_speak.unwrap_or(defaults.auto_speak),
        };

        Ok(Self {
            backend,
            api_keys,
            voice,
            settings,
            controller,
        })
    }

    fn initial_rate(rate: Option<f32>) -> Result<Option<f32>> {
        match rate {
            Some(rate) if !rate.is_finite() => Err(Error::Config(format!(
                "settings.rate must be a finite number, got {rate}"
            ))),
            rate => Ok(rate.map(|r| r.clamp(MIN_RATE, MAX_RATE))),
        }
    }

    fn controller_config(fc: &JarvisConfigFile) -> Result<ControllerConfig> {
        let defaults = ControllerConfig::default();
        let ms = Duration::from_millis;

        let listen_timeout_secs = fc
            .timing
            .listen_timeout_secs
            .unwrap_or(defaults.listen_timeout_secs);
        if listen_timeout_secs == 0 {
            return Err(Error::Config(
                "timing.listen_timeout_secs must be at least 1".to_string(),
            ));
        }

        let chunk_threshold = fc.timing.chunk_threshold.unwrap_or(defaults.chunk_threshold);
        if chunk_threshold == 0 {
            return Err(Error::Config(
                "timing.chunk_threshold must be at least 1".to_string(),
            ));
        }

        let poller = WakeWordPoller {
            interval: fc
                .wake_word
                .poll_interval_ms
                .map_or(defaults.poller.interval, ms),
            ceiling: fc.wake_word.probe_ms.map_or(defaults.poller.ceiling, ms),
            grace: defaults.poller.grace,
        };
        if poller.interval.is_zero() {
            return Err(Error::Config(
                "wake_word.poll_interval_ms must be positive".to_string(),
            ));
        }

        Ok(ControllerConfig {
            language: fc.voice.language.clone().unwrap_or(defaults.language),
            listen_timeout_secs,
            no_speech_reset: fc
                .timing
                .no_speech_reset_ms
                .map_or(defaults.no_speech_reset, ms),
            chunk_threshold,
            pacing: ChunkPacing {
                pause: fc.timing.chunk_pause_ms.map_or(defaults.pacing.pause, ms),
                error_pause: fc
                    .timing
                    .chunk_error_pause_ms
                    .map_or(defaults.pacing.error_pause, ms),
            },
            wake_words: fc.wake_word.phrases.clone().unwrap_or(defaults.wake_words),
            acknowledgement: fc
                .wake_word
                .acknowledgement
                .clone()
                .unwrap_or(defaults.acknowledgement),
            poller,
        })
    }
}

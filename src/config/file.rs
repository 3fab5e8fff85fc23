//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct JarvisConfigFile {
    /// Chat backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Speech devices
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Initial user preferences
    #[serde(default)]
    pub settings: SettingsFileConfig,

    /// Wake word detection
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Controller timing
    #[serde(default)]
    pub timing: TimingFileConfig,
}

/// Chat backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. `http://localhost:5000`)
    pub url: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Speech device configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// Recognition language tag (e.g. "en-US")
    pub language: Option<String>,
}

/// Initial preference values
#[derive(Debug, Default, Deserialize)]
pub struct SettingsFileConfig {
    pub voice: Option<String>,
    pub rate: Option<f32>,
    pub wake_word_enabled: Option<bool>,
    pub auto_speak: Option<bool>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Activation phrases, matched case-insensitively
    pub phrases: Option<Vec<String>>,

    /// Spoken after activation
    pub acknowledgement: Option<String>,

    /// Milliseconds between probes
    pub poll_interval_ms: Option<u64>,

    /// Milliseconds one probe listens for
    pub probe_ms: Option<u64>,
}

/// Timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    pub listen_timeout_secs: Option<u32>,
    pub no_speech_reset_ms: Option<u64>,
    pub chunk_threshold: Option<usize>,
    pub chunk_pause_ms: Option<u64>,
    pub chunk_error_pause_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> JarvisConfigFile {
    config_file_path().map_or_else(JarvisConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> JarvisConfigFile {
    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                JarvisConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/jarvis/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}

//! Activity state and controller tuning

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::voice::{
    ChunkPacing, DEFAULT_ACKNOWLEDGEMENT, DEFAULT_CHUNK_THRESHOLD, DEFAULT_WAKE_WORDS,
    WakeWordPoller,
};

/// What the controller is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    Idle,
    /// A capture session is open
    Listening,
    /// An output queue is draining
    Speaking,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

/// Timing and wake word values the controller runs with
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Recognition language passed to the capture device
    pub language: String,
    /// Seconds a capture session may wait for a final transcript
    pub listen_timeout_secs: u32,
    /// Delay before a no-speech error is replaced by a ready status
    pub no_speech_reset: Duration,
    /// Replies longer than this many characters are split into sentences
    pub chunk_threshold: usize,
    pub pacing: ChunkPacing,
    pub wake_words: Vec<String>,
    /// Spoken after a wake word, before listening starts
    pub acknowledgement: String,
    pub poller: WakeWordPoller,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            listen_timeout_secs: 10,
            no_speech_reset: Duration::from_secs(3),
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            pacing: ChunkPacing::default(),
            wake_words: DEFAULT_WAKE_WORDS.iter().map(ToString::to_string).collect(),
            acknowledgement: DEFAULT_ACKNOWLEDGEMENT.to_string(),
            poller: WakeWordPoller::default(),
        }
    }
}

//! Process-wide user preferences
//!
//! Settings are mutated only by explicit user action. The controller and the
//! output chunker read a snapshot per operation and never write back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lowest accepted speech rate multiplier
pub const MIN_RATE: f32 = 0.5;

/// Highest accepted speech rate multiplier
pub const MAX_RATE: f32 = 2.0;

/// User preferences shared by the voice components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Selected voice name; `None` applies the default-selection rule
    pub voice: Option<String>,

    /// Speech rate multiplier
    pub rate: f32,

    /// Run the background wake-word poller
    pub wake_word_enabled: bool,

    /// Speak backend replies automatically
    pub auto_speak: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
            wake_word_enabled: true,
            auto_speak: true,
        }
    }
}

/// Shared, cheaply clonable handle to the current [`Settings`]
#[derive(Debug, Clone)]
pub struct SettingsStore {
    tx: Arc<watch::Sender<Settings>>,
}

impl SettingsStore {
    /// Create a store seeded with `initial`
    #[must_use]
    pub fn new(initial: Settings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Copy of the current settings
    #[must_use]
    pub fn snapshot(&self) -> Settings {
        self.tx.borrow().clone()
    }

    /// Apply a user preference change
    ///
    /// The rate is clamped to [`MIN_RATE`]..=[`MAX_RATE`] after `f` runs; a
    /// non-finite rate keeps the previous value.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        self.tx.send_modify(|settings| {
            let previous = settings.rate;
            f(settings);
            settings.rate = if settings.rate.is_finite() {
                settings.rate.clamp(MIN_RATE, MAX_RATE)
            } else {
                previous
            };
        });
        tracing::debug!(settings = ?*self.tx.borrow(), "settings updated");
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

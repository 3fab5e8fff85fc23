//! Wake word detection
//!
//! While the controller is idle, a ticker asks it to run a short, isolated
//! capture probe. The probe transcript is matched against the activation
//! phrases; misses and errors are dropped without a trace in the UI.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ports::{CaptureEvent, CaptureStream, StopSignal};
use super::session::Token;

/// Default activation phrases
pub const DEFAULT_WAKE_WORDS: [&str; 2] = ["hey jarvis", "jarvis"];

/// Default spoken acknowledgement after activation
pub const DEFAULT_ACKNOWLEDGEMENT: &str = "Yes, how can I help you?";

/// Default interval between probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default ceiling for one probe
pub const DEFAULT_PROBE_CEILING: Duration = Duration::from_secs(2);

/// Time a probe may take past its ceiling to deliver a transcript
pub const DEFAULT_PROBE_GRACE: Duration = Duration::from_secs(3);

/// Matches transcripts against activation phrases
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_words: Vec<String>,
}

impl WakeWordDetector {
    /// Create a detector for `wake_words` (e.g., "hey jarvis")
    ///
    /// Phrases are lowercased and trimmed; empty phrases are dropped.
    #[must_use]
    pub fn new(wake_words: Vec<String>) -> Self {
        let normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");

        Self {
            wake_words: normalized,
        }
    }

    /// Return the first phrase contained in `transcript`, ignoring case
    #[must_use]
    pub fn check_wake_word(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();

        let found = self
            .wake_words
            .iter()
            .find(|w| normalized.contains(w.as_str()))
            .map(String::as_str);

        if let Some(wake_word) = found {
            tracing::info!(wake_word, transcript, "wake word detected");
        }
        found
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }
}

impl Default for WakeWordDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WAKE_WORDS.iter().map(ToString::to_string).collect())
    }
}

/// Signals the poller and its probes feed back into the controller queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSignal {
    /// Time for the next probe, if the controller is idle
    PollDue,
    /// Device event for probe `token`
    Capture { token: Token, event: CaptureEvent },
    /// Probe `token` passed its hard deadline
    Expired { token: Token },
}

/// Timing of the background poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeWordPoller {
    /// Time between probe requests
    pub interval: Duration,
    /// How long the device listens during one probe
    pub ceiling: Duration,
    /// Extra time after the ceiling for the device to report a transcript
    pub grace: Duration,
}

impl Default for WakeWordPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            ceiling: DEFAULT_PROBE_CEILING,
            grace: DEFAULT_PROBE_GRACE,
        }
    }
}

impl WakeWordPoller {
    /// Hard deadline after which an unfinished probe is torn down
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.ceiling + self.grace
    }

    /// Spawn the ticker that requests a probe every `interval`
    ///
    /// The ticker only asks. The controller re-checks idleness when the
    /// request is handled, never when it was scheduled.
    pub fn spawn_ticker<T>(&self, tx: mpsc::UnboundedSender<T>) -> JoinHandle<()>
    where
        T: From<ProbeSignal> + Send + 'static,
    {
        let period = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                if tx.send(ProbeSignal::PollDue.into()).is_err() {
                    break;
                }
            }
        })
    }
}

/// A throwaway capture attempt, independent of the main session
///
/// The device enforces the listening ceiling itself; the probe's own timer
/// is a hard deadline. Dropping the probe stops its device stream and timer.
#[derive(Debug)]
pub struct WakeProbe {
    token: Token,
    stop: StopSignal,
    forwarder: JoinHandle<()>,
    deadline: JoinHandle<()>,
}

impl WakeProbe {
    /// Start forwarding `stream` and arm the deadline timer
    pub fn open<T>(
        token: Token,
        mut stream: CaptureStream,
        deadline: Duration,
        tx: mpsc::UnboundedSender<T>,
    ) -> Self
    where
        T: From<ProbeSignal> + Send + 'static,
    {
        let stop = stream.stop_signal();

        let events_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if events_tx
                    .send(ProbeSignal::Capture { token, event }.into())
                    .is_err()
                {
                    break;
                }
            }
        });

        let deadline = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = tx.send(ProbeSignal::Expired { token }.into());
        });

        tracing::trace!(%token, "wake probe started");

        Self {
            token,
            stop,
            forwarder,
            deadline,
        }
    }

    #[must_use]
    pub fn owns(&self, token: Token) -> bool {
        self.token == token
    }
}

impl Drop for WakeProbe {
    fn drop(&mut self) {
        self.stop.trigger();
        self.forwarder.abort();
        self.deadline.abort();
        tracing::trace!(token = %self.token, "wake probe closed");
    }
}

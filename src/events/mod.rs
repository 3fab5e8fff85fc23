//! User-facing events produced by the controller
//!
//! The status line, the transcript log, audible cues and open-resource
//! requests are rendered by collaborators outside this crate. Delivery is
//! best-effort: a dropped receiver is logged once and never reaches callers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Category tag attached to every status update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Ready,
    Listening,
    Speaking,
    Processing,
    Error,
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Processing => "processing",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status-line update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub text: String,
    pub category: StatusCategory,
}

/// Speaker tag for transcript-log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Audible cue requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// A capture session has opened
    ListeningStarted,
}

/// Everything the controller tells the outside world
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Status(Status),
    Transcript {
        role: Role,
        text: String,
        at: DateTime<Utc>,
    },
    Cue(Cue),
    OpenResource {
        url: String,
    },
    /// Result of the startup backend health probe
    Connection {
        connected: bool,
    },
}

/// Sending half of the UI event stream
#[derive(Debug, Clone)]
pub struct UiSink {
    tx: mpsc::UnboundedSender<UiEvent>,
    closed_logged: Arc<AtomicBool>,
}

impl UiSink {
    /// Create a sink and the receiver a renderer should drain
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed_logged: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Publish an event
    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() && !self.closed_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!("ui event receiver dropped, further events are discarded");
        }
    }

    /// Publish a status-line update
    pub fn status(&self, text: impl Into<String>, category: StatusCategory) {
        let text = text.into();
        tracing::debug!(%category, text = %text, "status");
        self.emit(UiEvent::Status(Status { text, category }));
    }

    /// Append a transcript-log entry
    pub fn transcript(&self, role: Role, text: impl Into<String>) {
        self.emit(UiEvent::Transcript {
            role,
            text: text.into(),
            at: Utc::now(),
        });
    }
}

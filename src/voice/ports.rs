//! Device ports consumed by the controller
//!
//! A port call opens a per-session [`DeviceStream`]: events flow out of it and
//! dropping it (or calling [`DeviceStream::stop`]) releases the device. Device
//! implementations hold the matching [`DeviceEmitter`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{Utterance, VoiceInfo};
use crate::Result;

/// Event buffer per device stream
const STREAM_BUFFER: usize = 32;

/// Capture failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureErrorKind {
    /// Capture ended without any detected speech
    NoSpeech,
    /// Access to the microphone was refused
    CaptureDenied,
    /// No usable input device
    DeviceUnavailable,
    /// Recognition service unreachable
    Network,
    /// Anything else
    Other,
}

impl CaptureErrorKind {
    /// Parse a recognizer error code (`no-speech`, `not-allowed`, ...)
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => Self::NoSpeech,
            "capture-denied" | "not-allowed" | "service-not-allowed" => Self::CaptureDenied,
            "device-unavailable" | "audio-capture" => Self::DeviceUnavailable,
            "network" => Self::Network,
            _ => Self::Other,
        }
    }

    /// Wire code for this category
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::CaptureDenied => "capture-denied",
            Self::DeviceUnavailable => "device-unavailable",
            Self::Network => "network",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Lifecycle and transcript events from a capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Started,
    /// Partial transcript; may arrive many times
    Interim(String),
    /// Final transcript; ends the session
    Final(String),
    Error {
        kind: CaptureErrorKind,
        detail: String,
    },
    Ended,
}

/// Lifecycle events for one spoken utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Started,
    Ended,
    Error(String),
}

/// How a capture session should behave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Keep listening across pauses until stopped or a final transcript
    pub continuous: bool,
    /// Emit [`CaptureEvent::Interim`] updates
    pub interim_results: bool,
    /// Recognition language tag
    pub language: String,
    /// Hard ceiling enforced by the device itself, if any
    pub max_duration: Option<Duration>,
}

impl CaptureOptions {
    /// Options for the main command capture
    #[must_use]
    pub fn command(language: impl Into<String>) -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: language.into(),
            max_duration: None,
        }
    }

    /// Options for a short wake-word probe
    #[must_use]
    pub fn probe(language: impl Into<String>, ceiling: Duration) -> Self {
        Self {
            continuous: false,
            interim_results: false,
            language: language.into(),
            max_duration: Some(ceiling),
        }
    }
}

/// One-shot, clonable cancellation flag shared by a stream and its device
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request the device to stop
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once a stop is requested
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag flips
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Receiving half of a device session
#[derive(Debug)]
pub struct DeviceStream<E> {
    events: mpsc::Receiver<E>,
    stop: StopSignal,
}

/// Sending half of a device session, held by the device implementation
#[derive(Debug, Clone)]
pub struct DeviceEmitter<E> {
    tx: mpsc::Sender<E>,
    stop: StopSignal,
}

/// Stream of capture events for one session
pub type CaptureStream = DeviceStream<CaptureEvent>;

/// Stream of output events for one utterance
pub type OutputStream = DeviceStream<OutputEvent>;

impl<E> DeviceStream<E> {
    /// Create a connected emitter/stream pair
    #[must_use]
    pub fn channel() -> (DeviceEmitter<E>, Self) {
        let (tx, events) = mpsc::channel(STREAM_BUFFER);
        let stop = StopSignal::new();
        (
            DeviceEmitter {
                tx,
                stop: stop.clone(),
            },
            Self { events, stop },
        )
    }

    /// Next event; `None` once the device has finished and dropped its emitter
    pub async fn recv(&mut self) -> Option<E> {
        self.events.recv().await
    }

    /// Ask the device to stop this session
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Clone of the stop flag, for owners that hand the stream off
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }
}

impl<E> Drop for DeviceStream<E> {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

impl<E> DeviceEmitter<E> {
    /// Deliver an event; returns false once the stream side is gone
    pub async fn emit(&self, event: E) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Whether the owner asked this session to stop
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_triggered() || self.tx.is_closed()
    }

    /// Resolve once the owner asks this session to stop
    pub async fn stopped(&self) {
        tokio::select! {
            () = self.stop.triggered() => {}
            () = self.tx.closed() => {}
        }
    }
}

/// Continuous speech-to-text device
pub trait SpeechCapture: Send + Sync {
    /// Open an isolated capture session
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Capture`] if the device cannot start
    fn start(&self, options: &CaptureOptions) -> Result<CaptureStream>;
}

/// Text-to-speech device
pub trait SpeechOutput: Send + Sync {
    /// Begin speaking one utterance
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the request outright
    fn speak(&self, utterance: &Utterance) -> Result<OutputStream>;

    /// Cancel everything in flight on the device
    fn cancel_all(&self);

    /// Voices the device can render
    fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }
}

impl<T: SpeechCapture + ?Sized> SpeechCapture for Arc<T> {
    fn start(&self, options: &CaptureOptions) -> Result<CaptureStream> {
        (**self).start(options)
    }
}

impl<T: SpeechOutput + ?Sized> SpeechOutput for Arc<T> {
    fn speak(&self, utterance: &Utterance) -> Result<OutputStream> {
        (**self).speak(utterance)
    }

    fn cancel_all(&self) {
        (**self).cancel_all();
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        (**self).voices()
    }
}

//! Capture sessions and the generation tokens that guard them
//!
//! Every session, output queue, wake probe and backend request is stamped with
//! a [`Token`] drawn from one monotonic [`TokenSource`]. Events carry the token
//! of the owner that produced them; once the owner is destroyed its token is
//! never current again, so late events are recognised and dropped.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ports::{CaptureEvent, CaptureStream, StopSignal};

/// Single-use identity of a session, queue, probe or request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues strictly increasing tokens
#[derive(Debug, Default)]
pub struct TokenSource {
    last: u64,
}

impl TokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a token that has never been handed out before
    pub fn issue(&mut self) -> Token {
        self.last += 1;
        Token(self.last)
    }
}

/// Signals a capture session feeds back into the controller queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// Device event for the session
    Capture { token: Token, event: CaptureEvent },
    /// One second of the countdown elapsed
    Tick { token: Token, remaining: u32 },
}

/// One active listening attempt
///
/// Owns the device stream (through its forwarding task) and the countdown.
/// Dropping the session stops the device and cancels every timer it owns.
#[derive(Debug)]
pub struct CaptureSession {
    token: Token,
    started_at: Instant,
    remaining: u32,
    interim: String,
    stop: StopSignal,
    forwarder: JoinHandle<()>,
    countdown: JoinHandle<()>,
}

impl CaptureSession {
    /// Open a session around an already started device stream
    ///
    /// Device events and countdown ticks are delivered to `tx` tagged with
    /// `token`. Must be called from within a Tokio runtime.
    pub fn open<T>(
        token: Token,
        mut stream: CaptureStream,
        timeout_secs: u32,
        tx: mpsc::UnboundedSender<T>,
    ) -> Self
    where
        T: From<SessionSignal> + Send + 'static,
    {
        let stop = stream.stop_signal();

        let events_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if events_tx
                    .send(SessionSignal::Capture { token, event }.into())
                    .is_err()
                {
                    break;
                }
            }
        });

        let countdown = tokio::spawn(async move {
            let mut remaining = timeout_secs;
            while remaining > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                remaining -= 1;
                if tx.send(SessionSignal::Tick { token, remaining }.into()).is_err() {
                    break;
                }
            }
        });

        tracing::debug!(%token, timeout_secs, "capture session opened");

        Self {
            token,
            started_at: Instant::now(),
            remaining: timeout_secs,
            interim: String::new(),
            stop,
            forwarder,
            countdown,
        }
    }

    /// Whether `token` belongs to this session
    #[must_use]
    pub fn owns(&self, token: Token) -> bool {
        self.token == token
    }

    /// Seconds left before the session times out
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Record a countdown tick
    pub const fn set_remaining(&mut self, remaining: u32) {
        self.remaining = remaining;
    }

    /// Latest interim transcript
    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Replace the interim transcript
    pub fn set_interim(&mut self, text: &str) {
        text.clone_into(&mut self.interim);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop.trigger();
        self.forwarder.abort();
        self.countdown.abort();
        tracing::debug!(
            token = %self.token,
            elapsed_ms = self.started_at.elapsed().as_millis(),
            "capture session destroyed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::DeviceStream;

    #[test]
    fn tokens_are_unique_and_increasing() {
        let mut source = TokenSource::new();
        let a = source.issue();
        let b = source.issue();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[tokio::test]
    async fn session_forwards_tagged_events() {
        let mut source = TokenSource::new();
        let token = source.issue();
        let (emitter, stream) = DeviceStream::channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionSignal>();

        let _session = CaptureSession::open(token, stream, 10, tx);
        emitter.emit(CaptureEvent::Interim("turn on".to_string())).await;

        assert_eq!(
            rx.recv().await,
            Some(SessionSignal::Capture {
                token,
                event: CaptureEvent::Interim("turn on".to_string()),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_down_to_zero() {
        let token = TokenSource::new().issue();
        let (_emitter, stream) = DeviceStream::channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionSignal>();

        let _session = CaptureSession::open(token, stream, 2, tx);

        assert_eq!(rx.recv().await, Some(SessionSignal::Tick { token, remaining: 1 }));
        assert_eq!(rx.recv().await, Some(SessionSignal::Tick { token, remaining: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_session_stops_device_and_timer() {
        let token = TokenSource::new().issue();
        let (emitter, stream) = DeviceStream::<CaptureEvent>::channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionSignal>();

        let session = CaptureSession::open(token, stream, 10, tx);
        drop(session);

        assert!(emitter.is_stopped());
        // Both tasks are gone, so the channel closes without a single tick
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn interim_text_is_overwritten() {
        let token = TokenSource::new().issue();
        let (_emitter, stream) = DeviceStream::channel();
        let (tx, _rx) = mpsc::unbounded_channel::<SessionSignal>();

        let mut session = CaptureSession::open(token, stream, 10, tx);
        session.set_interim("turn");
        session.set_interim("turn on the");
        assert_eq!(session.interim(), "turn on the");
        assert!(session.owns(token));
        assert_eq!(session.remaining(), 10);
    }
}

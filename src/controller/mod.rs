//! Voice interaction controller
//!
//! One task owns every piece of mutable state. Commands from a
//! [`ControllerHandle`] and signals from capture sessions, output drains, wake
//! probes, timers and backend calls are handled one at a time, so transitions
//! never interleave. Each signal carries the token of the object that produced
//! it and is dropped unless that object is still current.
//!
//! [`ActivityState`] is derived from ownership: `Listening` while a
//! [`CaptureSession`] exists, `Speaking` while an [`OutputDrain`] exists. The
//! controller never holds both.

mod handle;
mod state;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use handle::ControllerHandle;
pub use state::{ActivityState, ControllerConfig};

use handle::Command;

use crate::Result;
use crate::backend::{APOLOGY, ChatBackend, ChatReply, ReplyAction};
use crate::events::{Cue, Role, StatusCategory, UiEvent, UiSink};
use crate::settings::SettingsStore;
use crate::voice::{
    CaptureErrorKind, CaptureEvent, CaptureOptions, CaptureSession, ChunkOutcome, DrainSignal,
    DrainStep, OutputDrain, OutputEvent, OutputQueue, ProbeSignal, SessionSignal, SpeechCapture,
    SpeechOutput, Token, TokenSource, WakeProbe, WakeWordDetector,
};

const READY: &str = "Ready to assist";
const READY_AFTER_NO_SPEECH: &str = "Ready to assist - Try again";
const PROCESSING: &str = "Processing...";
const SPEAKING: &str = "Speaking...";
const SPEECH_STOPPED: &str = "Speech stopped - Ready to assist";
const LISTEN_TIMEOUT: &str = "Listening timeout - Click microphone to try again";

/// Status text for a capture failure
#[must_use]
pub fn capture_error_text(kind: CaptureErrorKind, detail: &str) -> String {
    match kind {
        CaptureErrorKind::NoSpeech => {
            "No speech detected. Try speaking louder or closer to the microphone.".to_string()
        }
        CaptureErrorKind::CaptureDenied => {
            "Microphone access denied. Please allow microphone access.".to_string()
        }
        CaptureErrorKind::DeviceUnavailable => {
            "Microphone not accessible. Please check permissions.".to_string()
        }
        CaptureErrorKind::Network => {
            "Network error. Please check your internet connection.".to_string()
        }
        CaptureErrorKind::Other => format!("Speech recognition error: {detail}"),
    }
}

fn countdown_text(remaining: u32) -> String {
    format!("Listening... Speak now! ({remaining} seconds)")
}

/// Devices and services the controller drives
#[derive(Clone)]
pub struct Ports {
    pub capture: Arc<dyn SpeechCapture>,
    pub output: Arc<dyn SpeechOutput>,
    pub backend: Arc<dyn ChatBackend>,
}

/// Everything that can wake the controller besides a command
#[derive(Debug)]
enum Event {
    Session(SessionSignal),
    Drain(DrainSignal),
    Probe(ProbeSignal),
    BackendDone {
        token: Token,
        interaction: u64,
        result: Result<ChatReply>,
    },
    StatusReset {
        epoch: u64,
    },
    Health {
        connected: bool,
    },
}

impl From<SessionSignal> for Event {
    fn from(signal: SessionSignal) -> Self {
        Self::Session(signal)
    }
}

impl From<DrainSignal> for Event {
    fn from(signal: DrainSignal) -> Self {
        Self::Drain(signal)
    }
}

impl From<ProbeSignal> for Event {
    fn from(signal: ProbeSignal) -> Self {
        Self::Probe(signal)
    }
}

/// The controller actor
pub struct Controller {
    config: ControllerConfig,
    ports: Ports,
    settings: SettingsStore,
    ui: UiSink,
    detector: WakeWordDetector,
    tokens: TokenSource,
    events: mpsc::UnboundedSender<Event>,
    state: watch::Sender<ActivityState>,
    session: Option<CaptureSession>,
    drain: Option<OutputDrain<Event>>,
    /// Start listening once the current drain finishes (wake acknowledgement)
    listen_after_speech: bool,
    probe: Option<WakeProbe>,
    requests: HashMap<Token, JoinHandle<()>>,
    /// Bumped when the user opens or closes a session or drain; older replies are stale
    interaction: u64,
    /// Bumped by every status update; a pending reset only applies to its own
    status_epoch: u64,
    status_reset: Option<JoinHandle<()>>,
}

impl Controller {
    /// Start the controller task
    ///
    /// Must be called from within a Tokio runtime. The task runs until
    /// [`ControllerHandle::shutdown`] is called or every handle is dropped.
    pub fn spawn(
        config: ControllerConfig,
        ports: Ports,
        settings: SettingsStore,
        ui: UiSink,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ActivityState::Idle);

        let controller = Self {
            detector: WakeWordDetector::new(config.wake_words.clone()),
            config,
            ports,
            settings,
            ui,
            tokens: TokenSource::new(),
            events: event_tx,
            state: state_tx,
            session: None,
            drain: None,
            listen_after_speech: false,
            probe: None,
            requests: HashMap::new(),
            interaction: 0,
            status_epoch: 0,
            status_reset: None,
        };

        let task = tokio::spawn(controller.run(command_rx, event_rx));
        (ControllerHandle::new(command_tx, state_rx), task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        let ticker = self.config.poller.spawn_ticker(self.events.clone());
        self.check_health();
        self.set_status(READY, StatusCategory::Ready);
        tracing::info!(
            listen_timeout_secs = self.config.listen_timeout_secs,
            wake_words = ?self.detector.wake_words(),
            "voice controller started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = events.recv() => self.on_event(event),
            }
        }

        ticker.abort();
        self.release();
        tracing::info!("voice controller stopped");
    }

    fn on_command(&mut self, command: Command) {
        tracing::debug!(?command, state = %self.current_state(), "command");

        match command {
            Command::ToggleMic => {
                if self.drain.is_some() {
                    self.stop_speaking();
                } else if self.session.is_some() {
                    self.stop_listening();
                } else {
                    self.request_listen();
                }
            }
            Command::StartListening => self.request_listen(),
            Command::StopListening => self.stop_listening(),
            Command::StopSpeaking => self.stop_speaking(),
            Command::StopAll => {
                self.stop_speaking();
                self.stop_listening();
            }
            Command::SubmitText(text) => self.submit(&text),
            Command::Speak(text) => {
                self.begin_speaking(&text, false);
            }
            Command::Shutdown => {}
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Session(signal) => self.on_session(signal),
            Event::Drain(signal) => self.on_drain(signal),
            Event::Probe(signal) => self.on_probe(signal),
            Event::BackendDone {
                token,
                interaction,
                result,
            } => self.on_reply(token, interaction, result),
            Event::StatusReset { epoch } => {
                if epoch == self.status_epoch {
                    self.set_status(READY_AFTER_NO_SPEECH, StatusCategory::Ready);
                }
            }
            Event::Health { connected } => {
                tracing::info!(connected, "backend health check");
                self.ui.emit(UiEvent::Connection { connected });
            }
        }
    }

    // --- state bookkeeping ---

    fn current_state(&self) -> ActivityState {
        match (&self.session, &self.drain) {
            (Some(_), _) => ActivityState::Listening,
            (None, Some(_)) => ActivityState::Speaking,
            (None, None) => ActivityState::Idle,
        }
    }

    fn is_idle(&self) -> bool {
        self.session.is_none() && self.drain.is_none()
    }

    /// Publish the state derived from the session and drain slots
    fn sync_state(&self) {
        debug_assert!(
            self.session.is_none() || self.drain.is_none(),
            "listening and speaking at once"
        );

        let next = self.current_state();
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!(from = %state, to = %next, "activity state changed");
            *state = next;
            true
        });
    }

    fn set_status(&mut self, text: impl Into<String>, category: StatusCategory) {
        self.status_epoch += 1;
        if let Some(reset) = self.status_reset.take() {
            reset.abort();
        }
        self.ui.status(text, category);
    }

    fn release(&mut self) {
        self.session = None;
        if self.drain.take().is_some() {
            self.ports.output.cancel_all();
        }
        self.probe = None;
        for (_, request) in self.requests.drain() {
            request.abort();
        }
        if let Some(reset) = self.status_reset.take() {
            reset.abort();
        }
        self.sync_state();
    }

    // --- listening ---

    fn request_listen(&mut self) {
        if self.begin_listening() {
            self.interaction += 1;
        }
    }

    /// Open a capture session; returns whether one was opened
    fn begin_listening(&mut self) -> bool {
        if self.session.is_some() {
            tracing::debug!("already listening");
            return false;
        }
        if self.drain.is_some() {
            tracing::debug!("speaking, listen request ignored");
            return false;
        }

        // A probe must never overlap the main session
        self.probe = None;

        let token = self.tokens.issue();
        let options = CaptureOptions::command(self.config.language.clone());

        match self.ports.capture.start(&options) {
            Ok(stream) => {
                let timeout = self.config.listen_timeout_secs;
                self.session = Some(CaptureSession::open(
                    token,
                    stream,
                    timeout,
                    self.events.clone(),
                ));
                self.sync_state();
                self.ui.emit(UiEvent::Cue(Cue::ListeningStarted));
                self.set_status(countdown_text(timeout), StatusCategory::Listening);
                true
            }
            Err(e) => {
                self.report_capture_error(e.capture_kind(), &e.to_string());
                false
            }
        }
    }

    fn stop_listening(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("listening stopped by user");
            self.interaction += 1;
            self.sync_state();
            self.set_status(READY, StatusCategory::Ready);
        }
    }

    fn on_session(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::Tick { token, remaining } => {
                let Some(session) = self.session.as_mut().filter(|s| s.owns(token)) else {
                    tracing::trace!(%token, "tick for closed session");
                    return;
                };
                session.set_remaining(remaining);

                if remaining == 0 {
                    tracing::info!(%token, "listening timed out");
                    self.session = None;
                    self.sync_state();
                    self.set_status(LISTEN_TIMEOUT, StatusCategory::Ready);
                } else {
                    self.set_status(countdown_text(remaining), StatusCategory::Listening);
                }
            }
            SessionSignal::Capture { token, event } => {
                let Some(session) = self.session.as_mut().filter(|s| s.owns(token)) else {
                    tracing::trace!(%token, ?event, "event for closed session");
                    return;
                };

                match event {
                    CaptureEvent::Started => tracing::debug!(%token, "capture started"),
                    CaptureEvent::Interim(text) => {
                        session.set_interim(&text);
                        self.set_status(format!("Hearing: \"{text}\""), StatusCategory::Listening);
                    }
                    CaptureEvent::Final(text) => {
                        tracing::info!(%token, transcript = %text, "final transcript");
                        self.session = None;
                        self.sync_state();
                        if text.trim().is_empty() {
                            self.set_status(READY, StatusCategory::Ready);
                        } else {
                            self.submit(&text);
                        }
                    }
                    CaptureEvent::Error { kind, detail } => {
                        self.session = None;
                        self.sync_state();
                        self.report_capture_error(kind, &detail);
                    }
                    CaptureEvent::Ended => {
                        tracing::debug!(%token, "capture ended without transcript");
                        self.session = None;
                        self.sync_state();
                        self.set_status(READY, StatusCategory::Ready);
                    }
                }
            }
        }
    }

    fn report_capture_error(&mut self, kind: CaptureErrorKind, detail: &str) {
        tracing::warn!(%kind, detail, "capture failed");
        self.set_status(capture_error_text(kind, detail), StatusCategory::Error);

        if kind == CaptureErrorKind::NoSpeech {
            let epoch = self.status_epoch;
            let delay = self.config.no_speech_reset;
            let events = self.events.clone();
            self.status_reset = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(Event::StatusReset { epoch });
            }));
        }
    }

    // --- backend round trip ---

    fn submit(&mut self, text: &str) {
        let message = text.trim();
        if message.is_empty() {
            return;
        }

        self.ui.transcript(Role::User, message);
        self.set_status(PROCESSING, StatusCategory::Processing);

        let token = self.tokens.issue();
        let interaction = self.interaction;
        let backend = Arc::clone(&self.ports.backend);
        let events = self.events.clone();
        let message = message.to_string();

        tracing::debug!(%token, interaction, "sending message to backend");
        let request = tokio::spawn(async move {
            let result = backend.send(&message).await;
            let _ = events.send(Event::BackendDone {
                token,
                interaction,
                result,
            });
        });
        self.requests.insert(token, request);
    }

    fn on_reply(&mut self, token: Token, interaction: u64, result: Result<ChatReply>) {
        self.requests.remove(&token);

        let reply = result.unwrap_or_else(|e| {
            tracing::warn!(%token, error = %e, "chat backend round trip failed");
            ChatReply::text(APOLOGY)
        });
        self.ui.transcript(Role::Assistant, &reply.response);

        if interaction != self.interaction {
            tracing::debug!(%token, "reply superseded by a user action, not acting on it");
            if self.is_idle() {
                self.set_status(READY, StatusCategory::Ready);
            }
            return;
        }

        if let Some(ReplyAction::OpenResource { url }) = reply.action {
            tracing::info!(%url, "backend requested open resource");
            self.ui.emit(UiEvent::OpenResource { url });
        }

        if self.settings.snapshot().auto_speak && self.begin_speaking(&reply.response, false) {
            return;
        }
        if self.is_idle() {
            self.set_status(READY, StatusCategory::Ready);
        }
    }

    // --- speaking ---

    /// Queue `text` for output; returns whether speaking started
    fn begin_speaking(&mut self, text: &str, listen_after: bool) -> bool {
        if !self.is_idle() {
            tracing::debug!(state = %self.current_state(), "busy, speak request ignored");
            return false;
        }

        let settings = self.settings.snapshot();
        let voices = self.ports.output.voices();
        let queue = OutputQueue::build(text, &settings, &voices, self.config.chunk_threshold);
        if !queue.has_speech() {
            return false;
        }

        self.probe = None;

        let token = self.tokens.issue();
        tracing::debug!(
            %token,
            chunks = queue.len(),
            voice = ?queue.voice(),
            rate = queue.rate(),
            "speaking"
        );
        let mut drain = OutputDrain::new(token, queue, self.config.pacing, self.events.clone());
        if drain.advance(self.ports.output.as_ref()) == DrainStep::Finished {
            return false;
        }

        self.drain = Some(drain);
        self.listen_after_speech = listen_after;
        self.sync_state();
        self.set_status(SPEAKING, StatusCategory::Speaking);
        true
    }

    fn stop_speaking(&mut self) {
        if let Some(drain) = self.drain.take() {
            tracing::debug!(remaining = drain.remaining(), "speech stopped by user");
            drop(drain);
            self.interaction += 1;
            self.ports.output.cancel_all();
            self.listen_after_speech = false;
            self.sync_state();
            self.set_status(SPEECH_STOPPED, StatusCategory::Ready);
        }
    }

    fn finish_speaking(&mut self) {
        self.drain = None;
        self.sync_state();
        self.set_status(READY, StatusCategory::Ready);

        if std::mem::take(&mut self.listen_after_speech) {
            self.begin_listening();
        }
    }

    fn on_drain(&mut self, signal: DrainSignal) {
        let Some(drain) = self.drain.as_mut() else {
            tracing::trace!(?signal, "signal for finished drain");
            return;
        };

        match signal {
            DrainSignal::Output {
                token,
                chunk,
                event,
            } => {
                if !drain.is_awaiting(token, chunk) {
                    tracing::trace!(%token, chunk, ?event, "stale output event");
                    return;
                }
                match event {
                    OutputEvent::Started => tracing::trace!(%token, chunk, "chunk started"),
                    OutputEvent::Ended => drain.chunk_finished(ChunkOutcome::Completed),
                    OutputEvent::Error(detail) => {
                        tracing::warn!(%token, chunk, detail, "chunk failed, moving on");
                        drain.chunk_finished(ChunkOutcome::Failed);
                    }
                }
            }
            DrainSignal::PauseElapsed { token, chunk } => {
                if !drain.is_pausing_after(token, chunk) {
                    return;
                }
                if drain.advance(self.ports.output.as_ref()) == DrainStep::Finished {
                    self.finish_speaking();
                }
            }
        }
    }

    // --- wake word ---

    fn on_probe(&mut self, signal: ProbeSignal) {
        match signal {
            ProbeSignal::PollDue => self.poll_wake_word(),
            ProbeSignal::Capture { token, event } => {
                if !self.probe.as_ref().is_some_and(|p| p.owns(token)) {
                    return;
                }
                match event {
                    CaptureEvent::Final(text) => {
                        self.probe = None;
                        if self.detector.check_wake_word(&text).is_some() {
                            self.on_wake_word();
                        } else {
                            tracing::trace!(%token, transcript = %text, "no wake word");
                        }
                    }
                    CaptureEvent::Error { kind, .. } => {
                        self.probe = None;
                        tracing::trace!(%token, %kind, "wake probe error ignored");
                    }
                    CaptureEvent::Ended => self.probe = None,
                    CaptureEvent::Started | CaptureEvent::Interim(_) => {}
                }
            }
            ProbeSignal::Expired { token } => {
                if self.probe.as_ref().is_some_and(|p| p.owns(token)) {
                    tracing::trace!(%token, "wake probe expired");
                    self.probe = None;
                }
            }
        }
    }

    fn poll_wake_word(&mut self) {
        if !self.settings.snapshot().wake_word_enabled {
            self.probe = None;
            return;
        }
        // Re-checked here, when the poll fires, not when it was scheduled
        if !self.is_idle() || self.probe.is_some() {
            return;
        }

        let token = self.tokens.issue();
        let options = CaptureOptions::probe(self.config.language.clone(), self.config.poller.ceiling);

        match self.ports.capture.start(&options) {
            Ok(stream) => {
                self.probe = Some(WakeProbe::open(
                    token,
                    stream,
                    self.config.poller.deadline(),
                    self.events.clone(),
                ));
            }
            Err(e) => tracing::trace!(error = %e, "wake probe could not start"),
        }
    }

    fn on_wake_word(&mut self) {
        if !self.is_idle() {
            return;
        }
        tracing::info!("wake word activation");

        let acknowledgement = self.config.acknowledgement.clone();
        if !self.begin_speaking(&acknowledgement, true) {
            self.begin_listening();
        }
    }

    fn check_health(&self) {
        let backend = Arc::clone(&self.ports.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let connected = backend.health().await;
            let _ = events.send(Event::Health { connected });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_wording_per_category() {
        assert_eq!(
            capture_error_text(CaptureErrorKind::NoSpeech, ""),
            "No speech detected. Try speaking louder or closer to the microphone."
        );
        assert_eq!(
            capture_error_text(CaptureErrorKind::CaptureDenied, ""),
            "Microphone access denied. Please allow microphone access."
        );
        assert_eq!(
            capture_error_text(CaptureErrorKind::Other, "aborted"),
            "Speech recognition error: aborted"
        );
    }

    #[test]
    fn countdown_wording() {
        assert_eq!(countdown_text(7), "Listening... Speak now! (7 seconds)");
    }
}

//! Client side of the controller actor

use tokio::sync::{mpsc, watch};

use super::ActivityState;
use crate::{Error, Result};

/// Requests from the user or the embedding application
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    ToggleMic,
    StartListening,
    StopListening,
    StopSpeaking,
    StopAll,
    SubmitText(String),
    Speak(String),
    Shutdown,
}

/// Clonable handle for driving a running controller
///
/// Every method only enqueues a request; the controller applies it in order
/// with everything else it handles.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ActivityState>,
}

impl ControllerHandle {
    pub(crate) const fn new(
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<ActivityState>,
    ) -> Self {
        Self { commands, state }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ChannelClosed)
    }

    /// The microphone control: stop speech, else stop listening, else listen
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has stopped
    pub fn toggle_mic(&self) -> Result<()> {
        self.send(Command::ToggleMic)
    }

    /// Open a capture session; no-op unless idle
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has stopped
    pub fn start_listening(&self) -> Result<()> {
        self.send(Command::StartListening)
    }

    /// Close the capture session, if any
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has stopped
    pub fn stop_listening(&self) -> Result<()> {
        self.send(Command::StopListening)
    }

    /// Cancel speech output, if any
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has stopped
    pub fn stop_speaking(&self) -> Result<()> {
        self.send(Command::StopSpeaking)
    }

    /// Stop speech and listening
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has stopped
    pub fn stop_all(&self) -> Result<()> {
        self.send(Command::StopAll)
    }

    /// Send typed text through the backend round trip
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has stopped
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::SubmitText(text.into()))
    }

    /// Speak arbitrary text; no-op unless idle
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has stopped
    pub fn speak(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Speak(text.into()))
    }

    /// Ask the controller to release everything and exit
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the controller has already stopped
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Current activity state
    #[must_use]
    pub fn state(&self) -> ActivityState {
        *self.state.borrow()
    }

    /// Watch activity state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ActivityState> {
        self.state.clone()
    }
}

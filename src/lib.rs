//! Jarvis - voice interaction front-end for a conversational backend
//!
//! This library provides the core functionality for the Jarvis front-end:
//! - Voice interaction controller (idle / listening / speaking)
//! - Capture sessions with a countdown and stale-event rejection
//! - Sentence chunking for long spoken replies
//! - Background wake word probes
//! - Chat backend client
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Collaborators (CLI, UI)                 │
//! │   ControllerHandle commands  │  UiEvent stream       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Controller                         │
//! │  Sessions  │  Output drain  │  Wake probes  │ Tokens │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Ports                            │
//! │  SpeechCapture  │  SpeechOutput  │  ChatBackend      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod settings;
pub mod voice;

pub use backend::{ChatBackend, ChatReply, HttpChatBackend, ReplyAction};
pub use config::Config;
pub use controller::{ActivityState, Controller, ControllerConfig, ControllerHandle, Ports};
pub use error::{Error, Result};
pub use events::{Role, Status, StatusCategory, UiEvent, UiSink};
pub use settings::{Settings, SettingsStore};

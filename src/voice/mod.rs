//! Voice processing module
//!
//! Device ports, capture sessions, the output chunker and wake word probes.
//! Real devices live in `capture` (microphone + Whisper) and `playback`
//! (`OpenAI` TTS + speaker); tests substitute scripted ports.

mod capture;
mod chunker;
mod playback;
mod ports;
mod session;
mod stt;
mod tts;
mod utterance;
mod wake_word;

pub use capture::{Endpointer, MicrophoneCapture, SAMPLE_RATE, calculate_energy, samples_to_wav};
pub use chunker::{
    ChunkOutcome, ChunkPacing, DEFAULT_CHUNK_PAUSE, DEFAULT_CHUNK_THRESHOLD, DEFAULT_ERROR_PAUSE,
    DrainSignal, DrainStep, OutputDrain, OutputQueue, chunk_reply,
};
pub use playback::SpeakerOutput;
pub use ports::{
    CaptureErrorKind, CaptureEvent, CaptureOptions, CaptureStream, DeviceEmitter, DeviceStream,
    OutputEvent, OutputStream, SpeechCapture, SpeechOutput, StopSignal,
};
pub use session::{CaptureSession, SessionSignal, Token, TokenSource};
pub use stt::SpeechToText;
pub use tts::{FALLBACK_VOICE, OPENAI_VOICES, TextToSpeech};
pub use utterance::{NEUTRAL_PITCH, NEUTRAL_VOLUME, Utterance, VoiceInfo, select_default_voice};
pub use wake_word::{
    DEFAULT_ACKNOWLEDGEMENT, DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_CEILING, DEFAULT_PROBE_GRACE,
    DEFAULT_WAKE_WORDS, ProbeSignal, WakeProbe, WakeWordDetector, WakeWordPoller,
};

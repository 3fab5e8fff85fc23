//! Sentence chunking and sequential drain of spoken replies
//!
//! Long replies are split into sentence-sized utterances so the output device
//! keeps one voice for the whole reply. Every chunk of a queue shares the
//! voice and rate chosen when the queue was built. The drain hands one chunk
//! to the device at a time and waits for it to report completion, plus a
//! short pause, before requesting the next.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ports::{OutputEvent, SpeechOutput, StopSignal};
use super::session::Token;
use super::utterance::{Utterance, VoiceInfo, select_default_voice};
use crate::settings::Settings;

/// Replies longer than this many characters are split into sentences
pub const DEFAULT_CHUNK_THRESHOLD: usize = 200;

/// Pause after a chunk completes normally
pub const DEFAULT_CHUNK_PAUSE: Duration = Duration::from_millis(50);

/// Pause after a chunk fails
pub const DEFAULT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Split `text` into speakable chunks
///
/// Text of at most `threshold` characters stays whole. Longer text is split
/// after each run of `.`, `!` or `?`; text without any terminator stays whole.
/// Concatenating the chunks always reproduces `text`.
#[must_use]
pub fn chunk_reply(text: &str, threshold: usize) -> Vec<&str> {
    if text.chars().count() <= threshold {
        return vec![text];
    }

    let sentences = split_on_sentences(text);
    if sentences.len() <= 1 {
        return vec![text];
    }

    sentences
}

const fn is_terminator(b: u8) -> bool {
    matches!(b, b'.' | b'!' | b'?')
}

/// Split after every run of sentence terminators, keeping all bytes
///
/// Terminators are ASCII, so every split point is a char boundary.
fn split_on_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if is_terminator(bytes[i]) {
            let mut end = i + 1;
            while end < bytes.len() && is_terminator(bytes[end]) {
                end += 1;
            }
            segments.push(&text[start..end]);
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }

    if start < text.len() {
        segments.push(&text[start..]);
    }

    segments
}

/// Delays inserted between chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPacing {
    pub pause: Duration,
    pub error_pause: Duration,
}

impl Default for ChunkPacing {
    fn default() -> Self {
        Self {
            pause: DEFAULT_CHUNK_PAUSE,
            error_pause: DEFAULT_ERROR_PAUSE,
        }
    }
}

/// Ordered utterances derived from one reply
#[derive(Debug, Clone, PartialEq)]
pub struct OutputQueue {
    chunks: VecDeque<Utterance>,
    voice: Option<String>,
    rate: f32,
}

impl OutputQueue {
    /// Build a queue, freezing voice and rate from `settings`
    ///
    /// An explicit voice in `settings` wins; otherwise the default-selection
    /// rule runs over `voices`.
    #[must_use]
    pub fn build(text: &str, settings: &Settings, voices: &[VoiceInfo], threshold: usize) -> Self {
        let voice = settings
            .voice
            .clone()
            .or_else(|| select_default_voice(voices).map(|v| v.name.clone()));

        Self::with_voice(text, voice, settings.rate, threshold)
    }

    /// Build a queue with an already resolved voice
    #[must_use]
    pub fn with_voice(text: &str, voice: Option<String>, rate: f32, threshold: usize) -> Self {
        let chunks = chunk_reply(text, threshold)
            .into_iter()
            .map(|chunk| Utterance::new(chunk, voice.clone(), rate))
            .collect();

        Self {
            chunks,
            voice,
            rate,
        }
    }

    /// Voice shared by every chunk
    #[must_use]
    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    #[must_use]
    pub const fn rate(&self) -> f32 {
        self.rate
    }

    /// Chunks not yet taken, including blank ones
    pub fn utterances(&self) -> impl Iterator<Item = &Utterance> {
        self.chunks.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether any remaining chunk has something to say
    #[must_use]
    pub fn has_speech(&self) -> bool {
        self.chunks.iter().any(|u| !u.is_blank())
    }

    /// Take the next chunk worth speaking, discarding blank ones
    pub fn next_utterance(&mut self) -> Option<Utterance> {
        while let Some(utterance) = self.chunks.pop_front() {
            if !utterance.is_blank() {
                return Some(utterance);
            }
        }
        None
    }

    /// Discard every remaining chunk
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

/// Signals a drain feeds back into the controller queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainSignal {
    /// Device event for chunk number `chunk` of queue `token`
    Output {
        token: Token,
        chunk: usize,
        event: OutputEvent,
    },
    /// The inter-chunk pause after chunk `chunk` elapsed
    PauseElapsed { token: Token, chunk: usize },
}

/// How a chunk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed,
    Failed,
}

/// Whether the drain still has work after an advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// A chunk was handed to the device
    Speaking,
    /// Nothing left to say
    Finished,
}

#[derive(Debug)]
struct InFlight {
    stop: StopSignal,
    forwarder: JoinHandle<()>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.stop.trigger();
        self.forwarder.abort();
    }
}

/// Drives one [`OutputQueue`] through a [`SpeechOutput`] device
///
/// Dropping the drain stops the chunk in flight and cancels any pending pause.
#[derive(Debug)]
pub struct OutputDrain<T> {
    token: Token,
    queue: OutputQueue,
    pacing: ChunkPacing,
    tx: mpsc::UnboundedSender<T>,
    chunk: usize,
    awaiting: Option<usize>,
    in_flight: Option<InFlight>,
    pause: Option<JoinHandle<()>>,
}

impl<T> OutputDrain<T>
where
    T: From<DrainSignal> + Send + 'static,
{
    #[must_use]
    pub fn new(
        token: Token,
        queue: OutputQueue,
        pacing: ChunkPacing,
        tx: mpsc::UnboundedSender<T>,
    ) -> Self {
        Self {
            token,
            queue,
            pacing,
            tx,
            chunk: 0,
            awaiting: None,
            in_flight: None,
            pause: None,
        }
    }

    /// Whether `token` and `chunk` name the chunk this drain waits on
    #[must_use]
    pub fn is_awaiting(&self, token: Token, chunk: usize) -> bool {
        self.token == token && self.awaiting == Some(chunk)
    }

    /// Whether `token` and `chunk` name this drain's pending pause
    #[must_use]
    pub fn is_pausing_after(&self, token: Token, chunk: usize) -> bool {
        self.token == token && self.awaiting.is_none() && self.pause.is_some() && self.chunk == chunk
    }

    /// Hand the next speakable chunk to the device
    ///
    /// A device that refuses a chunk counts as a failed chunk: the error pause
    /// is scheduled and the drain moves on afterwards.
    pub fn advance(&mut self, output: &dyn SpeechOutput) -> DrainStep {
        self.pause = None;
        self.in_flight = None;

        let Some(utterance) = self.queue.next_utterance() else {
            return DrainStep::Finished;
        };

        self.chunk += 1;
        let chunk = self.chunk;

        match output.speak(&utterance) {
            Ok(mut stream) => {
                let token = self.token;
                let tx = self.tx.clone();
                let stop = stream.stop_signal();
                let forwarder = tokio::spawn(async move {
                    let mut finished = false;
                    while let Some(event) = stream.recv().await {
                        finished |= matches!(event, OutputEvent::Ended | OutputEvent::Error(_));
                        if tx
                            .send(DrainSignal::Output { token, chunk, event }.into())
                            .is_err()
                        {
                            return;
                        }
                    }
                    if !finished {
                        let event = OutputEvent::Error("device closed before completion".into());
                        let _ = tx.send(DrainSignal::Output { token, chunk, event }.into());
                    }
                });

                tracing::debug!(
                    token = %self.token,
                    chunk,
                    chars = utterance.text().chars().count(),
                    voice = ?utterance.voice(),
                    "speaking chunk"
                );
                self.awaiting = Some(chunk);
                self.in_flight = Some(InFlight { stop, forwarder });
            }
            Err(e) => {
                tracing::warn!(token = %self.token, chunk, error = %e, "output device refused chunk");
                self.awaiting = Some(chunk);
                self.chunk_finished(ChunkOutcome::Failed);
            }
        }

        DrainStep::Speaking
    }

    /// The awaited chunk reported completion; schedule the inter-chunk pause
    pub fn chunk_finished(&mut self, outcome: ChunkOutcome) {
        let Some(chunk) = self.awaiting.take() else {
            return;
        };
        self.in_flight = None;

        let delay = match outcome {
            ChunkOutcome::Completed => self.pacing.pause,
            ChunkOutcome::Failed => self.pacing.error_pause,
        };

        let token = self.token;
        let tx = self.tx.clone();
        self.pause = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DrainSignal::PauseElapsed { token, chunk }.into());
        }));
    }

    /// Chunks still waiting to be spoken
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl<T> Drop for OutputDrain<T> {
    fn drop(&mut self) {
        if let Some(pause) = self.pause.take() {
            pause.abort();
        }
        self.queue.clear();
    }
}

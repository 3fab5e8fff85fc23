//! Shared test utilities
//!
//! Scripted stand-ins for the capture device, the output device and the chat
//! backend, plus a harness that wires them into a running controller.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use jarvis_voice::voice::{
    CaptureErrorKind, CaptureEvent, CaptureOptions, CaptureStream, DeviceEmitter, DeviceStream,
    OutputEvent, OutputStream, SpeechCapture, SpeechOutput, Utterance, VoiceInfo,
};
use jarvis_voice::{
    ActivityState, ChatBackend, ChatReply, Controller, ControllerConfig, ControllerHandle, Error,
    Ports, Result, Settings, SettingsStore, Status, StatusCategory, UiEvent, UiSink,
};

/// Upper bound for any single wait in a test (virtual time when paused)
pub const WAIT: Duration = Duration::from_secs(120);

/// One call to [`SpeechCapture::start`]
pub struct CaptureCall {
    pub options: CaptureOptions,
    pub emitter: DeviceEmitter<CaptureEvent>,
}

impl CaptureCall {
    /// Whether this is a short wake word check rather than a command session
    pub fn is_wake_check(&self) -> bool {
        self.options.max_duration.is_some()
    }

    pub async fn emit(&self, event: CaptureEvent) {
        self.emitter.emit(event).await;
    }

    pub async fn final_text(&self, text: &str) {
        self.emit(CaptureEvent::Final(text.to_string())).await;
    }
}

/// Capture device driven by the test through [`CaptureCall`]s
pub struct ScriptedCapture {
    calls: mpsc::UnboundedSender<CaptureCall>,
    starts: AtomicUsize,
    refuse: Mutex<Option<CaptureErrorKind>>,
}

impl ScriptedCapture {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CaptureCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let capture = Self {
            calls: tx,
            starts: AtomicUsize::new(0),
            refuse: Mutex::new(None),
        };
        (Arc::new(capture), rx)
    }

    /// Number of sessions and wake checks started so far
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Make every later `start` fail with `kind`
    pub fn refuse_with(&self, kind: CaptureErrorKind) {
        *self.refuse.lock().unwrap() = Some(kind);
    }
}

impl SpeechCapture for ScriptedCapture {
    fn start(&self, options: &CaptureOptions) -> Result<CaptureStream> {
        if let Some(kind) = *self.refuse.lock().unwrap() {
            return Err(Error::Capture(kind, "scripted refusal".to_string()));
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        let (emitter, stream) = DeviceStream::channel();
        let _ = self.calls.send(CaptureCall {
            options: options.clone(),
            emitter,
        });
        Ok(stream)
    }
}

/// One call to [`SpeechOutput::speak`] on a manual output
pub struct OutputCall {
    pub utterance: Utterance,
    pub emitter: DeviceEmitter<OutputEvent>,
}

impl OutputCall {
    pub async fn finish(&self) {
        self.emitter.emit(OutputEvent::Started).await;
        self.emitter.emit(OutputEvent::Ended).await;
    }
}

/// Output device that records utterances
///
/// In auto mode every utterance starts and ends after `duration`. In manual
/// mode the test drives each utterance through its [`OutputCall`].
pub struct ScriptedOutput {
    spoken: Mutex<Vec<Utterance>>,
    manual: Option<mpsc::UnboundedSender<OutputCall>>,
    duration: Duration,
    cancels: AtomicUsize,
    voices: Vec<VoiceInfo>,
}

impl ScriptedOutput {
    pub fn auto(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            manual: None,
            duration,
            cancels: AtomicUsize::new(0),
            voices: default_voices(),
        })
    }

    pub fn manual() -> (Arc<Self>, mpsc::UnboundedReceiver<OutputCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = Self {
            spoken: Mutex::new(Vec::new()),
            manual: Some(tx),
            duration: Duration::ZERO,
            cancels: AtomicUsize::new(0),
            voices: default_voices(),
        };
        (Arc::new(output), rx)
    }

    /// Texts handed to the device, in order
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.text().to_string())
            .collect()
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

fn default_voices() -> Vec<VoiceInfo> {
    vec![
        VoiceInfo::new("Fred", "en-US"),
        VoiceInfo::new("Google UK English Female", "en-GB"),
    ]
}

impl SpeechOutput for ScriptedOutput {
    fn speak(&self, utterance: &Utterance) -> Result<OutputStream> {
        self.spoken.lock().unwrap().push(utterance.clone());
        let (emitter, stream) = DeviceStream::channel();

        if let Some(manual) = &self.manual {
            let _ = manual.send(OutputCall {
                utterance: utterance.clone(),
                emitter,
            });
        } else {
            let duration = self.duration;
            tokio::spawn(async move {
                emitter.emit(OutputEvent::Started).await;
                tokio::select! {
                    () = tokio::time::sleep(duration) => {
                        emitter.emit(OutputEvent::Ended).await;
                    }
                    () = emitter.stopped() => {}
                }
            });
        }

        Ok(stream)
    }

    fn cancel_all(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }
}

/// Chat backend with queued replies
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<ChatReply>>>,
    messages: Mutex<Vec<String>>,
    delay: Duration,
    healthy: bool,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Backend that takes `delay` to answer each message
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            messages: Mutex::new(Vec::new()),
            delay,
            healthy: true,
        })
    }

    pub fn reply(&self, reply: ChatReply) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn fail(&self, error: Error) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Messages received so far
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(&self, message: &str) -> Result<ChatReply> {
        self.messages.lock().unwrap().push(message.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ChatReply::text("ok")))
    }

    async fn health(&self) -> bool {
        self.healthy
    }
}

/// Collects UI events and waits for specific ones
pub struct UiLog {
    rx: mpsc::UnboundedReceiver<UiEvent>,
    seen: Vec<UiEvent>,
}

impl UiLog {
    /// Wait for the next status whose text is `text`
    pub async fn wait_for_status(&mut self, text: &str) -> Status {
        self.wait_for(|event| match event {
            UiEvent::Status(status) if status.text == text => Some(status.clone()),
            _ => None,
        })
        .await
    }

    /// Wait until `matcher` accepts an event
    pub async fn wait_for<T>(&mut self, mut matcher: impl FnMut(&UiEvent) -> Option<T>) -> T {
        let found = tokio::time::timeout(WAIT, async {
            loop {
                let event = self.rx.recv().await.expect("ui channel closed");
                let hit = matcher(&event);
                self.seen.push(event);
                if let Some(hit) = hit {
                    return hit;
                }
            }
        })
        .await;
        found.expect("timed out waiting for ui event")
    }

    /// Pull in everything emitted so far without waiting
    pub fn collect(&mut self) -> &[UiEvent] {
        while let Ok(event) = self.rx.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    /// Every status text observed so far
    pub fn statuses(&mut self) -> Vec<(String, StatusCategory)> {
        self.collect()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Status(status) => Some((status.text.clone(), status.category)),
                _ => None,
            })
            .collect()
    }

    /// Assistant transcript entries observed so far
    pub fn assistant_lines(&mut self) -> Vec<String> {
        self.collect()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Transcript {
                    role: jarvis_voice::Role::Assistant,
                    text,
                    ..
                } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A controller wired to scripted ports
pub struct Harness {
    pub handle: ControllerHandle,
    pub task: JoinHandle<()>,
    pub capture: Arc<ScriptedCapture>,
    pub captures: mpsc::UnboundedReceiver<CaptureCall>,
    pub output: Arc<ScriptedOutput>,
    pub backend: Arc<ScriptedBackend>,
    pub settings: SettingsStore,
    pub ui: UiLog,
}

impl Harness {
    /// Controller with wake word detection off and an auto-completing output
    pub fn start() -> Self {
        let settings = Settings {
            wake_word_enabled: false,
            ..Settings::default()
        };
        Self::start_with(
            ControllerConfig::default(),
            settings,
            ScriptedOutput::auto(Duration::from_millis(500)),
            ScriptedBackend::new(),
        )
    }

    pub fn start_with(
        config: ControllerConfig,
        settings: Settings,
        output: Arc<ScriptedOutput>,
        backend: Arc<ScriptedBackend>,
    ) -> Self {
        let (capture, captures) = ScriptedCapture::new();
        let settings = SettingsStore::new(settings);
        let (sink, rx) = UiSink::channel();

        let ports = Ports {
            capture: capture.clone(),
            output: output.clone(),
            backend: backend.clone(),
        };
        let (handle, task) = Controller::spawn(config, ports, settings.clone(), sink);

        Self {
            handle,
            task,
            capture,
            captures,
            output,
            backend,
            settings,
            ui: UiLog {
                rx,
                seen: Vec::new(),
            },
        }
    }

    /// Wait for the next capture start (session or wake check)
    pub async fn next_capture(&mut self) -> CaptureCall {
        tokio::time::timeout(WAIT, self.captures.recv())
            .await
            .expect("timed out waiting for capture start")
            .expect("capture channel closed")
    }

    /// Wait until the controller reports `state`
    pub async fn wait_for_state(&self, state: ActivityState) {
        let mut rx: watch::Receiver<ActivityState> = self.handle.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for state")
            .expect("controller stopped");
    }

    /// Let every runnable task make progress without advancing the clock much
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().unwrap();
        self.task.await.unwrap();
    }
}

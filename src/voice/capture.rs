//! Microphone capture with energy endpointing and Whisper transcription
//!
//! [`MicrophoneCapture`] records on a blocking thread until it has one spoken
//! utterance (speech followed by silence), then transcribes it. Each call to
//! [`SpeechCapture::start`] opens its own input stream.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::ports::{
    CaptureErrorKind, CaptureEvent, CaptureOptions, CaptureStream, DeviceEmitter, DeviceStream,
    SpeechCapture,
};
use super::stt::SpeechToText;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Minimum RMS energy to count a block as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech length worth transcribing (0.3 s)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.5 s)
const SILENCE_SAMPLES: usize = 8000;

/// Trailing silence tolerated in continuous mode (1 s)
const CONTINUOUS_SILENCE_SAMPLES: usize = 16000;

/// Give up if nobody speaks for this long
const NO_SPEECH_TIMEOUT: Duration = Duration::from_secs(8);

/// How often the recording thread drains the input buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Raw input from the default microphone
struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    fn new() -> Result<Self> {
        let device = default_input()?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| device_error(&e))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| {
                Error::Capture(
                    CaptureErrorKind::DeviceUnavailable,
                    "no mono 16kHz input config".to_string(),
                )
            })?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "microphone opened"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let device = default_input()?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => Error::Capture(
                    CaptureErrorKind::DeviceUnavailable,
                    "input device went away".to_string(),
                ),
                other => device_error(&other),
            })?;

        stream.play().map_err(|e| device_error(&e))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}

fn default_input() -> Result<cpal::Device> {
    cpal::default_host().default_input_device().ok_or_else(|| {
        Error::Capture(
            CaptureErrorKind::DeviceUnavailable,
            "no input device available".to_string(),
        )
    })
}

fn device_error(e: &impl std::fmt::Display) -> Error {
    Error::Capture(CaptureErrorKind::DeviceUnavailable, e.to_string())
}

/// Root mean square energy of a block of samples
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s * s).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum / samples.len() as f32;
    mean.sqrt()
}

/// Speech/silence tracker that decides when an utterance is over
#[derive(Debug)]
pub struct Endpointer {
    in_speech: bool,
    speech: Vec<f32>,
    voiced: usize,
    silence: usize,
    trailing_silence: usize,
}

impl Endpointer {
    /// Endpointer that closes an utterance after `trailing_silence` quiet samples
    #[must_use]
    pub const fn new(trailing_silence: usize) -> Self {
        Self {
            in_speech: false,
            speech: Vec::new(),
            voiced: 0,
            silence: 0,
            trailing_silence,
        }
    }

    /// Feed one block; returns true once an utterance is complete
    pub fn push(&mut self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        if !self.in_speech {
            if is_speech {
                self.in_speech = true;
                self.speech.clear();
                self.speech.extend_from_slice(samples);
                self.voiced = samples.len();
                self.silence = 0;
                tracing::trace!(energy, "speech onset");
            }
            return false;
        }

        self.speech.extend_from_slice(samples);
        if is_speech {
            self.voiced += samples.len();
            self.silence = 0;
        } else {
            self.silence += samples.len();
        }

        if self.silence > self.trailing_silence && self.voiced > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.speech.len(), "utterance complete");
            return true;
        }

        // A blip followed by a long gap is noise, not speech
        if self.silence > self.trailing_silence * 2 {
            self.reset();
        }

        false
    }

    /// Whether speech has started and not been discarded
    #[must_use]
    pub const fn has_speech(&self) -> bool {
        self.in_speech
    }

    /// Take the recorded speech and return to waiting
    pub fn take_speech(&mut self) -> Vec<f32> {
        self.in_speech = false;
        self.voiced = 0;
        self.silence = 0;
        std::mem::take(&mut self.speech)
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.speech.clear();
        self.voiced = 0;
        self.silence = 0;
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// What the recording thread came back with
enum Recording {
    Speech(Vec<f32>),
    Silence,
    Stopped,
}

/// Speech capture backed by the default microphone and Whisper
pub struct MicrophoneCapture {
    stt: Arc<SpeechToText>,
}

impl MicrophoneCapture {
    #[must_use]
    pub fn new(stt: SpeechToText) -> Self {
        Self { stt: Arc::new(stt) }
    }
}

impl SpeechCapture for MicrophoneCapture {
    fn start(&self, options: &CaptureOptions) -> Result<CaptureStream> {
        // Fail fast so the caller sees a start failure rather than an event
        default_input()?;

        let (emitter, stream) = DeviceStream::channel();
        tokio::spawn(run_capture(emitter, options.clone(), Arc::clone(&self.stt)));
        Ok(stream)
    }
}

async fn run_capture(
    emitter: DeviceEmitter<CaptureEvent>,
    options: CaptureOptions,
    stt: Arc<SpeechToText>,
) {
    emitter.emit(CaptureEvent::Started).await;

    let recorder = emitter.clone();
    let record_options = options.clone();
    let recorded =
        tokio::task::spawn_blocking(move || record_utterance(&record_options, &recorder)).await;

    let outcome = match recorded {
        Ok(Ok(Recording::Speech(samples))) => {
            tokio::select! {
                () = emitter.stopped() => None,
                event = transcribe(&stt, &samples, &options.language) => Some(event),
            }
        }
        Ok(Ok(Recording::Silence)) => Some(CaptureEvent::Error {
            kind: CaptureErrorKind::NoSpeech,
            detail: "no speech before timeout".to_string(),
        }),
        Ok(Ok(Recording::Stopped)) => None,
        Ok(Err(e)) => Some(CaptureEvent::Error {
            kind: e.capture_kind(),
            detail: e.to_string(),
        }),
        Err(e) => Some(CaptureEvent::Error {
            kind: CaptureErrorKind::Other,
            detail: e.to_string(),
        }),
    };

    if let Some(event) = outcome {
        emitter.emit(event).await;
    }
    emitter.emit(CaptureEvent::Ended).await;
}

async fn transcribe(stt: &SpeechToText, samples: &[f32], language: &str) -> CaptureEvent {
    let wav = match samples_to_wav(samples, SAMPLE_RATE) {
        Ok(wav) => wav,
        Err(e) => {
            return CaptureEvent::Error {
                kind: CaptureErrorKind::Other,
                detail: e.to_string(),
            };
        }
    };

    match stt.transcribe(&wav, language).await {
        Ok(text) if text.trim().is_empty() => CaptureEvent::Error {
            kind: CaptureErrorKind::NoSpeech,
            detail: "empty transcript".to_string(),
        },
        Ok(text) => CaptureEvent::Final(text.trim().to_string()),
        Err(e) => CaptureEvent::Error {
            kind: CaptureErrorKind::Network,
            detail: e.to_string(),
        },
    }
}

/// Record until one utterance completes, the ceiling passes, or the owner stops
fn record_utterance(
    options: &CaptureOptions,
    emitter: &DeviceEmitter<CaptureEvent>,
) -> Result<Recording> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let trailing = if options.continuous {
        CONTINUOUS_SILENCE_SAMPLES
    } else {
        SILENCE_SAMPLES
    };
    let mut endpointer = Endpointer::new(trailing);
    let started = Instant::now();

    loop {
        if emitter.is_stopped() {
            return Ok(Recording::Stopped);
        }

        std::thread::sleep(POLL_INTERVAL);

        if endpointer.push(&capture.take_buffer()) {
            return Ok(Recording::Speech(endpointer.take_speech()));
        }

        let elapsed = started.elapsed();
        if let Some(ceiling) = options.max_duration {
            if elapsed >= ceiling {
                return Ok(if endpointer.has_speech() {
                    Recording::Speech(endpointer.take_speech())
                } else {
                    Recording::Silence
                });
            }
        } else if !endpointer.has_speech() && elapsed >= NO_SPEECH_TIMEOUT {
            return Ok(Recording::Silence);
        }
    }
}

//! Spoken output through `OpenAI` TTS and the default speaker
//!
//! Every utterance is synthesized, decoded from MP3 and played on a blocking
//! thread. Playback polls for cancellation, so stopping the stream or calling
//! [`SpeechOutput::cancel_all`] cuts the audio within one poll interval.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::ports::{DeviceEmitter, DeviceStream, OutputEvent, OutputStream, SpeechOutput};
use super::tts::TextToSpeech;
use super::{Utterance, VoiceInfo};
use crate::{Error, Result};

/// Sample rate for playback (matches `OpenAI` TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// How often the playback thread checks for completion or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Detail reported when an utterance is cut short
const INTERRUPTED: &str = "interrupted";

/// Speech output backed by `OpenAI` TTS and the default speaker
pub struct SpeakerOutput {
    tts: Arc<TextToSpeech>,
    /// Bumped by `cancel_all`; utterances started under an older value stop
    epoch: Arc<AtomicU64>,
}

impl SpeakerOutput {
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts: Arc::new(tts),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl SpeechOutput for SpeakerOutput {
    fn speak(&self, utterance: &Utterance) -> Result<OutputStream> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Output("no output device available".to_string()))?;

        let (emitter, stream) = DeviceStream::channel();
        let playback = Playback {
            emitter,
            epoch: Arc::clone(&self.epoch),
            started_in: self.epoch.load(Ordering::SeqCst),
        };
        tokio::spawn(run_utterance(
            playback,
            Arc::clone(&self.tts),
            utterance.clone(),
        ));
        Ok(stream)
    }

    fn cancel_all(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(epoch, "cancelling all speech output");
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        TextToSpeech::voices()
    }
}

/// Cancellation view of one utterance
#[derive(Clone)]
struct Playback {
    emitter: DeviceEmitter<OutputEvent>,
    epoch: Arc<AtomicU64>,
    started_in: u64,
}

impl Playback {
    fn is_cancelled(&self) -> bool {
        self.emitter.is_stopped() || self.epoch.load(Ordering::SeqCst) != self.started_in
    }
}

async fn run_utterance(playback: Playback, tts: Arc<TextToSpeech>, utterance: Utterance) {
    let audio = tts
        .synthesize(utterance.text(), utterance.voice(), utterance.rate())
        .await;

    let mp3 = match audio {
        Ok(mp3) => mp3,
        Err(e) => {
            tracing::warn!(error = %e, "speech synthesis failed");
            playback
                .emitter
                .emit(OutputEvent::Error(e.to_string()))
                .await;
            return;
        }
    };

    if playback.is_cancelled() {
        playback
            .emitter
            .emit(OutputEvent::Error(INTERRUPTED.to_string()))
            .await;
        return;
    }

    playback.emitter.emit(OutputEvent::Started).await;

    let player = playback.clone();
    let volume = utterance.volume();
    let played = tokio::task::spawn_blocking(move || {
        let samples = decode_mp3(&mp3)?;
        play_samples_blocking(&samples, volume, &player)
    })
    .await;

    let last = match played {
        Ok(Ok(true)) => OutputEvent::Ended,
        Ok(Ok(false)) => OutputEvent::Error(INTERRUPTED.to_string()),
        Ok(Err(e)) => OutputEvent::Error(e.to_string()),
        Err(e) => OutputEvent::Error(e.to_string()),
    };
    playback.emitter.emit(last).await;
}

fn output_config(device: &cpal::Device) -> Result<StreamConfig> {
    let fits = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| fits(c, 1))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| fits(c, 2))
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    Ok(supported
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config())
}

/// Play samples until done; returns false if cancelled first
fn play_samples_blocking(samples: &[f32], volume: f32, playback: &Playback) -> Result<bool> {
    if samples.is_empty() {
        return Ok(true);
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;
    let config = output_config(&device)?;
    let channels = usize::from(config.channels);

    let samples: Arc<[f32]> = samples.iter().map(|s| s * volume).collect();
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Release);
                            0.0
                        });
                        frame.fill(sample);
                        pos = (pos + 1).min(samples.len());
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    let mut completed = true;
    while !finished.load(Ordering::Acquire) {
        if playback.is_cancelled() {
            completed = false;
            break;
        }
        if start.elapsed() > timeout {
            tracing::warn!("playback did not report completion, giving up");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), completed, "playback finished");
    Ok(completed)
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) if frame.channels == 2 => {
                samples.extend(frame.data.chunks(2).map(|pair| {
                    let left = f32::from(pair[0]) / 32768.0;
                    let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                    f32::midpoint(left, right)
                }));
            }
            Ok(frame) => {
                samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

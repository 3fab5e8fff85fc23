//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jarvis_voice::voice::{
    ChunkOutcome, ChunkPacing, DEFAULT_CHUNK_THRESHOLD, DeviceStream, DrainSignal, DrainStep,
    Endpointer, OutputDrain, OutputEvent, OutputQueue, OutputStream, SAMPLE_RATE, SpeechOutput,
    TokenSource, Utterance, WakeWordDetector, calculate_energy, chunk_reply, samples_to_wav,
};
use jarvis_voice::{Result, Settings};
use tokio::sync::mpsc;

/// Quiet samples closing an utterance (just over half a second)
const TRAILING: usize = 8000;

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Feed `samples` in 100 ms blocks; returns the block index that completed
fn feed(endpointer: &mut Endpointer, samples: &[f32]) -> Option<usize> {
    samples
        .chunks(SAMPLE_RATE as usize / 10)
        .position(|block| endpointer.push(block))
}

#[test]
fn test_wake_word_case_insensitive() {
    let detector = WakeWordDetector::new(vec!["hey jarvis".to_string()]);

    assert!(detector.check_wake_word("HEY JARVIS").is_some());
    assert!(detector.check_wake_word("HeY jArViS, lights").is_some());
    assert!(detector.check_wake_word("hey jarv").is_none());
}

#[test]
fn test_wake_word_substring_anywhere() {
    let detector = WakeWordDetector::default();

    assert_eq!(
        detector.check_wake_word("ok so jarvis turn it off"),
        Some("jarvis")
    );
    assert_eq!(detector.check_wake_word("hey jarvis"), Some("hey jarvis"));
    assert!(detector.check_wake_word("hello there").is_none());
}

#[test]
fn test_energy_levels() {
    assert!(calculate_energy(&generate_silence(0.1)) < f32::EPSILON);
    assert!(calculate_energy(&generate_sine_samples(440.0, 0.1, 0.3)) > 0.03);
    assert!(calculate_energy(&[]) < f32::EPSILON);
}

#[test]
fn test_speech_then_silence_completes() {
    let mut endpointer = Endpointer::new(TRAILING);

    assert!(feed(&mut endpointer, &generate_silence(0.3)).is_none());
    assert!(!endpointer.has_speech());

    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    assert!(feed(&mut endpointer, &speech).is_none());
    assert!(endpointer.has_speech());

    // Completes on the first block past the trailing silence
    let done = feed(&mut endpointer, &generate_silence(1.0));
    assert_eq!(done, Some(5));

    let taken = endpointer.take_speech();
    assert_eq!(taken.len(), speech.len() + 6 * (SAMPLE_RATE as usize / 10));
    assert!(!endpointer.has_speech());
}

#[test]
fn test_short_blip_is_discarded() {
    let mut endpointer = Endpointer::new(TRAILING);

    feed(&mut endpointer, &generate_sine_samples(440.0, 0.1, 0.3));
    assert!(endpointer.has_speech());

    assert!(feed(&mut endpointer, &generate_silence(1.5)).is_none());
    assert!(!endpointer.has_speech());
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");
    assert!(wav_data.len() > 44);
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[0], 0);
    assert!(read_samples[3] > 32000);
}

#[test]
fn test_reply_chunking() {
    let short = "Lights are on.";
    assert_eq!(chunk_reply(short, DEFAULT_CHUNK_THRESHOLD), vec![short]);

    let long = format!("{} Then this. And that!", "Filler sentence here.".repeat(10));
    let chunks = chunk_reply(&long, DEFAULT_CHUNK_THRESHOLD);
    assert_eq!(chunks.len(), 12);
    assert_eq!(chunks.last(), Some(&" And that!"));
    assert_eq!(chunks.concat(), long);
}

/// Output device that finishes each utterance after a fixed delay
struct TimedOutput {
    spoken: Mutex<Vec<(tokio::time::Instant, String)>>,
    fail_first: bool,
}

impl SpeechOutput for TimedOutput {
    fn speak(&self, utterance: &Utterance) -> Result<OutputStream> {
        let mut spoken = self.spoken.lock().unwrap();
        let failing = self.fail_first && spoken.is_empty();
        spoken.push((tokio::time::Instant::now(), utterance.text().to_string()));

        let (emitter, stream) = DeviceStream::channel();
        tokio::spawn(async move {
            emitter.emit(OutputEvent::Started).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            let event = if failing {
                OutputEvent::Error("synthesis failed".to_string())
            } else {
                OutputEvent::Ended
            };
            emitter.emit(event).await;
        });
        Ok(stream)
    }

    fn cancel_all(&self) {}
}

/// Run a drain to completion the way its owner would
async fn drain_to_end(output: &TimedOutput, queue: OutputQueue) {
    let token = TokenSource::new().issue();
    let (tx, mut rx) = mpsc::unbounded_channel::<DrainSignal>();
    let mut drain = OutputDrain::new(token, queue, ChunkPacing::default(), tx);

    if drain.advance(output) == DrainStep::Finished {
        return;
    }

    while let Some(signal) = rx.recv().await {
        match signal {
            DrainSignal::Output {
                token,
                chunk,
                event,
            } => {
                if !drain.is_awaiting(token, chunk) {
                    continue;
                }
                match event {
                    OutputEvent::Started => {}
                    OutputEvent::Ended => drain.chunk_finished(ChunkOutcome::Completed),
                    OutputEvent::Error(_) => drain.chunk_finished(ChunkOutcome::Failed),
                }
            }
            DrainSignal::PauseElapsed { token, chunk } => {
                if drain.is_pausing_after(token, chunk) && drain.advance(output) == DrainStep::Finished
                {
                    return;
                }
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_drain_speaks_chunks_in_order_with_pauses() {
    let output = Arc::new(TimedOutput {
        spoken: Mutex::new(Vec::new()),
        fail_first: false,
    });
    let text = format!("{}. Second part. Third part!", "a".repeat(200));
    let queue = OutputQueue::build(&text, &Settings::default(), &[], DEFAULT_CHUNK_THRESHOLD);

    drain_to_end(&output, queue).await;

    let spoken = output.spoken.lock().unwrap().clone();
    let texts: Vec<&str> = spoken.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[1], " Second part.");
    assert_eq!(texts[2], " Third part!");

    // 200 ms of speech plus the 50 ms pause between chunk requests
    for pair in spoken.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(250));
    }
}

#[tokio::test(start_paused = true)]
async fn test_drain_continues_after_failed_chunk() {
    let output = Arc::new(TimedOutput {
        spoken: Mutex::new(Vec::new()),
        fail_first: true,
    });
    let text = format!("{}. Still spoken.", "b".repeat(200));
    let queue = OutputQueue::with_voice(&text, None, 1.0, DEFAULT_CHUNK_THRESHOLD);

    drain_to_end(&output, queue).await;

    let spoken = output.spoken.lock().unwrap().clone();
    assert_eq!(spoken.len(), 2);
    assert_eq!(spoken[1].1, " Still spoken.");
    assert!(spoken[1].0 - spoken[0].0 >= Duration::from_millis(300));
}

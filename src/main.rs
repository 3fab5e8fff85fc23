use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use jarvis_voice::settings::{MAX_RATE, MIN_RATE};
use jarvis_voice::voice::{
    CaptureEvent, CaptureOptions, MicrophoneCapture, OutputEvent, SpeakerOutput, SpeechCapture,
    SpeechOutput, SpeechToText, TextToSpeech, Utterance,
};
use jarvis_voice::{
    ChatBackend, Config, Controller, ControllerHandle, HttpChatBackend, Ports, Role,
    SettingsStore, UiEvent, UiSink,
};

/// Jarvis - voice front-end for a conversational backend
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Chat backend base URL (overrides config and `JARVIS_BACKEND_URL`)
    #[arg(long)]
    backend_url: Option<String>,

    /// Start with wake word detection off
    #[arg(long)]
    no_wake_word: bool,

    /// Start with automatic reply speech off
    #[arg(long)]
    no_auto_speak: bool,

    /// Speech rate multiplier
    #[arg(long)]
    rate: Option<f32>,

    /// Voice to speak with
    #[arg(long)]
    voice: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Capture one utterance and print the transcript
    TestMic,
    /// Speak text through the configured voice
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Check that the chat backend is reachable
    TestBackend,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,jarvis_voice=info",
        1 => "info,jarvis_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    if let Some(url) = cli.backend_url {
        config.backend.url = url;
    }
    if cli.no_wake_word {
        config.settings.wake_word_enabled = false;
    }
    if cli.no_auto_speak {
        config.settings.auto_speak = false;
    }
    if let Some(rate) = cli.rate {
        anyhow::ensure!(rate.is_finite(), "--rate must be a finite number, got {rate}");
        config.settings.rate = rate.clamp(MIN_RATE, MAX_RATE);
    }
    if cli.voice.is_some() {
        config.settings.voice = cli.voice;
    }
    tracing::debug!(controller = ?config.controller, "loaded configuration");

    let api_key = config.api_keys.openai.clone().unwrap_or_default();
    let backend = HttpChatBackend::new(&config.backend.url, config.backend.timeout)?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic => {
                let stt = SpeechToText::new_whisper(api_key, config.voice.stt_model)?;
                test_mic(MicrophoneCapture::new(stt), &config.controller.language).await
            }
            Command::TestTts { text } => {
                let tts = TextToSpeech::new_openai(api_key, config.voice.tts_model)?;
                let utterance = Utterance::new(text, config.settings.voice, config.settings.rate);
                test_tts(SpeakerOutput::new(tts), &utterance).await
            }
            Command::TestBackend => test_backend(&backend).await,
        };
    }

    let stt = SpeechToText::new_whisper(api_key.clone(), config.voice.stt_model.clone())?;
    let tts = TextToSpeech::new_openai(api_key, config.voice.tts_model.clone())?;
    let ports = Ports {
        capture: Arc::new(MicrophoneCapture::new(stt)),
        output: Arc::new(SpeakerOutput::new(tts)),
        backend: Arc::new(backend),
    };

    tracing::info!(backend = %config.backend.url, "starting jarvis");

    let settings = SettingsStore::new(config.settings.clone());
    let (ui, ui_rx) = UiSink::channel();
    let printer = tokio::spawn(print_events(ui_rx));
    let (handle, controller) = Controller::spawn(config.controller, ports, settings.clone(), ui);

    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !dispatch(&handle, &settings, parse_line(&line))? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                break;
            }
        }
    }

    handle.shutdown().ok();
    controller.await?;
    printer.abort();
    Ok(())
}

const HELP: &str = "\
Commands:
  <enter>            toggle the microphone
  <text>             send typed text
  /stop              stop speaking and listening
  /speak <text>      speak text
  /rate <x>          set speech rate
  /voice [name]      set voice (empty for default)
  /wake on|off       wake word detection
  /autospeak on|off  speak replies automatically
  /quit              exit";

/// One parsed line of console input
#[derive(Debug, PartialEq)]
enum ReplCommand {
    Toggle,
    StopAll,
    Speak(String),
    Rate(f32),
    Voice(Option<String>),
    WakeWord(bool),
    AutoSpeak(bool),
    Quit,
    Submit(String),
    Invalid(String),
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Toggle;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Submit(line.to_string());
    };

    let (name, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, arg)| (name, arg.trim()));

    match name {
        "stop" => ReplCommand::StopAll,
        "quit" | "exit" => ReplCommand::Quit,
        "speak" if !arg.is_empty() => ReplCommand::Speak(arg.to_string()),
        "rate" => match arg.parse::<f32>() {
            Ok(rate) if rate.is_finite() => ReplCommand::Rate(rate),
            _ => ReplCommand::Invalid(format!("not a rate: {arg}")),
        },
        "voice" => ReplCommand::Voice((!arg.is_empty()).then(|| arg.to_string())),
        "wake" => parse_switch(arg).map_or_else(
            || ReplCommand::Invalid("usage: /wake on|off".to_string()),
            ReplCommand::WakeWord,
        ),
        "autospeak" => parse_switch(arg).map_or_else(
            || ReplCommand::Invalid("usage: /autospeak on|off".to_string()),
            ReplCommand::AutoSpeak,
        ),
        _ => ReplCommand::Invalid(format!("unknown command: /{name}")),
    }
}

/// Apply one console command; returns false when the loop should end
fn dispatch(
    handle: &ControllerHandle,
    settings: &SettingsStore,
    command: ReplCommand,
) -> jarvis_voice::Result<bool> {
    match command {
        ReplCommand::Toggle => handle.toggle_mic()?,
        ReplCommand::StopAll => handle.stop_all()?,
        ReplCommand::Speak(text) => handle.speak(text)?,
        ReplCommand::Submit(text) => handle.submit_text(text)?,
        ReplCommand::Rate(rate) => settings.update(|s| s.rate = rate),
        ReplCommand::Voice(voice) => settings.update(|s| s.voice = voice),
        ReplCommand::WakeWord(enabled) => settings.update(|s| s.wake_word_enabled = enabled),
        ReplCommand::AutoSpeak(enabled) => settings.update(|s| s.auto_speak = enabled),
        ReplCommand::Invalid(message) => println!("{message}"),
        ReplCommand::Quit => return Ok(false),
    }
    Ok(true)
}

async fn print_events(mut events: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::Status(status) => println!("[{}] {}", status.category, status.text),
            UiEvent::Transcript { role, text, at } => {
                let who = match role {
                    Role::User => "you",
                    Role::Assistant => "jarvis",
                };
                println!("{} {who}: {text}", at.format("%H:%M:%S"));
            }
            UiEvent::Cue(_) => print!("\x07"),
            UiEvent::OpenResource { url } => println!("-> open {url}"),
            UiEvent::Connection { connected } => {
                if connected {
                    println!("backend connected");
                } else {
                    println!("backend unreachable");
                }
            }
        }
    }
}

async fn test_mic(capture: MicrophoneCapture, language: &str) -> anyhow::Result<()> {
    println!("Speak now...");
    let mut stream = capture.start(&CaptureOptions::command(language))?;

    while let Some(event) = stream.recv().await {
        match event {
            CaptureEvent::Final(text) => println!("Transcript: {text}"),
            CaptureEvent::Error { kind, detail } => println!("Error ({kind}): {detail}"),
            CaptureEvent::Ended => break,
            CaptureEvent::Started | CaptureEvent::Interim(_) => {}
        }
    }

    Ok(())
}

async fn test_tts(output: SpeakerOutput, utterance: &Utterance) -> anyhow::Result<()> {
    println!("Speaking: {}", utterance.text());
    let mut stream = output.speak(utterance)?;

    while let Some(event) = stream.recv().await {
        match event {
            OutputEvent::Started => {}
            OutputEvent::Ended => {
                println!("Done.");
                break;
            }
            OutputEvent::Error(e) => anyhow::bail!("speech failed: {e}"),
        }
    }

    Ok(())
}

async fn test_backend(backend: &HttpChatBackend) -> anyhow::Result<()> {
    if backend.health().await {
        println!("Backend at {} is healthy", backend.chat_url());
        Ok(())
    } else {
        anyhow::bail!("backend health check failed")
    }
}

//! CLI binary for voxline.

use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use voxline::agent::{AgentStream, ApiAgent};
use voxline::audio::{AudioSink, CpalCapture, CpalPlayback, SinkFactory, WavFileSink};
use voxline::config::AudioConfig;
use voxline::stt::HttpTranscriber;
use voxline::tts::HttpSpeechEngine;
use voxline::{Collaborators, PipelineController, PipelineEvent, SpeechConfig};

/// Voxline: talk to a language-model agent and hear it answer as it types.
#[derive(Parser)]
#[command(name = "voxline", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rotating file in the default log directory.
    #[arg(long)]
    log_file: bool,

    /// Directory for the log file (implies --log-file).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write speech to this WAV file instead of the speakers.
    #[arg(long)]
    wav_out: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Type prompts and hear the answers. `/listen` records a spoken
    /// prompt, `/stop` silences the current answer, `/reset` forgets the
    /// conversation, `/quit` exits.
    Chat,

    /// List available audio devices.
    Devices,

    /// Speak the given text without involving the agent.
    Say {
        /// Text to speak.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Record a spoken prompt, transcribe it and hear the answer.
    Listen {
        /// Recording length in seconds.
        #[arg(long, default_value_t = 5.0)]
        seconds: f32,
    },

    /// Write the default configuration to the default config path.
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| cli.log_file.then(SpeechConfig::default_log_dir));
    let _log_guard = init_logging(log_dir.as_deref());

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config, cli.wav_out).await,
        Command::Devices => list_devices(),
        Command::Say { text } => run_say(config, cli.wav_out, &text.join(" ")).await,
        Command::Listen { seconds } => run_listen(config, cli.wav_out, seconds).await,
        Command::InitConfig => init_config(),
    }
}

/// Log to stderr, and to a rolling file when `log_dir` is set.
///
/// Dependency noise is suppressed by default; `RUST_LOG` overrides it.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("voxline=info,ureq=warn,reqwest=warn,cpal=warn"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "voxline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}

/// An explicit path must load; the default path is used only if present.
fn load_config(path: Option<&Path>) -> anyhow::Result<SpeechConfig> {
    if let Some(path) = path {
        return Ok(SpeechConfig::from_file(path)?);
    }
    let default_path = SpeechConfig::default_config_path();
    if default_path.exists() {
        info!("loading config from {}", default_path.display());
        Ok(SpeechConfig::from_file(&default_path)?)
    } else {
        Ok(SpeechConfig::default())
    }
}

fn init_config() -> anyhow::Result<()> {
    let path = SpeechConfig::default_config_path();
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    SpeechConfig::default().save_to_file(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn sink_factory(audio: &AudioConfig, wav_out: Option<PathBuf>) -> SinkFactory {
    match wav_out {
        Some(path) => {
            let rate = audio.output_sample_rate;
            Box::new(move || Ok(Box::new(WavFileSink::create(&path, rate)?) as Box<dyn AudioSink>))
        }
        None => {
            let audio = audio.clone();
            Box::new(move || Ok(Box::new(CpalPlayback::new(&audio)?) as Box<dyn AudioSink>))
        }
    }
}

fn start_pipeline(
    config: SpeechConfig,
    wav_out: Option<PathBuf>,
) -> anyhow::Result<(PipelineController, Receiver<PipelineEvent>, Arc<ApiAgent>)> {
    let agent = Arc::new(ApiAgent::new(&config.llm));
    let collaborators = Collaborators {
        agent: Arc::clone(&agent) as Arc<dyn AgentStream>,
        synthesizer: Box::new(HttpSpeechEngine::new(&config.tts)),
        sink_factory: sink_factory(&config.audio, wav_out),
        transcriber: Arc::new(HttpTranscriber::new(&config.stt)),
    };
    let (controller, events) = PipelineController::start(config, collaborators)?;
    Ok((controller, events, agent))
}

async fn run_chat(config: SpeechConfig, wav_out: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Voxline v{}", env!("CARGO_PKG_VERSION"));

    let audio = config.audio.clone();
    let (controller, events, agent) = start_pipeline(config, wav_out)?;
    spawn_display(events)?;

    println!("\nType a prompt and press Enter. /listen, /stop, /reset, /quit. Ctrl+C to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
        };
        let Some(line) = line else { break };
        let prompt = line.trim();
        match prompt {
            "" => {}
            "/quit" => break,
            "/stop" => {
                let purged = controller.stop_speaking();
                info!("stopped speaking, {purged} sentence(s) dropped");
            }
            "/reset" => {
                controller.stop_speaking();
                agent.clear_history();
                println!("Conversation cleared.");
            }
            "/listen" => {
                println!("Recording... press Enter to finish.");
                let capture = match CpalCapture::new(&audio) {
                    Ok(capture) => capture,
                    Err(e) => {
                        eprintln!("cannot open microphone: {e}");
                        continue;
                    }
                };
                let stop = tokio_util::sync::CancellationToken::new();
                let (samples, ended) = tokio::join!(capture.record(stop.clone()), async {
                    let line = lines.next_line().await;
                    stop.cancel();
                    line
                });
                if matches!(ended, Ok(None)) {
                    break;
                }
                match samples {
                    Ok(samples) => {
                        transcribe_and_submit(&controller, samples, capture.sample_rate()).await?;
                    }
                    Err(e) => eprintln!("recording failed: {e}"),
                }
            }
            prompt => {
                controller.submit_text(prompt)?;
            }
        }
    }

    controller.shutdown();
    Ok(())
}

async fn run_say(
    config: SpeechConfig,
    wav_out: Option<PathBuf>,
    text: &str,
) -> anyhow::Result<()> {
    let (controller, events, _agent) = start_pipeline(config, wav_out)?;
    spawn_display(events)?;

    let sequences = controller.speak(text)?;
    if sequences.is_empty() {
        warn!("nothing to say");
    } else {
        tokio::select! {
            _ = wait_until_idle(&controller) => {}
            _ = tokio::signal::ctrl_c() => {
                controller.stop_speaking();
            }
        }
    }

    controller.shutdown();
    Ok(())
}

async fn run_listen(
    config: SpeechConfig,
    wav_out: Option<PathBuf>,
    seconds: f32,
) -> anyhow::Result<()> {
    let capture = CpalCapture::new(&config.audio)?;
    let (controller, events, _agent) = start_pipeline(config, wav_out)?;
    spawn_display(events)?;

    let stop = tokio_util::sync::CancellationToken::new();
    let timer = stop.clone();
    let seconds = seconds.max(0.1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs_f32(seconds)).await;
        timer.cancel();
    });
    println!("Listening for {seconds:.1}s...");
    let samples = capture.record(stop).await?;

    if transcribe_and_submit(&controller, samples, capture.sample_rate()).await? {
        tokio::select! {
            _ = async {
                while !controller.active_requests().is_empty() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                wait_until_idle(&controller).await;
            } => {}
            _ = tokio::signal::ctrl_c() => {
                controller.stop_speaking();
            }
        }
    }

    controller.shutdown();
    Ok(())
}

/// Transcribe a recording and, if anything was heard, submit it as a
/// prompt. Returns whether a prompt was submitted.
async fn transcribe_and_submit(
    controller: &PipelineController,
    samples: Vec<f32>,
    sample_rate: u32,
) -> anyhow::Result<bool> {
    if samples.is_empty() {
        println!("(no audio captured)");
        return Ok(false);
    }
    let transcript = controller
        .submit_audio(samples, sample_rate)?
        .await
        .unwrap_or_default();
    if transcript.is_empty() {
        println!("(nothing heard)");
        return Ok(false);
    }
    println!("You: {transcript}");
    controller.submit_text(&transcript)?;
    Ok(true)
}

async fn wait_until_idle(controller: &PipelineController) {
    while !controller.queue().is_idle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Print notifications on a dedicated thread.
fn spawn_display(events: Receiver<PipelineEvent>) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("voxline-display".to_owned())
        .spawn(move || {
            let mut display = Display::default();
            for event in events.iter() {
                display.show(event);
            }
        })?;
    Ok(())
}

/// Terminal rendering of pipeline notifications.
#[derive(Default)]
struct Display {
    /// Text streamed so far, per message.
    streamed: HashMap<String, String>,
}

impl Display {
    fn show(&mut self, event: PipelineEvent) {
        let mut out = std::io::stdout().lock();
        let _ = match event {
            PipelineEvent::TextDelta { message_id, text } => {
                let streamed = self.streamed.entry(message_id).or_default();
                if streamed.is_empty() {
                    let _ = write!(out, "\nAssistant: ");
                }
                streamed.push_str(&text);
                write!(out, "{text}").and_then(|()| out.flush())
            }
            PipelineEvent::MessageComplete { message_id, text } => {
                let streamed = self.streamed.remove(&message_id).unwrap_or_default();
                let streamed = streamed.trim();
                if streamed.is_empty() {
                    writeln!(out, "\nAssistant: {text}\n")
                } else {
                    // Anything past the streamed text is the reference list.
                    let extra = text.strip_prefix(streamed).unwrap_or_default().trim();
                    if extra.is_empty() {
                        writeln!(out, "\n")
                    } else {
                        writeln!(out, "\n\n{extra}\n")
                    }
                }
            }
            PipelineEvent::ToolCall { name, .. } => writeln!(out, "\n[using {name}...]"),
            PipelineEvent::ToolResult { name, .. } => writeln!(out, "[{name} done]"),
            PipelineEvent::MemoryUpdating { .. } => writeln!(out, "[updating memory...]"),
            PipelineEvent::Error { message } => writeln!(out, "\nerror: {message}"),
            PipelineEvent::SpeakingStarted { .. }
            | PipelineEvent::SpeakingEnded { .. }
            | PipelineEvent::SttCompleted { .. } => Ok(()),
        };
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use parley_voice::audio::device::{self, CpalBackend};
use parley_voice::audio::memory::MemoryBackend;
use parley_voice::audio::{AudioBackend, AudioClip, BlockRead, read_wav};
use parley_voice::voice::{
    Capture, PlaybackEngine, SpeechClient, Transcriber, VoiceActivityClassifier,
    WhisperTranscriber, capture_until_pause,
};
use parley_voice::{ChatClient, Config, DeviceSelector, Session, Signal, TurnEvent};

/// Parley - hands-free voice chat with AI assistants
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of ~/.config/parley/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Input device index or name substring
    #[arg(long, global = true)]
    device_in: Option<String>,

    /// Output device index or name substring
    #[arg(long, global = true)]
    device_out: Option<String>,

    /// RMS level at which a block counts as speech
    #[arg(long, global = true)]
    energy_threshold: Option<f32>,

    /// Voice-activity model threshold (0.0 to 1.0)
    #[arg(long, global = true)]
    vad_threshold: Option<f32>,

    /// Silence in milliseconds that ends an utterance
    #[arg(long, global = true)]
    min_silence_ms: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Voice chat until Ctrl+C (the default)
    Chat {
        /// Print replies without speaking them
        #[arg(long)]
        no_speak: bool,
        /// Keep playing when the user talks over a reply
        #[arg(long)]
        no_barge_in: bool,
        /// Let the model call built-in tools
        #[arg(long)]
        tools: bool,
        /// System prompt for the assistant
        #[arg(long, short)]
        system: Option<String>,
        /// Allow <think> reasoning in replies
        #[arg(long)]
        thinking: bool,
        /// STT language code
        #[arg(long)]
        language: Option<String>,
    },
    /// List audio devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Check devices, voice activity model, and API keys
    Doctor {
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Capture one utterance from the microphone and print the transcript
    Listen,
    /// Transcribe a WAV file
    Transcribe {
        /// Path to a WAV file
        path: PathBuf,
    },
    /// Run a WAV file through utterance capture and print what it decides
    Replay {
        /// Path to a 16 kHz WAV file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley_voice=info",
        1 => "info,parley_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
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
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    apply_capture_flags(&cli, &mut config)?;
    tracing::debug!(session = ?config.session, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat {
        no_speak: false,
        no_barge_in: false,
        tools: false,
        system: None,
        thinking: false,
        language: None,
    }) {
        Command::Chat {
            no_speak,
            no_barge_in,
            tools,
            system,
            thinking,
            language,
        } => {
            let session = &mut config.session;
            session.speak &= !no_speak;
            session.capture.allow_barge_in &= !no_barge_in;
            session.use_tools |= tools;
            session.enable_thinking |= thinking;
            if system.is_some() {
                session.system_prompt = system;
            }
            if let Some(language) = language {
                session.language = language;
            }
            chat(config).await
        }
        Command::Devices { json } => list_devices(json),
        Command::Doctor { json } => doctor(&config, json),
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker(&config).await,
        Command::Listen => listen(config).await,
        Command::Transcribe { path } => transcribe_file(&config, &path).await,
        Command::Replay { path } => replay(&config, &path).await,
    }
}

/// CLI flags win over environment and config file
fn apply_capture_flags(cli: &Cli, config: &mut Config) -> anyhow::Result<()> {
    let capture = &mut config.session.capture;
    if let Some(device) = &cli.device_in {
        capture.input_device = device.parse::<DeviceSelector>()?;
    }
    if let Some(device) = &cli.device_out {
        capture.output_device = device.parse::<DeviceSelector>()?;
    }
    if let Some(threshold) = cli.energy_threshold {
        capture.energy_threshold = threshold;
    }
    if let Some(threshold) = cli.vad_threshold {
        capture.vad_threshold = threshold;
    }
    if let Some(ms) = cli.min_silence_ms {
        capture.min_silence_ms = ms;
    }
    capture.validate()?;
    Ok(())
}

fn build_session(
    config: &Config,
    events: mpsc::UnboundedSender<TurnEvent>,
) -> anyhow::Result<Session> {
    let mut builder = Session::builder(config.session.clone(), Arc::new(CpalBackend::new()))
        .transcriber(Arc::new(WhisperTranscriber::from_config(&config.stt)?))
        .generator(Arc::new(ChatClient::from_config(&config.llm)?))
        .events(Arc::new(events));
    if config.session.speak {
        builder = builder.synthesizer(Arc::new(SpeechClient::from_config(&config.tts)?));
    }
    Ok(builder.build()?)
}

/// Stop the session on Ctrl+C
fn stop_on_ctrl_c(stop: Signal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.set();
        }
    });
}

async fn chat(config: Config) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = build_session(&config, tx)?;
    stop_on_ctrl_c(session.stop_handle());

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    println!("Voice chat started. Press Ctrl+C to stop.");
    let result = session.run().await;
    drop(session);
    let _ = printer.await;

    result?;
    println!("\nGoodbye!");
    Ok(())
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::Listening => println!("Listening..."),
        TurnEvent::SpeechStarted => println!("Recording..."),
        TurnEvent::SpeechEnded => println!("Speech ended."),
        TurnEvent::Transcribing => println!("Transcribing..."),
        TurnEvent::Thinking => println!("Thinking..."),
        TurnEvent::Speaking => println!("Speaking..."),
        TurnEvent::Transcript { text } => println!("You (voice): {text}"),
        TurnEvent::TranscriptRejected { .. } => {
            println!("Heard audio but transcript was too short; continuing...");
        }
        TurnEvent::TranscriptEmpty => {
            println!("Heard audio but no speech could be transcribed; continuing...");
        }
        TurnEvent::Response { text } => println!("AI: {text}"),
        TurnEvent::TtsInterrupted => println!("Interrupted by speech."),
        TurnEvent::BargeInUnavailable { error } => {
            println!("Barge-in monitor unavailable during playback: {error}");
        }
        TurnEvent::NoSpeechDetected { max_rms } => println!(
            "No speech detected (max RMS={max_rms:.4}). \
             Try --energy-threshold 0.005 or choose --device-in."
        ),
        TurnEvent::PlaybackDegraded { reason } => println!("Playback degraded: {reason}"),
        TurnEvent::Ready | TurnEvent::MicLevel { .. } => {}
    }
}

fn list_devices(json: bool) -> anyhow::Result<()> {
    let devices = device::list_devices()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    println!("{:>3}  {:>3}  {:>3}  {:>7}  name", "#", "in", "out", "rate");
    for d in devices {
        let rate = d
            .default_sample_rate
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        println!(
            "{:>3}  {:>3}  {:>3}  {:>7}  {}",
            d.index, d.max_input_channels, d.max_output_channels, rate, d.name
        );
    }
    Ok(())
}

fn doctor(config: &Config, json: bool) -> anyhow::Result<()> {
    let report = parley_voice::diagnostics::run(config);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let yes_no = |ok: bool| if ok { "ok" } else { "missing" };
    println!("Input devices:  {}", report.input_devices);
    println!("Output devices: {}", report.output_devices);
    println!("Default input:  {}", report.default_input.as_deref().unwrap_or("-"));
    println!("Default output: {}", report.default_output.as_deref().unwrap_or("-"));
    if let Some(error) = &report.device_error {
        println!("Device error:   {error}");
    }
    match &report.vad_error {
        Some(error) => println!("VAD model:      {error}"),
        None => println!("VAD model:      ok"),
    }
    println!("LLM API key:    {}", yes_no(report.llm_key_present));
    println!("STT API key:    {}", yes_no(report.stt_key_present));
    println!("TTS API key:    {}", yes_no(report.tts_key_present));
    println!();
    println!(
        "{}",
        if report.ready() {
            "Ready for voice chat."
        } else {
            "Voice chat will not start until the missing pieces are fixed."
        }
    );
    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let capture = config.session.capture.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let backend = CpalBackend::new();
        println!("Device: {}", backend.input_name(&capture.input_device)?);
        println!("Sample rate: {} Hz", capture.sample_rate);
        println!("---");

        let mut source =
            backend.open_input(&capture.input_device, capture.sample_rate, capture.block_size())?;
        let mut second = Vec::new();
        let mut reported = 0;

        while reported < duration {
            match source.next_block(Duration::from_millis(200))? {
                BlockRead::Block(block) => second.extend(block.samples),
                BlockRead::Pending => continue,
                BlockRead::Closed => break,
            }
            if source.elapsed().as_secs() <= reported {
                continue;
            }
            reported += 1;

            let energy = parley_voice::audio::rms(&second);
            let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!("[{reported:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
            second.clear();
        }
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: parley devices (and pick one with --device-in)");
    println!("  3. Run: pactl info | grep 'Default Source'");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // 2 seconds of 440Hz sine at 24kHz, the usual TTS rate
    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();
    let clip = AudioClip::mono(samples, sample_rate);
    println!("Playing {} samples at {} Hz...", clip.samples.len(), sample_rate);

    let device = config.session.capture.output_device.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        PlaybackEngine::default().play(
            &CpalBackend::new(),
            &clip,
            &device,
            &Signal::new(),
            &Signal::new(),
        )
    })
    .await??;
    tracing::debug!(route = ?outcome.route, "tone played");

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: parley devices (and pick one with --device-out)");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Capture a single utterance and print its transcript
async fn listen(mut config: Config) -> anyhow::Result<()> {
    config.session.speak = false;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = build_session(&config, tx)?;
    stop_on_ctrl_c(session.stop_handle());

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let transcript = session.transcribe_once().await;
    drop(session);
    let _ = printer.await;

    match transcript? {
        Some(text) => println!("{text}"),
        None => println!("(nothing heard)"),
    }
    Ok(())
}

async fn transcribe_file(config: &Config, path: &Path) -> anyhow::Result<()> {
    let clip = read_wav(path)?;
    let transcriber = WhisperTranscriber::from_config(&config.stt)?;

    let utterance = parley_voice::Utterance {
        samples: parley_voice::audio::downmix_to_mono(&clip.samples, clip.channels),
        sample_rate: clip.sample_rate,
        ended_by: parley_voice::voice::UtteranceEnd::StreamClosed,
    };
    let text = transcriber
        .transcribe(utterance, &config.session.language)
        .await?;
    println!("{text}");
    Ok(())
}

/// Feed a WAV file through the capture engine block by block
async fn replay(config: &Config, path: &Path) -> anyhow::Result<()> {
    let clip = read_wav(path)?;
    let capture = config.session.capture.clone();
    if clip.sample_rate != capture.sample_rate {
        anyhow::bail!(
            "{} is {} Hz, capture runs at {} Hz",
            path.display(),
            clip.sample_rate,
            capture.sample_rate
        );
    }

    let mono = parley_voice::audio::downmix_to_mono(&clip.samples, clip.channels);
    let blocks: Vec<Vec<f32>> = mono
        .chunks(capture.block_size())
        .map(<[f32]>::to_vec)
        .collect();
    println!(
        "Replaying {} blocks of {} ms from {}",
        blocks.len(),
        capture.block_ms,
        path.display()
    );

    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<Capture> {
        let classifier = VoiceActivityClassifier::for_config(&capture)?;
        let backend = MemoryBackend::new().with_input(blocks);
        let mut source =
            backend.open_input(&capture.input_device, capture.sample_rate, capture.block_size())?;
        let block = std::sync::atomic::AtomicUsize::new(0);
        let sink = |event: TurnEvent| match event {
            TurnEvent::MicLevel { level } => {
                let n = block.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::debug!(block = n, level, "mic level");
            }
            other => println!("{}", serde_json::to_string(&other).unwrap_or_default()),
        };
        Ok(capture_until_pause(
            source.as_mut(),
            &classifier,
            &capture,
            &Signal::new(),
            &sink,
        )?)
    })
    .await??;

    match outcome {
        Capture::Utterance(utterance) => println!(
            "Utterance: {:.2}s, ended by {:?}",
            utterance.duration().as_secs_f32(),
            utterance.ended_by
        ),
        Capture::NoSpeech { peak_rms } => println!("No speech (peak RMS {peak_rms:.4})"),
    }
    Ok(())
}

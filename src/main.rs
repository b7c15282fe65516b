use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use parley::voice::{
    pcm_bytes_to_samples, AudioSink, CpalSink, FrameSource, MicFrameSource, OpenAiTts,
    SynthesisClient, FRAME_DURATION_MS,
};
use parley::{Config, Error, TurnOrchestrator};

/// Parley - voice conversation pipeline for AI assistants
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
        };
    }

    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let orchestrator = TurnOrchestrator::new(config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
                cancel.cancel();
            }
        });
    }

    orchestrator.run_loop(cancel).await?;

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut source = MicFrameSource::open()?;
        let frames_per_second = 1000 / FRAME_DURATION_MS as usize;

        for i in 0..duration {
            let mut second: Vec<i16> = Vec::new();
            for _ in 0..frames_per_second {
                match source.next_frame()? {
                    Some(frame) => second.extend_from_slice(&frame),
                    None => anyhow::bail!("microphone stream ended early"),
                }
            }

            let energy = calculate_rms(&second);
            let peak = second
                .iter()
                .map(|s| f32::from(*s).abs() / f32::from(i16::MAX))
                .fold(0.0f32, f32::max);

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!(
                "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
                i + 1,
                energy,
                peak,
                meter
            );
        }
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy, normalized to 0..1
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|s| {
            let normalized = f32::from(*s) / f32::from(i16::MAX);
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    tokio::task::spawn_blocking(|| -> anyhow::Result<()> {
        let sample_rate = 24_000_u32;
        let frequency = 440.0_f32;
        let duration_secs = 2.0_f32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let num_samples = (sample_rate as f32 * duration_secs) as usize;

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let samples: Vec<i16> = (0..num_samples)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let value = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
                (value * f32::from(i16::MAX)) as i16
            })
            .collect();

        println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

        let mut sink = CpalSink::new(sample_rate)?;
        sink.write(&samples)?;
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let api_key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

    let tts = OpenAiTts::new(
        api_key,
        config.llm.base_url.clone(),
        config.tts.model.clone(),
        config.tts.voice.clone(),
        config.tts.speed,
    )?;

    println!("Synthesizing speech...");
    let mut stream = tts.synthesize(text).await?;
    let mut pcm = Vec::new();
    while let Some(chunk) = stream.next().await {
        pcm.extend_from_slice(&chunk?);
    }
    println!("Got {} bytes of audio data", pcm.len());

    let samples = pcm_bytes_to_samples(&pcm);
    let sample_rate = config.tts.sample_rate;
    let seconds = samples.len() as f64 / f64::from(sample_rate);
    println!("Playing {seconds:.1}s of audio...");

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut sink = CpalSink::new(sample_rate)?;
        sink.write(&samples)?;
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

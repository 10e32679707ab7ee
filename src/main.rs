use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use speech_capture::audio::{encode_wav, DecodedAudio, InputFactory, InputSource, WavHeader};
use speech_capture::{
    host_backend, logging, AudioSession, Config, ObjectUrlRegistry, SessionConfig,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "speech-capture")]
#[command(about = "Record speech samples and convert them to canonical 16-bit PCM WAV")]
struct Cli {
    /// Configuration file (defaults to ./speech-capture.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record from an input and write a WAV file
    Record {
        /// mic[:name], file:<path> or tone[:hz]
        #[arg(short, long, default_value = "mic")]
        input: InputSource,

        /// Seconds to record (Ctrl-C stops earlier)
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output path (defaults to <output.dir>/<session id>.wav)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert any supported audio file to canonical WAV
    Encode { input: PathBuf, output: PathBuf },

    /// Play a WAV file, any supported audio file or an http(s) URL
    Play { source: String },

    /// Print the header of a canonical WAV file
    Inspect {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    logging::init(cli.log_level.as_deref().unwrap_or(&cfg.logging.level));

    match cli.command {
        Command::Record {
            input,
            duration,
            output,
        } => record(&cfg, input, Duration::from_secs(duration), output).await,
        Command::Encode { input, output } => encode(&input, &output).await,
        Command::Play { source } => play(&source).await,
        Command::Inspect { path, json } => inspect(&path, json),
    }
}

async fn record(
    cfg: &Config,
    input: InputSource,
    duration: Duration,
    output: Option<PathBuf>,
) -> Result<()> {
    let device = InputFactory::create(input, cfg.capture.clone())?;
    let session_config = SessionConfig {
        meter: cfg.meter.clone(),
        ..Default::default()
    };

    let mut session = AudioSession::new(session_config, device);
    session.start().await.context("Failed to start recording")?;

    info!("Recording for {} seconds (Ctrl-C to stop)", duration.as_secs());

    let mut volume = session.subscribe_volume();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut report = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            _ = report.tick() => {
                let level = *volume.borrow_and_update();
                info!("volume {:>5.1} {}", level, meter_bar(level));
            }
        }
    }

    session.stop().await.context("Failed to finish recording")?;

    let Some(asset) = session.result().cloned() else {
        warn!("Nothing was recorded");
        session.close().await;
        return Ok(());
    };

    let path = match output {
        Some(path) => path,
        None => {
            tokio::fs::create_dir_all(&cfg.output.dir)
                .await
                .context("Failed to create output directory")?;
            cfg.output.dir.join(format!("{}.wav", session.id()))
        }
    };

    tokio::fs::write(&path, &asset.wav_bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        "Saved {} ({:.2}s, {}Hz, {} channels, {} bytes)",
        path.display(),
        asset.duration.as_secs_f64(),
        asset.sample_rate,
        asset.channels,
        asset.wav_bytes.len()
    );

    session.close().await;
    Ok(())
}

async fn encode(input: &Path, output: &Path) -> Result<()> {
    let source = input.to_path_buf();
    let audio = tokio::task::spawn_blocking(move || DecodedAudio::open(source))
        .await
        .context("Decoder task panicked")??;

    let wav = encode_wav(&audio)?;
    tokio::fs::write(output, &wav)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        "Encoded {} -> {} ({} bytes)",
        input.display(),
        output.display(),
        wav.len()
    );
    Ok(())
}

async fn play(source: &str) -> Result<()> {
    let backend = host_backend(ObjectUrlRegistry::new());
    info!("Playing {} (Ctrl-C to stop)", source);

    tokio::select! {
        played = backend.render(source, Duration::ZERO) => {
            played.with_context(|| format!("Failed to play {}", source))?;
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping"),
    }
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let header = WavHeader::parse(&bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&header)?);
    } else {
        println!("channels:     {}", header.channels);
        println!("sample rate:  {} Hz", header.sample_rate);
        println!("byte rate:    {}", header.byte_rate());
        println!("block align:  {}", header.block_align());
        println!("data bytes:   {}", header.data_len);
        println!("frames:       {}", header.frame_count());
        println!("duration:     {:.3}s", header.duration().as_secs_f64());
    }
    Ok(())
}

fn meter_bar(level: f32) -> String {
    let width = (level.clamp(0.0, 100.0) / 5.0).round() as usize;
    "#".repeat(width)
}

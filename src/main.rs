use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meeting_recorder::{
    create_router, AppState, ArtifactSink, AudioFile, Config, EncoderFactory, EncoderKind,
    FileSink, RecordingCoordinator, SignalMixer, StreamAcquirer, SyntheticDevices, WavEncoder,
    WavEncoderFactory, WebmEncoderFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Local meeting recorder: microphone plus screen capture into one artifact
#[derive(Parser, Debug)]
#[command(name = "meeting-recorder")]
#[command(version)]
struct Cli {
    /// Config file, with or without extension
    #[arg(short, long, default_value = "config/meeting-recorder")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP control API (default)
    Serve,
    /// Record once for a fixed duration and save the artifact
    Record {
        /// Recording length in seconds
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Meeting Recorder v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Recordings path: {}", cfg.recorder.recordings_path);

    let coordinator = Arc::new(build_coordinator(&cfg)?);
    let sink: Arc<dyn ArtifactSink> = Arc::new(FileSink::new(&cfg.recorder.recordings_path));

    if let Some(room) = cfg.room.identifier.clone() {
        coordinator.set_room_identifier(Some(room)).await;
    } else if let Some(title) = cfg.room.title.as_deref() {
        if !coordinator.set_room_title(title).await {
            warn!("No room identifier in title {:?}", title);
        }
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cfg, coordinator, sink).await,
        Command::Record { seconds } => record(coordinator, sink, seconds).await,
    }
}

fn build_coordinator(cfg: &Config) -> Result<RecordingCoordinator> {
    let mut devices = SyntheticDevices::new(cfg.synthetic_devices());
    if let Some(path) = &cfg.devices.microphone_wav {
        let file = AudioFile::open(path)?;
        info!(
            "Microphone from {}: {:.1} seconds, {} Hz, {} channels",
            file.path, file.duration_seconds, file.sample_rate, file.channels
        );
        devices = devices.with_microphone_file(file);
    }

    let encoders: Arc<dyn EncoderFactory> = match cfg.recorder.encoder {
        EncoderKind::Webm => {
            info!("Encoding WebM through {}", cfg.recorder.ffmpeg_path);
            Arc::new(WebmEncoderFactory::new(cfg.webm())?)
        }
        EncoderKind::Wav => {
            info!("Encoding audio-only WAV");
            Arc::new(WavEncoderFactory::new(
                WavEncoder::pcm16(cfg.recorder.sample_rate, cfg.recorder.channels),
                cfg.timeslice(),
            )?)
        }
    };

    Ok(RecordingCoordinator::new(
        StreamAcquirer::new(Arc::new(devices)),
        SignalMixer::new(cfg.mixer()),
        encoders,
        cfg.session(),
    ))
}

async fn serve(
    cfg: &Config,
    coordinator: Arc<RecordingCoordinator>,
    sink: Arc<dyn ArtifactSink>,
) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);

    let app = create_router(AppState::new(coordinator, sink));
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}

async fn record(
    coordinator: Arc<RecordingCoordinator>,
    sink: Arc<dyn ArtifactSink>,
    seconds: u64,
) -> Result<()> {
    if !coordinator.start().await? {
        anyhow::bail!("Capture could not be started");
    }

    info!("Recording for {} seconds", seconds);
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let artifact = coordinator.stop_and_save().await?;
    let persisted = sink.persist(&artifact).await?;

    info!(
        "Saved {} ({} bytes) to {:?}",
        persisted.name, persisted.bytes, persisted.path
    );

    if let Some(session) = coordinator.session().await {
        info!("Session stats: {}", serde_json::to_string(&session.stats().await)?);
    }

    Ok(())
}

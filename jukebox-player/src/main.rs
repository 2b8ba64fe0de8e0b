//! Jukebox Player (jukebox-player) - Main entry point
//!
//! Loads configuration, builds the collaborators for the chosen decoder and
//! output, starts the orchestrator and serves the control API until a
//! shutdown signal arrives.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jukebox_common::config::{ensure_directory, locate_config_file, LoggingConfig};
use jukebox_player::api;
use jukebox_player::config::{ConfigOverrides, DecoderKind, PlayerSettings, TomlConfig};
use jukebox_player::fetch::DownloaderFetcher;
use jukebox_player::playback::{
    FfmpegOpener, NativeOpener, SinkConnector, SourceOpener, StreamConnector, StreamTarget,
};
use jukebox_player::{Collaborators, Orchestrator};

/// Command-line arguments for jukebox-player
#[derive(Parser, Debug)]
#[command(name = "jukebox-player")]
#[command(about = "Shared-stream jukebox player")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "JUKEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "JUKEBOX_PORT")]
    port: Option<u16>,

    /// Directory for cached media files
    #[arg(long, env = "JUKEBOX_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Waiting requests admitted before the queue is full
    #[arg(long, env = "JUKEBOX_MAX_REQUESTS")]
    max_requests: Option<usize>,

    /// Cached files kept before the oldest is reclaimed
    #[arg(long, env = "JUKEBOX_MAX_FILES")]
    max_files: Option<usize>,

    /// Output byte stream (`-` for stdout)
    #[arg(short, long, env = "JUKEBOX_SINK")]
    sink: Option<String>,

    /// Decoder used for cached files
    #[arg(long, value_enum, env = "JUKEBOX_DECODER")]
    decoder: Option<DecoderKind>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            cache_dir: self.cache_dir.clone(),
            max_requests: self.max_requests,
            max_files: self.max_files,
            sink_path: self.sink.clone(),
            decoder: self.decoder,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = locate_config_file(args.config.as_deref());
    let toml_config = TomlConfig::load(config_path.as_deref())
        .await
        .context("Failed to load configuration")?;

    init_tracing(&toml_config.logging)?;

    if let Some(path) = &config_path {
        info!("Configuration file: {}", path.display());
    }

    let settings = PlayerSettings::resolve(&toml_config, &args.overrides())
        .context("Invalid configuration")?;
    ensure_directory(&settings.cache_dir).context("Failed to create cache directory")?;

    info!("Starting Jukebox Player on port {}", settings.port);
    info!("Cache directory: {}", settings.cache_dir.display());
    info!("Decoder: {:?}, output: {}", settings.decoder, settings.sink_path);

    let fetcher = Arc::new(DownloaderFetcher::new(
        settings.downloader_path.clone(),
        settings.ffmpeg_path.clone(),
        settings.max_track_duration,
    ));
    let opener: Arc<dyn SourceOpener> = match settings.decoder {
        DecoderKind::Ffmpeg => Arc::new(FfmpegOpener::new(
            settings.ffmpeg_path.clone(),
            settings.volume,
        )),
        DecoderKind::Native => Arc::new(NativeOpener::new(settings.volume)),
    };
    let connector = Arc::new(StreamConnector::new(StreamTarget::parse(&settings.sink_path)));
    connector
        .reconnect()
        .await
        .context("Failed to connect output")?;

    let port = settings.port;
    let orchestrator = Arc::new(
        Orchestrator::new(
            settings,
            Collaborators {
                fetcher,
                opener,
                connector,
            },
        )
        .context("Failed to initialize orchestrator")?,
    );
    orchestrator.start();

    let app = api::create_router(api::AppState {
        orchestrator: orchestrator.clone(),
        port,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Log to stderr (stdout may carry audio) or to the configured file
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let default_filter = format!("jukebox_player={},tower_http=info", logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

//! clipmind-analyzer - video analysis service
//!
//! Serves the HTTP API and runs one consumer per pipeline stage
//! (transcript, embedding, similarity) over the event log. Runs whose first
//! event cannot be published execute in-process instead.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipmind_analyzer::channel::RetryPolicy;
use clipmind_analyzer::pipeline::Workers;
use clipmind_analyzer::services::{
    CaptionSource, HttpProviderBuilder, MediaDirectoryLocator, RelatedVideosSource,
    StaticProviderConfig, YouTubeClient,
};
use clipmind_analyzer::transport::MemoryLog;
use clipmind_analyzer::{AppState, Collaborators, PipelineOptions};

/// Command-line arguments for clipmind-analyzer
#[derive(Parser, Debug)]
#[command(name = "clipmind-analyzer")]
#[command(about = "Video transcript, embedding and similarity pipeline")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CLIPMIND_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Root folder for the database and media (overrides the configuration file)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = clipmind_common::config::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.root_folder {
        config.root_folder = Some(root);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clipmind-analyzer {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {:?}", config);

    let root = config.root_folder();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create root folder {}", root.display()))?;

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db = clipmind_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let log = Arc::new(MemoryLog::new());
    if !config.transport.enabled {
        warn!("Event transport disabled, every run will execute in-process");
        log.set_available(false);
    }

    let youtube = match config.youtube.api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => match YouTubeClient::new(key) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("YouTube client unavailable: {}", e);
                None
            }
        },
        _ => {
            warn!("No YouTube API key, captions and related videos disabled");
            None
        }
    };

    let media_dir = config.media_dir();
    info!("Media folder: {}", media_dir.display());

    let collaborators = Collaborators {
        transport: log.clone(),
        providers: Arc::new(HttpProviderBuilder),
        captions: youtube.clone().map(|c| c as Arc<dyn CaptionSource>),
        related: youtube.map(|c| c as Arc<dyn RelatedVideosSource>),
        audio: Arc::new(MediaDirectoryLocator::new(media_dir)),
    };

    let provider_config = StaticProviderConfig {
        llm: config.llm.clone(),
        whisper: config.whisper.clone(),
    };
    let options = PipelineOptions {
        publish_retries: config.transport.publish_retries,
        ..PipelineOptions::default()
    };
    let state = AppState::new(db, provider_config, collaborators, options);

    let cancel = CancellationToken::new();
    let workers = if config.transport.enabled {
        let policy = RetryPolicy {
            fetch_wait: Duration::from_millis(config.transport.fetch_wait_ms),
            ..RetryPolicy::default()
        };
        Some(
            Workers::spawn(
                state.transport.clone(),
                state.executor.clone(),
                state.event_runner(),
                &config.transport.consumer_group,
                policy,
                cancel.clone(),
            )
            .await
            .context("Failed to start stage workers")?,
        )
    } else {
        None
    };

    let app = clipmind_analyzer::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Some(workers) = workers {
        for (stage, stats) in workers.join().await {
            info!(
                stage = %stage,
                committed = stats.committed,
                exhausted = stats.exhausted,
                "Worker stopped"
            );
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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

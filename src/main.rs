use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use studio_node::engine::{ProcessEngine, RecordingEngine};
use studio_node::session::{EventSink, JsonlEventLog};
use studio_node::{create_router, targets_from_config, App, AppState, Config, NatsClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "studio-node", about = "Voice-triggered recording and publish orchestrator")]
struct Args {
    /// Config file (TOML); STUDIO__SECTION__KEY environment variables override it
    #[arg(short, long, default_value = "config/studio-node")]
    config: String,

    /// Replay the transition log and resume interrupted sessions
    #[arg(long)]
    recover: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Studio Node v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    // Read the old log before the new session appends to it
    let history = if args.recover {
        JsonlEventLog::load(&cfg.events.log_path).await?
    } else {
        Vec::new()
    };

    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(JsonlEventLog::open(&cfg.events.log_path).await?)];
    if let Some(url) = &cfg.events.nats_url {
        match NatsClient::connect(url, cfg.events.subject_prefix.clone()).await {
            Ok(client) => sinks.push(Arc::new(client)),
            Err(e) => warn!("Transitions will not be published to NATS: {:#}", e),
        }
    }

    let engine: Arc<dyn RecordingEngine> = Arc::new(ProcessEngine::new(cfg.recording.engine.clone()));
    let targets = targets_from_config(&cfg.targets)?;
    let app = App::build(&cfg, engine, targets, sinks)?;

    if args.recover {
        let recovered = app.orchestrator.recover(history).await;
        info!("Replayed transition log: {} sessions", recovered.len());
    }

    let shutdown = CancellationToken::new();
    let supervisor = Arc::clone(&app.supervisor).spawn(shutdown.clone());

    let router = create_router(AppState::new(Arc::clone(&app.orchestrator)));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("HTTP API listening on http://{}", addr);
    info!("   Voice trigger: POST http://{}/voice-activity", addr);
    info!("   Health: GET http://{}/health", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = supervisor.await;
    app.orchestrator.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

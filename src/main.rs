use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deutschboost_voice::{
    create_router, AppState, Config, ConversationMode, FeedbackService, MicrophoneFactory,
    NatsFeedbackService, NatsTransport, SessionController, SessionDeps, SessionState, StopOutcome,
    WallClockOutputFactory,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "deutschboost-voice", version, about = "Realtime German conversation practice")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/deutschboost")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Run a single headless conversation and print the result
    Talk {
        #[arg(long, default_value = "free_conversation")]
        mode: ConversationMode,
        /// How long to keep the conversation open
        #[arg(long, default_value_t = 30)]
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
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    info!("DeutschBoost voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Realtime gateway: {}", cfg.realtime.nats_url);

    let controller = SessionController::spawn(build_deps(&cfg).await?, cfg.session_settings());

    match cli.command {
        Command::Serve => serve(&cfg, controller).await,
        Command::Talk { mode, seconds } => talk(controller, mode, seconds).await,
    }
}

async fn build_deps(cfg: &Config) -> Result<SessionDeps> {
    let feedback: Option<Arc<dyn FeedbackService>> = if cfg.feedback.enabled {
        let service =
            NatsFeedbackService::connect(&cfg.realtime.nats_url, cfg.feedback.subject.clone())
                .await?;
        Some(Arc::new(service))
    } else {
        info!("Feedback disabled");
        None
    };

    Ok(SessionDeps {
        transport: Arc::new(NatsTransport::new(cfg.transport())),
        microphone: MicrophoneFactory::create(cfg.microphone()?),
        outputs: Arc::new(WallClockOutputFactory::new(cfg.audio.record_dir.clone())),
        feedback,
    })
}

async fn serve(cfg: &Config, controller: SessionController) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    let app = create_router(AppState::new(controller.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    controller.shutdown().await;
    Ok(())
}

async fn talk(controller: SessionController, mode: ConversationMode, seconds: u64) -> Result<()> {
    controller.start(mode).await?;

    tokio::time::timeout(
        Duration::from_secs(10),
        controller.wait_for_state(SessionState::Connected),
    )
    .await
    .context("Timed out waiting for the realtime session to open")??;

    info!("Conversation open for {}s (Ctrl+C to end early)", seconds);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    match controller.stop().await? {
        StopOutcome::NotRunning => {
            let snapshot = controller.snapshot();
            warn!(
                "Session ended early: {}",
                snapshot.last_error.unwrap_or_else(|| "unknown".to_string())
            );
        }
        outcome => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }

    controller.shutdown().await;
    Ok(())
}

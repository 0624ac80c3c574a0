//! Chained video generation worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vchain_media::{check_ffmpeg, check_ffprobe, FfmpegToolkit, ImageResizer};
use vchain_storage::R2Client;
use vchain_store::RedisJobStore;
use vchain_worker::{
    metrics, ChainDeps, ChainNotifier, ChainOrchestrator, DiskReclaimer, GeminiClient,
    NoopNotifier, OpenAiChatClient, OpenAiConfig, OpenAiVideoClient, PlannerConfig,
    PlannerProvider, PlanningLlm, WebhookNotifier, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vchain-worker");

    if let Some(port) = std::env::var("METRICS_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        metrics::init_metrics(port)?;
        info!(port, "Prometheus exporter listening");
    }

    check_ffmpeg().context("ffmpeg is required")?;
    check_ffprobe().context("ffprobe is required")?;

    // Load configuration
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", config.work_dir.display()))?;

    let openai = OpenAiConfig::from_env()?;
    let planner = PlannerConfig::from_env()?;
    let llm: Arc<dyn PlanningLlm> = match planner.provider {
        PlannerProvider::OpenAi => Arc::new(OpenAiChatClient::new(openai.clone(), planner.model)),
        PlannerProvider::Gemini => Arc::new(GeminiClient::from_env(planner.model)?),
    };
    info!(provider = ?planner.provider, "Planner configured");

    let store = Arc::new(RedisJobStore::from_env().context("Failed to create job store")?);
    store
        .check_connectivity()
        .await
        .context("Redis is unreachable")?;

    let storage = R2Client::from_env().await.context("Failed to create R2 client")?;
    if let Err(e) = storage.check_connectivity().await {
        warn!("R2 connectivity check failed: {}", e);
    }

    let notifier: Arc<dyn ChainNotifier> = match WebhookNotifier::from_env()? {
        Some(webhook) => Arc::new(webhook),
        None => Arc::new(NoopNotifier),
    };

    let deps = ChainDeps {
        store: store.clone(),
        storage: Arc::new(storage),
        video_api: Arc::new(OpenAiVideoClient::new(openai)),
        llm,
        toolkit: Arc::new(FfmpegToolkit::new()),
        resizer: Arc::new(ImageResizer::new()),
        notifier,
    };

    let reclaimer = DiskReclaimer::new(store, config.work_dir.clone(), config.reclaim_retention);
    let reclaim_interval = config.reclaim_interval;

    let orchestrator = Arc::new(ChainOrchestrator::new(config, deps));
    orchestrator.recover_queued().await?;

    // Setup signal handlers
    let (reclaim_stop, reclaim_rx) = tokio::sync::watch::channel(false);
    let reclaim_handle = tokio::spawn(reclaimer.run(reclaim_interval, reclaim_rx));

    let signal_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            orchestrator.shutdown();
        })
    };

    orchestrator.run().await?;

    let _ = reclaim_stop.send(true);
    reclaim_handle.await.ok();
    signal_handle.abort();

    info!("Worker shutdown complete");
    Ok(())
}

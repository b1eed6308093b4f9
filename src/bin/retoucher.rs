// retoucher - Telegram photo enhancement bot

use anyhow::Context;
use clap::Parser;
use retoucher::{Config, InferenceInvoker, MessageHandler, health, telegram};
use std::sync::Arc;
use teloxide::Bot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (TELEGRAM_BOT_TOKEN, HF_TOKEN, MODEL_PATH, ...)
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("✓ Loaded .env file from: {}", path.display());
    }
    // environment is mutated here, before the runtime spawns worker threads
    imagent::bridge_hf_token();

    tokio::runtime::Runtime::new()
        .context("failed to start tokio runtime")?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::parse();

    let log_level = if config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("retoucher={log_level},imagent={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    tracing::info!("Starting retoucher");
    tracing::info!("Backend: {:?}", config.backend);
    tracing::info!(
        "Strength: {}, guidance scale: {}, steps: {}",
        config.strength,
        config.guidance_scale,
        config.steps
    );

    // Device selection and weight loading happen exactly once, before any update is handled
    let (backend, version, source, use_cpu) = (
        config.backend,
        config.model_version,
        config.model_source(),
        config.cpu,
    );
    let model = tokio::task::spawn_blocking(move || {
        imagent::load_transformer(backend, version, source, use_cpu)
    })
    .await
    .context("model loader task failed")?
    .context("failed to load model")?;

    let invoker = InferenceInvoker::new(model, config.transform_params());
    tracing::info!("✓ Model ready: {}", invoker.backend());
    let handler = Arc::new(MessageHandler::new(invoker, config.enhance_settings()));

    let health_addr = config.health_addr;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_addr).await {
            tracing::error!("Health endpoint stopped: {}", e);
        }
    });

    tracing::info!("🚀 Polling Telegram for updates");
    tracing::info!("🔧 Press Ctrl+C to stop the bot");

    telegram::run(Bot::new(config.token), handler).await;

    tracing::info!("Bot stopped");
    Ok(())
}

mod bot;
mod config;
mod interpreter;
mod llm;
mod platform;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::llm::ContentGenerator;
use crate::platform::telegram::TelegramApi;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,geminibot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Usage: geminibot [--polling] [config.toml]
    let args: Vec<String> = std::env::args().skip(1).collect();
    let polling = args.iter().any(|a| a == "--polling");
    let config_path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("  Model: {}", config.gemini.model);
    info!("  Gemini API key: {}", if config.has_api_key() { "set" } else { "missing" });
    info!("  Bot token: {}", if config.has_bot_token() { "set" } else { "missing" });

    // One Bot API client for replies, webhook registration and polling setup.
    let api = Arc::new(TelegramApi::new(&config.telegram)?);

    if config.has_bot_token() && config.telegram.bot_username.is_none() {
        match api.get_me().await {
            Ok(Some(name)) => {
                info!("  Bot username: @{}", name);
                config.telegram.bot_username = Some(name);
            }
            Ok(None) => warn!("getMe returned no username"),
            Err(e) => warn!("Failed to look up bot username: {:#}", e),
        }
    }

    let generator = Arc::new(ContentGenerator::new(&config.gemini)?);
    let state = Arc::new(AppState::new(config, generator, api.clone()));

    if polling {
        if !state.config.has_bot_token() {
            error!("TELEGRAM_BOT_TOKEN not found, polling mode disabled");
            return Ok(());
        }
        info!("Bot is starting in polling mode...");
        return platform::telegram::run_polling(state, &api).await;
    }

    bot::register_webhook(&state.config, &api).await;
    server::serve(state).await
}

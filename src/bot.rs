use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::interpreter::{Intent, Interpreter};
use crate::llm::Generate;
use crate::platform::telegram::{ReplyDispatcher, TelegramApi};
use crate::platform::{InboundUpdate, MessageSender};

/// Shared application state, built once at startup.
pub struct AppState {
    pub config: Config,
    interpreter: Interpreter,
    dispatcher: ReplyDispatcher,
    sender: Arc<dyn MessageSender>,
    typing_refresh: Duration,
}

impl AppState {
    pub fn new(
        config: Config,
        generator: Arc<dyn Generate>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        let interpreter = Interpreter::new(generator, config.telegram.bot_username.clone());
        let typing_refresh = Duration::from_millis(config.telegram.typing_refresh_ms.max(1));
        Self {
            config,
            interpreter,
            dispatcher: ReplyDispatcher::new(sender.clone()),
            sender,
            typing_refresh,
        }
    }

    /// Interpret one update and send the reply back to its chat.
    /// Returns whether the whole reply was delivered.
    pub async fn handle_update(&self, update: &InboundUpdate) -> bool {
        let preview: String = update.text.chars().take(100).collect();
        info!(chat_id = update.chat_id, "Message: \"{}\"", preview);

        let typing = if matches!(self.interpreter.classify(&update.text), Intent::Prompt(_)) {
            Some(self.start_typing(update.chat_id).await)
        } else {
            None
        };

        let reply = self.interpreter.interpret(update).await;
        drop(typing);

        let Some(reply) = reply else {
            debug!(chat_id = update.chat_id, "Command addressed to another bot, ignoring");
            return true;
        };
        self.dispatcher.send(update.chat_id, &reply).await
    }

    /// Show "typing..." now and keep renewing it until the guard drops.
    async fn start_typing(&self, chat_id: i64) -> TypingGuard {
        if let Err(e) = self.sender.send_typing(chat_id).await {
            debug!("Failed to send typing indicator: {:#}", e);
        }

        let sender = self.sender.clone();
        let period = self.typing_refresh;
        TypingGuard(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = sender.send_typing(chat_id).await {
                    debug!("Failed to renew typing indicator: {:#}", e);
                }
            }
        }))
    }
}

/// Stops the typing refresher when dropped, including on unwind.
struct TypingGuard(JoinHandle<()>);

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Point the platform at our webhook, if a public hostname is configured.
/// Returns whether a webhook was registered; failures are only logged.
pub async fn register_webhook(config: &Config, api: &TelegramApi) -> bool {
    let Some(url) = config.webhook_url() else {
        info!("No webhook host configured, skipping webhook registration");
        return false;
    };

    if !config.has_bot_token() {
        warn!("TELEGRAM_BOT_TOKEN not set, cannot register webhook");
        return false;
    }

    match api.set_webhook(&url).await {
        Ok(()) => {
            info!("Webhook registered: {}", url);
            true
        }
        Err(e) => {
            error!("Failed to register webhook {}: {:#}", url, e);
            false
        }
    }
}

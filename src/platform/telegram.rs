use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use teloxide::prelude::*;
use tracing::{debug, error, info, warn};

use crate::bot::AppState;
use crate::config::TelegramConfig;
use crate::platform::{InboundUpdate, MessageSender};

/// Telegram refuses messages longer than this many characters.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Split text into consecutive chunks of at most `max_chars` characters.
/// Concatenating the chunks gives back the input exactly.
pub fn split_message(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }

    chunks
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatActionRequest {
    chat_id: i64,
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<R> {
    ok: bool,
    description: Option<String>,
    result: Option<R>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

/// Direct client for the handful of Bot API methods the relay needs.
pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_base_url.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }

    async fn call_for<T, R>(&self, method: &str, body: &T) -> Result<Option<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);

        // Strip the URL from transport errors: it embeds the bot token.
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("Telegram {} request failed", method))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let parsed: Option<ApiResponse<R>> = serde_json::from_str(&body).ok();
        match parsed {
            Some(r) if status.is_success() && r.ok => Ok(r.result),
            Some(r) => anyhow::bail!(
                "Telegram {} failed ({}): {}",
                method,
                status,
                r.description.unwrap_or_default()
            ),
            None => anyhow::bail!("Telegram {} failed ({}): {}", method, status, body),
        }
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> Result<()> {
        self.call_for::<T, IgnoredAny>(method, body).await?;
        Ok(())
    }

    /// Username of the bot owning the token, used to recognise `/cmd@name`.
    pub async fn get_me(&self) -> Result<Option<String>> {
        let me: Option<BotUser> = self.call_for("getMe", &serde_json::json!({})).await?;
        Ok(me.and_then(|u| u.username))
    }

    /// Register `url` as the webhook for this bot.
    pub async fn set_webhook(&self, url: &str) -> Result<()> {
        self.call("setWebhook", &SetWebhookRequest { url }).await
    }

    /// Remove any registered webhook so `getUpdates` can be used.
    pub async fn delete_webhook(&self) -> Result<()> {
        self.call("deleteWebhook", &serde_json::json!({})).await
    }
}

#[async_trait]
impl MessageSender for TelegramApi {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call("sendMessage", &SendMessageRequest { chat_id, text })
            .await
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.call(
            "sendChatAction",
            &ChatActionRequest {
                chat_id,
                action: "typing",
            },
        )
        .await
    }
}

/// Sends reply text to a chat, chunked to the platform limit.
#[derive(Clone)]
pub struct ReplyDispatcher {
    sender: Arc<dyn MessageSender>,
}

impl ReplyDispatcher {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    /// Returns `false` if any chunk failed. A failed chunk does not stop
    /// the remaining ones from being sent.
    pub async fn send(&self, chat_id: i64, text: &str) -> bool {
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let total = chunks.len();
        let mut all_ok = true;

        for (i, chunk) in chunks.into_iter().enumerate() {
            if let Err(e) = self.sender.send_text(chat_id, chunk).await {
                error!(chat_id, chunk = i + 1, total, "Failed to send reply: {:#}", e);
                all_ok = false;
            }
        }

        debug!(chat_id, total, all_ok, "Reply dispatched");
        all_ok
    }
}

/// Run the bot by long-polling instead of receiving webhooks.
pub async fn run_polling(state: Arc<AppState>, api: &TelegramApi) -> Result<()> {
    if !state.config.has_bot_token() {
        anyhow::bail!("TELEGRAM_BOT_TOKEN is required for polling mode");
    }

    // getUpdates is refused while a webhook is registered.
    if let Err(e) = api.delete_webhook().await {
        warn!("Failed to delete webhook before polling: {:#}", e);
    }

    let bot = Bot::new(&state.config.telegram.bot_token);

    info!("Starting Telegram long-poll loop...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Text messages become updates; everything else is skipped.
fn message_to_update(msg: &Message) -> Option<InboundUpdate> {
    Some(InboundUpdate {
        chat_id: msg.chat.id.0,
        text: msg.text()?.to_string(),
    })
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(update) = message_to_update(&msg) else {
        return Ok(());
    };

    if !state.handle_update(&update).await {
        warn!(chat_id = update.chat_id, "Reply was not fully delivered");
    }

    Ok(())
}


/// Local stand-in for the Bot API, shared by tests that need real HTTP calls.
#[cfg(test)]
pub(crate) mod fake {
    use std::sync::{Arc, Mutex};

    use axum::{extract::Path, Json, Router};
    use serde_json::{json, Value};

    use crate::config::TelegramConfig;

    pub const FAKE_BOT_TOKEN: &str = "123:abc";
    pub const FAKE_BOT_USERNAME: &str = "gemini_relay_bot";

    pub type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    /// Every call is recorded as `(method, body)`. With `ok == false` the
    /// server answers like the Bot API does for a rejected request.
    pub async fn spawn_fake_bot_api(calls: Calls, ok: bool) -> String {
        let app = Router::new().route(
            "/{bot}/{method}",
            axum::routing::post(
                move |Path((bot, method)): Path<(String, String)>, Json(body): Json<Value>| {
                    let calls = calls.clone();
                    async move {
                        assert_eq!(bot, format!("bot{}", FAKE_BOT_TOKEN));
                        let result = if method == "getMe" {
                            json!({ "id": 1, "is_bot": true, "first_name": "Gemini", "username": FAKE_BOT_USERNAME })
                        } else {
                            json!(true)
                        };
                        calls.lock().unwrap().push((method, body));
                        if ok {
                            Json(json!({ "ok": true, "result": result }))
                        } else {
                            Json(json!({ "ok": false, "error_code": 400, "description": "Bad Request: chat not found" }))
                        }
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub fn fake_bot_config(base_url: &str) -> TelegramConfig {
        TelegramConfig {
            bot_token: FAKE_BOT_TOKEN.to_string(),
            api_base_url: base_url.to_string(),
            timeout_secs: 5,
            ..TelegramConfig::default()
        }
    }
}

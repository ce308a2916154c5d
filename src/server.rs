use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::bot::AppState;
use crate::platform::InboundUpdate;

pub const HEALTH_TEXT: &str = "Gemini Telegram relay bot is running!";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", post(webhook))
        .with_state(state)
}

async fn health() -> &'static str {
    HEALTH_TEXT
}

async fn webhook(State(state): State<Arc<AppState>>, body: Bytes) -> (StatusCode, &'static str) {
    let update = match InboundUpdate::parse(&body) {
        Ok(update) => update,
        Err(e) => {
            debug!("Ignoring update: {}", e);
            return (StatusCode::OK, "OK");
        }
    };

    // A panic anywhere in the pipeline only fails this request.
    match AssertUnwindSafe(state.handle_update(&update))
        .catch_unwind()
        .await
    {
        Ok(delivered) => {
            if !delivered {
                warn!(chat_id = update.chat_id, "Reply was not fully delivered");
            }
            (StatusCode::OK, "OK")
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(chat_id = update.chat_id, "Error processing update: {}", detail);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error")
        }
    }
}

/// Serve the webhook and health endpoints until Ctrl-C.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down...");
        })
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::{state_with, RecordingSender};
    use crate::config::Config;
    use crate::interpreter::HELP_TEXT;
    use crate::llm::Generate;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(sender: Arc<RecordingSender>) -> Router {
        router(Arc::new(state_with("generated reply", sender)))
    }

    async fn post_webhook(app: Router, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_is_always_ok() {
        let response = app(Arc::new(RecordingSender::default()))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, HEALTH_TEXT.as_bytes());
    }

    #[tokio::test]
    async fn test_help_update_sends_help_once() {
        let sender = Arc::new(RecordingSender::default());
        let (status, body) = post_webhook(
            app(sender.clone()),
            r#"{"update_id":1,"message":{"chat":{"id":555},"text":"/help"}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        assert_eq!(
            *sender.messages.lock().unwrap(),
            vec![(555, HELP_TEXT.to_string())]
        );
    }

    #[tokio::test]
    async fn test_free_text_relays_generated_reply() {
        let sender = Arc::new(RecordingSender::default());
        let (status, _) = post_webhook(
            app(sender.clone()),
            r#"{"message":{"chat":{"id":8},"text":"hi bot"}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            *sender.messages.lock().unwrap(),
            vec![(8, "generated reply".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_text_is_acknowledged_without_send() {
        let sender = Arc::new(RecordingSender::default());
        for body in [
            r#"{"message":{"chat":{"id":8},"photo":[]}}"#,
            r#"{"message":{"text":"no chat"}}"#,
            r#"{"update_id":5}"#,
            "this is not json",
            "",
        ] {
            let (status, _) = post_webhook(app(sender.clone()), body).await;
            assert_eq!(status, StatusCode::OK, "body: {body}");
        }
        assert!(sender.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_still_acknowledged() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..RecordingSender::default()
        });
        let (status, body) = post_webhook(
            app(sender),
            r#"{"message":{"chat":{"id":1},"text":"/start"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    struct PanickingGenerator;

    #[async_trait]
    impl Generate for PanickingGenerator {
        async fn generate(&self, _prompt: &str) -> String {
            panic!("generator exploded")
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_500_and_server_keeps_serving() {
        let sender = Arc::new(RecordingSender::default());
        let state = Arc::new(AppState::new(
            Config::default(),
            Arc::new(PanickingGenerator),
            sender.clone(),
        ));
        let app = router(state);

        let (status, body) = post_webhook(
            app.clone(),
            r#"{"message":{"chat":{"id":1},"text":"boom"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Error");

        let (status, _) = post_webhook(
            app,
            r#"{"message":{"chat":{"id":1},"text":"/help"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sender.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_webhook_not_allowed() {
        let response = app(Arc::new(RecordingSender::default()))
            .oneshot(
                Request::builder()
                    .uri("/webhook")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

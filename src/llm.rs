use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::GeminiConfig;

/// Returned instead of calling the API when no key is configured.
pub const CONFIG_ERROR: &str =
    "Error: Gemini API key not configured. Please check your environment variables.";

/// Returned when the API answers but produces no text.
pub const NO_RESPONSE: &str = "Sorry, I couldn't generate a response.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Thin client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Gemini HTTP client")?;
        Ok(Self { client, config })
    }

    /// Send a single-turn prompt. `Ok(None)` means the API answered without
    /// any text (e.g. the candidate was blocked).
    pub async fn generate_content(&self, prompt: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        debug!(model = %self.config.model, "Sending request to Gemini");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("Failed to send request to Gemini")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Gemini response")?;

        if !status.is_success() {
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse Gemini response")?;

        if let Some(err) = parsed.error {
            anyhow::bail!("Gemini API error: {}", err.message);
        }

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}

/// Anything that can turn a prompt into a reply. Never fails: every error
/// is folded into the returned text.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, prompt: &str) -> String;
}

/// Gemini-backed generator. Without an API key it never touches the network.
pub struct ContentGenerator {
    client: Option<GeminiClient>,
}

impl ContentGenerator {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let client = if config.api_key.trim().is_empty() {
            warn!("GEMINI_API_KEY not configured, content generation disabled");
            None
        } else {
            Some(GeminiClient::new(config.clone())?)
        };
        Ok(Self { client })
    }
}

#[async_trait]
impl Generate for ContentGenerator {
    async fn generate(&self, prompt: &str) -> String {
        let Some(client) = &self.client else {
            return CONFIG_ERROR.to_string();
        };

        match client.generate_content(prompt).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!("Gemini returned no text");
                NO_RESPONSE.to_string()
            }
            Err(e) => {
                error!("Error generating content: {:#}", e);
                format!("Error: {:#}", e)
            }
        }
    }
}

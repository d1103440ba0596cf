//! Client for the external text-generation service used by the daily summary
//!
//! Speaks the `models/{model}:generateContent` REST shape: the prompt goes
//! out as a single user part, the reply text is the concatenation of the
//! first candidate's parts.

use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::env;
use tracing::debug;

/// Turns a prompt into free text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

pub struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.summary_timeout())
            .build()
            .context("Failed to build text generation HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.summary_endpoint().trim_end_matches('/').to_string(),
            model: config.summary_model().to_string(),
            api_key: env::var(config.summary_api_key_env()).ok().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let api_key = self.api_key.as_deref().context("API key not configured")?;
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .body(body.to_string())
            .send()
            .await
            .context("text generation request failed")?;

        let status = response.status();
        let text = response.text().await.context("Failed to read text generation response")?;
        anyhow::ensure!(status.is_success(), "text generation returned HTTP {}", status.as_u16());

        let parsed: Value =
            serde_json::from_str(&text).context("text generation response is not JSON")?;
        debug!(bytes = %text.len(), model = %self.model, "text_generation_response");
        Ok(extract_text(&parsed))
    }
}

/// Concatenate the text parts of the first candidate; empty if there are none
pub fn extract_text(response: &Value) -> String {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect::<String>())
        .unwrap_or_default()
}

//! Guardian notification delivery
//!
//! Two implementations:
//! - `LogNotifier` - simulated SMS, written to the log
//! - `WebhookNotifier` - HTTP POST to a configured webhook (basic auth
//!   credentials may be embedded in the URL)

use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use tracing::{debug, info};

/// Delivers side effects of a committed attendance event
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a text message to a guardian
    async fn send_sms(&self, to: &str, body: &str) -> anyhow::Result<()>;

    /// Play the success cue at the scanning station
    async fn play_chime(&self) -> anyhow::Result<()>;
}

/// Simulated delivery
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_sms(&self, to: &str, body: &str) -> anyhow::Result<()> {
        info!(to = %to, body = %body, "sms_simulated");
        Ok(())
    }

    async fn play_chime(&self) -> anyhow::Result<()> {
        debug!("chime_played");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    site: &'a str,
    to: &'a str,
    body: &'a str,
}

/// Posts messages as JSON to a webhook
pub struct WebhookNotifier {
    url: String,
    username: Option<String>,
    password: Option<String>,
    site_id: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let raw_url = config.webhook_url().context("notify.webhook_url is required in webhook mode")?;
        let (url, username, password) = parse_url_with_auth(raw_url);

        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(config.notify_timeout())
            .build()
            .context("Failed to build webhook HTTP client")?;

        Ok(Self { url, username, password, site_id: config.site_id().to_string(), client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_sms(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let payload = SmsPayload { site: &self.site_id, to, body };
        let json = serde_json::to_string(&payload)?;

        let mut request =
            self.client.post(&self.url).header("Content-Type", "application/json").body(json);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            let credentials = format!("{}:{}", username, password);
            let encoded = STANDARD.encode(credentials.as_bytes());
            request = request.header("Authorization", format!("Basic {}", encoded));
        }

        let response = request.send().await.context("webhook request failed")?;
        let status = response.status();
        anyhow::ensure!(status.is_success(), "webhook returned HTTP {}", status.as_u16());

        debug!(to = %to, status = %status.as_u16(), "sms_webhook_delivered");
        Ok(())
    }

    async fn play_chime(&self) -> anyhow::Result<()> {
        // No speaker at the webhook end; the cue stays local
        debug!("chime_played");
        Ok(())
    }
}

/// Parse URL and extract basic auth credentials if present
pub fn parse_url_with_auth(url: &str) -> (String, Option<String>, Option<String>) {
    for scheme in ["http://", "https://"] {
        let Some(rest) = url.strip_prefix(scheme) else {
            continue;
        };
        if let Some(at_pos) = rest.find('@') {
            let auth_part = &rest[..at_pos];
            let host_part = &rest[at_pos + 1..];

            if let Some(colon_pos) = auth_part.find(':') {
                let username = auth_part[..colon_pos].to_string();
                let password = auth_part[colon_pos + 1..].to_string();
                return (format!("{}{}", scheme, host_part), Some(username), Some(password));
            }
        }
    }
    (url.to_string(), None, None)
}

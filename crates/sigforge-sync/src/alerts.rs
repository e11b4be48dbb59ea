use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use sigforge_core::Posting;
use sigforge_storage::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
use thiserror::Error;
use tracing::{info, warn};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport: {0}")]
    Transport(#[from] FetchError),
    #[error("channel rejected message: {0}")]
    Rejected(String),
    #[error("channel setup: {0}")]
    Setup(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("notification not delivered within {0:?}")]
    Timeout(Duration),
}

/// Outbound text sink for alerts.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> Result<(), ChannelError>;
}

/// Telegram Bot API `sendMessage`. Transient failures are retried with exponential
/// backoff, three attempts in total.
#[derive(Debug)]
pub struct TelegramChannel {
    http: HttpFetcher,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>, timeout: Duration) -> Result<Self, ChannelError> {
        Self::with_api_base(TELEGRAM_API_BASE, token, chat_id, timeout, telegram_backoff())
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
        backoff: BackoffPolicy,
    ) -> Result<Self, ChannelError> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout,
            backoff,
            per_source_concurrency: 1,
            ..HttpClientConfig::default()
        })
        .map_err(|e| ChannelError::Setup(e.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }
}

fn telegram_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 2,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(4),
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": false,
        });
        let response = self.http.post_json("telegram", &url, &body).await?;
        let reply: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| ChannelError::Rejected(format!("unreadable reply: {e}")))?;
        if reply.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            let description = reply
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("no description");
            return Err(ChannelError::Rejected(description.to_string()));
        }
        Ok(())
    }
}

/// Plain-text alert body.
pub fn format_alert(posting: &Posting) -> String {
    let or_unknown = |s: &str| if s.is_empty() { "Unknown".to_string() } else { s.to_string() };
    let stack = if posting.stack.is_empty() {
        "N/A".to_string()
    } else {
        posting.stack.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "SigForge alert (score {score})\n\n\
         Position: {title}\n\
         Company: {company}\n\
         Location: {location}\n\
         Stack: {stack}\n\n\
         Apply: {url}",
        score = posting.score,
        title = posting.title,
        company = or_unknown(&posting.company),
        location = or_unknown(&posting.location),
        url = posting.url,
    )
}

/// Formats and sends one alert per eligible posting, bounded by a per-send timeout.
#[derive(Clone)]
pub struct AlertDispatcher {
    channel: Arc<dyn NotificationChannel>,
    timeout: Duration,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("channel", &self.channel.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn NotificationChannel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    pub async fn dispatch(&self, posting: &Posting) -> Result<(), DispatchError> {
        let text = format_alert(posting);
        match tokio::time::timeout(self.timeout, self.channel.send(&text)).await {
            Ok(Ok(())) => {
                info!(posting_id = %posting.id, score = posting.score, channel = self.channel.name(), "alert sent");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(posting_id = %posting.id, error = %err, "alert dispatch failed");
                Err(err.into())
            }
            Err(_) => {
                warn!(posting_id = %posting.id, timeout = ?self.timeout, "alert dispatch timed out");
                Err(DispatchError::Timeout(self.timeout))
            }
        }
    }
}

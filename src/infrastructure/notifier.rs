//! Operator notification sink.
//!
//! One fire-and-forget interface carries batch summaries, per-store
//! warnings and unexpected-exception reports. A failing sink must never
//! abort the pipeline, so errors are logged and swallowed here.

use async_trait::async_trait;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str, severity: Severity);
}

/// Telegram Bot API sink.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_key: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(api_key: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, message: &str, severity: Severity) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.api_key);
        let text = format!("[{}] {message}", severity.as_str());

        let result = self
            .client
            .get(url)
            .query(&[("chat_id", self.chat_id.as_str()), ("text", &text)])
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "telegram sink rejected message");
            }
            Ok(_) => {}
            Err(e) => warn!("telegram sink unreachable: {e}"),
        }
    }
}

/// Sink of last resort: writes to the log only. Used when no Telegram
/// credentials are configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }
}

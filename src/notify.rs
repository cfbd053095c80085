/*!
 * Notification dispatch for run outcomes, grounded in `core/notifications.py`.
 */

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::{EmailConfig, WebhookConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// One delivery channel. Failures are logged and swallowed by the caller —
/// a broken notification sink must never fail a run.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: &str, level: Level) -> bool;
}

/// Posts a JSON payload to a configured URL; recognizes Slack-shaped
/// webhooks by host and adapts the payload accordingly.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn from_config(config: &WebhookConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let url = config.url.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            url,
        })
    }

    fn payload(&self, message: &str, level: Level) -> serde_json::Value {
        if self.url.contains("slack.com") {
            serde_json::json!({ "text": format!("[{}] {}", level.as_str(), message) })
        } else {
            serde_json::json!({
                "content": format!("**[{}]** {}", level.as_str(), message),
                "username": "Meridian Bot",
            })
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, message: &str, level: Level) -> bool {
        let payload = self.payload(message, level);
        match self
            .client
            .post(&self.url)
            .header("User-Agent", "Meridian/1.0")
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                error!(error = %e, "failed to send webhook notification");
                false
            }
        }
    }
}

/// A composed email message, ready to hand to a [`Mailer`].
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: Vec<String>,
}

/// The actual SMTP transport is an external collaborator (spec §1); this
/// crate only builds the message the way the Python original does.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, message: &EmailMessage) -> bool;
}

pub struct EmailChannel<M> {
    mailer: M,
    from: String,
    to: Vec<String>,
}

impl<M: Mailer> EmailChannel<M> {
    pub fn from_config(config: &EmailConfig, mailer: M) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let from = config.from_address.clone()?;
        if config.to_addresses.is_empty() {
            return None;
        }
        Some(Self {
            mailer,
            from,
            to: config.to_addresses.clone(),
        })
    }

    fn compose(&self, message: &str, level: Level) -> EmailMessage {
        EmailMessage {
            subject: format!("[{}] Meridian Notification", level.as_str()),
            body: message.to_string(),
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

#[async_trait]
impl<M: Mailer + Send + Sync> NotificationChannel for EmailChannel<M> {
    async fn send(&self, message: &str, level: Level) -> bool {
        if self.to.is_empty() {
            return false;
        }
        self.mailer.deliver(&self.compose(message, level)).await
    }
}

/// Logs the message instead of sending it; the actual SMTP transport is the
/// external collaborator spec §1 scopes out, so this is what `EmailChannel`
/// is wired to by default.
pub struct LoggingMailer;

#[async_trait]
impl Mailer for LoggingMailer {
    async fn deliver(&self, message: &EmailMessage) -> bool {
        info!(subject = %message.subject, to = ?message.to, "email notification (no SMTP transport configured)");
        true
    }
}

/// Fans a message out to every registered channel; a channel failure never
/// aborts delivery to the others.
#[derive(Default)]
pub struct NotificationManager {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Box<dyn NotificationChannel>) {
        self.channels.push(channel);
    }

    pub async fn notify(&self, message: &str, level: Level) {
        for channel in &self.channels {
            channel.send(message, level).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingMailer {
        sent: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Mailer for std::sync::Arc<RecordingMailer> {
        async fn deliver(&self, message: &EmailMessage) -> bool {
            self.sent.lock().unwrap().push(message.subject.clone());
            true
        }
    }

    #[test]
    fn webhook_disabled_yields_no_channel() {
        let config = WebhookConfig { enabled: false, url: None };
        assert!(WebhookChannel::from_config(&config).is_none());
    }

    #[test]
    fn webhook_enabled_without_url_yields_no_channel() {
        let config = WebhookConfig { enabled: true, url: None };
        assert!(WebhookChannel::from_config(&config).is_none());
    }

    #[test]
    fn slack_url_gets_text_payload() {
        let config = WebhookConfig {
            enabled: true,
            url: Some("https://hooks.slack.com/services/x".to_string()),
        };
        let channel = WebhookChannel::from_config(&config).unwrap();
        let payload = channel.payload("disk low", Level::Warning);
        assert_eq!(payload["text"], "[WARNING] disk low");
    }

    #[test]
    fn generic_url_gets_content_payload() {
        let config = WebhookConfig {
            enabled: true,
            url: Some("https://example.com/hook".to_string()),
        };
        let channel = WebhookChannel::from_config(&config).unwrap();
        let payload = channel.payload("disk low", Level::Warning);
        assert_eq!(payload["content"], "**[WARNING]** disk low");
    }

    #[tokio::test]
    async fn email_channel_composes_and_delivers_through_mailer() {
        let mailer = std::sync::Arc::new(RecordingMailer { sent: std::sync::Mutex::new(Vec::new()) });
        let config = EmailConfig {
            enabled: true,
            smtp_host: None,
            smtp_port: None,
            from_address: Some("meridian@example.com".to_string()),
            to_addresses: vec!["ops@example.com".to_string()],
        };
        let channel = EmailChannel::from_config(&config, mailer.clone()).unwrap();
        assert!(channel.send("run complete", Level::Info).await);
        assert_eq!(mailer.sent.lock().unwrap()[0], "[INFO] Meridian Notification");
    }

    #[test]
    fn email_channel_without_recipients_yields_no_channel() {
        let mailer = std::sync::Arc::new(RecordingMailer { sent: std::sync::Mutex::new(Vec::new()) });
        let config = EmailConfig {
            enabled: true,
            smtp_host: None,
            smtp_port: None,
            from_address: Some("meridian@example.com".to_string()),
            to_addresses: vec![],
        };
        assert!(EmailChannel::from_config(&config, mailer).is_none());
    }

    #[tokio::test]
    async fn manager_notifies_all_registered_channels() {
        let mailer = std::sync::Arc::new(RecordingMailer { sent: std::sync::Mutex::new(Vec::new()) });
        let config = EmailConfig {
            enabled: true,
            smtp_host: None,
            smtp_port: None,
            from_address: Some("meridian@example.com".to_string()),
            to_addresses: vec!["ops@example.com".to_string()],
        };
        let channel = EmailChannel::from_config(&config, mailer.clone()).unwrap();

        let mut manager = NotificationManager::new();
        manager.register(Box::new(channel));
        manager.notify("hello", Level::Info).await;

        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }
}

//! Security alerting layer for tracing.
//!
//! Forwards ERROR-level events, plus WARN-level events tagged with one of
//! the security `event` names, to an alert sink through a bounded channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{Layer, layer::Context};

/// `event` field values that alert even below ERROR.
pub const SECURITY_EVENTS: &[&str] = &[
    "ip_blocked",
    "login_locked",
    "api_key_rejected",
    "sql_injection_attempt",
    "xss_attempt",
    "malicious_upload",
    "circuit_state_change",
];

/// Alert message containing event details.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub level: String,
    pub message: String,
    pub target: String,
    pub event: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub fields: Vec<(String, String)>,
}

/// Configuration for the alert layer.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Channel buffer size; alerts beyond it are dropped.
    pub buffer_size: usize,
    /// Also alert on WARN-level security events.
    pub security_events: bool,
    /// Webhook URL (Slack, Discord, etc.). Console when unset.
    pub webhook_url: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            security_events: true,
            webhook_url: None,
        }
    }
}

impl AlertConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            buffer_size: std::env::var("ALERT_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.buffer_size),
            security_events: std::env::var("ALERT_SECURITY_EVENTS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.security_events),
            webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
        }
    }
}

/// Trait for alert senders - implement this for different backends.
#[async_trait::async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, alert: AlertMessage) -> Result<(), AlertError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Failed to send alert: {0}")]
    SendError(String),
}

/// Console alert sender - writes alerts to stderr (for development).
pub struct ConsoleAlertSender;

#[async_trait::async_trait]
impl AlertSender for ConsoleAlertSender {
    async fn send(&self, alert: AlertMessage) -> Result<(), AlertError> {
        eprintln!(
            "\n[SECURITY ALERT]\n\
             Level: {}\n\
             Event: {}\n\
             Target: {}\n\
             Message: {}\n\
             Time: {}\n",
            alert.level,
            alert.event.as_deref().unwrap_or("-"),
            alert.target,
            alert.message,
            alert.timestamp
        );
        Ok(())
    }
}

/// Webhook alert sender - posts alerts to a webhook URL.
pub struct WebhookAlertSender {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSender {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl AlertSender for WebhookAlertSender {
    async fn send(&self, alert: AlertMessage) -> Result<(), AlertError> {
        let fields: serde_json::Map<String, serde_json::Value> = alert
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        let payload = serde_json::json!({
            "text": format!(
                "*{}* {}\n*Target:* {}\n*Message:* {}\n*Time:* {}",
                alert.level,
                alert.event.as_deref().unwrap_or("error"),
                alert.target,
                alert.message,
                alert.timestamp
            ),
            "fields": fields,
        });

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AlertError::SendError(e.to_string()))?;

        Ok(())
    }
}

/// Tracing layer that dispatches alerts.
pub struct AlertLayer {
    sender: mpsc::Sender<AlertMessage>,
    security_events: bool,
}

impl AlertLayer {
    /// Create a new alert layer with the given sender. Must be called inside
    /// a tokio runtime.
    pub fn new(alert_sender: Arc<dyn AlertSender>, config: &AlertConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertMessage>(config.buffer_size.max(1));

        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = alert_sender.send(alert).await {
                    eprintln!("Failed to send alert: {}", e);
                }
            }
        });

        Self {
            sender: tx,
            security_events: config.security_events,
        }
    }

    /// Webhook sender when configured, console otherwise.
    pub fn from_config(config: &AlertConfig) -> Self {
        let sender: Arc<dyn AlertSender> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookAlertSender::new(url.clone())),
            None => Arc::new(ConsoleAlertSender),
        };
        Self::new(sender, config)
    }

    fn should_alert(&self, level: &Level, event: Option<&str>) -> bool {
        if *level == Level::ERROR {
            return true;
        }
        self.security_events
            && *level == Level::WARN
            && event.is_some_and(|e| SECURITY_EVENTS.contains(&e))
    }
}

/// Visitor to extract fields from events.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    event: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "event" => self.event = Some(value),
            _ => self.fields.push((name.to_string(), value)),
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.record(field.name(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record(field.name(), value.to_string());
    }
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = event.metadata().level();
        if *level > Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if !self.should_alert(level, visitor.event.as_deref()) {
            return;
        }

        let alert = AlertMessage {
            level: level.to_string(),
            message: visitor.message,
            target: event.metadata().target().to_string(),
            event: visitor.event,
            timestamp: chrono::Utc::now(),
            fields: visitor.fields,
        };

        // Non-blocking; a full channel drops the alert.
        let _ = self.sender.try_send(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AlertMessage>>);

    #[async_trait::async_trait]
    impl AlertSender for Arc<Recorder> {
        async fn send(&self, alert: AlertMessage) -> Result<(), AlertError> {
            self.0.lock().unwrap().push(alert);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_errors_and_security_warnings_alert() {
        let recorder = Arc::new(Recorder::default());
        let layer = AlertLayer::new(Arc::new(recorder.clone()), &AlertConfig::default());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("routine");
            tracing::warn!("slow request");
            tracing::warn!(event = "login_locked", username = "alice", "Account locked");
            tracing::error!("database unreachable");
        });

        // Let the forwarding task drain the channel.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let alerts = recorder.0.lock().unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].event.as_deref(), Some("login_locked"));
        assert!(alerts[0].fields.iter().any(|(k, v)| k == "username" && v == "alice"));
        assert_eq!(alerts[1].message, "database unreachable");
    }
}

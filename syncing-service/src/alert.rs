use std::time::Duration;

use reqwest::{Client as HttpClient, ClientBuilder, RequestBuilder};
use serde::Serialize;

pub const SUBJECT_PREFIX: &str = "[SYNCING_SERVICE]";

/// Destination for operator alerts. Delivery is best-effort and never
/// blocks or fails the caller.
pub trait AlertSink: Send + Sync {
    fn send(&self, subject: &str, message: &str);
}

/// Alerts only end up in the service log.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, subject: &str, message: &str) {
        log::warn!("{SUBJECT_PREFIX} {subject}: {message}");
    }
}

#[derive(Serialize)]
struct AlertBody {
    subject: String,
    message: String,
}

/// Posts alerts as JSON to a webhook from a detached task.
pub struct WebhookAlertSink {
    http_client: HttpClient,
    url: String,
}

impl WebhookAlertSink {
    /// Every delivery attempt is abandoned after `timeout`.
    pub fn new(url: String, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            http_client: ClientBuilder::new().timeout(timeout).build()?,
            url,
        })
    }

    fn request(&self, subject: &str, message: &str) -> RequestBuilder {
        self.http_client.post(&self.url).json(&AlertBody {
            subject: format!("{SUBJECT_PREFIX} {subject}"),
            message: message.to_string(),
        })
    }
}

impl AlertSink for WebhookAlertSink {
    fn send(&self, subject: &str, message: &str) {
        log::warn!("{SUBJECT_PREFIX} {subject}: {message}");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::error!("Unable to deliver alert '{subject}': no async runtime");
            return;
        };

        let request = self.request(subject, message);

        runtime.spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => {}
                Err(err) => log::error!("Failed to deliver alert: {err}"),
            }
        });
    }
}

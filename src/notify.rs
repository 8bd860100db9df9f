//! Completion notification
//!
//! When a package is done (and was not canceled) the controller hands its
//! status record and final report to a [`Notifier`]. The bundled
//! [`WebhookNotifier`] POSTs a JSON payload to every configured webhook.

use crate::background::BackgroundInfo;
use crate::config::WebhookConfig;
use crate::report::PackagedReport;
use crate::types::{BackgroundState, Event, PackageId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Receives finished packages
pub trait Notifier: Send + Sync {
    /// Notify the requester of `info` that `report` is done
    ///
    /// Must not block: implementations do their I/O in the background.
    fn notify(&self, info: &BackgroundInfo, report: &PackagedReport);
}

/// JSON body POSTed to webhooks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// "complete" or "failed"
    pub event: String,
    /// Package ID
    pub package_id: PackageId,
    /// Package title
    pub title: Option<String>,
    /// Requester e-mail
    pub email: Option<String>,
    /// Event target of the package
    pub event_target: Option<String>,
    /// Final state
    pub state: BackgroundState,
    /// Download URLs of the produced archives
    pub urls: Vec<String>,
    /// Report messages
    pub messages: Vec<String>,
    /// Unix timestamp of the notification
    pub timestamp: i64,
}

impl NotificationPayload {
    /// Build the payload for a finished package
    pub fn new(info: &BackgroundInfo, report: &PackagedReport) -> Self {
        let event = if report.state == BackgroundState::Success {
            "complete"
        } else {
            "failed"
        };
        Self {
            event: event.to_string(),
            package_id: report.package_id.clone(),
            title: info.title.clone(),
            email: info.email.clone(),
            event_target: info.event_target.clone(),
            state: report.state,
            urls: report.urls(),
            messages: report.messages.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// [`Notifier`] that POSTs to the configured webhooks
///
/// Delivery is fire and forget; failures are logged and broadcast as
/// [`Event::WebhookFailed`].
pub struct WebhookNotifier {
    webhooks: Vec<WebhookConfig>,
    event_tx: broadcast::Sender<Event>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a notifier for `webhooks`
    pub fn new(webhooks: Vec<WebhookConfig>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            webhooks,
            event_tx,
            client: reqwest::Client::new(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, info: &BackgroundInfo, report: &PackagedReport) {
        if self.webhooks.is_empty() {
            return;
        }

        let payload = Arc::new(NotificationPayload::new(info, report));
        let webhooks = self.webhooks.clone();
        let client = self.client.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            for webhook in webhooks {
                let mut request = client
                    .post(&webhook.url)
                    .json(payload.as_ref())
                    .timeout(webhook.timeout);
                if let Some(auth) = &webhook.auth_header {
                    request = request.header("Authorization", auth);
                }

                let url = webhook.url;
                let timeout = webhook.timeout;
                let error_msg = match tokio::time::timeout(timeout, request.send()).await {
                    Ok(Ok(response)) if response.status().is_success() => {
                        tracing::debug!(url = %url, package_id = %payload.package_id, "webhook sent successfully");
                        continue;
                    }
                    Ok(Ok(response)) => format!(
                        "Webhook returned status {}: {}",
                        response.status(),
                        response.text().await.unwrap_or_default()
                    ),
                    Ok(Err(e)) => format!("Failed to send webhook: {}", e),
                    Err(_) => format!("Webhook timed out after {:?}", timeout),
                };

                tracing::warn!(url = %url, error = %error_msg, "webhook failed");
                event_tx
                    .send(Event::WebhookFailed {
                        url,
                        error: error_msg,
                    })
                    .ok();
            }
        });
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::PackagedBundle;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn finished_report() -> PackagedReport {
        let mut bundle = PackagedBundle::new(0, 0, 1, 4);
        bundle.add_processed_bytes(1, 4, 4).unwrap();
        bundle.finish("http://h/download?file=p_0.zip").unwrap();
        PackagedReport::new(PackageId::new("pkg-1"), vec![bundle], 4, BackgroundState::Success)
    }

    fn webhook(url: String) -> WebhookConfig {
        WebhookConfig {
            url,
            auth_header: Some("Bearer t0ken".into()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_payload_for_failed_report() {
        let info = BackgroundInfo::new("base").with_title("WISE cutouts");
        let report = PackagedReport::failed(PackageId::new("pkg-2"), "disk full");
        let payload = NotificationPayload::new(&info, &report);
        assert_eq!(payload.event, "failed");
        assert_eq!(payload.title.as_deref(), Some("WISE cutouts"));
        assert!(payload.urls.is_empty());
        assert_eq!(payload.messages, vec!["disk full".to_string()]);
    }

    #[tokio::test]
    async fn test_webhook_receives_completion_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("authorization", "Bearer t0ken"))
            .and(body_partial_json(serde_json::json!({
                "event": "complete",
                "package_id": "pkg-1",
                "email": "a@b.c",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (tx, _rx) = broadcast::channel(16);
        let notifier = WebhookNotifier::new(vec![webhook(format!("{}/hook", server.uri()))], tx);
        notifier.notify(&BackgroundInfo::new("b").with_email("a@b.c"), &finished_report());

        tokio::time::sleep(Duration::from_millis(300)).await;
        server.verify().await;
    }

    #[tokio::test]
    async fn test_webhook_error_is_broadcast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let (tx, mut rx) = broadcast::channel(16);
        let notifier = WebhookNotifier::new(vec![webhook(format!("{}/hook", server.uri()))], tx);
        notifier.notify(&BackgroundInfo::new("b"), &finished_report());

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::WebhookFailed { error, .. } => assert!(error.contains("500")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

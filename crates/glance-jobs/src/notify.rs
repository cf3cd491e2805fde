//! Notification sinks for completed captures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use glance_core::defaults::WEBHOOK_TIMEOUT_SECS;
use glance_core::{
    Error, EventActor, EventBus, EventContext, NotificationSink, Result, ResultSummary, ServerEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Glance-Signature";
pub const EVENT_HEADER: &str = "X-Glance-Event";

/// Publishes `capture.analyzed` on the in-process [`EventBus`], attributed
/// to the capturing user.
pub struct EventBusSink {
    bus: Arc<EventBus>,
}

impl EventBusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSink for EventBusSink {
    async fn notify_completion(
        &self,
        user_id: &str,
        job_id: Uuid,
        summary: &ResultSummary,
    ) -> Result<bool> {
        let reached = self.bus.emit_with_context(
            ServerEvent::CaptureAnalyzed {
                job_id,
                summary: summary.clone(),
            },
            EventContext {
                actor: Some(EventActor::user(user_id)),
                correlation_id: Some(job_id),
            },
        );
        Ok(reached > 0)
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    event: &'static str,
    user_id: &'a str,
    job_id: Uuid,
    summary: &'a ResultSummary,
}

/// POSTs completions to a fixed URL, signed when a secret is configured.
pub struct WebhookSink {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            secret: secret.filter(|s| !s.is_empty()),
        })
    }

    /// `GLANCE_WEBHOOK_URL` and optional `GLANCE_WEBHOOK_SECRET`.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var("GLANCE_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => {
                Self::new(url.trim(), std::env::var("GLANCE_WEBHOOK_SECRET").ok()).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// `sha256=<hex hmac>` of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Notification(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify_completion(
        &self,
        user_id: &str,
        job_id: Uuid,
        summary: &ResultSummary,
    ) -> Result<bool> {
        let body = serde_json::to_vec(&WebhookBody {
            event: "capture.analyzed",
            user_id,
            job_id,
            summary,
        })?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, "capture.analyzed");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("webhook delivery failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(subsystem = "notify", %job_id, status = status.as_u16(), "Webhook rejected delivery");
            return Ok(false);
        }
        debug!(subsystem = "notify", %job_id, "Webhook delivered");
        Ok(true)
    }
}

/// Drops every notification.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify_completion(&self, _: &str, _: Uuid, _: &ResultSummary) -> Result<bool> {
        Ok(false)
    }
}

/// Delivers to several sinks. Delivered when any sink delivered; a failing
/// sink is logged and does not stop the others.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify_completion(
        &self,
        user_id: &str,
        job_id: Uuid,
        summary: &ResultSummary,
    ) -> Result<bool> {
        let mut delivered = false;
        for sink in &self.sinks {
            match sink.notify_completion(user_id, job_id, summary).await {
                Ok(hit) => delivered |= hit,
                Err(e) => warn!(subsystem = "notify", %job_id, error = %e, "Sink failed"),
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glance_core::InteractionKind;

    fn summary(job_id: Uuid) -> ResultSummary {
        ResultSummary {
            job_id,
            line_count: 1,
            summary: "hello".into(),
            interaction: InteractionKind::Unknown,
            entity_count: 0,
        }
    }

    #[test]
    fn test_sign_payload_known_vector() {
        assert_eq!(
            sign_payload("key", b"The quick brown fox jumps over the lazy dog").unwrap(),
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
        assert_eq!(
            sign_payload("topsecret", br#"{"hello":"world"}"#).unwrap(),
            "sha256=afd00617ceb8f63e65ea5c310f06bf78c3901e7a713db532e25da26ad63c7236"
        );
    }

    #[tokio::test]
    async fn test_event_bus_sink_scopes_to_user() {
        let bus = Arc::new(EventBus::new(8));
        let sink = EventBusSink::new(bus.clone());
        let job_id = Uuid::new_v4();

        assert!(!sink.notify_completion("ana", job_id, &summary(job_id)).await.unwrap());

        let mut rx = bus.subscribe();
        assert!(sink.notify_completion("ana", job_id, &summary(job_id)).await.unwrap());
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "capture.analyzed");
        assert!(envelope.actor.is_user("ana"));
        assert_eq!(envelope.correlation_id, Some(job_id));
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let id = Uuid::new_v4();
        assert!(!NoopSink.notify_completion("u", id, &summary(id)).await.unwrap());
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn notify_completion(&self, _: &str, _: Uuid, _: &ResultSummary) -> Result<bool> {
            Err(Error::Notification("socket closed".into()))
        }
    }

    #[tokio::test]
    async fn test_fanout_tolerates_failing_sink() {
        let bus = Arc::new(EventBus::new(8));
        let _rx = bus.subscribe();
        let fanout = FanoutSink::new(vec![
            Arc::new(FailingSink),
            Arc::new(EventBusSink::new(bus)),
        ]);
        let id = Uuid::new_v4();
        assert!(fanout.notify_completion("u", id, &summary(id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_error() {
        let sink = WebhookSink::new("http://127.0.0.1:9/hook", Some("s".into())).unwrap();
        let id = Uuid::new_v4();
        let err = sink.notify_completion("u", id, &summary(id)).await.unwrap_err();
        assert!(matches!(err, Error::Notification(_)));
    }
}

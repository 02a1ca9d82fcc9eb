//! Recording fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use notification_service::channels::{
    EmailDelivery, EmailRequest, PushDelivery, PushNotification, PushReport, PushSendError,
    PushTarget, PushTransport,
};
use notification_service::config::{MetricsConfig, NotificationConfig};
use notification_service::metrics::NotificationMetrics;
use notification_service::registry::PushSubscription;
use notification_service::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;

/// Metrics with their own registry
pub fn test_metrics() -> NotificationMetrics {
    NotificationMetrics::new(&MetricsConfig {
        enabled: true,
        endpoint: "/metrics".to_string(),
        namespace: "integration".to_string(),
    })
    .expect("metrics")
}

/// Defaults with both delivery channels left to the caller
pub fn test_config() -> NotificationConfig {
    let mut config = NotificationConfig::default();
    config.email.enabled = false;
    config.push.enabled = false;
    config.push.vapid_public_key = "BPublicTestKey".to_string();
    config
}

/// Email delivery that remembers every request
#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<EmailRequest>>,
}

impl RecordingEmail {
    pub fn sent(&self) -> Vec<EmailRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailDelivery for RecordingEmail {
    async fn send_email(&self, request: EmailRequest) -> Result<()> {
        self.sent.lock().push(request);
        Ok(())
    }
}

/// Push delivery that remembers every dispatch without resolving recipients
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<(PushTarget, PushNotification)>>,
}

impl RecordingPush {
    pub fn sent(&self) -> Vec<(PushTarget, PushNotification)> {
        self.sent.lock().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(target, _)| target.topic)
            .collect()
    }
}

#[async_trait]
impl PushDelivery for RecordingPush {
    async fn send_push(
        &self,
        target: PushTarget,
        notification: PushNotification,
    ) -> Result<PushReport> {
        self.sent.lock().push((target, notification));
        Ok(PushReport::default())
    }
}

/// Push transport that records each endpoint it is asked to reach.
/// Endpoints marked gone answer like a 410 from the push service.
#[derive(Default)]
pub struct RecordingTransport {
    gone: HashSet<String>,
    delivered: Mutex<Vec<(String, Value)>>,
}

impl RecordingTransport {
    pub fn with_gone<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gone: endpoints.into_iter().map(Into::into).collect(),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Endpoints a send was attempted to, sorted
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .delivered
            .lock()
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.delivered
            .lock()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> std::result::Result<(), PushSendError> {
        let payload = serde_json::from_slice(payload).unwrap_or(Value::Null);
        self.delivered
            .lock()
            .push((subscription.endpoint.clone(), payload));

        if self.gone.contains(&subscription.endpoint) {
            Err(PushSendError::Gone)
        } else {
            Ok(())
        }
    }
}

//! Push notification channel implementation using Web Push

use crate::channels::{
    PushDelivery, PushNotification, PushReport, PushSendError, PushTarget, PushTransport,
};
use crate::config::PushConfig;
use crate::error::Result;
use crate::metrics::NotificationMetrics;
use crate::registry::{PushSubscription, RegisteredSubscription, SubscriptionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushClient, WebPushError,
    WebPushMessage, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

/// Push channel fanning notifications out to registered subscriptions
pub struct PushChannel {
    registry: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn PushTransport>,
    icon: String,
    badge: String,
    metrics: NotificationMetrics,
}

enum SendOutcome {
    Delivered,
    Failed,
    Pruned,
}

impl PushChannel {
    pub fn new(
        config: &PushConfig,
        registry: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn PushTransport>,
        metrics: NotificationMetrics,
    ) -> Self {
        info!("Initializing push channel");

        Self {
            registry,
            transport,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            metrics,
        }
    }

    /// Serialize the wire payload: presentation fields plus a server timestamp
    pub fn build_payload(
        &self,
        notification: &PushNotification,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        let mut data = notification.data.clone();
        data.insert("timestamp".to_string(), Value::String(now.to_rfc3339()));

        let payload = json!({
            "title": notification.title,
            "body": notification.body,
            "icon": self.icon,
            "badge": self.badge,
            "data": data,
        });

        Ok(serde_json::to_vec(&payload)?)
    }

    /// Subscriptions matching `target`, one per endpoint
    async fn recipients(&self, target: &PushTarget) -> Vec<RegisteredSubscription> {
        let mut recipients = Vec::new();

        if let Some(user_id) = &target.user_id {
            recipients.extend(self.registry.list_by_user(user_id).await);
        }
        if let Some(topic) = &target.topic {
            recipients.extend(self.registry.list_by_topic(topic).await);
        }

        let mut seen = HashSet::new();
        recipients.retain(|r| seen.insert(r.subscription.endpoint.clone()));
        recipients
    }

    async fn send_one(&self, recipient: &RegisteredSubscription, payload: &[u8]) -> SendOutcome {
        let endpoint = &recipient.subscription.endpoint;

        match self.transport.deliver(&recipient.subscription, payload).await {
            Ok(()) => SendOutcome::Delivered,
            Err(PushSendError::Gone) => {
                info!(
                    user_id = %recipient.user_id,
                    endpoint = %endpoint,
                    "Push endpoint gone, removing subscription"
                );
                if self.registry.remove(&recipient.user_id, endpoint).await {
                    SendOutcome::Pruned
                } else {
                    SendOutcome::Failed
                }
            }
            Err(PushSendError::Failed(message)) => {
                warn!(
                    user_id = %recipient.user_id,
                    endpoint = %endpoint,
                    error = %message,
                    "Push notification failed"
                );
                SendOutcome::Failed
            }
        }
    }
}

#[async_trait]
impl PushDelivery for PushChannel {
    async fn send_push(
        &self,
        target: PushTarget,
        notification: PushNotification,
    ) -> Result<PushReport> {
        let payload = self.build_payload(&notification, Utc::now())?;
        let recipients = self.recipients(&target).await;

        let outcomes = join_all(
            recipients
                .iter()
                .map(|recipient| self.send_one(recipient, &payload)),
        )
        .await;

        let mut report = PushReport {
            attempted: outcomes.len(),
            ..PushReport::default()
        };
        for outcome in outcomes {
            match outcome {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::Failed => report.failed += 1,
                SendOutcome::Pruned => {
                    report.failed += 1;
                    report.pruned += 1;
                }
            }
        }

        self.metrics
            .record_push(report.delivered, report.failed - report.pruned, report.pruned);
        if report.pruned > 0 {
            self.metrics.set_subscriptions(self.registry.len().await);
        }

        info!(
            title = %notification.title,
            user_id = ?target.user_id,
            topic = ?target.topic,
            attempted = report.attempted,
            delivered = report.delivered,
            pruned = report.pruned,
            "Push notifications sent"
        );

        Ok(report)
    }
}

/// Push delivery used when no VAPID key pair is configured
pub struct DisabledPush;

#[async_trait]
impl PushDelivery for DisabledPush {
    async fn send_push(
        &self,
        target: PushTarget,
        notification: PushNotification,
    ) -> Result<PushReport> {
        debug!(
            title = %notification.title,
            user_id = ?target.user_id,
            topic = ?target.topic,
            "Push disabled, dropping notification"
        );
        Ok(PushReport::default())
    }
}

/// VAPID-signed, aes128gcm-encrypted Web Push over HTTP
pub struct WebPushTransport {
    client: WebPushClient,
    subject: String,
    private_key: String,
    ttl: u32,
}

impl WebPushTransport {
    pub fn new(config: &PushConfig) -> Result<Self> {
        Ok(Self {
            client: WebPushClient::new()?,
            subject: config.vapid_subject.clone(),
            private_key: config.vapid_private_key.clone(),
            ttl: config.ttl_seconds,
        })
    }

    /// Sign and encrypt `payload` for one subscription
    pub fn build_message(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> std::result::Result<WebPushMessage, WebPushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            subscription.keys.p256dh.as_str(),
            subscription.keys.auth.as_str(),
        );

        let mut signature_builder =
            VapidSignatureBuilder::from_base64(&self.private_key, URL_SAFE_NO_PAD, &info)?;
        signature_builder.add_claim("sub", self.subject.as_str());
        let signature = signature_builder.build()?;

        let mut builder = WebPushMessageBuilder::new(&info)?;
        builder.set_ttl(self.ttl);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);

        builder.build()
    }

    async fn try_deliver(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> std::result::Result<(), WebPushError> {
        let message = self.build_message(subscription, payload)?;
        self.client.send(message).await
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> std::result::Result<(), PushSendError> {
        self.try_deliver(subscription, payload)
            .await
            .map_err(classify_error)
    }
}

/// 404 and 410 from the push service mean the endpoint is permanently gone
fn classify_error(err: WebPushError) -> PushSendError {
    match err {
        WebPushError::EndpointNotValid | WebPushError::EndpointNotFound => PushSendError::Gone,
        other => PushSendError::Failed(other.to_string()),
    }
}

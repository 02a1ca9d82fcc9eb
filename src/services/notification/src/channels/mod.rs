//! Notification delivery channels
//!
//! - Email channel (SMTP, templated HTML)
//! - Push channel (VAPID-signed Web Push)
//!
//! Handlers talk to the channels through [`EmailDelivery`] and
//! [`PushDelivery`]. A channel error only ever concerns one delivery; the
//! caller logs it and carries on.

use crate::error::Result;
use crate::registry::PushSubscription;
use crate::templates::EmailTemplate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod email;
pub mod push;

pub use email::{DisabledEmail, EmailChannel};
pub use push::{DisabledPush, PushChannel, WebPushTransport};

/// A templated email for one recipient
#[derive(Debug, Clone, PartialEq)]
pub struct EmailRequest {
    pub to: String,
    pub template: EmailTemplate,
    pub data: Value,
}

/// Who a push notification goes to. With both set the recipients are the
/// union of the two, one send per endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushTarget {
    pub user_id: Option<String>,
    pub topic: Option<String>,
}

impl PushTarget {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            topic: None,
        }
    }

    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            user_id: None,
            topic: Some(topic.into()),
        }
    }

    pub fn and_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Content of a push notification before the channel adds presentation
/// fields and the server timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: Map<String, Value>,
}

impl PushNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of one push fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    /// Endpoints a send was issued to
    pub attempted: usize,
    pub delivered: usize,
    /// Sends that failed, including those that led to a prune
    pub failed: usize,
    /// Endpoints removed from the registry because the provider reported them gone
    pub pruned: usize,
}

/// Error reported by a push provider for a single endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushSendError {
    /// The endpoint no longer exists (HTTP 404/410)
    #[error("push endpoint gone")]
    Gone,

    #[error("push send failed: {0}")]
    Failed(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailDelivery: Send + Sync {
    /// Render and send one email
    async fn send_email(&self, request: EmailRequest) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushDelivery: Send + Sync {
    /// Fan a notification out to every subscription matching `target`
    async fn send_push(&self, target: PushTarget, notification: PushNotification)
        -> Result<PushReport>;
}

/// Low-level sender for one encrypted Web Push message
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> std::result::Result<(), PushSendError>;
}

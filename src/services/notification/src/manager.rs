//! Notification Manager
//!
//! Owns the subscription registry, the delivery channels and the two event
//! routers, and supervises the broker consumers. Everything is created in
//! [`NotificationManager::new`] and dropped with the manager.

use crate::broker::BrokerConnection;
use crate::channels::{
    DisabledEmail, DisabledPush, EmailChannel, EmailDelivery, PushChannel, PushDelivery,
    WebPushTransport,
};
use crate::config::NotificationConfig;
use crate::error::{NotificationError, Result};
use crate::metrics::NotificationMetrics;
use crate::registry::{InMemorySubscriptionStore, PushSubscription, SubscriptionStore};
use crate::router::{EventRouter, HandlerTable};
use crate::templates::TemplateRenderer;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use validator::Validate;

/// Main notification manager that coordinates all notification operations
pub struct NotificationManager {
    config: NotificationConfig,
    registry: Arc<dyn SubscriptionStore>,
    metrics: NotificationMetrics,
    user_router: EventRouter,
    article_router: EventRouter,
    broker_connected: AtomicBool,
    started_at: DateTime<Utc>,
}

impl NotificationManager {
    /// Create a manager with an in-memory registry and the channels the
    /// configuration enables
    pub fn new(config: NotificationConfig) -> Result<Self> {
        info!("Initializing notification manager");

        // Validate configuration
        config.validate().map_err(NotificationError::config)?;

        let metrics = NotificationMetrics::new(&config.metrics)?;
        let registry: Arc<dyn SubscriptionStore> = Arc::new(InMemorySubscriptionStore::new());

        let email: Arc<dyn EmailDelivery> = if config.email.enabled {
            let renderer = Arc::new(TemplateRenderer::new()?);
            Arc::new(EmailChannel::new(&config.email, renderer, metrics.clone())?)
        } else {
            warn!("Email channel disabled");
            Arc::new(DisabledEmail)
        };

        let push: Arc<dyn PushDelivery> = if config.push.enabled {
            let transport = Arc::new(WebPushTransport::new(&config.push)?);
            Arc::new(PushChannel::new(
                &config.push,
                registry.clone(),
                transport,
                metrics.clone(),
            ))
        } else {
            warn!("Push channel disabled, VAPID keys not configured");
            Arc::new(DisabledPush)
        };

        let manager = Self::with_channels(config, registry, email, push, metrics);
        info!("Notification manager initialized successfully");
        Ok(manager)
    }

    /// Assemble a manager from prebuilt parts
    pub fn with_channels(
        config: NotificationConfig,
        registry: Arc<dyn SubscriptionStore>,
        email: Arc<dyn EmailDelivery>,
        push: Arc<dyn PushDelivery>,
        metrics: NotificationMetrics,
    ) -> Self {
        let user_router = EventRouter::new(
            config.broker.user_events.queue.clone(),
            HandlerTable::user_events(email, push.clone()),
            metrics.clone(),
        );
        let article_router = EventRouter::new(
            config.broker.article_events.queue.clone(),
            HandlerTable::article_events(push),
            metrics.clone(),
        );

        Self {
            config,
            registry,
            metrics,
            user_router,
            article_router,
            broker_connected: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn SubscriptionStore> {
        &self.registry
    }

    pub fn metrics(&self) -> &NotificationMetrics {
        &self.metrics
    }

    pub fn user_router(&self) -> &EventRouter {
        &self.user_router
    }

    pub fn article_router(&self) -> &EventRouter {
        &self.article_router
    }

    pub fn vapid_public_key(&self) -> &str {
        &self.config.push.vapid_public_key
    }

    /// Register a push subscription for `user_id`
    pub async fn subscribe(&self, user_id: &str, subscription: PushSubscription) -> Result<()> {
        subscription.validate()?;

        info!(user_id, endpoint = %subscription.endpoint, "Adding push subscription");
        self.registry.add(user_id, subscription).await;
        self.metrics.set_subscriptions(self.registry.len().await);
        Ok(())
    }

    /// Remove a push subscription. Unknown users and endpoints are not an error.
    pub async fn unsubscribe(&self, user_id: &str, endpoint: &str) -> Result<bool> {
        if endpoint.is_empty() {
            return Err(NotificationError::validation("endpoint", "Endpoint required"));
        }

        let removed = self.registry.remove(user_id, endpoint).await;
        info!(user_id, endpoint, removed, "Removing push subscription");
        self.metrics.set_subscriptions(self.registry.len().await);
        Ok(removed)
    }

    /// Service health summary
    pub async fn health_check(&self) -> serde_json::Value {
        json!({
            "status": "OK",
            "service": "Notification Service",
            "timestamp": Utc::now().to_rfc3339(),
            "uptimeSeconds": (Utc::now() - self.started_at).num_seconds(),
            "broker": {
                "connected": self.broker_connected.load(Ordering::Relaxed),
            },
            "subscriptions": self.registry.len().await,
            "channels": {
                "email": self.config.email.enabled,
                "push": self.config.push.enabled,
            },
        })
    }

    /// Run the consumers until `cancel` fires, reconnecting whenever the
    /// broker connection is lost
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Starting event consumers");

        let mut lost = false;
        loop {
            let connected = if lost {
                BrokerConnection::reconnect(&self.config.broker, &cancel, &self.metrics).await
            } else {
                BrokerConnection::connect(&self.config.broker, &cancel, &self.metrics).await
            };
            let Some(broker) = connected else {
                break;
            };

            self.broker_connected.store(true, Ordering::Relaxed);
            let result = self.consume(&broker, &cancel).await;
            self.broker_connected.store(false, Ordering::Relaxed);
            broker.close().await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_seconds = self.config.broker.reconnect_delay_seconds,
                        "Lost RabbitMQ connection"
                    );
                    lost = true;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                    }
                }
            }
        }

        info!("Event consumers stopped");
    }

    async fn consume(&self, broker: &BrokerConnection, cancel: &CancellationToken) -> Result<()> {
        let user_events = &self.config.broker.user_events;
        let article_events = &self.config.broker.article_events;

        broker.bind_queue(user_events).await?;
        broker.bind_queue(article_events).await?;

        let user_consumer = broker.consume(&user_events.queue).await?;
        let article_consumer = broker.consume(&article_events.queue).await?;
        info!("Event listeners setup complete");

        tokio::try_join!(
            self.user_router.consume(user_consumer, cancel),
            self.article_router.consume(article_consumer, cancel),
        )?;
        Ok(())
    }
}

//! RabbitMQ connection management
//!
//! [`BrokerConnection::connect`] keeps trying until it gets a connection,
//! waiting a fixed delay between attempts. There is no backoff growth and no
//! distinction between transient and permanent failures. One channel is
//! shared by the queue consumers and the [`EventPublisher`].

use crate::config::{BrokerConfig, QueueBindingConfig};
use crate::error::{NotificationError, Result};
use crate::metrics::NotificationMetrics;
use chrono::Utc;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use newsroom_shared::EventEnvelope;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// AMQP delivery mode for messages that survive a broker restart
const PERSISTENT: u8 = 2;

/// An open connection with the channel everything runs on
pub struct BrokerConnection {
    connection: Connection,
    channel: Channel,
}

impl BrokerConnection {
    /// Connect, retrying forever with a fixed delay.
    ///
    /// Returns `None` only when `cancel` fires first.
    pub async fn connect(
        config: &BrokerConfig,
        cancel: &CancellationToken,
        metrics: &NotificationMetrics,
    ) -> Option<Self> {
        Self::connect_loop(config, cancel, metrics, false).await
    }

    /// Like [`connect`](Self::connect) after an established connection was
    /// lost, so every attempt counts as a reconnect.
    pub async fn reconnect(
        config: &BrokerConfig,
        cancel: &CancellationToken,
        metrics: &NotificationMetrics,
    ) -> Option<Self> {
        Self::connect_loop(config, cancel, metrics, true).await
    }

    async fn connect_loop(
        config: &BrokerConfig,
        cancel: &CancellationToken,
        metrics: &NotificationMetrics,
        lost: bool,
    ) -> Option<Self> {
        let delay = Duration::from_secs(config.reconnect_delay_seconds);
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            if lost || attempt > 1 {
                metrics.record_reconnect();
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = Self::try_connect(config) => result,
            };

            match result {
                Ok(broker) => {
                    info!(attempt, "RabbitMQ connected");
                    return Some(broker);
                }
                Err(e) => {
                    error!(
                        attempt,
                        error = %e,
                        retry_in_seconds = delay.as_secs(),
                        "RabbitMQ connection failed"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// A single connection attempt: connect, open the channel, declare exchanges
    pub async fn try_connect(config: &BrokerConfig) -> Result<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await?;

        let broker = Self {
            connection,
            channel,
        };

        let exchanges: BTreeSet<&str> = [&config.user_events, &config.article_events]
            .into_iter()
            .map(|binding| binding.exchange.as_str())
            .collect();
        for exchange in exchanges {
            broker.declare_exchange(exchange).await?;
        }

        Ok(broker)
    }

    /// Declare a durable topic exchange
    pub async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                NotificationError::broker(format!("Failed to declare exchange {}: {}", exchange, e))
            })?;

        debug!(exchange, "Exchange declared");
        Ok(())
    }

    /// Declare a durable queue and bind it with every pattern
    pub async fn bind_queue(&self, binding: &QueueBindingConfig) -> Result<()> {
        self.channel
            .queue_declare(
                &binding.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                NotificationError::broker(format!(
                    "Failed to declare queue {}: {}",
                    binding.queue, e
                ))
            })?;

        for pattern in &binding.patterns {
            self.channel
                .queue_bind(
                    &binding.queue,
                    &binding.exchange,
                    pattern,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    NotificationError::broker(format!(
                        "Failed to bind queue {} to {} with {}: {}",
                        binding.queue, binding.exchange, pattern, e
                    ))
                })?;
        }

        info!(
            queue = %binding.queue,
            exchange = %binding.exchange,
            patterns = ?binding.patterns,
            "Queue bound"
        );
        Ok(())
    }

    /// Start a manually acknowledged consumer on `queue`
    pub async fn consume(&self, queue: &str) -> Result<Consumer> {
        let consumer_tag = format!("notification-service-{}", uuid::Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer)
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher::new(self.channel.clone())
    }

    /// Close channel and connection, logging instead of failing
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "shutdown").await {
            debug!(error = %e, "Channel close failed");
        }
        if let Err(e) = self.connection.close(200, "shutdown").await {
            debug!(error = %e, "Connection close failed");
        }
        info!("RabbitMQ connection closed");
    }
}

/// Publishes domain events the way producer services do
#[derive(Clone)]
pub struct EventPublisher {
    channel: Channel,
}

impl EventPublisher {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Publish `payload` with a `timestamp` merged in, as a persistent JSON message
    pub async fn publish(&self, exchange: &str, routing_key: &str, payload: Value) -> Result<()> {
        let body = EventEnvelope::encode_body(payload, Utc::now())?;

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        debug!(exchange, routing_key, "Event published");
        Ok(())
    }
}

//! Event routing
//!
//! Every consumed message goes through `received -> parsed -> dispatched`
//! and ends either acknowledged or rejected without requeue:
//!
//! - a body that is not valid JSON is rejected and no handler runs
//! - a routing key missing from the queue's table is logged and acknowledged,
//!   whatever JSON value the body holds
//! - a handled key whose body is not a JSON object is rejected
//! - a handler error rejects the message
//! - anything else is acknowledged
//!
//! Nothing is retried here. A rejected message is gone.

use crate::error::{NotificationError, Result};
use crate::metrics::{EventOutcome, NotificationMetrics};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::Consumer;
use newsroom_shared::EventEnvelope;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Terminal state of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Reject without requeue
    Reject,
}

/// Reacts to one type of event
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;
}

/// Routing key to handler, fixed once the service is built
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: BTreeMap<String, Arc<dyn EventHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, routing_key: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(routing_key.into(), handler);
        self
    }

    pub fn get(&self, routing_key: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(routing_key)
    }

    /// Handled routing keys in sorted order
    pub fn routing_keys(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Dispatches the messages of one queue to its handler table
pub struct EventRouter {
    queue: String,
    table: HandlerTable,
    metrics: NotificationMetrics,
}

impl EventRouter {
    pub fn new(queue: impl Into<String>, table: HandlerTable, metrics: NotificationMetrics) -> Self {
        Self {
            queue: queue.into(),
            table,
            metrics,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    /// Decide the fate of one message
    pub async fn dispatch(&self, routing_key: &str, body: &[u8]) -> Disposition {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                error!(queue = %self.queue, routing_key, error = %e, "Rejecting unparsable event");
                self.metrics.record_event(&self.queue, EventOutcome::Rejected);
                return Disposition::Reject;
            }
        };

        let Some(handler) = self.table.get(routing_key) else {
            info!(queue = %self.queue, routing_key, "Unhandled event");
            self.metrics.record_event(&self.queue, EventOutcome::Unhandled);
            return Disposition::Ack;
        };

        let event = match EventEnvelope::from_value(routing_key, value) {
            Ok(event) => event,
            Err(e) => {
                error!(queue = %self.queue, routing_key, error = %e, "Rejecting event with unusable payload");
                self.metrics.record_event(&self.queue, EventOutcome::Rejected);
                return Disposition::Reject;
            }
        };

        debug!(queue = %self.queue, routing_key, "Dispatching event");
        let timer = self.metrics.start_timer();
        let result = handler.handle(&event).await;
        self.metrics.record_handler_duration(routing_key, timer);

        match result {
            Ok(()) => {
                self.metrics.record_event(&self.queue, EventOutcome::Acked);
                Disposition::Ack
            }
            Err(e) => {
                error!(queue = %self.queue, routing_key, error = %e, "Event handler failed, rejecting");
                self.metrics.record_event(&self.queue, EventOutcome::Rejected);
                Disposition::Reject
            }
        }
    }

    /// Consume until cancelled. Returns an error when the consumer stream
    /// breaks, which means the connection has to be re-established.
    pub async fn consume(&self, mut consumer: Consumer, cancel: &CancellationToken) -> Result<()> {
        info!(queue = %self.queue, handlers = ?self.table.routing_keys(), "Consuming events");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(queue = %self.queue, "Consumer stopped");
                    return Ok(());
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        let disposition = self
                            .dispatch(delivery.routing_key.as_str(), &delivery.data)
                            .await;
                        settle(&delivery, disposition).await?;
                    }
                    Some(Err(e)) => {
                        warn!(queue = %self.queue, error = %e, "Consumer error");
                        return Err(e.into());
                    }
                    None => {
                        warn!(queue = %self.queue, "Consumer stream closed");
                        return Err(NotificationError::broker(format!(
                            "consumer for {} closed",
                            self.queue
                        )));
                    }
                }
            }
        }
    }
}

async fn settle(delivery: &Delivery, disposition: Disposition) -> Result<()> {
    match disposition {
        Disposition::Ack => {
            delivery.acker.ack(BasicAckOptions::default()).await?;
        }
        Disposition::Reject => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: false,
                    multiple: false,
                })
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use pretty_assertions::assert_eq;

    fn metrics() -> NotificationMetrics {
        NotificationMetrics::new(&MetricsConfig {
            enabled: true,
            endpoint: "/metrics".to_string(),
            namespace: "router_test".to_string(),
        })
        .unwrap()
    }

    fn router_with(routing_key: &str, handler: MockEventHandler) -> EventRouter {
        let table = HandlerTable::new().register(routing_key, Arc::new(handler));
        EventRouter::new("test.queue", table, metrics())
    }

    #[tokio::test]
    async fn test_unparsable_body_rejects_without_calling_handler() {
        let mut handler = MockEventHandler::new();
        handler.expect_handle().never();
        let router = router_with("user.registered", handler);

        assert_eq!(
            router.dispatch("user.registered", b"{not json").await,
            Disposition::Reject
        );
        assert_eq!(
            router.dispatch("user.registered", b"\"a string\"").await,
            Disposition::Reject
        );
        assert_eq!(
            router.metrics.event_count("test.queue", EventOutcome::Rejected),
            2
        );
    }

    #[tokio::test]
    async fn test_unknown_routing_key_acks() {
        let mut handler = MockEventHandler::new();
        handler.expect_handle().never();
        let router = router_with("user.registered", handler);

        assert_eq!(
            router.dispatch("user.login", br#"{"userId":"u1"}"#).await,
            Disposition::Ack
        );
        assert_eq!(
            router.metrics.event_count("test.queue", EventOutcome::Unhandled),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_routing_key_acks_any_json_value() {
        let mut handler = MockEventHandler::new();
        handler.expect_handle().never();
        let router = router_with("user.registered", handler);

        assert_eq!(router.dispatch("user.login", b"[1,2]").await, Disposition::Ack);
        assert_eq!(router.dispatch("user.login", b"\"hello\"").await, Disposition::Ack);
        assert_eq!(router.dispatch("user.login", b"not json").await, Disposition::Reject);
        assert_eq!(
            router.metrics.event_count("test.queue", EventOutcome::Unhandled),
            2
        );
    }

    #[tokio::test]
    async fn test_handler_error_rejects() {
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|event| Err(NotificationError::handler(event.routing_key.clone(), "boom")));
        let router = router_with("article.liked", handler);

        assert_eq!(
            router.dispatch("article.liked", br#"{"articleId":"a1"}"#).await,
            Disposition::Reject
        );
    }

    #[tokio::test]
    async fn test_handler_success_acks_with_parsed_event() {
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle()
            .withf(|event| {
                event.routing_key == "article.liked" && event.payload["articleId"] == "a1"
            })
            .times(1)
            .returning(|_| Ok(()));
        let router = router_with("article.liked", handler);

        assert_eq!(
            router.dispatch("article.liked", br#"{"articleId":"a1"}"#).await,
            Disposition::Ack
        );
        assert_eq!(
            router.metrics.event_count("test.queue", EventOutcome::Acked),
            1
        );
    }

    #[test]
    fn test_routing_keys_are_sorted() {
        let table = HandlerTable::new()
            .register("b.key", Arc::new(MockEventHandler::new()))
            .register("a.key", Arc::new(MockEventHandler::new()));
        assert_eq!(table.routing_keys(), vec!["a.key", "b.key"]);
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
    }
}

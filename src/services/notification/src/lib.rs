//! # Notification Service
//!
//! Event-driven notification fan-out for the Newsroom platform:
//! - Consumes user and article domain events from RabbitMQ topic exchanges
//! - Sends transactional email over SMTP from built-in templates
//! - Sends Web Push notifications to registered browser subscriptions
//! - Exposes a small HTTP API for managing push subscriptions
//!
//! ## Flow
//!
//! ```text
//! broker -> EventRouter -> EventHandler -> EmailDelivery / PushDelivery
//!                                              |
//!                                   SubscriptionStore (push recipients)
//! ```
//!
//! Each queue has its own [`router::EventRouter`] with a fixed
//! [`router::HandlerTable`]. Messages are acknowledged once their handler
//! returns and rejected without requeue when the body cannot be parsed or the
//! handler fails. Delivery failures are logged and never reject a message.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use notification_service::{NotificationConfig, NotificationManager};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NotificationConfig::from_env()?;
//!     let manager = NotificationManager::new(config)?;
//!
//!     let cancel = CancellationToken::new();
//!     manager.run(cancel).await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod routes;
pub mod templates;

pub use broker::{BrokerConnection, EventPublisher};
pub use config::NotificationConfig;
pub use error::{NotificationError, Result};
pub use manager::NotificationManager;
pub use registry::{InMemorySubscriptionStore, PushSubscription, SubscriptionStore};
pub use router::{Disposition, EventRouter, HandlerTable};

// Re-export shared types for convenience
pub use newsroom_shared::{exchanges, queues, routing_keys, EventEnvelope};

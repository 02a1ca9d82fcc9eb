//! Configuration module for the notification service
//!
//! Defaults read the well-known environment variables of the platform
//! (`RABBITMQ_URL`, `SMTP_*`, `VAPID_*`). `from_env` layers
//! `NOTIFICATION__SECTION__KEY` overrides and an optional config file on top.

use newsroom_shared::{exchanges, queues};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the notification service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Message broker configuration
    pub broker: BrokerConfig,

    /// Email configuration
    pub email: EmailConfig,

    /// Push notification configuration
    pub push: PushConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    /// Fixed delay between connection attempts
    pub reconnect_delay_seconds: u64,
    pub prefetch_count: u16,
    pub user_events: QueueBindingConfig,
    pub article_events: QueueBindingConfig,
}

/// One durable queue and the topic patterns binding it to an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueBindingConfig {
    pub queue: String,
    pub exchange: String,
    pub patterns: Vec<String>,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,
    pub smtp_use_starttls: bool,
    pub from_email: String,
    pub from_name: String,
    pub timeout_seconds: u64,
}

/// Push notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub enabled: bool,
    pub vapid_subject: String,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    pub ttl_seconds: u32,
    pub icon: String,
    pub badge: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub namespace: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: std::env::var("PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(3006),
            timeout_seconds: 30,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("RABBITMQ_URL")
                .unwrap_or_else(|_| "amqp://localhost:5672".to_string()),
            reconnect_delay_seconds: 5,
            prefetch_count: 10,
            user_events: QueueBindingConfig {
                queue: queues::NOTIFICATION_USER_EVENTS.to_string(),
                exchange: exchanges::USER_EVENTS.to_string(),
                patterns: vec!["user.#".to_string()],
            },
            article_events: QueueBindingConfig {
                queue: queues::NOTIFICATION_ARTICLE_EVENTS.to_string(),
                exchange: exchanges::ARTICLE_EVENTS.to_string(),
                patterns: vec!["article.#".to_string(), "comment.#".to_string()],
            },
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        let smtp_username = std::env::var("SMTP_USER").unwrap_or_default();
        let from_email = std::env::var("SMTP_FROM").unwrap_or_else(|_| {
            if smtp_username.is_empty() {
                "noreply@newsroom.local".to_string()
            } else {
                smtp_username.clone()
            }
        });

        Self {
            enabled: true,
            smtp_host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .unwrap_or(587),
            smtp_username,
            smtp_password: std::env::var("SMTP_PASS").unwrap_or_default(),
            smtp_use_tls: false,
            smtp_use_starttls: true,
            from_email,
            from_name: "News Website".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        let vapid_public_key = std::env::var("VAPID_PUBLIC_KEY").unwrap_or_default();
        let vapid_private_key = std::env::var("VAPID_PRIVATE_KEY").unwrap_or_default();

        Self {
            // Enabled only once a key pair is provisioned
            enabled: !vapid_public_key.is_empty() && !vapid_private_key.is_empty(),
            vapid_subject: std::env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:admin@newsroom.local".to_string()),
            vapid_public_key,
            vapid_private_key,
            ttl_seconds: 2_419_200,
            icon: "/icon-192x192.png".to_string(),
            badge: "/badge-72x72.png".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
            namespace: "notification_service".to_string(),
        }
    }
}

impl NotificationConfig {
    /// Load configuration from environment variables and config file
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = config::Config::builder();

        // Start with default configuration
        cfg = cfg.add_source(config::Config::try_from(&NotificationConfig::default())?);

        // Add environment variables with prefix
        cfg = cfg.add_source(
            config::Environment::with_prefix("NOTIFICATION")
                .separator("__")
                .try_parsing(true),
        );

        // Add config file if it exists
        if let Ok(config_file) = std::env::var("NOTIFICATION_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_file).required(false));
        }

        cfg.build()?.try_deserialize()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if !self.broker.url.starts_with("amqp://") && !self.broker.url.starts_with("amqps://") {
            return Err(format!(
                "Broker URL must use the amqp:// or amqps:// scheme, got {}",
                self.broker.url
            ));
        }

        if self.broker.reconnect_delay_seconds == 0 {
            return Err("Broker reconnect delay must be greater than 0".to_string());
        }

        for binding in [&self.broker.user_events, &self.broker.article_events] {
            if binding.queue.is_empty() || binding.exchange.is_empty() {
                return Err("Queue bindings need both a queue and an exchange".to_string());
            }
            if binding.patterns.is_empty() {
                return Err(format!(
                    "Queue {} must be bound with at least one pattern",
                    binding.queue
                ));
            }
        }

        if self.email.enabled {
            if self.email.smtp_host.is_empty() {
                return Err("SMTP host is required when email is enabled".to_string());
            }
            if self.email.from_email.is_empty() {
                return Err("From email is required when email is enabled".to_string());
            }
        }

        if self.push.enabled {
            if self.push.vapid_public_key.is_empty() || self.push.vapid_private_key.is_empty() {
                return Err("VAPID keys are required for web push notifications".to_string());
            }
            if self.push.vapid_subject.is_empty() {
                return Err("VAPID subject is required for web push notifications".to_string());
            }
        }

        Ok(())
    }

    /// Delay between broker connection attempts
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.broker.reconnect_delay_seconds)
    }

    /// Get timeout duration for the specified operation
    pub fn get_timeout(&self, operation: &str) -> Duration {
        let seconds = match operation {
            "email" => self.email.timeout_seconds,
            "server" => self.server.timeout_seconds,
            _ => 30,
        };
        Duration::from_secs(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_config() {
        std::env::remove_var("PORT");
        let config = NotificationConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3006);
        assert_eq!(config.broker.reconnect_delay_seconds, 5);
        assert_eq!(config.broker.user_events.patterns, vec!["user.#"]);
        assert_eq!(
            config.broker.article_events.patterns,
            vec!["article.#", "comment.#"]
        );
        assert_eq!(config.email.from_name, "News Website");
        assert!(config.email.enabled);
    }

    #[test]
    #[serial]
    fn test_default_patterns_deliver_every_handled_key() {
        use newsroom_shared::routing_keys::*;
        use newsroom_shared::topology::topic_matches;

        let config = NotificationConfig::default();
        let delivered = |binding: &QueueBindingConfig, key: &str| {
            binding
                .patterns
                .iter()
                .any(|pattern| topic_matches(pattern, key))
        };

        for key in [USER_REGISTERED, USER_EMAIL_VERIFIED, USER_REPORTER_FOLLOWED] {
            assert!(delivered(&config.broker.user_events, key), "{}", key);
        }
        for key in [ARTICLE_PUBLISHED, ARTICLE_LIKED, COMMENT_CREATED] {
            assert!(delivered(&config.broker.article_events, key), "{}", key);
        }

        // Single-word wildcards would miss these
        assert!(!topic_matches("user.*", USER_EMAIL_VERIFIED));
        assert!(!topic_matches("article.*", COMMENT_CREATED));
    }

    #[test]
    #[serial]
    fn test_push_enabled_only_with_keys() {
        std::env::remove_var("VAPID_PUBLIC_KEY");
        std::env::remove_var("VAPID_PRIVATE_KEY");
        assert!(!PushConfig::default().enabled);

        std::env::set_var("VAPID_PUBLIC_KEY", "public");
        std::env::set_var("VAPID_PRIVATE_KEY", "private");
        assert!(PushConfig::default().enabled);

        std::env::remove_var("VAPID_PUBLIC_KEY");
        std::env::remove_var("VAPID_PRIVATE_KEY");
    }

    #[test]
    #[serial]
    fn test_smtp_user_is_default_sender() {
        std::env::remove_var("SMTP_FROM");
        std::env::set_var("SMTP_USER", "news@example.com");
        assert_eq!(EmailConfig::default().from_email, "news@example.com");
        std::env::remove_var("SMTP_USER");
    }

    #[test]
    #[serial]
    fn test_config_validation() {
        let config = NotificationConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.server.port = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.broker.url = "http://localhost:5672".to_string();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.broker.article_events.patterns.clear();
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config;
        invalid_config.push.enabled = true;
        invalid_config.push.vapid_private_key.clear();
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("NOTIFICATION__SERVER__PORT", "4100");
        std::env::set_var("NOTIFICATION__BROKER__PREFETCH_COUNT", "3");
        let config = NotificationConfig::from_env().unwrap();
        std::env::remove_var("NOTIFICATION__SERVER__PORT");
        std::env::remove_var("NOTIFICATION__BROKER__PREFETCH_COUNT");

        assert_eq!(config.server.port, 4100);
        assert_eq!(config.broker.prefetch_count, 3);
    }

    #[test]
    fn test_timeout_getter() {
        let config = NotificationConfig::default();
        assert_eq!(config.get_timeout("email"), Duration::from_secs(30));
        assert_eq!(config.get_timeout("unknown"), Duration::from_secs(30));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
    }
}

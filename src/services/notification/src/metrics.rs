//! Metrics collection module for the notification service
//!
//! Counters cover the three stages of the pipeline: router outcomes per
//! queue, email sends per template, and push sends per outcome. The
//! collector is cheap to clone and every clone feeds the same registry.

use crate::config::MetricsConfig;
use crate::error::{NotificationError, Result};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Outcome label for a consumed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Acked,
    Rejected,
    Unhandled,
}

impl EventOutcome {
    fn as_label(self) -> &'static str {
        match self {
            EventOutcome::Acked => "acked",
            EventOutcome::Rejected => "rejected",
            EventOutcome::Unhandled => "unhandled",
        }
    }
}

/// Metrics collector for the notification service
#[derive(Clone)]
pub struct NotificationMetrics {
    registry: Arc<Registry>,

    events_total: IntCounterVec,
    handler_duration: HistogramVec,
    emails_total: IntCounterVec,
    push_sends_total: IntCounterVec,
    broker_reconnects_total: IntCounter,
    subscriptions: IntGauge,
}

impl NotificationMetrics {
    /// Create a new metrics collector
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        info!("Initializing notification metrics");

        let registry = Registry::new();
        let namespace = config.namespace.as_str();

        let events_total = IntCounterVec::new(
            Opts::new("events_total", "Consumed broker messages by outcome").namespace(namespace),
            &["queue", "outcome"],
        )?;

        let handler_duration = HistogramVec::new(
            HistogramOpts::new(
                "handler_duration_seconds",
                "Time spent in event handlers",
            )
            .namespace(namespace)
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["routing_key"],
        )?;

        let emails_total = IntCounterVec::new(
            Opts::new("emails_total", "Email sends by template and status").namespace(namespace),
            &["template", "status"],
        )?;

        let push_sends_total = IntCounterVec::new(
            Opts::new("push_sends_total", "Web Push sends by outcome").namespace(namespace),
            &["status"],
        )?;

        let broker_reconnects_total = IntCounter::with_opts(
            Opts::new(
                "broker_reconnects_total",
                "Broker connection attempts after the first",
            )
            .namespace(namespace),
        )?;

        let subscriptions = IntGauge::with_opts(
            Opts::new("push_subscriptions", "Registered push endpoints").namespace(namespace),
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(handler_duration.clone()))?;
        registry.register(Box::new(emails_total.clone()))?;
        registry.register(Box::new(push_sends_total.clone()))?;
        registry.register(Box::new(broker_reconnects_total.clone()))?;
        registry.register(Box::new(subscriptions.clone()))?;

        info!("Notification metrics initialized successfully");

        Ok(Self {
            registry: Arc::new(registry),
            events_total,
            handler_duration,
            emails_total,
            push_sends_total,
            broker_reconnects_total,
            subscriptions,
        })
    }

    pub fn record_event(&self, queue: &str, outcome: EventOutcome) {
        self.events_total
            .with_label_values(&[queue, outcome.as_label()])
            .inc();
    }

    pub fn record_handler_duration(&self, routing_key: &str, timer: MetricsTimer) {
        self.handler_duration
            .with_label_values(&[routing_key])
            .observe(timer.stop());
    }

    pub fn record_email(&self, template: &str, sent: bool) {
        let status = if sent { "sent" } else { "failed" };
        self.emails_total
            .with_label_values(&[template, status])
            .inc();
    }

    pub fn record_push(&self, delivered: usize, failed: usize, pruned: usize) {
        self.push_sends_total
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
        self.push_sends_total
            .with_label_values(&["failed"])
            .inc_by(failed as u64);
        self.push_sends_total
            .with_label_values(&["pruned"])
            .inc_by(pruned as u64);
    }

    pub fn record_reconnect(&self) {
        self.broker_reconnects_total.inc();
    }

    pub fn set_subscriptions(&self, count: usize) {
        self.subscriptions.set(count as i64);
    }

    /// Value of one `events_total` series
    pub fn event_count(&self, queue: &str, outcome: EventOutcome) -> u64 {
        self.events_total
            .with_label_values(&[queue, outcome.as_label()])
            .get()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.broker_reconnects_total.get()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| NotificationError::internal(format!("Failed to encode metrics: {}", e)))
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer {
            start_time: Instant::now(),
        }
    }
}

/// Timer for measuring operation duration
pub struct MetricsTimer {
    start_time: Instant,
}

impl MetricsTimer {
    /// Stop the timer and return the elapsed duration in seconds
    pub fn stop(self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

//! Routes module for the notification service
//!
//! - Push subscription management under `/api/v1/notifications`
//! - Health and metrics endpoints
//! - A JSON 404 for everything else

use crate::handlers::{health_handler, metrics_handler, not_found_handler, subscriptions_handler};
use crate::manager::NotificationManager;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

/// Build the main router for the notification service
pub fn create_router(notification_manager: Arc<NotificationManager>) -> Router {
    let timeout = notification_manager.config().get_timeout("server");
    let metrics_endpoint = notification_manager.config().metrics.endpoint.clone();

    let api_router = create_api_router(Arc::clone(&notification_manager));
    let health_router = create_health_router(notification_manager, &metrics_endpoint);

    // Main router with middleware
    Router::new()
        .merge(api_router)
        .merge(health_router)
        .fallback(not_found_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(timeout))
                .into_inner(),
        )
}

/// Create API routes for REST endpoints
fn create_api_router(notification_manager: Arc<NotificationManager>) -> Router {
    Router::new()
        .route(
            "/api/v1/notifications/subscribe",
            post(subscriptions_handler::subscribe),
        )
        .route(
            "/api/v1/notifications/unsubscribe",
            post(subscriptions_handler::unsubscribe),
        )
        .route(
            "/api/v1/notifications/vapid-public-key",
            get(subscriptions_handler::vapid_public_key),
        )
        .with_state(notification_manager)
}

/// Create health and metrics routes
fn create_health_router(
    notification_manager: Arc<NotificationManager>,
    metrics_endpoint: &str,
) -> Router {
    let router = Router::new().route("/health", get(health_handler));

    let router = if notification_manager.config().metrics.enabled {
        router.route(metrics_endpoint, get(metrics_handler))
    } else {
        router
    };

    router.with_state(notification_manager)
}

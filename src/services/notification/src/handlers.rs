//! Request handlers for the notification service
//!
//! The API gateway authenticates callers and forwards their identity in the
//! `x-user-id`, `x-user-role` and `x-user-email` headers. Handlers that act
//! on behalf of a user extract [`AuthUser`] and answer 401 without it.

use crate::error::{NotificationError, Result};
use crate::manager::NotificationManager;
use crate::registry::PushSubscription;

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Caller identity forwarded by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Option<String>,
    pub email: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = NotificationError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let id = header(USER_ID_HEADER)
            .ok_or_else(|| NotificationError::auth("User not authenticated"))?;

        Ok(Self {
            id,
            role: header(USER_ROLE_HEADER),
            email: header(USER_EMAIL_HEADER),
        })
    }
}

fn body_error(rejection: JsonRejection) -> NotificationError {
    NotificationError::validation("body", rejection.body_text())
}

pub mod subscriptions_handler {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct SubscribeRequest {
        pub subscription: PushSubscription,
    }

    #[derive(Debug, Deserialize)]
    pub struct UnsubscribeRequest {
        #[serde(default)]
        pub endpoint: String,
    }

    /// Register a push subscription for the caller
    pub async fn subscribe(
        State(manager): State<Arc<NotificationManager>>,
        user: AuthUser,
        payload: std::result::Result<Json<SubscribeRequest>, JsonRejection>,
    ) -> Result<impl IntoResponse> {
        let Json(request) = payload.map_err(body_error)?;
        info!(
            user_id = %user.id,
            role = user.role.as_deref().unwrap_or("unknown"),
            email = user.email.as_deref().unwrap_or("unknown"),
            endpoint = %request.subscription.endpoint,
            "Push subscription request"
        );

        match manager.subscribe(&user.id, request.subscription).await {
            Ok(()) => Ok(Json(json!({ "message": "Subscription added successfully" }))),
            Err(e) => {
                error!(user_id = %user.id, error = %e, "Failed to add subscription");
                Err(e)
            }
        }
    }

    /// Remove one of the caller's push subscriptions
    pub async fn unsubscribe(
        State(manager): State<Arc<NotificationManager>>,
        user: AuthUser,
        payload: std::result::Result<Json<UnsubscribeRequest>, JsonRejection>,
    ) -> Result<impl IntoResponse> {
        let Json(request) = payload.map_err(body_error)?;

        manager.unsubscribe(&user.id, &request.endpoint).await?;
        Ok(Json(json!({ "message": "Subscription removed successfully" })))
    }

    /// Public half of the VAPID key pair, needed by browsers to subscribe
    pub async fn vapid_public_key(
        State(manager): State<Arc<NotificationManager>>,
    ) -> impl IntoResponse {
        Json(json!({ "publicKey": manager.vapid_public_key() }))
    }
}

/// Health check handler
pub async fn health_handler(State(manager): State<Arc<NotificationManager>>) -> impl IntoResponse {
    Json(manager.health_check().await)
}

/// Prometheus text exposition
pub async fn metrics_handler(
    State(manager): State<Arc<NotificationManager>>,
) -> Result<impl IntoResponse> {
    let body = manager.metrics().export_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Fallback for unknown routes
pub async fn not_found_handler() -> impl IntoResponse {
    info!("Route not found");
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Route not found" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_auth_user_from_headers() {
        let mut parts = parts(&[
            (USER_ID_HEADER, "u1"),
            (USER_ROLE_HEADER, "reporter"),
            (USER_EMAIL_HEADER, "u1@example.com"),
        ]);

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(
            user,
            AuthUser {
                id: "u1".to_string(),
                role: Some("reporter".to_string()),
                email: Some("u1@example.com".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_or_blank_user_id_is_rejected() {
        let mut missing = parts(&[(USER_ROLE_HEADER, "reader")]);
        let err = AuthUser::from_request_parts(&mut missing, &())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let mut blank = parts(&[(USER_ID_HEADER, "  ")]);
        assert!(AuthUser::from_request_parts(&mut blank, &()).await.is_err());
    }
}

//! Error handling for the notification service
//!
//! One error type covers the broker, the delivery channels and the HTTP
//! surface. Delivery errors are caught at the call site and never reach the
//! router; everything else propagates with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use newsroom_shared::EventError;
use serde_json::json;
use thiserror::Error;

/// Result type alias for notification service operations
pub type Result<T> = std::result::Result<T, NotificationError>;

/// Main error type for the notification service
#[derive(Error, Debug)]
pub enum NotificationError {
    /// Broker connection, channel or topology errors
    #[error("Broker error: {message}")]
    Broker { message: String },

    /// Email delivery errors
    #[error("Email error: {message}")]
    Email { message: String },

    /// Push notification errors
    #[error("Push notification error: {message}")]
    Push { message: String },

    /// Template lookup or rendering errors
    #[error("Template error: {message}")]
    Template { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// Missing or unusable caller identity
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// An event handler could not process its event
    #[error("Handler error: {routing_key}: {message}")]
    Handler {
        routing_key: String,
        message: String,
    },

    /// Internal service errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NotificationError {
    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            NotificationError::Broker { .. } => StatusCode::SERVICE_UNAVAILABLE,
            NotificationError::Email { .. } => StatusCode::BAD_GATEWAY,
            NotificationError::Push { .. } => StatusCode::BAD_GATEWAY,
            NotificationError::Template { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            NotificationError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            NotificationError::Validation { .. } => StatusCode::BAD_REQUEST,
            NotificationError::Auth { .. } => StatusCode::UNAUTHORIZED,
            NotificationError::Serialization { .. } => StatusCode::BAD_REQUEST,
            NotificationError::Handler { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            NotificationError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            NotificationError::Broker { .. } => "BROKER_ERROR",
            NotificationError::Email { .. } => "EMAIL_ERROR",
            NotificationError::Push { .. } => "PUSH_ERROR",
            NotificationError::Template { .. } => "TEMPLATE_ERROR",
            NotificationError::Config { .. } => "CONFIG_ERROR",
            NotificationError::Validation { .. } => "VALIDATION_ERROR",
            NotificationError::Auth { .. } => "AUTH_ERROR",
            NotificationError::Serialization { .. } => "SERIALIZATION_ERROR",
            NotificationError::Handler { .. } => "HANDLER_ERROR",
            NotificationError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for NotificationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16()
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

// Conversion implementations for external error types

impl From<lapin::Error> for NotificationError {
    fn from(err: lapin::Error) -> Self {
        NotificationError::Broker {
            message: err.to_string(),
        }
    }
}

impl From<EventError> for NotificationError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Payload {
                routing_key,
                message,
            } => NotificationError::Handler {
                routing_key,
                message,
            },
            other => NotificationError::Serialization {
                message: other.to_string(),
            },
        }
    }
}

impl From<lettre::error::Error> for NotificationError {
    fn from(err: lettre::error::Error) -> Self {
        NotificationError::Email {
            message: err.to_string(),
        }
    }
}

impl From<lettre::address::AddressError> for NotificationError {
    fn from(err: lettre::address::AddressError) -> Self {
        NotificationError::Email {
            message: format!("Invalid address: {}", err),
        }
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotificationError::Email {
            message: err.to_string(),
        }
    }
}

impl From<web_push::WebPushError> for NotificationError {
    fn from(err: web_push::WebPushError) -> Self {
        NotificationError::Push {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template {
            message: err.to_string(),
        }
    }
}

impl From<handlebars::TemplateError> for NotificationError {
    fn from(err: handlebars::TemplateError) -> Self {
        NotificationError::Template {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for NotificationError {
    fn from(err: config::ConfigError) -> Self {
        NotificationError::Config {
            message: err.to_string(),
        }
    }
}

impl From<prometheus::Error> for NotificationError {
    fn from(err: prometheus::Error) -> Self {
        NotificationError::Internal {
            message: format!("Metrics error: {}", err),
        }
    }
}

impl From<validator::ValidationErrors> for NotificationError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_validation_messages(&err, "", &mut messages);
        messages.sort();

        NotificationError::Validation {
            field: "request".to_string(),
            message: messages.join("; "),
        }
    }
}

/// Flatten nested validation errors into `path: message` lines
fn collect_validation_messages(
    errors: &validator::ValidationErrors,
    prefix: &str,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| "Invalid value".to_string())
                    })
                    .collect();
                out.push(format!("{}: {}", path, messages.join(", ")));
            }
            ValidationErrorsKind::Struct(nested) => {
                collect_validation_messages(nested, &path, out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_messages(nested, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}

// Utility functions for creating specific error types

impl NotificationError {
    /// Create a broker error
    pub fn broker<S: Into<String>>(message: S) -> Self {
        Self::Broker {
            message: message.into(),
        }
    }

    /// Create an email error
    pub fn email<S: Into<String>>(message: S) -> Self {
        Self::Email {
            message: message.into(),
        }
    }

    /// Create a push notification error
    pub fn push<S: Into<String>>(message: S) -> Self {
        Self::Push {
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template<S: Into<String>>(message: S) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S1: Into<String>, S2: Into<String>>(field: S1, message: S2) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler<S1: Into<String>, S2: Into<String>>(routing_key: S1, message: S2) -> Self {
        Self::Handler {
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

//! Event schema definitions for the Newsroom platform
//!
//! Producers publish a flat JSON object of domain fields with a `timestamp`
//! merged in at publish time. The routing key travels out-of-band as message
//! metadata and is attached to the envelope by the consumer.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// =============================================================================
// Envelope
// =============================================================================

/// Errors raised while reading or writing event bodies
#[derive(Error, Debug)]
pub enum EventError {
    /// Body is not valid JSON
    #[error("Malformed event body: {0}")]
    Malformed(String),

    /// Body is valid JSON but not an object
    #[error("Event body must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Payload does not match the shape expected for its routing key
    #[error("Invalid payload for {routing_key}: {message}")]
    Payload {
        routing_key: String,
        message: String,
    },
}

/// A consumed event: routing key plus the decoded JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub routing_key: String,
    pub payload: Map<String, Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventEnvelope {
    pub fn new(routing_key: impl Into<String>, payload: Map<String, Value>) -> Self {
        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));

        Self {
            routing_key: routing_key.into(),
            payload,
            timestamp,
        }
    }

    /// Parse a raw message body. Anything but a JSON object is rejected.
    pub fn from_slice(routing_key: &str, body: &[u8]) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| EventError::Malformed(e.to_string()))?;
        Self::from_value(routing_key, value)
    }

    /// Wrap an already parsed body. Anything but a JSON object is rejected.
    pub fn from_value(routing_key: &str, value: Value) -> Result<Self, EventError> {
        match value {
            Value::Object(payload) => Ok(Self::new(routing_key, payload)),
            other => Err(EventError::NotAnObject(json_kind(&other))),
        }
    }

    /// Decode the payload into the typed shape for this routing key
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|e| {
            EventError::Payload {
                routing_key: self.routing_key.clone(),
                message: e.to_string(),
            }
        })
    }

    /// Build the wire body for a payload: its fields plus `timestamp`
    pub fn encode_body(payload: Value, published_at: DateTime<Utc>) -> Result<Vec<u8>, EventError> {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            other => return Err(EventError::NotAnObject(json_kind(&other))),
        };
        fields.insert(
            "timestamp".to_string(),
            Value::String(published_at.to_rfc3339()),
        );

        serde_json::to_vec(&Value::Object(fields)).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// User Events (user.events exchange)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// `user.registered`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    #[serde(default)]
    pub user_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

/// `user.email.verified`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailVerified {
    #[serde(default)]
    pub user_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

/// `user.reporter.followed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterFollowed {
    /// The follower
    #[serde(default)]
    pub user_id: Option<String>,
    pub reporter_id: String,
    #[serde(default)]
    pub reporter_name: Option<String>,
}

// =============================================================================
// Article Events (article.events exchange)
// =============================================================================

/// `article.published`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlePublished {
    pub article_id: String,
    pub author_id: String,
    pub title: String,
    #[serde(default)]
    pub is_breaking: bool,
    #[serde(default)]
    pub category: Option<String>,
}

/// `article.liked`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleLiked {
    pub article_id: String,
    pub author_id: String,
    /// The user who liked the article
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `comment.created`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCreated {
    pub article_id: String,
    pub author_id: String,
    pub comment_id: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl UserProfile {
    /// First name, or "User" when the profile carries none
    pub fn display_name(profile: Option<&UserProfile>) -> String {
        profile
            .and_then(|p| p.first_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("User")
            .to_string()
    }
}

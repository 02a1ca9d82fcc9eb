//! Notification dispatch handlers
//!
//! One handler per routing key. A handler decodes its typed payload, picks
//! recipients and content, and hands them to a delivery channel. Decoding
//! errors propagate so the router rejects the message; delivery errors are
//! logged here and never propagate.

use crate::channels::{EmailDelivery, EmailRequest, PushDelivery, PushNotification, PushTarget};
use crate::error::Result;
use crate::router::{EventHandler, HandlerTable};
use crate::templates::EmailTemplate;
use async_trait::async_trait;
use newsroom_shared::{
    routing_keys, ArticleLiked, ArticlePublished, CommentCreated, EmailVerified, EventEnvelope,
    ReporterFollowed, UserProfile, UserRegistered,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Topic every breaking news alert is sent to
pub const BREAKING_NEWS_TOPIC: &str = "breaking_news";

/// Topic of the followers of one reporter
pub fn reporter_topic(author_id: &str) -> String {
    format!("reporter_{}", author_id)
}

impl HandlerTable {
    /// Handlers bound to the user events queue
    pub fn user_events(email: Arc<dyn EmailDelivery>, push: Arc<dyn PushDelivery>) -> Self {
        HandlerTable::new()
            .register(
                routing_keys::USER_REGISTERED,
                Arc::new(UserRegisteredHandler {
                    email: email.clone(),
                }),
            )
            .register(
                routing_keys::USER_EMAIL_VERIFIED,
                Arc::new(EmailVerifiedHandler { email }),
            )
            .register(
                routing_keys::USER_REPORTER_FOLLOWED,
                Arc::new(ReporterFollowedHandler { push }),
            )
    }

    /// Handlers bound to the article events queue
    pub fn article_events(push: Arc<dyn PushDelivery>) -> Self {
        HandlerTable::new()
            .register(
                routing_keys::ARTICLE_PUBLISHED,
                Arc::new(ArticlePublishedHandler { push: push.clone() }),
            )
            .register(
                routing_keys::ARTICLE_LIKED,
                Arc::new(ArticleLikedHandler { push: push.clone() }),
            )
            .register(
                routing_keys::COMMENT_CREATED,
                Arc::new(CommentCreatedHandler { push }),
            )
    }
}

async fn deliver_email(email: &dyn EmailDelivery, request: EmailRequest, routing_key: &str) {
    let to = request.to.clone();
    let template = request.template;

    if let Err(e) = email.send_email(request).await {
        error!(routing_key, %to, %template, error = %e, "Email delivery failed");
    }
}

async fn deliver_push(
    push: &dyn PushDelivery,
    target: PushTarget,
    notification: PushNotification,
    routing_key: &str,
) {
    if let Err(e) = push.send_push(target, notification).await {
        error!(routing_key, error = %e, "Push delivery failed");
    }
}

// =============================================================================
// User Events
// =============================================================================

/// `user.registered`: welcome email
pub struct UserRegisteredHandler {
    email: Arc<dyn EmailDelivery>,
}

#[async_trait]
impl EventHandler for UserRegisteredHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let payload: UserRegistered = event.decode()?;
        info!(user_id = ?payload.user_id, "Sending welcome email");

        let request = EmailRequest {
            to: payload.email.clone(),
            template: EmailTemplate::Welcome,
            data: json!({
                "name": UserProfile::display_name(payload.profile.as_ref()),
                "email": payload.email,
            }),
        };
        deliver_email(self.email.as_ref(), request, &event.routing_key).await;
        Ok(())
    }
}

/// `user.email.verified`: confirmation email
pub struct EmailVerifiedHandler {
    email: Arc<dyn EmailDelivery>,
}

#[async_trait]
impl EventHandler for EmailVerifiedHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let payload: EmailVerified = event.decode()?;

        let request = EmailRequest {
            to: payload.email,
            template: EmailTemplate::EmailVerified,
            data: json!({ "name": UserProfile::display_name(payload.profile.as_ref()) }),
        };
        deliver_email(self.email.as_ref(), request, &event.routing_key).await;
        Ok(())
    }
}

/// `user.reporter.followed`: tell the reporter
pub struct ReporterFollowedHandler {
    push: Arc<dyn PushDelivery>,
}

#[async_trait]
impl EventHandler for ReporterFollowedHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let payload: ReporterFollowed = event.decode()?;

        let notification = PushNotification::new("New Follower", "You have a new follower!")
            .with_data("type", "follower")
            .with_data("followerId", payload.user_id);
        deliver_push(
            self.push.as_ref(),
            PushTarget::user(payload.reporter_id),
            notification,
            &event.routing_key,
        )
        .await;
        Ok(())
    }
}

// =============================================================================
// Article Events
// =============================================================================

/// `article.published`: reporter followers, plus everyone for breaking news
pub struct ArticlePublishedHandler {
    push: Arc<dyn PushDelivery>,
}

#[async_trait]
impl EventHandler for ArticlePublishedHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let payload: ArticlePublished = event.decode()?;

        let followers = PushNotification::new("New Article Published", payload.title.clone())
            .with_data("type", "article_published")
            .with_data("articleId", payload.article_id.clone())
            .with_data("authorId", payload.author_id.clone());
        deliver_push(
            self.push.as_ref(),
            PushTarget::topic(reporter_topic(&payload.author_id)),
            followers,
            &event.routing_key,
        )
        .await;

        if payload.is_breaking {
            let breaking = PushNotification::new("🚨 Breaking News", payload.title)
                .with_data("type", "breaking_news")
                .with_data("articleId", payload.article_id);
            deliver_push(
                self.push.as_ref(),
                PushTarget::topic(BREAKING_NEWS_TOPIC),
                breaking,
                &event.routing_key,
            )
            .await;
        }

        Ok(())
    }
}

/// `article.liked`: tell the author
pub struct ArticleLikedHandler {
    push: Arc<dyn PushDelivery>,
}

#[async_trait]
impl EventHandler for ArticleLikedHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let payload: ArticleLiked = event.decode()?;

        let notification = PushNotification::new("Article Liked", "Someone liked your article!")
            .with_data("type", "article_liked")
            .with_data("articleId", payload.article_id)
            .with_data("likerId", payload.user_id);
        deliver_push(
            self.push.as_ref(),
            PushTarget::user(payload.author_id),
            notification,
            &event.routing_key,
        )
        .await;
        Ok(())
    }
}

/// `comment.created`: tell the author
pub struct CommentCreatedHandler {
    push: Arc<dyn PushDelivery>,
}

#[async_trait]
impl EventHandler for CommentCreatedHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let payload: CommentCreated = event.decode()?;

        let notification = PushNotification::new("New Comment", "Someone commented on your article")
            .with_data("type", "comment_created")
            .with_data("articleId", payload.article_id)
            .with_data("commentId", payload.comment_id)
            .with_data("commenterId", payload.author_id.clone());
        deliver_push(
            self.push.as_ref(),
            PushTarget::user(payload.author_id),
            notification,
            &event.routing_key,
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{MockEmailDelivery, MockPushDelivery, PushReport};
    use crate::error::NotificationError;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn envelope(routing_key: &str, body: Value) -> EventEnvelope {
        EventEnvelope::from_slice(routing_key, body.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_tables_are_enumerable() {
        let email: Arc<dyn EmailDelivery> = Arc::new(MockEmailDelivery::new());
        let push: Arc<dyn PushDelivery> = Arc::new(MockPushDelivery::new());

        assert_eq!(
            HandlerTable::user_events(email, push.clone()).routing_keys(),
            vec![
                "user.email.verified",
                "user.registered",
                "user.reporter.followed"
            ]
        );
        assert_eq!(
            HandlerTable::article_events(push).routing_keys(),
            vec!["article.liked", "article.published", "comment.created"]
        );
    }

    #[tokio::test]
    async fn test_welcome_email_uses_first_name() {
        let mut email = MockEmailDelivery::new();
        email
            .expect_send_email()
            .withf(|request| {
                request.to == "x@y.com"
                    && request.template == EmailTemplate::Welcome
                    && request.data["name"] == "A"
                    && request.data["email"] == "x@y.com"
            })
            .times(1)
            .returning(|_| Ok(()));

        let handler = UserRegisteredHandler {
            email: Arc::new(email),
        };
        let event = envelope(
            "user.registered",
            json!({ "email": "x@y.com", "profile": { "firstName": "A" } }),
        );
        handler.handle(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_email_failure_is_swallowed() {
        let mut email = MockEmailDelivery::new();
        email
            .expect_send_email()
            .times(1)
            .returning(|_| Err(NotificationError::email("smtp down")));

        let handler = EmailVerifiedHandler {
            email: Arc::new(email),
        };
        let event = envelope("user.email.verified", json!({ "email": "x@y.com" }));
        assert!(handler.handle(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_email_is_handler_error() {
        let mut email = MockEmailDelivery::new();
        email.expect_send_email().never();

        let handler = UserRegisteredHandler {
            email: Arc::new(email),
        };
        let event = envelope("user.registered", json!({ "userId": "u1" }));
        let err = handler.handle(&event).await.unwrap_err();
        assert!(matches!(err, NotificationError::Handler { .. }));
    }

    #[tokio::test]
    async fn test_reporter_followed_targets_reporter() {
        let mut push = MockPushDelivery::new();
        push.expect_send_push()
            .withf(|target, notification| {
                *target == PushTarget::user("r1")
                    && notification.title == "New Follower"
                    && notification.data["followerId"] == "u2"
            })
            .times(1)
            .returning(|_, _| Ok(PushReport::default()));

        let handler = ReporterFollowedHandler {
            push: Arc::new(push),
        };
        let event = envelope(
            "user.reporter.followed",
            json!({ "userId": "u2", "reporterId": "r1" }),
        );
        handler.handle(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_reporter_followed_without_follower_still_notifies() {
        let mut push = MockPushDelivery::new();
        push.expect_send_push()
            .withf(|target, notification| {
                *target == PushTarget::user("r1") && notification.data["followerId"].is_null()
            })
            .times(1)
            .returning(|_, _| Ok(PushReport::default()));

        let handler = ReporterFollowedHandler {
            push: Arc::new(push),
        };
        let event = envelope("user.reporter.followed", json!({ "reporterId": "r1" }));
        handler.handle(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_article_published_without_breaking_sends_once() {
        let mut push = MockPushDelivery::new();
        push.expect_send_push()
            .withf(|target, _| *target == PushTarget::topic("reporter_u1"))
            .times(1)
            .returning(|_, _| Ok(PushReport::default()));

        let handler = ArticlePublishedHandler {
            push: Arc::new(push),
        };
        let event = envelope(
            "article.published",
            json!({ "articleId": "a1", "authorId": "u1", "title": "T" }),
        );
        handler.handle(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_article_published_push_failure_still_sends_breaking() {
        let mut push = MockPushDelivery::new();
        push.expect_send_push()
            .withf(|target, _| *target == PushTarget::topic("reporter_u1"))
            .times(1)
            .returning(|_, _| Err(NotificationError::push("boom")));
        push.expect_send_push()
            .withf(|target, notification| {
                *target == PushTarget::topic(BREAKING_NEWS_TOPIC)
                    && notification.title == "🚨 Breaking News"
                    && notification.data["type"] == "breaking_news"
            })
            .times(1)
            .returning(|_, _| Ok(PushReport::default()));

        let handler = ArticlePublishedHandler {
            push: Arc::new(push),
        };
        let event = envelope(
            "article.published",
            json!({ "articleId": "a1", "authorId": "u1", "title": "T", "isBreaking": true }),
        );
        handler.handle(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_article_liked_targets_author() {
        let mut push = MockPushDelivery::new();
        push.expect_send_push()
            .withf(|target, notification| {
                *target == PushTarget::user("u1")
                    && notification.data["likerId"] == "u7"
                    && notification.data["type"] == "article_liked"
            })
            .times(1)
            .returning(|_, _| Ok(PushReport::default()));

        let handler = ArticleLikedHandler {
            push: Arc::new(push),
        };
        let event = envelope(
            "article.liked",
            json!({ "articleId": "a1", "authorId": "u1", "userId": "u7" }),
        );
        handler.handle(&event).await.unwrap();
    }
}

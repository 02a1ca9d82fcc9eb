//! Broker topology shared by every Newsroom service
//!
//! Exchanges are durable topic exchanges. Routing keys are dot-delimited and
//! always start with the aggregate they describe (`user`, `article`,
//! `comment`).

/// Exchange names
pub mod exchanges {
    /// User lifecycle events published by the auth and user services
    pub const USER_EVENTS: &str = "user.events";
    /// Article and engagement events published by the article service
    pub const ARTICLE_EVENTS: &str = "article.events";

    /// Every exchange the notification service consumes from
    pub const ALL: [&str; 2] = [USER_EVENTS, ARTICLE_EVENTS];
}

/// Durable queues owned by the notification service
pub mod queues {
    pub const NOTIFICATION_USER_EVENTS: &str = "notification.user.events";
    pub const NOTIFICATION_ARTICLE_EVENTS: &str = "notification.article.events";
}

/// Routing keys emitted by producers
pub mod routing_keys {
    // user.events
    pub const USER_REGISTERED: &str = "user.registered";
    pub const USER_LOGIN: &str = "user.login";
    pub const USER_EMAIL_VERIFIED: &str = "user.email.verified";
    pub const USER_PASSWORD_RESET: &str = "user.password.reset";
    pub const USER_PROFILE_UPDATED: &str = "user.profile.updated";
    pub const USER_REPORTER_FOLLOWED: &str = "user.reporter.followed";
    pub const USER_REPORTER_UNFOLLOWED: &str = "user.reporter.unfollowed";

    // article.events
    pub const ARTICLE_CREATED: &str = "article.created";
    pub const ARTICLE_PUBLISHED: &str = "article.published";
    pub const ARTICLE_LIKED: &str = "article.liked";
    pub const ARTICLE_UNLIKED: &str = "article.unliked";
    pub const COMMENT_CREATED: &str = "comment.created";
    pub const COMMENT_DELETED: &str = "comment.deleted";
}

/// Check an AMQP topic binding pattern against a routing key.
///
/// `*` matches exactly one word and `#` matches zero or more words, the same
/// rules the broker applies when routing to a bound queue.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            // `#` swallows zero words, or one word and stays active
            matches_words(&pattern[1..], key)
                || (!key.is_empty() && matches_words(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => matches_words(&pattern[1..], &key[1..]),
        (Some(word), Some(key_word)) if word == key_word => {
            matches_words(&pattern[1..], &key[1..])
        }
        _ => false,
    }
}

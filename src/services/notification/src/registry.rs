//! Push subscription registry
//!
//! Maps a user identity to the push endpoints registered for it. The registry
//! is created at service start and dropped at shutdown; nothing is persisted.
//! An endpoint is owned by at most one user: re-adding it replaces the
//! existing entry and adding it for another user moves it.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use validator::Validate;

/// Encryption material the browser hands out with a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SubscriptionKeys {
    #[validate(length(min = 1, message = "p256dh key is required"))]
    pub p256dh: String,
    #[validate(length(min = 1, message = "auth secret is required"))]
    pub auth: String,
}

/// One push-capable device registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PushSubscription {
    #[validate(length(min = 1, message = "Endpoint required"))]
    pub endpoint: String,
    #[validate]
    pub keys: SubscriptionKeys,
    /// Topics this device opted into. Empty receives every topic.
    #[serde(default)]
    pub topics: Vec<String>,
}

impl PushSubscription {
    pub fn new(endpoint: impl Into<String>, p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys: SubscriptionKeys {
                p256dh: p256dh.into(),
                auth: auth.into(),
            },
            topics: Vec::new(),
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a send to `topic` should reach this subscription
    pub fn accepts_topic(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| t == topic)
    }
}

/// A subscription together with the user that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSubscription {
    pub user_id: String,
    pub subscription: PushSubscription,
}

/// Storage for push subscriptions.
///
/// Handlers and channels only see this trait so the in-memory store can be
/// replaced by a persistent one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Store `subscription` under `user_id`
    async fn add(&self, user_id: &str, subscription: PushSubscription);

    /// Remove every entry of `user_id` with this endpoint. Returns whether
    /// anything was removed.
    async fn remove(&self, user_id: &str, endpoint: &str) -> bool;

    async fn list_by_user(&self, user_id: &str) -> Vec<RegisteredSubscription>;

    async fn list_all(&self) -> Vec<RegisteredSubscription>;

    /// Subscriptions opted into `topic` plus every unfiltered subscription
    async fn list_by_topic(&self, topic: &str) -> Vec<RegisteredSubscription>;

    /// Number of registered endpoints
    async fn len(&self) -> usize;
}

#[derive(Default)]
struct RegistryState {
    /// user id -> subscriptions in registration order
    by_user: HashMap<String, Vec<PushSubscription>>,
    /// endpoint -> owning user id
    owners: HashMap<String, String>,
    /// topic -> endpoints opted into it
    by_topic: HashMap<String, BTreeSet<String>>,
    /// endpoints without a topic filter
    unfiltered: BTreeSet<String>,
}

impl RegistryState {
    fn detach(&mut self, user_id: &str, endpoint: &str) -> bool {
        let Some(subscriptions) = self.by_user.get_mut(user_id) else {
            return false;
        };

        let before = subscriptions.len();
        let mut removed_topics = Vec::new();
        subscriptions.retain(|s| {
            if s.endpoint == endpoint {
                removed_topics.extend(s.topics.iter().cloned());
                false
            } else {
                true
            }
        });
        let removed = subscriptions.len() != before;

        if subscriptions.is_empty() {
            self.by_user.remove(user_id);
        }

        if removed {
            self.owners.remove(endpoint);
            self.unfiltered.remove(endpoint);
            for topic in removed_topics {
                if let Some(endpoints) = self.by_topic.get_mut(&topic) {
                    endpoints.remove(endpoint);
                    if endpoints.is_empty() {
                        self.by_topic.remove(&topic);
                    }
                }
            }
        }

        removed
    }

    fn lookup(&self, endpoint: &str) -> Option<RegisteredSubscription> {
        let user_id = self.owners.get(endpoint)?;
        self.by_user
            .get(user_id)?
            .iter()
            .find(|s| s.endpoint == endpoint)
            .map(|s| RegisteredSubscription {
                user_id: user_id.clone(),
                subscription: s.clone(),
            })
    }
}

/// Process-local subscription store
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    state: RwLock<RegistryState>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn add(&self, user_id: &str, subscription: PushSubscription) {
        let mut state = self.state.write();

        if let Some(previous_owner) = state.owners.get(&subscription.endpoint).cloned() {
            state.detach(&previous_owner, &subscription.endpoint);
            if previous_owner != user_id {
                debug!(
                    endpoint = %subscription.endpoint,
                    from = %previous_owner,
                    to = %user_id,
                    "Moving push endpoint to new owner"
                );
            }
        }

        if subscription.topics.is_empty() {
            state.unfiltered.insert(subscription.endpoint.clone());
        } else {
            for topic in &subscription.topics {
                state
                    .by_topic
                    .entry(topic.clone())
                    .or_default()
                    .insert(subscription.endpoint.clone());
            }
        }

        state
            .owners
            .insert(subscription.endpoint.clone(), user_id.to_string());
        state
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .push(subscription);
    }

    async fn remove(&self, user_id: &str, endpoint: &str) -> bool {
        self.state.write().detach(user_id, endpoint)
    }

    async fn list_by_user(&self, user_id: &str) -> Vec<RegisteredSubscription> {
        let state = self.state.read();
        state
            .by_user
            .get(user_id)
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .map(|s| RegisteredSubscription {
                        user_id: user_id.to_string(),
                        subscription: s.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn list_all(&self) -> Vec<RegisteredSubscription> {
        let state = self.state.read();
        state
            .by_user
            .iter()
            .flat_map(|(user_id, subscriptions)| {
                subscriptions.iter().map(move |s| RegisteredSubscription {
                    user_id: user_id.clone(),
                    subscription: s.clone(),
                })
            })
            .collect()
    }

    async fn list_by_topic(&self, topic: &str) -> Vec<RegisteredSubscription> {
        let state = self.state.read();
        let topical = state.by_topic.get(topic).into_iter().flatten();

        state
            .unfiltered
            .iter()
            .chain(topical)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|endpoint| state.lookup(endpoint))
            .collect()
    }

    async fn len(&self) -> usize {
        self.state.read().owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn subscription(endpoint: &str) -> PushSubscription {
        PushSubscription::new(endpoint, "p256dh", "auth")
    }

    fn endpoints(list: &[RegisteredSubscription]) -> Vec<String> {
        let mut endpoints: Vec<_> = list
            .iter()
            .map(|r| r.subscription.endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    #[tokio::test]
    async fn test_add_and_list_by_user() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/1")).await;
        store.add("u1", subscription("https://push/2")).await;
        store.add("u2", subscription("https://push/3")).await;

        let listed = store.list_by_user("u1").await;
        assert_eq!(endpoints(&listed), vec!["https://push/1", "https://push/2"]);
        assert!(listed.iter().all(|r| r.user_id == "u1"));
        assert_eq!(store.len().await, 3);
        assert_eq!(store.list_all().await.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_add_keeps_one_entry() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/1")).await;
        store.add("u1", subscription("https://push/1")).await;

        assert_eq!(store.list_by_user("u1").await.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_re_adding_replaces_keys() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/1")).await;
        store
            .add("u1", PushSubscription::new("https://push/1", "rotated", "secret"))
            .await;

        let listed = store.list_by_user("u1").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subscription.keys.p256dh, "rotated");
    }

    #[tokio::test]
    async fn test_endpoint_migrates_between_users() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/shared")).await;
        store.add("u2", subscription("https://push/shared")).await;

        assert!(store.list_by_user("u1").await.is_empty());
        assert_eq!(store.list_by_user("u2").await.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_user_is_noop() {
        let store = InMemorySubscriptionStore::new();
        assert!(!store.remove("ghost", "https://push/1").await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_remove_only_matching_endpoint() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/1")).await;
        store.add("u1", subscription("https://push/2")).await;

        assert!(store.remove("u1", "https://push/1").await);
        assert_eq!(
            endpoints(&store.list_by_user("u1").await),
            vec!["https://push/2"]
        );
        assert!(!store.remove("u1", "https://push/1").await);
    }

    #[tokio::test]
    async fn test_remove_requires_owner() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/1")).await;

        assert!(!store.remove("u2", "https://push/1").await);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unfiltered_subscriptions_receive_every_topic() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/1")).await;
        store.add("u2", subscription("https://push/2")).await;

        let listed = store.list_by_topic("breaking_news").await;
        assert_eq!(endpoints(&listed), endpoints(&store.list_all().await));
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let store = InMemorySubscriptionStore::new();
        store.add("u1", subscription("https://push/all")).await;
        store
            .add(
                "u2",
                subscription("https://push/breaking").with_topics(["breaking_news"]),
            )
            .await;
        store
            .add(
                "u3",
                subscription("https://push/reporter").with_topics(["reporter_u9"]),
            )
            .await;

        assert_eq!(
            endpoints(&store.list_by_topic("breaking_news").await),
            vec!["https://push/all", "https://push/breaking"]
        );
        assert_eq!(
            endpoints(&store.list_by_topic("reporter_u9").await),
            vec!["https://push/all", "https://push/reporter"]
        );

        store.remove("u2", "https://push/breaking").await;
        assert_eq!(
            endpoints(&store.list_by_topic("breaking_news").await),
            vec!["https://push/all"]
        );
    }

    #[test]
    fn test_subscription_validation() {
        assert!(subscription("https://push/1").validate().is_ok());
        assert!(subscription("").validate().is_err());
        assert!(PushSubscription::new("https://push/1", "", "auth")
            .validate()
            .is_err());
    }
}

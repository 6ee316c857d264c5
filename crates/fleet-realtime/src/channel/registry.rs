//! Subscriber registry for message-type fan-out

use super::message::ChannelMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// Topic string that matches every message type
pub const WILDCARD: &str = "*";

/// What a subscriber listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Messages whose `type` equals the string
    Type(String),
    /// Every message
    Any,
}

impl Topic {
    pub fn of(message_type: impl Into<String>) -> Self {
        let message_type = message_type.into();
        if message_type == WILDCARD {
            Self::Any
        } else {
            Self::Type(message_type)
        }
    }
}

impl From<&str> for Topic {
    fn from(message_type: &str) -> Self {
        Self::of(message_type)
    }
}

impl From<String> for Topic {
    fn from(message_type: String) -> Self {
        Self::of(message_type)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(message_type) => f.write_str(message_type),
            Self::Any => f.write_str(WILDCARD),
        }
    }
}

/// Subscriber callback
pub type Callback = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Entry {
    id: SubscriberId,
    callback: Callback,
}

#[derive(Default)]
struct RegistryInner {
    topics: RwLock<HashMap<Topic, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, topic: &Topic, id: SubscriberId) -> bool {
        let mut topics = self.topics.write();
        let Some(entries) = topics.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}

/// Ordered callback lists keyed by topic
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic`; it runs after every callback already
    /// registered for the same topic.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        self.inner
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push(Entry {
                id,
                callback: Arc::new(callback),
            });

        Subscription {
            id,
            topic,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `message` to its type's subscribers, then to wildcard
    /// subscribers, each list in registration order.
    ///
    /// Every callback runs in isolation: a panicking subscriber is logged and
    /// the remaining ones still run. Returns the number of callbacks that
    /// panicked.
    pub fn dispatch(&self, message: &ChannelMessage) -> usize {
        let callbacks = self.matching(message);
        let mut failures = 0;

        for (topic, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                failures += 1;
                error!(
                    topic = %topic,
                    message_type = message.message_type().unwrap_or("<none>"),
                    "Realtime subscriber panicked; continuing delivery"
                );
            }
        }

        failures
    }

    /// Number of callbacks registered for `topic`
    pub fn subscriber_count(&self, topic: impl Into<Topic>) -> usize {
        self.inner
            .topics
            .read()
            .get(&topic.into())
            .map_or(0, Vec::len)
    }

    /// Total number of registrations
    pub fn len(&self) -> usize {
        self.inner.topics.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.topics.write().clear();
    }

    // Snapshot so callbacks may subscribe or unsubscribe while being run.
    fn matching(&self, message: &ChannelMessage) -> Vec<(Topic, Callback)> {
        let topics = self.inner.topics.read();
        let typed = message
            .message_type()
            .map(|message_type| Topic::Type(message_type.to_string()))
            .and_then(|topic| topics.get_key_value(&topic));
        let wildcard = topics.get_key_value(&Topic::Any);

        typed
            .into_iter()
            .chain(wildcard)
            .flat_map(|(topic, entries)| {
                entries
                    .iter()
                    .map(move |entry| (topic.clone(), Arc::clone(&entry.callback)))
            })
            .collect()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriberId,
    topic: Topic,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    /// Remove exactly this registration. Returns whether it was still
    /// registered; calling it again is harmless.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.topic, self.id),
            None => false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn message(value: serde_json::Value) -> ChannelMessage {
        ChannelMessage::from_value(value)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&ChannelMessage) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = Arc::clone(&log);
        let factory = move |name: &str| {
            let log = Arc::clone(&log_for_factory);
            let name = name.to_string();
            Box::new(move |_: &ChannelMessage| log.lock().push(name.clone()))
                as Box<dyn Fn(&ChannelMessage) + Send + Sync>
        };
        (log, factory)
    }

    #[test]
    fn test_topic_from_wildcard() {
        assert_eq!(Topic::from("*"), Topic::Any);
        assert_eq!(Topic::from("activity"), Topic::Type("activity".to_string()));
        assert_eq!(Topic::Any.to_string(), "*");
    }

    #[test]
    fn test_typed_then_wildcard_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let (log, record) = recorder();

        registry.subscribe(Topic::Any, record("any-1"));
        registry.subscribe("activity", record("activity-1"));
        registry.subscribe("telemetry", record("telemetry-1"));
        registry.subscribe("activity", record("activity-2"));
        registry.subscribe("*", record("any-2"));

        registry.dispatch(&message(json!({"type": "activity"})));

        assert_eq!(
            *log.lock(),
            vec!["activity-1", "activity-2", "any-1", "any-2"]
        );
    }

    #[test]
    fn test_untyped_message_reaches_wildcard_only() {
        let registry = SubscriberRegistry::new();
        let (log, record) = recorder();

        registry.subscribe("activity", record("activity"));
        registry.subscribe(Topic::Any, record("any"));

        registry.dispatch(&message(json!({"data": 1})));

        assert_eq!(*log.lock(), vec!["any"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_callback() {
        let registry = SubscriberRegistry::new();
        let (log, record) = recorder();

        let first = registry.subscribe("activity", record("first"));
        registry.subscribe("activity", record("second"));

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert_eq!(registry.subscriber_count("activity"), 1);

        registry.dispatch(&message(json!({"type": "activity"})));
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn test_same_closure_registered_twice_is_two_entries() {
        let registry = SubscriberRegistry::new();
        let (log, record) = recorder();
        let callback: Callback = Arc::from(record("shared"));

        let a = {
            let callback = Arc::clone(&callback);
            registry.subscribe("activity", move |m: &ChannelMessage| callback(m))
        };
        registry.subscribe("activity", move |m: &ChannelMessage| callback(m));

        a.unsubscribe();
        registry.dispatch(&message(json!({"type": "activity"})));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let (log, record) = recorder();

        registry.subscribe("activity", |_: &ChannelMessage| panic!("subscriber bug"));
        registry.subscribe("activity", record("after-panic"));
        registry.subscribe(Topic::Any, record("wildcard"));

        let failures = registry.dispatch(&message(json!({"type": "activity"})));

        assert_eq!(failures, 1);
        assert_eq!(*log.lock(), vec!["after-panic", "wildcard"]);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let registry = SubscriberRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let subscription = {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            registry.subscribe("activity", move |_: &ChannelMessage| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = slot.lock().as_ref() {
                    subscription.unsubscribe();
                }
            })
        };
        *slot.lock() = Some(subscription);

        registry.dispatch(&message(json!({"type": "activity"})));
        registry.dispatch(&message(json!({"type": "activity"})));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = SubscriberRegistry::new();
        let subscription = registry.subscribe("activity", |_: &ChannelMessage| {});
        drop(registry);
        assert!(!subscription.unsubscribe());
    }
}

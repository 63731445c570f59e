use crate::models::ConversationKey;
use crate::websocket::message_types::Envelope;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub mod connection;
pub mod message_types;
pub mod outbound;
pub mod router;
pub mod transport;

/// Unique identifier for an attached consumer context
///
/// Each tab, view or panel gets its own subscriber ID when it attaches.
/// This allows for precise cleanup when the context goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which scoped messages a subscriber wants
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// Every private and group message (inbox-style consumers)
    Global,
    /// Only messages of these conversations; broadcasts are always delivered
    Conversations(HashSet<ConversationKey>),
    /// Broadcast events only
    #[default]
    BroadcastOnly,
}

impl Scope {
    pub fn conversation(key: ConversationKey) -> Self {
        Scope::Conversations(HashSet::from([key]))
    }

    pub fn matches(&self, key: &ConversationKey) -> bool {
        match self {
            Scope::Global => true,
            Scope::Conversations(keys) => keys.contains(key),
            Scope::BroadcastOnly => false,
        }
    }
}

pub type EventSender = mpsc::Sender<Arc<Envelope>>;
pub type EventReceiver = mpsc::Receiver<Arc<Envelope>>;

/// Subscriber entry with ID, scope and delivery channel
#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    scope: Scope,
    sender: EventSender,
}

/// Outcome of a single fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Subscribers whose buffer was full; the event was dropped for them
    pub lagged: usize,
    /// Subscribers whose receiver was gone; they have been removed
    pub pruned: usize,
}

/// Registry of attached consumer contexts
///
/// Owned by the hub task. The registry only holds the sending half of each
/// subscriber's channel: a context that drops its receiver is removed on the
/// next delivery attempt without having to detach explicitly.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; returns true if it is the only one
    pub fn attach(&mut self, id: SubscriberId, scope: Scope, sender: EventSender) -> bool {
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.push(Subscriber { id, scope, sender });

        tracing::debug!(
            subscriber = %id,
            total = self.subscribers.len(),
            "subscriber attached"
        );

        self.subscribers.len() == 1
    }

    /// Remove a subscriber; returns whether it was attached
    pub fn detach(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        let removed = before != self.subscribers.len();

        if removed {
            tracing::debug!(
                subscriber = %id,
                remaining = self.subscribers.len(),
                "subscriber detached"
            );
        }
        removed
    }

    pub fn set_scope(&mut self, id: SubscriberId, scope: Scope) -> bool {
        match self.subscribers.iter_mut().find(|s| s.id == id) {
            Some(subscriber) => {
                subscriber.scope = scope;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver to every subscriber
    pub fn broadcast(&mut self, event: Envelope) -> Delivery {
        self.deliver_scoped(event, |_, _| true)
    }

    /// Deliver to one subscriber only
    pub fn deliver_to(&mut self, id: SubscriberId, event: Envelope) -> Delivery {
        self.deliver_scoped(event, |subscriber_id, _| subscriber_id == id)
    }

    /// Deliver to subscribers whose scope contains `key`
    pub fn deliver_to_conversation(&mut self, key: ConversationKey, event: Envelope) -> Delivery {
        self.deliver_scoped(event, |_, scope| scope.matches(&key))
    }

    /// Deliver to every subscriber accepted by `predicate`.
    ///
    /// Iterates over a snapshot so that registry changes made while
    /// delivering never skip or repeat a subscriber.
    pub fn deliver_scoped<P>(&mut self, event: Envelope, predicate: P) -> Delivery
    where
        P: Fn(SubscriberId, &Scope) -> bool,
    {
        let event = Arc::new(event);
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .iter()
            .filter(|s| predicate(s.id, &s.scope))
            .cloned()
            .collect();

        let mut outcome = Delivery::default();
        let mut dead = Vec::new();

        for subscriber in snapshot {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    outcome.lagged += 1;
                    tracing::warn!(
                        subscriber = %subscriber.id,
                        event = event.type_name(),
                        "subscriber buffer full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => dead.push(subscriber.id),
            }
        }

        if !dead.is_empty() {
            self.subscribers.retain(|s| !dead.contains(&s.id));
            outcome.pruned = dead.len();
            tracing::debug!(
                pruned = dead.len(),
                active = self.subscribers.len(),
                "dead subscribers cleaned up"
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupId, UserId};

    fn attach(registry: &mut SubscriberRegistry, scope: Scope) -> (SubscriberId, EventReceiver) {
        let (tx, rx) = mpsc::channel(8);
        let id = SubscriberId::new();
        registry.attach(id, scope, tx);
        (id, rx)
    }

    #[test]
    fn test_broadcast_after_detach_reaches_remaining() {
        let mut registry = SubscriberRegistry::new();
        let mut subs: Vec<_> = (0..5)
            .map(|_| attach(&mut registry, Scope::BroadcastOnly))
            .collect();

        let (gone, _) = subs.remove(2);
        assert!(registry.detach(gone));

        let outcome = registry.broadcast(Envelope::Pong);
        assert_eq!(outcome.delivered, 4);

        for (_, rx) in subs.iter_mut() {
            assert_eq!(*rx.try_recv().unwrap(), Envelope::Pong);
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_first_attach_is_reported() {
        let mut registry = SubscriberRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        assert!(registry.attach(SubscriberId::new(), Scope::Global, tx.clone()));
        assert!(!registry.attach(SubscriberId::new(), Scope::Global, tx));
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let mut registry = SubscriberRegistry::new();
        let (_, rx_a) = attach(&mut registry, Scope::BroadcastOnly);
        let (_, mut rx_b) = attach(&mut registry, Scope::BroadcastOnly);
        drop(rx_a);

        let outcome = registry.broadcast(Envelope::Pong);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.pruned, 1);
        assert_eq!(registry.len(), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_full_buffer_drops_event_for_that_subscriber_only() {
        let mut registry = SubscriberRegistry::new();
        let (tx, mut slow) = mpsc::channel(1);
        registry.attach(SubscriberId::new(), Scope::BroadcastOnly, tx);
        let (_, mut fast) = attach(&mut registry, Scope::BroadcastOnly);

        registry.broadcast(Envelope::Pong);
        let outcome = registry.broadcast(Envelope::status(true, "connected"));

        assert_eq!(outcome.lagged, 1);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(*slow.try_recv().unwrap(), Envelope::Pong);
        assert!(slow.try_recv().is_err());
        assert_eq!(*fast.try_recv().unwrap(), Envelope::Pong);
        assert!(fast.try_recv().is_ok());
    }

    #[test]
    fn test_conversation_scoping() {
        let mut registry = SubscriberRegistry::new();
        let key_42 = ConversationKey::group(GroupId(42));
        let (_, mut in_42) = attach(&mut registry, Scope::conversation(key_42));
        let (_, mut in_99) = attach(&mut registry, Scope::conversation(ConversationKey::group(GroupId(99))));
        let (_, mut global) = attach(&mut registry, Scope::Global);
        let (_, mut plain) = attach(&mut registry, Scope::BroadcastOnly);

        let event = Envelope::group_message(UserId(7), GroupId(42), "hello");
        let outcome = registry.deliver_to_conversation(key_42, event);

        assert_eq!(outcome.delivered, 2);
        assert!(in_42.try_recv().is_ok());
        assert!(global.try_recv().is_ok());
        assert!(in_99.try_recv().is_err());
        assert!(plain.try_recv().is_err());
    }

    #[test]
    fn test_deliver_to_single_subscriber() {
        let mut registry = SubscriberRegistry::new();
        let (target, mut rx_target) = attach(&mut registry, Scope::BroadcastOnly);
        let (_, mut rx_other) = attach(&mut registry, Scope::BroadcastOnly);

        registry.deliver_to(target, Envelope::Pong);

        assert!(rx_target.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn test_set_scope() {
        let mut registry = SubscriberRegistry::new();
        let (id, mut rx) = attach(&mut registry, Scope::BroadcastOnly);
        let key = ConversationKey::direct(UserId(1), UserId(2));

        registry.deliver_to_conversation(key, Envelope::private_message(UserId(1), UserId(2), "a"));
        assert!(rx.try_recv().is_err());

        assert!(registry.set_scope(id, Scope::conversation(key)));
        registry.deliver_to_conversation(key, Envelope::private_message(UserId(2), UserId(1), "b"));
        assert!(rx.try_recv().is_ok());

        assert!(!registry.set_scope(SubscriberId::new(), Scope::Global));
    }

    #[test]
    fn test_reattach_same_id_replaces_entry() {
        let mut registry = SubscriberRegistry::new();
        let id = SubscriberId::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);

        registry.attach(id, Scope::Global, tx1);
        registry.attach(id, Scope::Global, tx2);
        assert_eq!(registry.len(), 1);
    }
}

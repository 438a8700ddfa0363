//! Publish/subscribe fan-out for lifecycle notifications.
//!
//! Each owning instance (graph, orchestrator, load balancer) carries its own
//! [`EventBus`]. Subscribers receive an unbounded channel; publishing is a
//! synchronous loop over subscribers in registration order, so every
//! subscriber sees events in the order operations were issued, at most once.
//!
//! Owners publish only after their internal state change is complete.
//! Observers must not rely on events for consistency.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A list of subscriber channels for one event type.
pub struct EventBus<E> {
    subscribers: Vec<(SubscriptionId, Sender<E>)>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> (SubscriptionId, Receiver<E>) {
        let (tx, rx) = unbounded();
        let id = SubscriptionId::new();
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub fn publish(&mut self, event: E) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#![forbid(unsafe_code)]

//! Dependency sets: the publish/subscribe primitive bound to one path.
//!
//! # Invariants
//!
//! 1. A subscriber appears at most once per set (identity, not semantic
//!    equality).
//! 2. Subscribers are notified synchronously, in registration order.
//! 3. Removing a subscriber takes effect before the next notification.
//!
//! # Failure Modes
//!
//! - **Re-entrant writes**: a subscriber that writes back into the engine
//!   recurses synchronously. The engine never holds a borrow of the set while
//!   fanning out, so this is legal; unbounded cycles are cut by the engine's
//!   update depth limit.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::trace;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Subscriber`]. Clones of a subscriber share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// One change event, as delivered to subscribers.
#[derive(Debug, Clone, Copy)]
pub struct Notification<'a> {
    /// Path whose dependency set is notifying.
    pub path: &'a str,
    /// Current value (for containers, the whole post-change container).
    pub value: &'a Value,
    /// Value that was replaced; `None` for refreshes and list mutations.
    pub old: Option<&'a Value>,
    /// Provenance tag passed to the write, if any.
    pub set_by: Option<&'a str>,
}

impl Notification<'_> {
    /// Whether the write carried the given provenance tag.
    #[must_use]
    pub fn is_from(&self, actor: &str) -> bool {
        self.set_by == Some(actor)
    }
}

struct SubscriberInner {
    id: SubscriberId,
    deep: Cell<bool>,
    callback: Box<dyn Fn(&Notification<'_>)>,
}

/// A change callback with a stable identity.
///
/// Cloning yields a handle to the same subscriber, so registering a clone on a
/// set that already holds the original is a no-op.
#[derive(Clone)]
pub struct Subscriber {
    inner: Rc<SubscriberInner>,
}

impl Subscriber {
    pub fn new(callback: impl Fn(&Notification<'_>) + 'static) -> Self {
        Self {
            inner: Rc::new(SubscriberInner {
                id: SubscriberId::next(),
                deep: Cell::new(false),
                callback: Box::new(callback),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Whether this subscriber was ever registered in deep mode.
    ///
    /// Deep subscribers are re-expanded over the new subtree when their path
    /// is replaced by a fresh container.
    #[must_use]
    pub fn is_deep(&self) -> bool {
        self.inner.deep.get()
    }

    pub(crate) fn mark_deep(&self) {
        self.inner.deep.set(true);
    }

    /// Invoke the callback directly.
    pub fn call(&self, notification: &Notification<'_>) {
        (self.inner.callback)(notification);
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Subscriber {}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("deep", &self.inner.deep.get())
            .finish()
    }
}

/// Ordered set of subscribers for one path.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    subscribers: Vec<Subscriber>,
}

impl DependencySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `subscriber` unless it is already present.
    ///
    /// Returns `true` if it was added.
    pub fn depend(&mut self, subscriber: &Subscriber) -> bool {
        if self.contains(subscriber.id()) {
            return false;
        }
        self.subscribers.push(subscriber.clone());
        true
    }

    /// Remove the subscriber with the given identity.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id() != id);
        self.subscribers.len() != before
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.iter().any(|s| s.id() == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    #[must_use]
    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    /// Copy of the current subscriber list, safe to iterate while the set
    /// itself is mutated.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.subscribers.clone()
    }

    /// Notify every subscriber in registration order.
    pub fn notify(&self, notification: &Notification<'_>) {
        fan_out(&self.subscribers, notification);
    }
}

/// Deliver `notification` to each subscriber in order.
pub fn fan_out(subscribers: &[Subscriber], notification: &Notification<'_>) {
    for subscriber in subscribers {
        trace!(
            message = "kinet.notify",
            path = notification.path,
            subscriber = subscriber.id().raw(),
            set_by = ?notification.set_by
        );
        subscriber.call(notification);
    }
}

//! Observer traits and the ordered set that holds them.
//!
//! Listeners run inline on the task that produced the event: the receive
//! loop for `on_receive`/`on_disconnect`, the accept loop for `on_connect`.
//! Every registered listener is awaited in registration order before the
//! loop moves on, so a slow listener slows its connection down.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::Connection;

/// Client-side observer.
#[async_trait]
pub trait Listener<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// A record arrived from the server.
    async fn on_receive(&self, item: &T);

    /// The connection to the server ended. Called exactly once per connection.
    async fn on_disconnect(&self) {}
}

/// Server-side observer, shared by every connection of one server.
#[async_trait]
pub trait ServerListener<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// A client was accepted. Runs before any `on_receive` for that connection.
    async fn on_connect(&self, _connection: &Arc<Connection<T>>) {}

    /// A record arrived on `connection`.
    async fn on_receive(&self, connection: &Arc<Connection<T>>, item: &T);

    /// `connection` ended and has left the registry. Called exactly once per connection.
    async fn on_disconnect(&self, _connection: &Arc<Connection<T>>) {}
}

/// Ordered, duplicate-permitting collection of observers.
///
/// Dispatch works on a [`snapshot`](Self::snapshot), so listeners may be
/// added or removed (even from inside a callback) while a pass is running;
/// the change takes effect from the next event.
pub struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Append a listener; the same instance may be added more than once.
    pub fn add(&self, listener: Arc<L>) {
        self.listeners.lock().push(listener);
    }

    /// Remove the first registration of this exact instance.
    ///
    /// Returns whether anything was removed.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|l| same_instance(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Copy of the current registrations, in registration order
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.lock().clone()
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

// Compares data pointers only; vtable pointers for the same object can differ.
fn same_instance<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Tag(&'static str);

    impl Named for Tag {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn names(set: &ListenerSet<dyn Named>) -> Vec<String> {
        set.snapshot().iter().map(|l| l.name().to_string()).collect()
    }

    #[test]
    fn test_listener_set_keeps_registration_order() {
        let set: ListenerSet<dyn Named> = ListenerSet::new();
        set.add(Arc::new(Tag("a")));
        set.add(Arc::new(Tag("b")));
        set.add(Arc::new(Tag("c")));

        assert_eq!(names(&set), ["a", "b", "c"]);
    }

    #[test]
    fn test_listener_set_removes_first_instance_only() {
        let set: ListenerSet<dyn Named> = ListenerSet::new();
        let a: Arc<dyn Named> = Arc::new(Tag("a"));
        let b: Arc<dyn Named> = Arc::new(Tag("b"));
        set.add(a.clone());
        set.add(b.clone());
        set.add(a.clone());

        assert!(set.remove(&a));
        assert_eq!(names(&set), ["b", "a"]);
        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_listener_set_identity_not_equality() {
        let set: ListenerSet<dyn Named> = ListenerSet::new();
        set.add(Arc::new(Tag("a")));

        let lookalike: Arc<dyn Named> = Arc::new(Tag("a"));
        assert!(!set.remove(&lookalike));
        assert!(!set.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let set: ListenerSet<dyn Named> = ListenerSet::new();
        set.add(Arc::new(Tag("a")));
        let snapshot = set.snapshot();
        set.add(Arc::new(Tag("b")));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(set.len(), 2);
    }
}

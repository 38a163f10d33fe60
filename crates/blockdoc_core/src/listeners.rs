//! Listener registry for document notifications.
//!
//! A thread-safe publish/subscribe registry. Listeners are called in
//! registration order, only from [`ListenerRegistry::emit`], never from
//! within the call that registers them. The set of listeners is copied before
//! delivery, so a listener may subscribe or unsubscribe (itself included)
//! while an event is being delivered.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Listener function type.
///
/// Listeners receive a reference to the event and should not block for extended periods.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Thread-safe registry for managing listeners of one event type.
///
/// # Example
///
/// ```ignore
/// use blockdoc_core::listeners::ListenerRegistry;
/// use std::sync::Arc;
///
/// let registry = Arc::new(ListenerRegistry::<String>::new());
/// let subscription = ListenerRegistry::subscribe(&registry, |event: &String| {
///     println!("Event: {}", event);
/// });
///
/// registry.emit(&"hello".to_string());
/// drop(subscription); // unsubscribes
/// ```
pub struct ListenerRegistry<E> {
    listeners: RwLock<BTreeMap<SubscriptionId, Listener<E>>>,
    next_id: AtomicU64,
}

impl<E> ListenerRegistry<E> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener and return its id.
    pub fn add(&self, listener: Listener<E>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener);
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Deliver an event to every listener, in registration order.
    ///
    /// If a listener panics, it does not affect other listeners.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(event);
            }));
            if result.is_err() {
                log::error!("A document listener panicked; continuing with the remaining listeners");
            }
        }
    }

    /// Number of active listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if there are any active listeners.
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Remove all listeners.
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<E: 'static> ListenerRegistry<E> {
    /// Register a listener and return a handle that unsubscribes on drop.
    pub fn subscribe<F>(registry: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = registry.add(Arc::new(listener));
        let weak: Weak<dyn Unsubscribe> = Arc::downgrade(registry) as Weak<dyn Unsubscribe>;
        Subscription {
            id,
            registry: Some(weak),
        }
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

impl<E> Unsubscribe for ListenerRegistry<E> {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.remove(id)
    }
}

/// Handle to a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    /// The subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now. Returns `true` if the listener was still registered.
    pub fn unsubscribe(mut self) -> bool {
        self.release()
    }

    /// Keep the listener registered for the lifetime of the registry.
    pub fn detach(mut self) {
        self.registry = None;
    }

    fn release(&mut self) -> bool {
        match self.registry.take().and_then(|weak| weak.upgrade()) {
            Some(registry) => registry.unsubscribe(self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.registry.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_and_emit() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let total = Arc::new(AtomicUsize::new(0));

        let total_clone = Arc::clone(&total);
        let _sub = ListenerRegistry::subscribe(&registry, move |n: &u32| {
            total_clone.fetch_add(*n as usize, Ordering::SeqCst);
        });

        registry.emit(&2);
        registry.emit(&3);
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                ListenerRegistry::subscribe(&registry, move |_| order.lock().unwrap().push(i))
            })
            .collect();

        registry.emit(&());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        drop(subs);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let sub = ListenerRegistry::subscribe(&registry, |_| {});
        assert!(registry.has_subscribers());
        drop(sub);
        assert!(!registry.has_subscribers());
    }

    #[test]
    fn test_explicit_unsubscribe_and_detach() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let sub = ListenerRegistry::subscribe(&registry, |_| {});
        assert!(sub.unsubscribe());

        let sub = ListenerRegistry::subscribe(&registry, |_| {});
        sub.detach();
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn test_listener_can_unsubscribe_during_emit() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_clone = Arc::clone(&slot);
        let calls_clone = Arc::clone(&calls);
        let sub = ListenerRegistry::subscribe(&registry, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        registry.emit(&());
        registry.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = ListenerRegistry::subscribe(&registry, |_| panic!("listener failure"));
        let calls_clone = Arc::clone(&calls);
        let _good = ListenerRegistry::subscribe(&registry, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Arc::new(ListenerRegistry::<()>::new());
        let sub = ListenerRegistry::subscribe(&registry, |_| {});
        drop(registry);
        assert!(!sub.unsubscribe());
    }
}

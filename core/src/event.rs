use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use crossbeam_skiplist::SkipSet;

/// Represents an event that can be dispatched to listeners.
pub trait Event: fmt::Debug + Send + Sync {}

type Callback<E> = dyn Fn(&E) + Send + Sync;

struct ListenerEntry<E: Event> {
    // Weak so that dropping the `Listener` handle deregisters the callback
    callback: Weak<Callback<E>>,
    order: usize,
}

impl<E: Event> Eq for ListenerEntry<E> {}

impl<E: Event> PartialEq for ListenerEntry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl<E: Event> Ord for ListenerEntry<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order)
    }
}

impl<E: Event> PartialOrd for ListenerEntry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

static LISTENER_ORDER: AtomicUsize = AtomicUsize::new(0);

/// Listeners for one event type, called in registration order.
pub struct ListenerList<E: Event> {
    inner: SkipSet<ListenerEntry<E>>,
}

impl<E: Event + 'static> ListenerList<E> {
    pub fn new() -> Self {
        ListenerList {
            inner: SkipSet::new(),
        }
    }

    /// Registers `callback`. It stays active for as long as the returned [`Listener`] lives.
    pub fn subscribe<F>(&self, callback: F) -> Listener<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        Listener::new(self, callback)
    }

    /// Number of registered entries, including ones whose handle was dropped but that have
    /// not been pruned by a dispatch yet.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Calls every live listener in order and prunes the ones whose handle was dropped.
    ///
    /// Crate-private so that only the owner of the list can emit events.
    pub(crate) fn dispatch(&self, event: &E) {
        for entry in self.inner.iter() {
            match entry.callback.upgrade() {
                Some(callback) => callback(event),
                None => {
                    entry.remove();
                }
            }
        }
    }
}

impl<E: Event + 'static> Default for ListenerList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for ListenerList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList")
            .field("listener_count", &self.inner.len())
            .finish()
    }
}

/// An active listener registration. Dropping it deregisters the callback.
#[must_use = "the listener is deregistered as soon as the handle is dropped"]
pub struct Listener<E: Event> {
    // The list only holds a Weak; this is the strong reference
    _callback: Arc<Callback<E>>,
    order: usize,
}

impl<E: Event + 'static> Listener<E> {
    pub fn new<F>(listeners: &ListenerList<E>, callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let order = LISTENER_ORDER.fetch_add(1, Ordering::SeqCst);
        let callback: Arc<Callback<E>> = Arc::new(callback);
        listeners.inner.insert(ListenerEntry {
            callback: Arc::downgrade(&callback),
            order,
        });
        Listener {
            _callback: callback,
            order,
        }
    }
}

impl<E: Event> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("order", &self.order).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicI32;

    use super::*;

    #[derive(Debug)]
    struct Counted(i32);

    impl Event for Counted {}

    #[test]
    fn test_dispatch_reaches_every_listener() {
        let listeners: ListenerList<Counted> = ListenerList::new();
        let total = Arc::new(AtomicI32::new(0));
        let (a_total, b_total) = (total.clone(), total.clone());
        let _a = listeners.subscribe(move |e: &Counted| {
            a_total.fetch_add(e.0, Ordering::SeqCst);
        });
        let _b = listeners.subscribe(move |e: &Counted| {
            b_total.fetch_add(e.0 * 2, Ordering::SeqCst);
        });

        listeners.dispatch(&Counted(5));
        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let listeners: ListenerList<Counted> = ListenerList::new();
        let calls = Arc::new(AtomicI32::new(0));
        {
            let calls = calls.clone();
            let _temp = listeners.subscribe(move |_: &Counted| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(listeners.len(), 1);
        }
        // Cleanup happens lazily on the next dispatch
        assert_eq!(listeners.len(), 1);

        listeners.dispatch(&Counted(0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let listeners: ListenerList<Counted> = ListenerList::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<Listener<Counted>> = ["A", "B", "C"]
            .into_iter()
            .map(|name| {
                let calls = calls.clone();
                listeners.subscribe(move |_: &Counted| calls.lock().unwrap().push(name))
            })
            .collect();

        listeners.dispatch(&Counted(0));
        assert_eq!(*calls.lock().unwrap(), vec!["A", "B", "C"]);
        drop(handles);
    }
}

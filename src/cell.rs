//! Reference-stable, subscribable snapshot holder.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    id: u64,
    f: Listener<T>,
}

/// A holder that stores one value of type `T`, readable without blocking
/// writers, and fans out updates to subscribers outside any lock.
pub struct Cell<T> {
    value: RwLock<Arc<T>>,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: Mutex<u64>,
}

impl<T> Cell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(Arc::new(initial)),
            subscribers: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Returns a cheap, reference-stable handle to the current value.
    pub fn get(&self) -> Arc<T> {
        self.value.read().clone()
    }

    /// Replace the value, then notify a snapshot of subscribers without
    /// holding the subscriber lock — callers may subscribe/unsubscribe
    /// reentrantly from inside a callback without deadlocking.
    pub fn set(&self, v: T) {
        let arc = Arc::new(v);
        *self.value.write() = arc.clone();
        let snapshot: Vec<Listener<T>> = {
            let guard = self.subscribers.lock();
            guard.iter().map(|s| s.f.clone()).collect()
        };
        for f in snapshot {
            f(&arc);
        }
    }

    /// Register a listener, returning an idempotent unsubscribe closure.
    pub fn subscribe<F>(&self, f: F) -> impl Fn() + '_
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.subscribers.lock().push(Subscriber {
            id,
            f: Arc::new(f),
        });
        move || {
            let mut guard = self.subscribers.lock();
            guard.retain(|s| s.id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn get_returns_initial_value() {
        let cell = Cell::new(42);
        assert_eq!(*cell.get(), 42);
    }

    #[test]
    fn set_replaces_value_and_notifies() {
        let cell = Cell::new(0);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let _unsub = cell.subscribe(move |v| seen2.store(*v, Ordering::SeqCst));
        cell.set(7);
        assert_eq!(*cell.get(), 7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_stops_notification() {
        let cell = Cell::new(0);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let unsub = cell.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        cell.set(1);
        unsub();
        unsub();
        cell.set(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_can_subscribe_again_without_deadlock() {
        let cell = Cell::new(0);
        let extra_calls = Arc::new(AtomicUsize::new(0));
        let extra_calls2 = extra_calls.clone();
        // A self-referential subscribe-inside-callback pattern: the first
        // notification installs a second listener. `Cell::set` must not
        // hold the subscriber lock while invoking callbacks, or this
        // deadlocks.
        let cell_ref = &cell;
        let _outer = cell.subscribe(move |_| {
            let extra_calls3 = extra_calls2.clone();
            std::mem::forget(cell_ref.subscribe(move |_| {
                extra_calls3.fetch_add(1, Ordering::SeqCst);
            }));
        });
        cell.set(1);
        cell.set(2);
        assert_eq!(extra_calls.load(Ordering::SeqCst), 1);
    }
}

//! Versioned, externally polled state.
//!
//! Hosts re-read the latest value after each mutation instead of
//! diffing: every publish bumps the version and notifies watchers, even
//! when the new value compares equal to the old one.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type WatcherList = RefCell<Vec<(u64, Rc<dyn Fn()>)>>;

struct ObservableStateInner<T> {
    version: Cell<u64>,
    value: RefCell<T>,
    watchers: Rc<WatcherList>,
    next_watcher_id: Cell<u64>,
}

/// A `(version, value)` pair with an on-change callback list, confined
/// to the main context.
pub struct ObservableState<T> {
    inner: Rc<ObservableStateInner<T>>,
}

impl<T> Clone for ObservableState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> ObservableState<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(ObservableStateInner {
                version: Cell::new(0),
                value: RefCell::new(value),
                watchers: Rc::new(RefCell::new(Vec::new())),
                next_watcher_id: Cell::new(1),
            }),
        }
    }

    /// Monotonically increasing; bumped on every publish.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Publishes `value` unconditionally, bumping the version and
    /// notifying every watcher.
    pub fn replace(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.inner.version.set(self.inner.version.get() + 1);
        self.notify();
    }

    /// Registers an on-change callback. Watchers run synchronously on the
    /// publishing context; the registration unregisters on drop.
    pub fn watch(&self, callback: impl Fn() + 'static) -> ObserverRegistration {
        let id = self.inner.next_watcher_id.get();
        self.inner.next_watcher_id.set(id + 1);
        self.inner
            .watchers
            .borrow_mut()
            .push((id, Rc::new(callback)));
        ObserverRegistration {
            watchers: Rc::downgrade(&self.inner.watchers),
            id: Some(id),
        }
    }

    fn notify(&self) {
        // Snapshot the list so a watcher may register or dispose without
        // invalidating the iteration.
        let watchers: Vec<Rc<dyn Fn()>> = self
            .inner
            .watchers
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for watcher in watchers {
            watcher();
        }
    }
}

impl<T: Clone + 'static> ObservableState<T> {
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ObservableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableState")
            .field("version", &self.version())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Disposable watcher registration.
pub struct ObserverRegistration {
    watchers: Weak<WatcherList>,
    id: Option<u64>,
}

impl ObserverRegistration {
    pub fn dispose(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(watchers) = self.watchers.upgrade() {
                watchers.borrow_mut().retain(|(entry, _)| *entry != id);
            }
        }
    }
}

impl Drop for ObserverRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

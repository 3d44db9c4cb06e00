//! The navigation stack engine.
//!
//! A keyed, ordered collection of entries, each owning a
//! [`ManagedScope`] and an opaque view handle. Mutations batch into
//! transactions: the externally observable snapshot changes at most once
//! per outermost transaction, and deferred side effects (cancellations,
//! completion-hook registration) run only after the batch closes, so
//! entries merely reshuffled inside one batch are never torn down.
//!
//! Nothing here throws. Pushing onto a dead stack is dropped with a
//! severe diagnostic; popping an empty stack or removing an absent key
//! is an ordinary `false`.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use waypoint_core::{ManagedScope, ObservableState, ObserverRegistration, OrderedMap, RuntimeHandle};

use crate::key::NavKey;
use crate::registry::{self, ComponentId};

/// One stack entry: a key, the scope that owns the entry's work, and
/// the view handle built for it. The engine holds the view without ever
/// inspecting it.
pub struct StackEntry<K, V> {
    key: K,
    scope: ManagedScope,
    view: V,
}

impl<K, V> StackEntry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn scope(&self) -> &ManagedScope {
        &self.scope
    }

    pub fn view(&self) -> &V {
        &self.view
    }
}

impl<K: fmt::Debug, V> fmt::Debug for StackEntry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackEntry")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .finish()
    }
}

type DeferredAction = Box<dyn FnOnce()>;

struct StackInner<K: NavKey, V: 'static> {
    root: ManagedScope,
    runtime: RuntimeHandle,
    id: ComponentId,
    entries: OrderedMap<K, Rc<StackEntry<K, V>>>,
    tx_depth: u32,
    dirty: bool,
    deferred: Vec<DeferredAction>,
    snapshot: ObservableState<Vec<Rc<StackEntry<K, V>>>>,
}

impl<K: NavKey, V: 'static> Drop for StackInner<K, V> {
    fn drop(&mut self) {
        registry::unregister(self.id);
    }
}

/// The navigation stack. Confined to the main context; completion
/// callbacks arriving from other threads re-marshal through the runtime
/// queue and the component registry before touching it.
pub struct NavStack<K: NavKey, V: 'static> {
    inner: Rc<RefCell<StackInner<K, V>>>,
}

impl<K: NavKey, V: 'static> Clone for NavStack<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: NavKey, V: 'static> NavStack<K, V> {
    /// Builds a stack owned by `root`. When `root` finishes for any
    /// reason, the stack empties itself on the main context so no entry
    /// outlives its owning scope.
    pub fn new(root: ManagedScope, runtime: RuntimeHandle) -> Self {
        let id = registry::next_component_id();
        let inner = Rc::new(RefCell::new(StackInner {
            root: root.clone(),
            runtime: runtime.clone(),
            id,
            entries: OrderedMap::new(),
            tx_depth: 0,
            dirty: false,
            deferred: Vec::new(),
            snapshot: ObservableState::new(Vec::new()),
        }));
        registry::register(id, Box::new(Rc::downgrade(&inner)));

        root.invoke_on_completion(move |_| {
            runtime.post_to_main(move || {
                if let Some(stack) = NavStack::<K, V>::resolve(id) {
                    stack.remove_all();
                }
            });
        })
        .detach();

        Self { inner }
    }

    fn resolve(id: ComponentId) -> Option<Self> {
        registry::resolve::<Weak<RefCell<StackInner<K, V>>>>(id)
            .and_then(|weak| weak.upgrade())
            .map(|inner| Self { inner })
    }

    /// The scope this stack was built from.
    pub fn root_scope(&self) -> ManagedScope {
        self.inner.borrow().root.clone()
    }

    /// Runs `block` as one batch: however many mutations happen inside,
    /// observers see at most one snapshot change, and deferred
    /// cancellations fire only after `block` returns.
    pub fn transaction<R>(&self, block: impl FnOnce() -> R) -> R {
        self.begin();
        let result = block();
        self.end();
        result
    }

    /// Pushes `key` with an explicitly supplied scope. Dropped (with a
    /// severe diagnostic, never a panic) when the stack's root or the
    /// incoming scope is already finished. Re-pushing the key that is
    /// already topmost is a no-op. A key present elsewhere in the stack
    /// is replaced; the displaced entry is deferred-cancelled once the
    /// enclosing transaction closes.
    pub fn push(&self, key: K, scope: ManagedScope, view: impl FnOnce(&ManagedScope) -> V) -> bool {
        self.begin();
        let pushed = self.push_inner(key, scope, view);
        self.end();
        pushed
    }

    /// Convenience push: derives the entry's scope from the root, named
    /// after the key.
    pub fn push_entry(&self, key: K, view: impl FnOnce(&ManagedScope) -> V) -> bool {
        let scope = self.inner.borrow().root.child_scope(key.name());
        self.push(key, scope, view)
    }

    fn push_inner(&self, key: K, scope: ManagedScope, view: impl FnOnce(&ManagedScope) -> V) -> bool {
        {
            let inner = self.inner.borrow();
            if !inner.root.is_active() {
                log::error!(
                    "navigation stack: dropping push of {}; root scope {} is finished",
                    key.name(),
                    inner.root.label()
                );
                return false;
            }
            if !scope.is_active() {
                log::error!(
                    "navigation stack: dropping push of {}; its scope {} is already finished",
                    key.name(),
                    scope.label()
                );
                return false;
            }
            if inner.entries.last_key() == Some(&key) {
                log::debug!("navigation stack: {} is already topmost", key.name());
                return false;
            }
        }

        // The factory is opaque caller code; run it with no borrow held.
        let view = view(&scope);
        let entry = Rc::new(StackEntry {
            key: key.clone(),
            scope: scope.clone(),
            view,
        });

        let mut inner = self.inner.borrow_mut();
        let displaced = inner.entries.insert(key.clone(), entry);
        inner.dirty = true;
        log::debug!("navigation stack: pushed {}", key.name());

        if let Some(previous) = displaced {
            let reason = format!("replaced by push of {}", key.name());
            let previous_scope = previous.scope.clone();
            inner
                .deferred
                .push(Box::new(move || previous_scope.cancel(true, &reason)));
        }

        // When the entry's scope later finishes on its own, the entry
        // removes itself; the hook is registered only once the
        // transaction closes, and removal checks that the finished scope
        // still owns the key so a replaced entry's late completion can
        // never evict its successor.
        let runtime = inner.runtime.clone();
        let stack_id = inner.id;
        let serial = scope.handle().serial();
        inner.deferred.push(Box::new(move || {
            scope
                .invoke_on_completion(move |_| {
                    runtime.post_to_main(move || {
                        if let Some(stack) = NavStack::<K, V>::resolve(stack_id) {
                            stack.on_entry_scope_finished(&key, serial);
                        }
                    });
                })
                .detach();
        }));
        true
    }

    /// Removes the top entry; `false` on an empty stack.
    pub fn pop(&self) -> bool {
        self.begin();
        let popped = {
            let mut inner = self.inner.borrow_mut();
            match inner.entries.pop_last() {
                Some((key, entry)) => {
                    inner.dirty = true;
                    log::debug!("navigation stack: popped {}", key.name());
                    let scope = entry.scope.clone();
                    inner
                        .deferred
                        .push(Box::new(move || scope.cancel(true, "popped")));
                    true
                }
                None => false,
            }
        };
        self.end();
        popped
    }

    /// Removes everything after `key` (including `key` itself when
    /// `inclusive`). Removed entries are deferred-cancelled most
    /// recently removed first. Returns whether anything changed; an
    /// absent key changes nothing.
    pub fn pop_to(&self, key: &K, inclusive: bool) -> bool {
        self.begin();
        let mutated = {
            let mut inner = self.inner.borrow_mut();
            let removed = inner.entries.remove_all_after(key, inclusive);
            if removed.is_empty() {
                false
            } else {
                inner.dirty = true;
                let reason = format!("popped to {}", key.name());
                for (removed_key, entry) in removed.into_iter().rev() {
                    log::debug!("navigation stack: removing {}", removed_key.name());
                    let scope = entry.scope.clone();
                    let reason = reason.clone();
                    inner
                        .deferred
                        .push(Box::new(move || scope.cancel(true, &reason)));
                }
                true
            }
        };
        self.end();
        mutated
    }

    /// Removes `key` regardless of its position; `false` when absent.
    pub fn remove(&self, key: &K) -> bool {
        self.begin();
        let removed = {
            let mut inner = self.inner.borrow_mut();
            match inner.entries.remove(key) {
                Some(entry) => {
                    inner.dirty = true;
                    log::debug!("navigation stack: removed {}", key.name());
                    let reason = format!("removed {}", key.name());
                    let scope = entry.scope.clone();
                    inner
                        .deferred
                        .push(Box::new(move || scope.cancel(true, &reason)));
                    true
                }
                None => false,
            }
        };
        self.end();
        removed
    }

    /// Empties the stack; entries are deferred-cancelled most recent
    /// first. No-op when already empty.
    pub fn remove_all(&self) {
        self.begin();
        let first = self.inner.borrow().entries.first_key().cloned();
        if let Some(first) = first {
            self.pop_to(&first, true);
        }
        self.end();
    }

    /// Entry auto-removal after its scope finished on its own. Runs on
    /// the main context, posted from the scope's completion callback.
    fn on_entry_scope_finished(&self, key: &K, serial: u64) {
        let still_owner = {
            let inner = self.inner.borrow();
            inner
                .entries
                .get(key)
                .map_or(false, |entry| entry.scope.handle().serial() == serial)
        };
        if !still_owner {
            return;
        }
        self.begin();
        {
            let mut inner = self.inner.borrow_mut();
            if inner.entries.remove(key).is_some() {
                inner.dirty = true;
                log::debug!(
                    "navigation stack: removed {} after its scope finished",
                    key.name()
                );
            }
        }
        self.end();
    }

    fn begin(&self) {
        self.inner.borrow_mut().tx_depth += 1;
    }

    fn end(&self) {
        let (publish, deferred) = {
            let mut inner = self.inner.borrow_mut();
            inner.tx_depth -= 1;
            if inner.tx_depth > 0 {
                return;
            }
            let deferred = mem::take(&mut inner.deferred);
            let publish = if inner.dirty {
                inner.dirty = false;
                let entries: Vec<Rc<StackEntry<K, V>>> = inner.entries.values().cloned().collect();
                Some((inner.snapshot.clone(), entries))
            } else {
                None
            };
            (publish, deferred)
        };
        // Snapshot first, then deferred side effects; both with the
        // borrow released so cancellations may re-enter the runtime.
        if let Some((snapshot, entries)) = publish {
            snapshot.replace(entries);
        }
        for action in deferred {
            action();
        }
    }

    /// The committed snapshot, bottom of the stack first.
    pub fn snapshot(&self) -> Vec<Rc<StackEntry<K, V>>> {
        self.inner.borrow().snapshot.get()
    }

    pub fn snapshot_version(&self) -> u64 {
        self.inner.borrow().snapshot.version()
    }

    /// Observe snapshot publications. The callback runs synchronously on
    /// the main context after each outermost transaction that changed
    /// the stack.
    pub fn watch(&self, callback: impl Fn() + 'static) -> ObserverRegistration {
        self.inner.borrow().snapshot.watch(callback)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub fn top_key(&self) -> Option<K> {
        self.inner.borrow().entries.last_key().cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.borrow().entries.contains_key(key)
    }
}

impl<K: NavKey + fmt::Debug, V: 'static> fmt::Debug for NavStack<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("NavStack")
            .field("len", &inner.entries.len())
            .field("top", &inner.entries.last_key())
            .finish()
    }
}

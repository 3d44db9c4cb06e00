//! Exclusive selection over a fixed key space, backed by managed
//! scopes. Tab rows and state machines use this instead of a stack.
//!
//! Two strategies share a common core by explicit forwarding:
//! [`SlotSwitcher`] keeps at most one live slot and deferred-cancels the
//! outgoing one, [`RetainingSwitcher`] keeps every slot it ever built
//! alive until its parent scope terminates.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use waypoint_core::collections::map::{DefaultHashBuilder, HashMap};
use waypoint_core::{ManagedScope, ObservableState, ObserverRegistration, RuntimeHandle};

use crate::key::NavKey;
use crate::registry::{self, ComponentId};

/// A selected key's live content: the scope that owns it and the view
/// handle built for it.
pub struct ViewSlot<K, V> {
    key: K,
    scope: ManagedScope,
    view: V,
}

impl<K, V> ViewSlot<K, V> {
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

impl<K: fmt::Debug, V> fmt::Debug for ViewSlot<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSlot")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .finish()
    }
}

type ViewFactory<K, V> = Box<dyn Fn(&K, &ManagedScope) -> V>;

/// State shared by both strategies: the parent scope, the view factory,
/// and the observable selection.
struct SwitcherCore<K: NavKey, V> {
    root: ManagedScope,
    factory: ViewFactory<K, V>,
    selected: ObservableState<Option<K>>,
}

impl<K: NavKey, V: 'static> SwitcherCore<K, V> {
    fn new(root: ManagedScope, factory: ViewFactory<K, V>) -> Self {
        Self {
            root,
            factory,
            selected: ObservableState::new(None),
        }
    }

    /// Selection guard; a finished root drops the selection with a
    /// severe diagnostic instead of raising.
    fn root_alive_for(&self, key: &K) -> bool {
        if self.root.is_active() {
            return true;
        }
        log::error!(
            "view switcher: dropping selection of {}; root scope {} is finished",
            key.name(),
            self.root.label()
        );
        false
    }

    fn build_slot(&self, key: &K) -> Rc<ViewSlot<K, V>> {
        let scope = self.root.child_scope(key.name());
        let view = (self.factory)(key, &scope);
        Rc::new(ViewSlot {
            key: key.clone(),
            scope,
            view,
        })
    }

    fn publish_selection(&self, key: Option<K>) {
        self.selected.replace(key);
    }
}

struct SlotSwitcherShared<K: NavKey, V> {
    core: SwitcherCore<K, V>,
    current: RefCell<Option<Rc<ViewSlot<K, V>>>>,
    id: ComponentId,
}

impl<K: NavKey, V> Drop for SlotSwitcherShared<K, V> {
    fn drop(&mut self) {
        registry::unregister(self.id);
    }
}

/// Single-slot strategy: at most one selected key has a live scope at a
/// time. Selecting a different key deferred-cancels the previous slot
/// before the new one is built; selecting `None` cancels immediately,
/// since there is no successor to wait for.
pub struct SlotSwitcher<K: NavKey, V: 'static> {
    shared: Rc<SlotSwitcherShared<K, V>>,
}

impl<K: NavKey, V: 'static> Clone for SlotSwitcher<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<K: NavKey, V: 'static> SlotSwitcher<K, V> {
    pub fn new(
        root: ManagedScope,
        runtime: RuntimeHandle,
        factory: impl Fn(&K, &ManagedScope) -> V + 'static,
    ) -> Self {
        let id = registry::next_component_id();
        let shared = Rc::new(SlotSwitcherShared {
            core: SwitcherCore::new(root.clone(), Box::new(factory)),
            current: RefCell::new(None),
            id,
        });
        registry::register(id, Box::new(Rc::downgrade(&shared)));

        root.invoke_on_completion(move |_| {
            runtime.post_to_main(move || {
                if let Some(switcher) = SlotSwitcher::<K, V>::resolve(id) {
                    switcher.on_root_finished();
                }
            });
        })
        .detach();

        Self { shared }
    }

    fn resolve(id: ComponentId) -> Option<Self> {
        registry::resolve::<Weak<SlotSwitcherShared<K, V>>>(id)
            .and_then(|weak| weak.upgrade())
            .map(|shared| Self { shared })
    }

    /// Changes the selection. Returns whether anything changed:
    /// reselecting the current key is a no-op, and selections on a
    /// finished root are dropped.
    pub fn select(&self, key: Option<K>) -> bool {
        match key {
            Some(key) => self.select_key(key),
            None => self.clear(),
        }
    }

    fn select_key(&self, key: K) -> bool {
        {
            let current = self.shared.current.borrow();
            if current.as_ref().map(|slot| &slot.key) == Some(&key) {
                return false;
            }
        }
        if !self.shared.core.root_alive_for(&key) {
            return false;
        }

        let previous = self.shared.current.borrow_mut().take();
        if let Some(previous) = previous {
            let reason = format!("switched to {}", key.name());
            previous.scope.cancel(true, &reason);
        }

        // factory runs with no borrow held
        let slot = self.shared.core.build_slot(&key);
        *self.shared.current.borrow_mut() = Some(slot);
        self.shared.core.publish_selection(Some(key));
        true
    }

    fn clear(&self) -> bool {
        let previous = self.shared.current.borrow_mut().take();
        match previous {
            Some(previous) => {
                previous.scope.cancel(false, "deselected");
                self.shared.core.publish_selection(None);
                true
            }
            None => false,
        }
    }

    fn on_root_finished(&self) {
        let slot = self.shared.current.borrow_mut().take();
        if let Some(slot) = slot {
            slot.scope.cancel(false, "parent scope finished");
        }
        let had_selection = self.shared.core.selected.with(|key| key.is_some());
        if had_selection {
            self.shared.core.publish_selection(None);
        }
    }

    pub fn selected(&self) -> Option<K> {
        self.shared.core.selected.get()
    }

    pub fn selection_version(&self) -> u64 {
        self.shared.core.selected.version()
    }

    pub fn watch_selection(&self, callback: impl Fn() + 'static) -> ObserverRegistration {
        self.shared.core.selected.watch(callback)
    }

    pub fn current_slot(&self) -> Option<Rc<ViewSlot<K, V>>> {
        self.shared.current.borrow().clone()
    }
}

struct RetainingSwitcherShared<K: NavKey, V> {
    core: SwitcherCore<K, V>,
    slots: RefCell<HashMap<K, Rc<ViewSlot<K, V>>, DefaultHashBuilder>>,
    id: ComponentId,
}

impl<K: NavKey, V> Drop for RetainingSwitcherShared<K, V> {
    fn drop(&mut self) {
        registry::unregister(self.id);
    }
}

/// Retaining strategy: every key ever selected keeps its slot alive
/// (built lazily on first selection) until the switcher's parent scope
/// terminates, at which point all retained slots are cancelled.
pub struct RetainingSwitcher<K: NavKey, V: 'static> {
    shared: Rc<RetainingSwitcherShared<K, V>>,
}

impl<K: NavKey, V: 'static> Clone for RetainingSwitcher<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<K: NavKey, V: 'static> RetainingSwitcher<K, V> {
    pub fn new(
        root: ManagedScope,
        runtime: RuntimeHandle,
        factory: impl Fn(&K, &ManagedScope) -> V + 'static,
    ) -> Self {
        let id = registry::next_component_id();
        let shared = Rc::new(RetainingSwitcherShared {
            core: SwitcherCore::new(root.clone(), Box::new(factory)),
            slots: RefCell::new(HashMap::with_hasher(DefaultHashBuilder::default())),
            id,
        });
        registry::register(id, Box::new(Rc::downgrade(&shared)));

        root.invoke_on_completion(move |_| {
            runtime.post_to_main(move || {
                if let Some(switcher) = RetainingSwitcher::<K, V>::resolve(id) {
                    switcher.on_root_finished();
                }
            });
        })
        .detach();

        Self { shared }
    }

    fn resolve(id: ComponentId) -> Option<Self> {
        registry::resolve::<Weak<RetainingSwitcherShared<K, V>>>(id)
            .and_then(|weak| weak.upgrade())
            .map(|shared| Self { shared })
    }

    /// Selects `key`, building its slot on first use. Returns the slot,
    /// or `None` when the selection was dropped because the parent scope
    /// is finished.
    pub fn select(&self, key: K) -> Option<Rc<ViewSlot<K, V>>> {
        let existing = self.shared.slots.borrow().get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                if !self.shared.core.root_alive_for(&key) {
                    return None;
                }
                // factory runs with no borrow held
                let built = self.shared.core.build_slot(&key);
                self.shared
                    .slots
                    .borrow_mut()
                    .entry(key.clone())
                    .or_insert(built)
                    .clone()
            }
        };
        self.shared.core.publish_selection(Some(key));
        Some(slot)
    }

    /// Clears the selection while leaving every retained slot alive.
    pub fn deselect(&self) -> bool {
        let had_selection = self.shared.core.selected.with(|key| key.is_some());
        if had_selection {
            self.shared.core.publish_selection(None);
        }
        had_selection
    }

    fn on_root_finished(&self) {
        let slots: Vec<Rc<ViewSlot<K, V>>> =
            self.shared.slots.borrow_mut().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            slot.scope.cancel(false, "parent scope finished");
        }
        let had_selection = self.shared.core.selected.with(|key| key.is_some());
        if had_selection {
            self.shared.core.publish_selection(None);
        }
    }

    pub fn selected(&self) -> Option<K> {
        self.shared.core.selected.get()
    }

    pub fn selection_version(&self) -> u64 {
        self.shared.core.selected.version()
    }

    pub fn watch_selection(&self, callback: impl Fn() + 'static) -> ObserverRegistration {
        self.shared.core.selected.watch(callback)
    }

    pub fn slot(&self, key: &K) -> Option<Rc<ViewSlot<K, V>>> {
        self.shared.slots.borrow().get(key).cloned()
    }

    pub fn retained_len(&self) -> usize {
        self.shared.slots.borrow().len()
    }
}

//! Thread-local registry of main-context components.
//!
//! Scope completion callbacks fire on arbitrary threads, so they carry
//! only a component id across the thread boundary. After re-marshaling
//! to the main context they resolve the live component here. Ids whose
//! component is gone resolve to nothing.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type ComponentId = u64;

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_component_id() -> ComponentId {
    NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static COMPONENTS: RefCell<HashMap<ComponentId, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

pub(crate) fn register(id: ComponentId, entry: Box<dyn Any>) {
    COMPONENTS.with(|components| {
        components.borrow_mut().insert(id, entry);
    });
}

pub(crate) fn unregister(id: ComponentId) {
    COMPONENTS.with(|components| {
        components.borrow_mut().remove(&id);
    });
}

/// Clones the registered entry for `id` when it is a `T`. The clone is
/// taken inside the registry borrow so the caller can upgrade and use
/// it with the registry released.
pub(crate) fn resolve<T: Clone + 'static>(id: ComponentId) -> Option<T> {
    COMPONENTS.with(|components| {
        components
            .borrow()
            .get(&id)
            .and_then(|entry| entry.downcast_ref::<T>())
            .cloned()
    })
}

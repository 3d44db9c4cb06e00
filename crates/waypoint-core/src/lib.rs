#![doc = r"Core runtime pieces for the waypoint navigation framework.

A hierarchical, cancellation-propagating scope tree ([`ManagedScope`]),
the insertion-ordered map backing the navigation stack
([`OrderedMap`]), versioned externally polled state
([`ObservableState`]), and the main-context task queue ([`Runtime`])
that everything above re-marshals through."]

pub mod collections;
pub mod observable;
pub mod platform;
pub mod runtime;
pub mod scope;

pub use collections::OrderedMap;
pub use observable::{ObservableState, ObserverRegistration};
pub use platform::{RuntimeScheduler, TaskExecutor};
pub use runtime::{Runtime, RuntimeHandle};
pub use scope::{
    CompletionRegistration, FailurePolicy, ManagedScope, ScopeContext, TaskHandle,
};

//! Managed scopes: cancellable execution handles arranged in a
//! parent/child tree.
//!
//! A [`ManagedScope`] owns a [`TaskHandle`] and a set of child scopes.
//! Cancellation propagates top-down and can either take effect
//! immediately or be deferred until every currently tracked child has
//! terminated. There are no throwing paths here: cancelling an inactive
//! scope is a silent no-op and every other edge resolves to a logged
//! diagnostic.

use std::fmt;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::collections::map::{DefaultHashBuilder, HashMap};
use crate::platform::TaskExecutor;

static NEXT_SCOPE_SERIAL: AtomicU64 = AtomicU64::new(1);

fn next_scope_serial() -> u64 {
    NEXT_SCOPE_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// How a handle reacts when one of its spawned tasks panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// A failed task is logged; siblings keep running.
    #[default]
    Supervisor,
    /// A failed task finishes the whole handle.
    Strict,
}

/// Optional overrides applied when deriving a child from a scope.
#[derive(Default)]
pub struct ScopeContext {
    pub executor: Option<Arc<dyn TaskExecutor>>,
    pub policy: Option<FailurePolicy>,
}

type CompletionCallback = Box<dyn FnOnce(Option<&str>) + Send + 'static>;

struct CompletionEntry {
    id: u64,
    callback: CompletionCallback,
}

struct HandleState {
    active: bool,
    reason: Option<String>,
    callbacks: Vec<CompletionEntry>,
    next_callback_id: u64,
}

struct TaskHandleInner {
    serial: u64,
    label: String,
    policy: FailurePolicy,
    executor: Arc<dyn TaskExecutor>,
    state: Mutex<HandleState>,
}

/// A unit of concurrent execution: a label for diagnostics, a task
/// spawner, and a completion-callback list fired exactly once when the
/// handle finishes for any reason.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskHandleInner>,
}

impl TaskHandle {
    pub fn new(
        label: impl Into<String>,
        policy: FailurePolicy,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self::with_serial(next_scope_serial(), label.into(), policy, executor)
    }

    fn with_serial(
        serial: u64,
        label: String,
        policy: FailurePolicy,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskHandleInner {
                serial,
                label,
                policy,
                executor,
                state: Mutex::new(HandleState {
                    active: true,
                    reason: None,
                    callbacks: Vec::new(),
                    next_callback_id: 1,
                }),
            }),
        }
    }

    fn finished(
        serial: u64,
        label: String,
        policy: FailurePolicy,
        executor: Arc<dyn TaskExecutor>,
        reason: Option<String>,
    ) -> Self {
        let handle = Self::with_serial(serial, label, policy, executor);
        {
            let mut state = handle.inner.state.lock().unwrap();
            state.active = false;
            state.reason = reason;
        }
        handle
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Process-wide serial, part of the label and usable as an identity.
    pub fn serial(&self) -> u64 {
        self.inner.serial
    }

    pub fn policy(&self) -> FailurePolicy {
        self.inner.policy
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.inner.executor
    }

    /// True until the handle finishes; a finished handle never becomes
    /// active again.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().unwrap().active
    }

    /// The reason the handle finished, if it finished with one.
    pub fn completion_reason(&self) -> Option<String> {
        self.inner.state.lock().unwrap().reason.clone()
    }

    /// Runs `work` on the handle's executor. Work spawned on a finished
    /// handle is dropped, and work whose handle finishes before it runs
    /// is skipped (cooperative cancellation).
    pub fn spawn(&self, work: impl FnOnce() + Send + 'static) {
        if !self.is_active() {
            log::debug!("dropping task spawned on finished handle {}", self.label());
            return;
        }
        let handle = self.clone();
        self.inner.executor.execute(Box::new(move || {
            if !handle.is_active() {
                return;
            }
            if catch_unwind(AssertUnwindSafe(work)).is_err() {
                match handle.policy() {
                    FailurePolicy::Supervisor => {
                        log::warn!("task on {} panicked; siblings keep running", handle.label());
                    }
                    FailurePolicy::Strict => {
                        log::warn!("task on {} panicked; finishing the handle", handle.label());
                        handle.complete(Some("task panicked".to_string()));
                    }
                }
            }
        }));
    }

    /// Finishes the handle. Idempotent: the first call wins and fires
    /// every registered completion callback exactly once, outside the
    /// state lock.
    pub fn complete(&self, reason: Option<String>) {
        let (fired, reason) = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.active {
                return;
            }
            state.active = false;
            if state.reason.is_none() {
                state.reason = reason;
            }
            (mem::take(&mut state.callbacks), state.reason.clone())
        };
        for entry in fired {
            (entry.callback)(reason.as_deref());
        }
    }

    /// Registers `handler` to run exactly once when the handle finishes
    /// for any reason. If the handle already finished, `handler` runs
    /// immediately on the calling thread.
    pub fn invoke_on_completion(
        &self,
        handler: impl FnOnce(Option<&str>) + Send + 'static,
    ) -> CompletionRegistration {
        let id = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.active {
                let reason = state.reason.clone();
                drop(state);
                handler(reason.as_deref());
                return CompletionRegistration {
                    handle: Weak::new(),
                    id: None,
                };
            }
            let id = state.next_callback_id;
            state.next_callback_id += 1;
            state.callbacks.push(CompletionEntry {
                id,
                callback: Box::new(handler),
            });
            id
        };
        CompletionRegistration {
            handle: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("label", &self.inner.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Disposable completion-callback registration; unregisters on drop.
/// Call [`CompletionRegistration::detach`] to keep the callback
/// registered for the handle's whole life.
pub struct CompletionRegistration {
    handle: Weak<TaskHandleInner>,
    id: Option<u64>,
}

impl CompletionRegistration {
    pub fn dispose(mut self) {
        self.remove();
    }

    /// Leaves the callback registered and drops the guard.
    pub fn detach(mut self) {
        self.id = None;
    }

    fn remove(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(inner) = self.handle.upgrade() {
                inner
                    .state
                    .lock()
                    .unwrap()
                    .callbacks
                    .retain(|entry| entry.id != id);
            }
        }
    }
}

impl Drop for CompletionRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

struct ChildSet {
    scopes: HashMap<u64, ManagedScope, DefaultHashBuilder>,
    awaiting: bool,
    pending_reason: Option<String>,
    /// Set at the moment termination becomes inevitable; never unset.
    /// Serializes the activity check in `child_scope` against a racing
    /// cancel on another thread.
    closed: bool,
}

impl ChildSet {
    fn new(closed: bool) -> Self {
        Self {
            scopes: HashMap::with_hasher(DefaultHashBuilder::default()),
            awaiting: false,
            pending_reason: None,
            closed,
        }
    }
}

struct ManagedScopeInner {
    handle: TaskHandle,
    children: Mutex<ChildSet>,
}

impl ManagedScopeInner {
    /// The single place where deferred cancellation completes. Called
    /// from a child's completion callback, on whatever context the child
    /// finished on.
    fn unregister_child(inner: &Arc<Self>, serial: u64) {
        let reason = {
            let mut children = inner.children.lock().unwrap();
            children.scopes.remove(&serial);
            if children.closed
                || !inner.handle.is_active()
                || !children.awaiting
                || !children.scopes.is_empty()
            {
                return;
            }
            children.awaiting = false;
            children.closed = true;
            children.pending_reason.take()
        };
        inner.handle.complete(reason);
    }
}

/// A cancellable execution context that can own and await child
/// execution contexts.
#[derive(Clone)]
pub struct ManagedScope {
    inner: Arc<ManagedScopeInner>,
}

impl ManagedScope {
    /// A top-level scope; everything else is derived from one of these.
    pub fn root(name: &str, executor: Arc<dyn TaskExecutor>) -> Self {
        Self::root_with_policy(name, FailurePolicy::default(), executor)
    }

    pub fn root_with_policy(
        name: &str,
        policy: FailurePolicy,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let serial = next_scope_serial();
        let label = format!("{name}#{serial}");
        Self {
            inner: Arc::new(ManagedScopeInner {
                handle: TaskHandle::with_serial(serial, label, policy, executor),
                children: Mutex::new(ChildSet::new(false)),
            }),
        }
    }

    fn terminated(serial: u64, label: String, policy: FailurePolicy, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            inner: Arc::new(ManagedScopeInner {
                handle: TaskHandle::finished(
                    serial,
                    label,
                    policy,
                    executor,
                    Some("parent already finished".to_string()),
                ),
                children: Mutex::new(ChildSet::new(true)),
            }),
        }
    }

    pub fn label(&self) -> &str {
        self.inner.handle.label()
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.inner.handle
    }

    pub fn is_active(&self) -> bool {
        self.inner.handle.is_active()
    }

    /// Number of children that have not yet terminated.
    pub fn child_count(&self) -> usize {
        self.inner.children.lock().unwrap().scopes.len()
    }

    pub fn spawn(&self, work: impl FnOnce() + Send + 'static) {
        self.inner.handle.spawn(work);
    }

    pub fn invoke_on_completion(
        &self,
        handler: impl FnOnce(Option<&str>) + Send + 'static,
    ) -> CompletionRegistration {
        self.inner.handle.invoke_on_completion(handler)
    }

    /// A bare child execution handle: labeled like a child scope but not
    /// tracked, so it cannot defer this scope's cancellation.
    pub fn child_handle(&self, name: &str, ctx: ScopeContext) -> TaskHandle {
        let serial = next_scope_serial();
        let label = format!("{}/{}#{}", self.label(), name, serial);
        let executor = ctx
            .executor
            .unwrap_or_else(|| self.inner.handle.executor().clone());
        let policy = ctx.policy.unwrap_or_else(|| self.inner.handle.policy());
        if self.is_active() {
            TaskHandle::with_serial(serial, label, policy, executor)
        } else {
            TaskHandle::finished(
                serial,
                label,
                policy,
                executor,
                Some("parent already finished".to_string()),
            )
        }
    }

    pub fn child_scope(&self, name: &str) -> ManagedScope {
        self.child_scope_in(name, ScopeContext::default())
    }

    /// Derives a child scope. If this scope is already inactive the child
    /// is returned pre-terminated and is registered nowhere. Otherwise it
    /// joins the active-children set and a completion callback on its
    /// handle arranges the unregistration once it terminates.
    pub fn child_scope_in(&self, name: &str, ctx: ScopeContext) -> ManagedScope {
        let serial = next_scope_serial();
        let label = format!("{}/{}#{}", self.label(), name, serial);
        let executor = ctx
            .executor
            .unwrap_or_else(|| self.inner.handle.executor().clone());
        let policy = ctx.policy.unwrap_or_else(|| self.inner.handle.policy());

        let child = {
            let mut children = self.inner.children.lock().unwrap();
            if children.closed || !self.inner.handle.is_active() {
                drop(children);
                log::debug!("deriving already-terminated child {label}");
                return Self::terminated(serial, label, policy, executor);
            }
            let child = Self {
                inner: Arc::new(ManagedScopeInner {
                    handle: TaskHandle::with_serial(serial, label, policy, executor),
                    children: Mutex::new(ChildSet::new(false)),
                }),
            };
            children.scopes.insert(serial, child.clone());
            child
        };

        let parent = Arc::downgrade(&self.inner);
        child
            .inner
            .handle
            .invoke_on_completion(move |_| {
                if let Some(parent) = parent.upgrade() {
                    ManagedScopeInner::unregister_child(&parent, serial);
                }
            })
            .detach();
        child
    }

    /// Cancels the scope.
    ///
    /// With `await_children == false` (or with no live children) the
    /// scope terminates now: the child set is drained, every drained
    /// child is cancelled immediately with the same reason, and the
    /// handle completes. With `await_children == true` and live
    /// children, the request is only recorded; termination happens once
    /// the last child unregisters. A previously stored non-blank reason
    /// wins over later ones. Cancelling an inactive scope is a no-op.
    pub fn cancel(&self, await_children: bool, reason: &str) {
        let (drained, final_reason) = {
            let mut children = self.inner.children.lock().unwrap();
            if children.closed || !self.inner.handle.is_active() {
                return;
            }
            if await_children && !children.scopes.is_empty() {
                children.awaiting = true;
                if blank(children.pending_reason.as_deref()) {
                    children.pending_reason = Some(reason.to_string());
                }
                return;
            }
            children.closed = true;
            children.awaiting = false;
            let stored = children
                .pending_reason
                .take()
                .filter(|r| !blank(Some(r.as_str())));
            let final_reason = stored.unwrap_or_else(|| reason.to_string());
            (mem::take(&mut children.scopes), final_reason)
        };
        for (_, child) in drained {
            child.cancel(false, &final_reason);
        }
        self.inner.handle.complete(Some(final_reason));
    }
}

fn blank(reason: Option<&str>) -> bool {
    reason.map_or(true, |r| r.trim().is_empty())
}

impl fmt::Debug for ManagedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedScope")
            .field("label", &self.label())
            .field("active", &self.is_active())
            .field("children", &self.child_count())
            .finish()
    }
}

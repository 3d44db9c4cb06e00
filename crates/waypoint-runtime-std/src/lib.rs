//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `waypoint-core`. Applications
//! construct a [`StdRuntime`], drive its main queue from their event
//! loop, and derive every scope from [`StdRuntime::root_scope`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use waypoint_core::{ManagedScope, Runtime, RuntimeHandle, RuntimeScheduler, TaskExecutor};

/// Executor that runs each task on its own named `std` thread. Thread
/// isolation doubles as panic isolation: a panicking task unwinds its
/// own thread only.
#[derive(Default)]
pub struct StdTaskExecutor;

impl TaskExecutor for StdTaskExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        let spawned = thread::Builder::new()
            .name("waypoint-task".to_string())
            .spawn(task);
        if let Err(err) = spawned {
            log::error!("failed to spawn background task thread: {err}");
        }
    }
}

/// Scheduler that records flush requests and pokes an optional waker.
pub struct StdScheduler {
    flush_requested: AtomicBool,
    waker: RwLock<Option<Arc<dyn Fn() + Send + Sync + 'static>>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            flush_requested: AtomicBool::new(false),
            waker: RwLock::new(None),
        }
    }

    /// Returns whether a queue flush has been requested since the last
    /// call.
    pub fn take_flush_request(&self) -> bool {
        self.flush_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker invoked whenever main-context work is posted.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self.waker.write().unwrap() = Some(Arc::new(waker));
    }

    /// Clears any registered waker.
    pub fn clear_waker(&self) {
        *self.waker.write().unwrap() = None;
    }

    fn wake(&self) {
        let waker = self.waker.read().unwrap().clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field(
                "flush_requested",
                &self.flush_requested.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule(&self) {
        self.flush_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Convenience container bundling the standard scheduler, executor, and
/// runtime queue.
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    executor: Arc<StdTaskExecutor>,
    runtime: Runtime,
}

impl StdRuntime {
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let executor = Arc::new(StdTaskExecutor);
        let runtime = Runtime::new(scheduler.clone(), executor.clone());
        Self {
            scheduler,
            executor,
            runtime,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// A top-level scope running on the standard executor.
    pub fn root_scope(&self, name: &str) -> ManagedScope {
        ManagedScope::root(name, self.executor.clone())
    }

    /// Drains queued main-context work on the calling thread. Hosts call
    /// this from the loop that owns navigation state.
    pub fn pump(&self) {
        self.runtime.drain_main_tasks();
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.runtime.has_pending_tasks()
    }

    pub fn take_flush_request(&self) -> bool {
        self.scheduler.take_flush_request()
    }

    pub fn scheduler(&self) -> Arc<StdScheduler> {
        self.scheduler.clone()
    }

    pub fn executor(&self) -> Arc<StdTaskExecutor> {
        self.executor.clone()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

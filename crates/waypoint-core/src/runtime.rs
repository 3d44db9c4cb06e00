//! The runtime's main-context task queue.
//!
//! All ordered-map, stack-snapshot, and selection state is owned by one
//! logical "main" context. Scope completion callbacks fire on arbitrary
//! threads; before touching any of that state they post a closure here
//! through a [`RuntimeHandle`] and the host drains the queue from its
//! main loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use crate::platform::{RuntimeScheduler, TaskExecutor};

type MainTask = Box<dyn FnOnce() + Send + 'static>;

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    executor: Arc<dyn TaskExecutor>,
    main_tasks: Mutex<VecDeque<MainTask>>,
}

impl RuntimeInner {
    fn post(&self, task: MainTask) {
        self.main_tasks.lock().unwrap().push_back(task);
        self.scheduler.schedule();
    }

    fn drain(&self) {
        // Tasks posted while draining run in the same drain.
        loop {
            let task = self.main_tasks.lock().unwrap().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn has_tasks(&self) -> bool {
        !self.main_tasks.lock().unwrap().is_empty()
    }
}

/// Owns the main-context queue. The host keeps the `Runtime` alive and
/// calls [`Runtime::drain_main_tasks`] from the thread that owns
/// navigation state.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                scheduler,
                executor,
                main_tasks: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Arc::downgrade(&self.inner))
    }

    /// Runs every queued main-context task on the calling thread.
    pub fn drain_main_tasks(&self) {
        self.inner.drain();
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.inner.has_tasks()
    }

    /// The background executor scope work runs on.
    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        self.inner.executor.clone()
    }
}

/// Cheap, cloneable, thread-safe reference to a [`Runtime`]. Posting
/// through a handle whose runtime is gone drops the task.
#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    pub fn post_to_main(&self, task: impl FnOnce() + Send + 'static) {
        match self.0.upgrade() {
            Some(inner) => inner.post(Box::new(task)),
            None => log::trace!("dropping main-context task posted through a dead runtime handle"),
        }
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_tasks())
            .unwrap_or(false)
    }

    pub fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        self.0.upgrade().map(|inner| inner.executor.clone())
    }
}

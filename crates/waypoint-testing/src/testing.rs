//! A deterministic, single-threaded host for driving waypoint
//! components in tests.
//!
//! Background work queues in a [`QueueExecutor`] instead of running on
//! real threads, and [`TestHost::pump`] alternates background execution
//! with main-queue drains until the system is quiescent. Everything
//! runs on the test thread, so assertions can interleave anywhere.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use waypoint_core::{ManagedScope, Runtime, RuntimeHandle, RuntimeScheduler, TaskExecutor};

type QueuedTask = Box<dyn FnOnce() + Send + 'static>;

/// Executor that queues background tasks for manual execution.
#[derive(Default)]
pub struct QueueExecutor {
    tasks: Mutex<VecDeque<QueuedTask>>,
}

impl QueueExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Runs the oldest queued task; `false` when the queue is empty.
    pub fn run_next(&self) -> bool {
        let task = self.tasks.lock().unwrap().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks (including ones they enqueue) until the queue
    /// empties; returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl TaskExecutor for QueueExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.tasks.lock().unwrap().push_back(task);
    }
}

/// Scheduler that only counts flush requests.
#[derive(Default)]
pub struct CountingScheduler {
    requests: AtomicUsize,
}

impl CountingScheduler {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RuntimeScheduler for CountingScheduler {
    fn schedule(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bundle of runtime, queued executor, and counting scheduler.
pub struct TestHost {
    scheduler: Arc<CountingScheduler>,
    executor: Arc<QueueExecutor>,
    runtime: Runtime,
}

impl TestHost {
    pub fn new() -> Self {
        let scheduler = Arc::new(CountingScheduler::default());
        let executor = Arc::new(QueueExecutor::new());
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

    /// A top-level scope whose work queues in this host's executor.
    pub fn root_scope(&self, name: &str) -> ManagedScope {
        ManagedScope::root(name, self.executor.clone())
    }

    pub fn scheduler(&self) -> Arc<CountingScheduler> {
        self.scheduler.clone()
    }

    pub fn executor(&self) -> Arc<QueueExecutor> {
        self.executor.clone()
    }

    /// Drains only the main-context queue.
    pub fn drain_main(&self) {
        self.runtime.drain_main_tasks();
    }

    /// Alternates background execution and main-queue drains until both
    /// are empty.
    pub fn pump(&self) {
        loop {
            self.executor.run_all();
            self.runtime.drain_main_tasks();
            if self.executor.pending() == 0 && !self.runtime.has_pending_tasks() {
                break;
            }
        }
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

//! Platform abstraction traits for waypoint runtime services.
//!
//! These traits allow the runtime to delegate scheduling and task
//! execution to the host, enabling integration with different
//! environments without depending directly on `std` threading APIs.

/// Runs scope work on a background execution context.
///
/// Implementations must isolate panics so that one task's failure cannot
/// take down unrelated tasks, and must be safe to use from multiple
/// threads.
pub trait TaskExecutor: Send + Sync {
    /// Execute `task` on some background context owned by the host.
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Schedules main-context work for the waypoint runtime.
///
/// Whenever work is posted to the runtime's main queue from an arbitrary
/// thread, the runtime calls [`RuntimeScheduler::schedule`] so the host
/// knows to drain the queue from the thread that owns navigation state.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host drain the runtime's main-context queue soon.
    fn schedule(&self);
}

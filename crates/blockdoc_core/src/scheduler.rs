//! Delayed task execution.
//!
//! The sync bridge never owns a timer. It asks a [`Scheduler`] to run a task
//! later (the text debounce, outbound delivery) and keeps the returned
//! [`TaskHandle`] to cancel it. [`ManualScheduler`] runs tasks against a
//! virtual clock that tests advance explicitly; with the `tokio` feature,
//! [`TokioScheduler`] runs them on a tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `task` once, no earlier than `delay` from now, unless the returned
    /// handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

/// Cancellation handle for a scheduled task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// A fresh, not yet cancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running. Has no effect once it ran.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct ScheduledTask {
    due: Duration,
    seq: u64,
    task: Task,
    handle: TaskHandle,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    queue: Vec<ScheduledTask>,
}

/// A scheduler driven by a virtual clock.
///
/// Nothing runs until [`advance`](Self::advance) is called. Tasks run in
/// order of due time, ties broken by scheduling order, and a task scheduled
/// by a running task runs in the same `advance` call if it falls due.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// A scheduler at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of tasks waiting to run (cancelled ones excluded).
    pub fn pending_count(&self) -> usize {
        self.lock()
            .queue
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.lock();
                let position = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i);
                match position {
                    Some(i) => {
                        let task = state.queue.swap_remove(i);
                        state.now = state.now.max(task.due);
                        Some(task)
                    }
                    None => None,
                }
            };
            let Some(scheduled) = next else {
                break;
            };
            // Run outside the lock so the task may schedule more work
            if !scheduled.handle.is_cancelled() {
                (scheduled.task)();
                ran += 1;
            }
        }
        let mut state = self.lock();
        state.now = state.now.max(target);
        state.queue.retain(|t| !t.handle.is_cancelled());
        ran
    }

    /// Run every task that is already due without moving the clock.
    pub fn run_until_idle(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.queue.push(ScheduledTask {
            due,
            seq,
            task,
            handle: handle.clone(),
        });
        handle
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Runs tasks on a tokio runtime.
#[cfg(all(feature = "tokio", not(target_arch = "wasm32")))]
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
}

#[cfg(all(feature = "tokio", not(target_arch = "wasm32")))]
impl TokioScheduler {
    /// Schedule onto the given runtime.
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Schedule onto the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(all(feature = "tokio", not(target_arch = "wasm32")))]
impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let guard = handle.clone();
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !guard.is_cancelled() {
                task();
            }
        });
        handle
    }
}

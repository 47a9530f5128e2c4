//! Cancellable delayed tasks.
//!
//! # Responsibilities
//! - Run a future after a delay on the runtime captured at construction
//! - Hand back a handle that can cancel the task before (or while) it runs
//! - Keep at most one outstanding task per code path ([`TaskSlot`])
//!
//! # Design Decisions
//! - The runtime handle is looked up once, when the owning client is built,
//!   so timers can be scheduled from event handlers and non-async code
//! - Dropping a [`TaskHandle`] does not cancel it; only `cancel` does. A
//!   reconnect task replaces its own slot entry while it is still running.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::AbortHandle;

/// Delayed-task scheduler bound to a tokio runtime.
#[derive(Debug, Clone)]
pub struct Scheduler {
    runtime: Handle,
}

impl Scheduler {
    /// Bind to the runtime the caller is running on.
    pub fn from_current() -> Result<Self, TryCurrentError> {
        Ok(Self {
            runtime: Handle::try_current()?,
        })
    }

    /// Run `task` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let join = self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
        TaskHandle {
            abort: join.abort_handle(),
        }
    }

    /// Run `task` immediately in the background.
    pub fn spawn<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule(Duration::ZERO, task)
    }
}

/// Handle to a scheduled task.
#[derive(Debug)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    /// Cancel the task. A no-op once it has finished.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Holder for the single outstanding task of one code path.
#[derive(Debug, Default)]
pub struct TaskSlot {
    current: Mutex<Option<TaskHandle>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle`, cancelling whatever was there before.
    pub fn replace(&self, handle: TaskHandle) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Store `handle` without cancelling the previous entry.
    ///
    /// Used by a task that schedules its own successor.
    pub fn hand_over(&self, handle: TaskHandle) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Cancel and forget the outstanding task, if any.
    pub fn cancel(&self) -> bool {
        let taken = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        match taken {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.cancel();
                pending
            }
            None => false,
        }
    }

    /// True while a task is stored and has not finished.
    pub fn is_pending(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

/// NextWake is a deadline handed from a timer handle (on the actor task) to its timer task.
///
/// The handle `push()`es a new deadline. The task `take()`s it before sleeping, so finding it
/// empty after waking means nobody pushed in the meantime and the timer has expired.
#[derive(Clone, Default)]
pub(super) struct NextWake {
    slot: Arc<Mutex<Option<Instant>>>,
}

impl NextWake {
    pub(super) fn push(&self, deadline: Instant) {
        self.lock().replace(deadline);
    }

    pub(super) fn take(&self) -> Option<Instant> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        // Only ever holds a plain value, so a poisoned lock still has usable contents.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Dropping the `TaskGuard` tells the paired `Cancelled` that its timer task should exit.
pub(super) struct TaskGuard {
    cancelled: Arc<AtomicBool>,
}

pub(super) struct Cancelled {
    cancelled: Arc<AtomicBool>,
}

pub(super) fn task_guard() -> (TaskGuard, Cancelled) {
    let flag = Arc::new(AtomicBool::new(false));
    (
        TaskGuard {
            cancelled: flag.clone(),
        },
        Cancelled { cancelled: flag },
    )
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Cancelled {
    pub(super) fn is_set(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
